// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace-level scenario tests: the full stack wired together over the
//! loopback transport, a memory store, and a fake clock.

use aviary_core::test_support::FakeInstance;
use aviary_core::{
    ApplyError, ChangeSet, Entity, EntityId, FakeClock, MachineId, PropertyDef, RingLogger, Schema,
    Value,
};
use aviary_engine::{
    FramePhase, ScheduleParams, Scheduler, SchedulerSettings, SharedScheduler, StartParams,
    StateDef, SubMachineConfig, TransitionParams,
};
use aviary_storage::{MemoryStore, PersistConfig, PersistenceController};
use aviary_wire::{loopback, Broadcast};
use aviary_runtime::{
    CreateEntityParams, CreateMachineParams, EntityDef, MachineDef, Orchestrator,
    OrchestratorConfig, OrchestratorDeps,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn door_defs() -> Vec<EntityDef> {
    let schema = Schema::new()
        .with("IsOpen", PropertyDef::new("boolean").replicate())
        .with("Secret", PropertyDef::new("number"))
        .with("Value", PropertyDef::new("number").persist());
    vec![EntityDef::new("Door", schema).apply(|_: &Entity, _: &ChangeSet| Ok::<(), ApplyError>(()))]
}

fn stack(
    machine_defs: Vec<MachineDef>,
) -> (Arc<Orchestrator>, SharedScheduler, FakeClock) {
    let clock = FakeClock::new();
    let scheduler = Scheduler::new(Arc::new(clock.clone()), SchedulerSettings::default());
    let orch = Orchestrator::new(
        OrchestratorConfig::server(),
        OrchestratorDeps {
            scheduler: Arc::clone(&scheduler),
            clock: Arc::new(clock.clone()),
            logger: RingLogger::default(),
            entity_defs: door_defs(),
            machine_defs,
            store: None,
            resolver: None,
        },
    );
    orch.register_components();
    (orch, scheduler, clock)
}

fn door(orch: &Arc<Orchestrator>, id: &str) -> (Arc<Entity>, Arc<FakeInstance>) {
    let instance = FakeInstance::new(format!("i-{id}"), "Door");
    let entity = orch
        .create_entity(CreateEntityParams::new("Door", instance.handle()).entity_id(id))
        .unwrap();
    (entity, instance)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// Commit and replicate: only the replicate-flagged delta crosses the
// wire; the authoritative record and the StateUpdated snapshot carry
// both fields.
#[tokio::test(start_paused = true)]
async fn commit_and_replicate() {
    let (orch, _scheduler, _clock) = stack(Vec::new());
    let (transport, client) = loopback(16);
    let _token = orch.run_server(transport);
    let mut broadcasts = client.subscribe();

    let (entity, _instance) = door(&orch, "door-1");
    let snapshots: Arc<Mutex<Vec<ChangeSet>>> = Arc::default();
    let sink = Arc::clone(&snapshots);
    entity.manage(entity.state_updated().connect(move |c| sink.lock().push(c.clone())));

    entity.set("IsOpen", true).unwrap();
    entity.set("Secret", 7_i64).unwrap();
    assert!(entity.commit(None));
    settle().await;

    let data = entity.data_snapshot();
    assert_eq!(data.get("IsOpen"), Some(&Value::Bool(true)));
    assert_eq!(data.get("Secret"), Some(&Value::Num(7.0)));

    let fired = snapshots.lock();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].len(), 2);

    match broadcasts.try_recv().unwrap() {
        Broadcast::EntityUpdate { entity_id, packet } => {
            assert_eq!(entity_id, EntityId::new("door-1"));
            assert_eq!(packet.len(), 1);
            assert_eq!(packet.get("IsOpen"), Some(&Value::Bool(true)));
        }
    }
}

// A deferred transition is invalidated by the one that lands after it:
// only A -> C is ever observed.
#[tokio::test(start_paused = true)]
async fn wait_span_invalidation() {
    let machines = vec![MachineDef::new("Waiter").register_states(|machine| {
        for name in ["A", "B", "C"] {
            let _ = machine.add_state(name, StateDef::function(|_, _| Ok(None)), None);
        }
    })];
    let (orch, scheduler, clock) = stack(machines);

    let machine =
        orch.create_state_machine(CreateMachineParams::new("Waiter").machine_id("m-1")).unwrap();
    let changes: Arc<Mutex<Vec<(String, Option<String>)>>> = Arc::default();
    let sink = Arc::clone(&changes);
    machine.manage(
        machine
            .state_changed()
            .connect(move |c| sink.lock().push((c.new.clone(), c.old.clone()))),
    );

    machine.start(StartParams::new("A")).unwrap();
    machine.set_wait_span(1.0);
    machine.change_state(TransitionParams::new("B")).unwrap();
    machine.change_state(TransitionParams::new("C")).unwrap();

    clock.advance(Duration::from_secs(1));
    scheduler.step(&FramePhase::Update);

    assert_eq!(machine.state().as_deref(), Some("C"));
    let observed = changes.lock();
    assert_eq!(*observed, vec![("A".to_string(), None), ("C".to_string(), Some("A".to_string()))]);
}

// Entering a terminal state completes the machine and the orchestrator
// drops it from the registry.
#[tokio::test(start_paused = true)]
async fn terminal_auto_finish() {
    let machines = vec![MachineDef::new("Job").terminal_states(["Done"]).register_states(
        |machine| {
            let _ = machine.add_state("Work", StateDef::function(|_, _| Ok(None)), None);
        },
    )];
    let (orch, _scheduler, _clock) = stack(machines);

    let machine =
        orch.create_state_machine(CreateMachineParams::new("Job").machine_id("m-1")).unwrap();
    let completed = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let sink = Arc::clone(&completed);
    std::mem::forget(machine.completed().connect(move |_| {
        sink.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }));

    machine.start(StartParams::new("Work")).unwrap();
    machine.change_state(TransitionParams::new("Done")).unwrap();

    assert_eq!(completed.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(orch.get_state_machine(&MachineId::new("m-1")).is_none());
    assert!(orch.get_state_machines().is_empty());
}

// Under a tight budget the high-priority task runs first, the starved
// one ages, and nothing is dropped.
#[tokio::test(start_paused = true)]
async fn scheduler_priority_vs_aging() {
    let clock = FakeClock::new();
    let scheduler = Scheduler::new(
        Arc::new(clock.clone()),
        SchedulerSettings { frame_budget: Some(0.002), ..SchedulerSettings::default() },
    );
    let log: Arc<Mutex<Vec<&str>>> = Arc::default();

    let hi_log = Arc::clone(&log);
    scheduler
        .schedule(
            ScheduleParams::new("high", move || {
                hi_log.lock().push("high");
                Ok(())
            })
            .priority(10.0),
        )
        .unwrap();

    let lo_log = Arc::clone(&log);
    let lo_clock = clock.clone();
    scheduler
        .schedule(
            ScheduleParams::new("low", move || {
                lo_log.lock().push("low");
                // Busy work past the 2 ms budget.
                lo_clock.advance(Duration::from_millis(3));
                Ok(())
            })
            .priority(1.0),
        )
        .unwrap();

    let report = scheduler.step(&FramePhase::Update);
    assert_eq!(*log.lock(), vec!["high", "low"]);
    assert_eq!(report.dispatched, 2);

    // Recreate contention: low is rescheduled and starved by a burner.
    let starve_log = Arc::clone(&log);
    scheduler
        .schedule(
            ScheduleParams::new("low", move || {
                starve_log.lock().push("low-again");
                Ok(())
            })
            .priority(1.0),
        )
        .unwrap();
    let burner_clock = clock.clone();
    scheduler
        .schedule(
            ScheduleParams::new("burner", move || {
                burner_clock.advance(Duration::from_millis(3));
                Ok(())
            })
            .priority(10.0),
        )
        .unwrap();

    scheduler.step(&FramePhase::Update);
    let low = scheduler.get("low").unwrap();
    assert_eq!(low.consecutive_delays, 1);
    assert_eq!(low.effective_priority, 1.0 + 1.0 * 1.0);

    // Not dropped: it runs once contention clears.
    scheduler.step(&FramePhase::Update);
    assert!(log.lock().contains(&"low-again"));
}

// Lock enforcement: the wrong owner cannot commit; the right one can.
#[tokio::test(start_paused = true)]
async fn lock_enforcement() {
    let (orch, _scheduler, _clock) = stack(Vec::new());
    let (entity, _instance) = door(&orch, "door-1");

    assert!(entity.acquire_lock("A"));
    entity.set("Value", 5_i64).unwrap();

    assert!(!entity.commit(Some("B")));
    assert!(entity.data_snapshot().get("Value").is_none());

    assert!(entity.commit(Some("A")));
    assert_eq!(entity.data_snapshot().get("Value"), Some(&Value::Num(5.0)));
}

// HFSM routing: the child's completion drives the parent transition and
// the child is torn down before the parent enters the follow-up state.
#[tokio::test(start_paused = true)]
async fn hfsm_routing() {
    let order: Arc<Mutex<Vec<String>>> = Arc::default();
    let child_order = Arc::clone(&order);

    let child_class = Arc::new(
        aviary_engine::MachineClass::new("Worker").register(move |machine| {
            let log = Arc::clone(&child_order);
            let _ = machine.add_state(
                "Run",
                StateDef::function(move |m, _| {
                    log.lock().push("child-run".into());
                    m.finish();
                    Ok(None)
                }),
                None,
            );
        }),
    );

    let parent_order = Arc::clone(&order);
    let machines = vec![MachineDef::new("Parent").register_states(move |machine| {
        let _ = machine.add_sub_machine(
            "Work",
            Arc::clone(&child_class),
            SubMachineConfig::new("Run").on_completed("Next").store_key("worker"),
        );
        let log = Arc::clone(&parent_order);
        let probe = Arc::downgrade(machine);
        let _ = machine.add_state(
            "Next",
            StateDef::function(move |_, _| {
                let cleared = probe
                    .upgrade()
                    .is_some_and(|m| m.context_get("worker").is_none());
                if cleared {
                    log.lock().push("parent-next".into());
                }
                Ok(None)
            }),
            None,
        );
    })];
    let (orch, _scheduler, _clock) = stack(machines);

    let parent =
        orch.create_state_machine(CreateMachineParams::new("Parent").machine_id("p-1")).unwrap();
    parent.start(StartParams::new("Work")).unwrap();

    assert_eq!(parent.state().as_deref(), Some("Next"));
    assert_eq!(*order.lock(), vec!["child-run", "parent-next"]);
}

// Persist round trip through the store: only persist-flagged fields
// survive, into a fresh entity.
#[tokio::test(start_paused = true)]
async fn persistence_round_trip() {
    let (orch, _scheduler, _clock) = stack(Vec::new());
    let store = Arc::new(MemoryStore::new());
    let persistence = PersistenceController::new(
        Arc::clone(&store) as Arc<dyn aviary_storage::KvStore>,
        PersistConfig { key_prefix: Some("doors".into()) },
    );

    let (entity, _instance) = door(&orch, "door-1");
    entity.set("Value", 42_i64).unwrap();
    entity.set("IsOpen", true).unwrap();
    assert!(entity.commit(None));

    persistence.save(&entity, "door-1", None).await.unwrap();

    let (fresh, _instance2) = door(&orch, "door-2");
    persistence.load(&fresh, "door-1").await.unwrap().unwrap();
    assert_eq!(fresh.get("Value"), Some(Value::Num(42.0)));
    assert_eq!(fresh.get("IsOpen"), None);
}

// Pooled entities come back active under their old identity with their
// schema intact and managed resources reset.
#[tokio::test(start_paused = true)]
async fn pool_and_reuse() {
    let (orch, _scheduler, _clock) = stack(Vec::new());
    let (entity, _instance) = door(&orch, "door-1");

    let disposed = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let sink = Arc::clone(&disposed);
    entity.manage(aviary_core::Disposable::call(move || {
        sink.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }));

    orch.pool_entity(&EntityId::new("door-1")).unwrap();
    assert_eq!(disposed.load(std::sync::atomic::Ordering::SeqCst), 1);

    let replacement = FakeInstance::new("i-next", "Door");
    let reused = orch
        .get_pooled_entity(CreateEntityParams::new("Door", replacement.handle()).entity_id("door-1"))
        .unwrap();

    assert!(Arc::ptr_eq(&entity, &reused));
    assert!(reused.is_active());
    assert_eq!(reused.id(), &EntityId::new("door-1"));
    assert_eq!(reused.valid_properties().len(), 3);
    reused.set("IsOpen", true).unwrap();
    assert!(reused.commit(None));
}

// A destroyed entity reads absent and rejects writes; destruction fires
// exactly once even when the bound object vanishes mid-commit.
#[tokio::test(start_paused = true)]
async fn destruction_mid_commit() {
    let clock = FakeClock::new();
    let scheduler = Scheduler::new(Arc::new(clock.clone()), SchedulerSettings::default());
    let instance = FakeInstance::new("i-1", "Door");
    let removal = Arc::clone(&instance);

    let schema = Schema::new().with("IsOpen", PropertyDef::new("boolean").replicate());
    let defs = vec![EntityDef::new("Door", schema).apply(
        move |_: &Entity, _: &ChangeSet| {
            removal.remove();
            Ok::<(), ApplyError>(())
        },
    )];
    let orch = Orchestrator::new(
        OrchestratorConfig::server(),
        OrchestratorDeps {
            scheduler,
            clock: Arc::new(clock),
            logger: RingLogger::default(),
            entity_defs: defs,
            machine_defs: Vec::new(),
            store: None,
            resolver: None,
        },
    );
    orch.register_components();

    let entity = orch
        .create_entity(CreateEntityParams::new("Door", instance.handle()).entity_id("door-1"))
        .unwrap();
    let destroyed = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let sink = Arc::clone(&destroyed);
    std::mem::forget(entity.destroyed().connect(move |_| {
        sink.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }));

    entity.set("IsOpen", true).unwrap();
    assert!(!entity.commit(None));
    assert_eq!(destroyed.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(entity.get("IsOpen"), None);
    assert!(orch.get_entity(&EntityId::new("door-1")).is_none());
}
