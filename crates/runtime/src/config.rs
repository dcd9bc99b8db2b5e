// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orchestrator configuration.

use std::time::Duration;

/// Which side of the replication protocol this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Authoritative: applies commits, filters and broadcasts deltas.
    Server,
    /// Mirror: applies inbound packets, sends commands upstream.
    Client,
}

aviary_core::simple_display! {
    Role {
        Server => "server",
        Client => "client",
    }
}

/// Orchestrator tuning knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub role: Role,
    /// Validate inbound replication packets against the local schema and
    /// drop offending fields. Off by default: the server is
    /// authoritative and packets are trusted.
    pub validate_replication: bool,
    /// Client-side request timeout; an elapsed timeout reads as absent.
    pub request_timeout: Duration,
    /// Shared secret gating the service manager API. `None` leaves the
    /// gate to the `start_service_manager_api` opt-in alone.
    pub service_token: Option<String>,
    /// Default key prefix for entity persistence.
    pub store_key_prefix: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            role: Role::Server,
            validate_replication: false,
            request_timeout: Duration::from_secs(5),
            service_token: None,
            store_key_prefix: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn client() -> Self {
        Self { role: Role::Client, ..Self::default() }
    }

    pub fn server() -> Self {
        Self::default()
    }

    pub fn validate_replication(mut self) -> Self {
        self.validate_replication = true;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn service_token(mut self, token: impl Into<String>) -> Self {
        self.service_token = Some(token.into());
        self
    }

    pub fn store_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.store_key_prefix = Some(prefix.into());
        self
    }
}
