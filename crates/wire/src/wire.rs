// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Framing for byte-stream backends.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Refuse frames above 16 MiB.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Framing failure.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message too large: {0} bytes")]
    TooLarge(usize),

    #[error("io error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Json(String),
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        ProtocolError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Json(e.to_string())
    }
}

/// Encode one message as a length-prefixed frame.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    let payload = serde_json::to_vec(message)?;
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge(payload.len()));
    }
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode one length-prefixed frame.
pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T, ProtocolError> {
    if frame.len() < 4 {
        return Err(ProtocolError::Io("frame shorter than length prefix".into()));
    }
    let declared = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    if declared > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge(declared));
    }
    let payload = frame.get(4..4 + declared).ok_or_else(|| {
        ProtocolError::Io(format!("frame truncated: declared {declared}, got {}", frame.len() - 4))
    })?;
    Ok(serde_json::from_slice(payload)?)
}

/// Write one framed message to an async byte stream.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message from an async byte stream.
pub async fn read_message<R, T>(reader: &mut R) -> Result<T, ProtocolError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut prefix = [0_u8; 4];
    reader.read_exact(&mut prefix).await?;
    let declared = u32::from_be_bytes(prefix) as usize;
    if declared > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge(declared));
    }
    let mut payload = vec![0_u8; declared];
    reader.read_exact(&mut payload).await?;
    Ok(serde_json::from_slice(&payload)?)
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
