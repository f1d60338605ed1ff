// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type shared by every component.
//!
//! Errors are plain data: they are `Clone` and serializable so the master can return them inside
//! RPC responses and a proxy can hand the same failure to several waiters.

use crate::register_state::State;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "code", content = "detail", rename_all = "snake_case")]
pub enum Error {
    /// Malformed endpoint, filter or configuration.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Transport failure; carries the OS error text.
    #[error("Network error: {0}")]
    Network(String),

    /// Buffer capacity violation or an operation that cannot proceed.
    #[error("Aborted: {0}")]
    Aborted(String),

    /// Register-state machine violation.
    #[error("Invalid state: {state} (at {site})")]
    InvalidState { state: State, site: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// RPC layer failure (master unreachable, timeout, closed connection).
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Malformed incoming frame.
    #[error("Data loss: {0}")]
    DataLoss(String),

    #[error("Unknown: {0}")]
    Unknown(String),
}

const NOT_ENOUGH_BUFFER: &str = "not enough buffer";

impl Error {
    /// Capacity violation on a fixed-size buffer.
    pub fn not_enough_buffer(needed: usize, capacity: usize) -> Self {
        Self::Aborted(format!(
            "{} (needed {} bytes, capacity {} bytes)",
            NOT_ENOUGH_BUFFER, needed, capacity
        ))
    }

    /// Whether this is the capacity violation produced by [`Error::not_enough_buffer`].
    pub fn is_not_enough_buffer(&self) -> bool {
        matches!(self, Self::Aborted(msg) if msg.starts_with(NOT_ENOUGH_BUFFER))
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }

    /// Transport-level failures, after which a channel is no longer usable.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Network(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::DataLoss(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_enough_buffer_is_detected() {
        let err = Error::not_enough_buffer(64, 16);
        assert!(err.is_not_enough_buffer());
        assert!(err.to_string().contains("needed 64 bytes"));
        assert!(!Error::Aborted("duplicate in-flight send".into()).is_not_enough_buffer());
    }

    #[test]
    fn test_error_serializes_with_code() {
        let err = Error::NotFound("client 7".into());
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"code\":\"not_found\""));

        let back: Error = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_invalid_state_round_trips_state() {
        let err = Error::InvalidState {
            state: State::Registering,
            site: "src/lib.rs:1:1".into(),
        };
        let back: Error = serde_json::from_str(&serde_json::to_string(&err).unwrap()).unwrap();
        assert_eq!(back, err);
        assert!(back.is_invalid_state());
    }

    #[test]
    fn test_io_error_maps_to_network() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err: Error = io.into();
        assert!(err.is_network());
    }
}
