// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Master service configuration.

use crate::channel::{BufferPolicy, ChannelSettings};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use thiserror::Error;

/// Master service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Address to bind to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port to listen on (default: 8881, 0 picks an ephemeral port)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum number of registered clients
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,

    /// Maximum RPC frame size (bytes)
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Heartbeat periods a client may miss before it is reaped
    #[serde(default = "default_heart_beat_tolerance")]
    pub heart_beat_tolerance: u32,

    /// Timeout for connecting back to a client's heartbeat and notification channels (ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8881
}

fn default_max_clients() -> usize {
    1000
}

fn default_max_message_size() -> usize {
    4 * 1024 * 1024 // 4 MB
}

fn default_heart_beat_tolerance() -> u32 {
    3
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            max_clients: default_max_clients(),
            max_message_size: default_max_message_size(),
            heart_beat_tolerance: default_heart_beat_tolerance(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl MasterConfig {
    /// Loopback on an ephemeral port.
    pub fn local() -> Self {
        Self {
            bind_address: IpAddr::from([127, 0, 0, 1]),
            port: 0,
            ..Default::default()
        }
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Settings for RPC connections and for connecting back to clients.
    pub fn channel_settings(&self) -> ChannelSettings {
        ChannelSettings {
            bind_ip: self.bind_address,
            connect_timeout_ms: self.connect_timeout_ms,
            ..Default::default()
        }
        .with_buffers(BufferPolicy::fixed(self.max_message_size))
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_clients == 0 {
            return Err(ConfigError::InvalidValue("max_clients cannot be 0".into()));
        }
        if self.max_message_size < 1024 {
            return Err(ConfigError::InvalidValue(
                "max_message_size must be at least 1024 bytes".into(),
            ));
        }
        if self.heart_beat_tolerance == 0 {
            return Err(ConfigError::InvalidValue(
                "heart_beat_tolerance cannot be 0".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MasterConfig::default();
        assert_eq!(config.port, 8881);
        assert_eq!(config.heart_beat_tolerance, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: MasterConfig = serde_json::from_str(r#"{"port": 9000}"#).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.max_clients, 1000);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.json");
        let config = MasterConfig {
            max_clients: 8,
            ..MasterConfig::local()
        };
        config.to_file(&path).unwrap();
        assert_eq!(MasterConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_validation() {
        let config = MasterConfig {
            heart_beat_tolerance: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MasterConfig {
            max_clients: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = MasterConfig::from_file(Path::new("/nonexistent/master.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
