// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Master proxy configuration.
//!
//! Built from defaults, a JSON file, or environment variables:
//!
//! - `RDV_MASTER_IP`: master address (default: 127.0.0.1)
//! - `RDV_MASTER_PORT`: master port (default: 8881)
//! - `RDV_HEART_BEAT_DURATION`: heartbeat period in milliseconds (default: 1000)
//!
//! ```bash
//! export RDV_MASTER_IP=192.168.1.10
//! export RDV_HEART_BEAT_DURATION=500
//! ```

use crate::channel::ChannelSettings;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Environment variable names
pub const ENV_MASTER_IP: &str = "RDV_MASTER_IP";
pub const ENV_MASTER_PORT: &str = "RDV_MASTER_PORT";
pub const ENV_HEART_BEAT_DURATION: &str = "RDV_HEART_BEAT_DURATION";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_master_ip")]
    pub master_ip: IpAddr,

    #[serde(default = "default_master_port")]
    pub master_port: u16,

    /// Heartbeat period in milliseconds
    #[serde(default = "default_heart_beat_duration_ms")]
    pub heart_beat_duration_ms: u64,

    /// Deadline for one master RPC in milliseconds
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    /// Settings of the heartbeat and notification listeners and the master connection
    #[serde(default)]
    pub channel_settings: ChannelSettings,
}

fn default_master_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_master_port() -> u16 {
    8881
}

fn default_heart_beat_duration_ms() -> u64 {
    1_000
}

fn default_rpc_timeout_ms() -> u64 {
    5_000
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            master_ip: default_master_ip(),
            master_port: default_master_port(),
            heart_beat_duration_ms: default_heart_beat_duration_ms(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            channel_settings: ChannelSettings::default(),
        }
    }
}

impl ProxyConfig {
    /// Proxy for a master on this host, listening on loopback only.
    pub fn local(master_addr: SocketAddr) -> Self {
        Self {
            master_ip: master_addr.ip(),
            master_port: master_addr.port(),
            channel_settings: ChannelSettings::loopback(),
            ..Default::default()
        }
    }

    /// Defaults overridden by the `RDV_*` environment variables that parse.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ip) = env::var(ENV_MASTER_IP)
            .ok()
            .and_then(|s| s.parse::<IpAddr>().ok())
        {
            config.master_ip = ip;
        }
        if let Some(port) = env::var(ENV_MASTER_PORT)
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
        {
            config.master_port = port;
        }
        if let Some(ms) = env::var(ENV_HEART_BEAT_DURATION)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
        {
            config.heart_beat_duration_ms = ms;
        }
        config
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidArgument(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::InvalidArgument(format!("{}: {}", path.display(), e)))
    }

    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .map_err(|e| Error::InvalidArgument(format!("{}: {}", path.display(), e)))
    }

    pub fn master_addr(&self) -> SocketAddr {
        SocketAddr::new(self.master_ip, self.master_port)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}
