// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Buffer sizing policy and per-channel settings.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Default capacity of send and receive buffers (1 MiB).
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024 * 1024;

/// Default shared-memory segment size (4 MiB).
pub const DEFAULT_SHM_SIZE: usize = 4 * 1024 * 1024;

/// Capacity rule for one direction of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferPolicy {
    pub capacity: usize,
    /// Grow instead of failing when a payload exceeds `capacity`.
    #[serde(default)]
    pub dynamic: bool,
}

impl BufferPolicy {
    pub fn fixed(capacity: usize) -> Self {
        Self {
            capacity,
            dynamic: false,
        }
    }

    pub fn dynamic(initial_capacity: usize) -> Self {
        Self {
            capacity: initial_capacity,
            dynamic: true,
        }
    }
}

impl Default for BufferPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_BUFFER_CAPACITY)
    }
}

/// Runtime state of a [`BufferPolicy`]: a dynamic buffer remembers how far it has grown.
#[derive(Debug, Clone)]
pub struct ChannelBuffer {
    capacity: usize,
    dynamic: bool,
}

impl ChannelBuffer {
    pub fn new(policy: BufferPolicy) -> Self {
        Self {
            capacity: policy.capacity,
            dynamic: policy.dynamic,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    /// Makes room for `len` bytes, or fails with "not enough buffer" on a fixed buffer.
    ///
    /// Called before any byte is written or read so a rejected payload never leaves a partial
    /// frame on the wire.
    pub fn reserve(&mut self, len: usize) -> Result<()> {
        if len <= self.capacity {
            return Ok(());
        }
        if !self.dynamic {
            return Err(Error::not_enough_buffer(len, self.capacity));
        }
        self.capacity = len.checked_next_power_of_two().unwrap_or(len);
        Ok(())
    }
}

/// Transport settings shared by every channel type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSettings {
    #[serde(default)]
    pub send_buffer: BufferPolicy,

    #[serde(default)]
    pub receive_buffer: BufferPolicy,

    /// Connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Address listening channels bind to.
    #[serde(default = "default_bind_ip")]
    pub bind_ip: IpAddr,

    /// Address written into descriptors of listening channels. Defaults to the bind address,
    /// or the host's primary address when bound to the unspecified address.
    #[serde(default)]
    pub advertise_ip: Option<IpAddr>,

    /// Size of shared-memory segments created by publishers.
    #[serde(default = "default_shm_size")]
    pub shm_size: usize,
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_bind_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_shm_size() -> usize {
    DEFAULT_SHM_SIZE
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            send_buffer: BufferPolicy::default(),
            receive_buffer: BufferPolicy::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
            bind_ip: default_bind_ip(),
            advertise_ip: None,
            shm_size: default_shm_size(),
        }
    }
}

impl ChannelSettings {
    /// Settings bound to loopback, used by local deployments and tests.
    pub fn loopback() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ..Default::default()
        }
    }

    pub fn with_buffers(mut self, policy: BufferPolicy) -> Self {
        self.send_buffer = policy;
        self.receive_buffer = policy;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Address to put in descriptors of channels bound with these settings.
    pub fn advertised_ip(&self) -> IpAddr {
        if let Some(ip) = self.advertise_ip {
            return ip;
        }
        if !self.bind_ip.is_unspecified() {
            return self.bind_ip;
        }
        local_ip_address::local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_buffer_rejects_oversized() {
        let mut buffer = ChannelBuffer::new(BufferPolicy::fixed(16));
        assert!(buffer.reserve(16).is_ok());
        let err = buffer.reserve(17).unwrap_err();
        assert!(err.is_not_enough_buffer());
        assert_eq!(buffer.capacity(), 16);
    }

    #[test]
    fn test_dynamic_buffer_grows() {
        let mut buffer = ChannelBuffer::new(BufferPolicy::dynamic(16));
        buffer.reserve(100).unwrap();
        assert_eq!(buffer.capacity(), 128);
        buffer.reserve(50).unwrap();
        assert_eq!(buffer.capacity(), 128);
    }

    #[test]
    fn test_advertised_ip_prefers_explicit_then_bind() {
        let loopback = ChannelSettings::loopback();
        assert_eq!(loopback.advertised_ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));

        let explicit = ChannelSettings {
            advertise_ip: Some("10.1.2.3".parse().unwrap()),
            ..ChannelSettings::loopback()
        };
        assert_eq!(explicit.advertised_ip().to_string(), "10.1.2.3");
    }

    #[test]
    fn test_settings_defaults_from_empty_json() {
        let settings: ChannelSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, ChannelSettings::default());
        assert_eq!(settings.send_buffer.capacity, DEFAULT_BUFFER_CAPACITY);
        assert!(!settings.receive_buffer.dynamic);
    }
}
