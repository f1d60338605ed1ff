// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use crate::channel::buffer::DEFAULT_BUFFER_CAPACITY;
use crate::channel::{BufferPolicy, ChannelSettings};
use serde::{Deserialize, Serialize};

/// Per-endpoint communication settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Send and receive buffer capacity in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Grow buffers instead of rejecting larger messages.
    #[serde(default)]
    pub is_dynamic_buffer: bool,

    /// Messages queued per publisher before `publish` waits.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Transport settings; buffer policies are overridden from the fields above.
    #[serde(default)]
    pub channel_settings: ChannelSettings,
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

fn default_queue_size() -> usize {
    100
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            is_dynamic_buffer: false,
            queue_size: default_queue_size(),
            channel_settings: ChannelSettings::default(),
        }
    }
}

impl Settings {
    /// Defaults bound to loopback.
    pub fn loopback() -> Self {
        Self {
            channel_settings: ChannelSettings::loopback(),
            ..Default::default()
        }
    }

    pub fn buffer_policy(&self) -> BufferPolicy {
        if self.is_dynamic_buffer {
            BufferPolicy::dynamic(self.buffer_size)
        } else {
            BufferPolicy::fixed(self.buffer_size)
        }
    }

    /// `channel_settings` with the buffer policy applied.
    pub fn channel_settings(&self) -> ChannelSettings {
        self.channel_settings.clone().with_buffers(self.buffer_policy())
    }
}
