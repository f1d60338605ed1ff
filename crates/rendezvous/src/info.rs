// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Records exchanged with the master.

use crate::channel::ChannelSource;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A registered process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Assigned by the master on `RegisterClient`.
    #[serde(default)]
    pub id: u32,

    /// Where the master connects to receive heartbeats.
    pub heart_beat_signaller_source: ChannelSource,

    /// Where the master connects to push `TopicInfo`/`ServiceInfo` updates.
    pub master_notification_watcher_source: ChannelSource,

    /// Heartbeat period in milliseconds; 0 selects the default.
    #[serde(default)]
    pub heart_beat_duration_ms: u64,
}

/// Identity of a node. Two `NodeInfo`s denote the same node when name and client id match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(default)]
    pub client_id: u32,

    /// Empty asks the master to generate a unique name.
    #[serde(default)]
    pub name: String,

    /// Receives every topic update regardless of subscriptions.
    #[serde(default)]
    pub watcher: bool,
}

impl NodeInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn watcher(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            watcher: true,
            ..Default::default()
        }
    }
}

impl PartialEq for NodeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.client_id == other.client_id && self.name == other.name
    }
}

impl Eq for NodeInfo {}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.client_id)
    }
}

/// Whether a topic or service is currently offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfoStatus {
    #[default]
    Registered,
    Unregistered,
}

impl fmt::Display for InfoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered => f.write_str("REGISTERED"),
            Self::Unregistered => f.write_str("UNREGISTERED"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicInfo {
    pub topic: String,
    /// Message type name, informational.
    #[serde(default)]
    pub type_name: String,
    #[serde(default)]
    pub status: InfoStatus,
    #[serde(default)]
    pub source: ChannelSource,
}

impl TopicInfo {
    /// Withdrawal notice for `topic`.
    pub fn unregistered(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            status: InfoStatus::Unregistered,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service: String,
    #[serde(default)]
    pub type_name: String,
    #[serde(default)]
    pub status: InfoStatus,
    #[serde(default)]
    pub source: ChannelSource,
}

impl ServiceInfo {
    pub fn unregistered(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            status: InfoStatus::Unregistered,
            ..Default::default()
        }
    }
}

/// Node lookup criteria.
///
/// `PublishingTopic`, `Name` and `Watcher` yield at most the first node in insertion order;
/// the other filters yield every match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum NodeFilter {
    All,
    PublishingTopic(String),
    SubscribingTopic(String),
    RequestingService(String),
    ServingService(String),
    Name(String),
    Watcher,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum TopicFilter {
    All,
    Topic(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum ServiceFilter {
    All,
    Service(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum ClientFilter {
    All,
    Id(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_identity_ignores_watcher_flag() {
        let mut a = NodeInfo::new("camera");
        a.client_id = 3;
        let mut b = NodeInfo::watcher("camera");
        b.client_id = 3;
        assert_eq!(a, b);

        b.client_id = 4;
        assert_ne!(a, b);
    }

    #[test]
    fn test_filter_wire_shape() {
        let json = serde_json::to_string(&NodeFilter::PublishingTopic("t".into())).unwrap();
        assert_eq!(json, r#"{"by":"publishing_topic","value":"t"}"#);
        let all: NodeFilter = serde_json::from_str(r#"{"by":"all"}"#).unwrap();
        assert_eq!(all, NodeFilter::All);
    }

    #[test]
    fn test_unregistered_notice() {
        let info = TopicInfo::unregistered("t");
        assert_eq!(info.status, InfoStatus::Unregistered);
        assert!(info.source.is_empty());
        assert_eq!(info.status.to_string(), "UNREGISTERED");
    }
}
