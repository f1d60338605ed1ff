// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node lifecycle hooks.

use super::MasterProxy;
use crate::error::Error;
use crate::info::{NodeInfo, TopicInfo};
use std::sync::Arc;
use tracing::{debug, warn};

/// Hooks run by [`MasterProxy::request_register_node`].
///
/// The proxy owns the lifecycle object from registration until the node is unregistered. Hooks
/// run on the proxy core, so they must not block; posting work through the given proxy is fine.
pub trait NodeLifecycle: Send + 'static {
    /// Runs before the `RegisterNode` request is sent.
    fn on_init(&mut self, _proxy: &MasterProxy) {}

    /// The master accepted the node; `node_info` carries the assigned identity.
    fn on_did_create(&mut self, _proxy: &MasterProxy, node_info: &NodeInfo) {
        debug!(node = %node_info, "node created");
    }

    fn on_error(&mut self, _proxy: &MasterProxy, error: &Error) {
        warn!("node registration failed: {}", error);
    }
}

/// A node with no hooks of its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultNode;

impl NodeLifecycle for DefaultNode {}

/// Receives every `TopicInfo` a [`TopicInfoWatcherNode`] sees.
pub trait TopicInfoWatcherDelegate: Send + Sync + 'static {
    fn on_new_topic_info(&self, topic_info: &TopicInfo);
}

impl<F> TopicInfoWatcherDelegate for F
where
    F: Fn(&TopicInfo) + Send + Sync + 'static,
{
    fn on_new_topic_info(&self, topic_info: &TopicInfo) {
        self(topic_info)
    }
}

/// Watcher node: the master pushes it every topic, published now or later.
pub struct TopicInfoWatcherNode {
    delegate: Arc<dyn TopicInfoWatcherDelegate>,
}

impl TopicInfoWatcherNode {
    pub fn new(delegate: impl TopicInfoWatcherDelegate) -> Self {
        Self {
            delegate: Arc::new(delegate),
        }
    }

    /// Identity to register this node under.
    pub fn node_info(name: impl Into<String>) -> NodeInfo {
        NodeInfo::watcher(name)
    }
}

impl std::fmt::Debug for TopicInfoWatcherNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicInfoWatcherNode").finish_non_exhaustive()
    }
}

impl NodeLifecycle for TopicInfoWatcherNode {
    fn on_init(&mut self, proxy: &MasterProxy) {
        let delegate = self.delegate.clone();
        proxy.set_all_topics_callback(move |topic_info| delegate.on_new_topic_info(topic_info));
    }

    fn on_error(&mut self, proxy: &MasterProxy, error: &Error) {
        warn!("topic info watcher registration failed: {}", error);
        proxy.unset_all_topics_callback();
    }
}
