// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Master-side client and node tables.
//!
//! A [`Client`] is one registered process. It owns its nodes in a generational arena; lookups
//! return [`NodeHandle`]s that resolve to `None` once the node is gone.
//!
//! `Client` is `Send` but not `Sync`: the master moves each client into its registry actor and
//! every read or write happens on that task.

mod arena;
mod id_pool;
mod node;

pub use arena::NodeHandle;
pub use id_pool::{IdLease, IdPool, INVALID_ID};
pub use node::Node;

use crate::error::{Error, Result};
use crate::info::{
    ClientInfo, NodeFilter, NodeInfo, ServiceFilter, ServiceInfo, TopicFilter, TopicInfo,
};
use arena::NodeArena;
use std::cell::Cell;
use std::marker::PhantomData;
use tracing::debug;

/// A registered process and its nodes.
#[derive(Debug)]
pub struct Client {
    client_info: ClientInfo,
    lease: IdLease,
    nodes: NodeArena,
    _not_sync: PhantomData<Cell<()>>,
}

impl Client {
    /// Allocates an id from `pool` and builds the client around `client_info`.
    ///
    /// An exhausted pool is a resource failure, not a normal outcome.
    pub fn new_client(client_info: &ClientInfo, pool: &IdPool) -> Result<Self> {
        let lease = pool
            .generate()
            .ok_or_else(|| Error::ResourceExhausted("client id pool exhausted".into()))?;
        let mut client_info = client_info.clone();
        client_info.id = lease.id();
        debug!(client_id = client_info.id, "client created");
        Ok(Self {
            client_info,
            lease,
            nodes: NodeArena::default(),
            _not_sync: PhantomData,
        })
    }

    pub fn id(&self) -> u32 {
        self.lease.id()
    }

    pub fn client_info(&self) -> &ClientInfo {
        &self.client_info
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Inserts without duplicate detection; check [`Client::has_node`] first.
    pub fn add_node(&mut self, node: Node) -> NodeHandle {
        self.nodes.insert(node)
    }

    /// Removes every node equal to `node_info` and returns how many were removed.
    /// Removing an absent node is a no-op.
    pub fn remove_node(&mut self, node_info: &NodeInfo) -> usize {
        let handles: Vec<NodeHandle> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.node_info() == node_info)
            .map(|(handle, _)| handle)
            .collect();
        handles
            .into_iter()
            .filter(|handle| self.nodes.remove(*handle).is_some())
            .count()
    }

    pub fn has_node(&self, node_info: &NodeInfo) -> bool {
        self.find_node(node_info).is_some()
    }

    /// First node equal to `node_info`.
    pub fn find_node(&self, node_info: &NodeInfo) -> Option<NodeHandle> {
        self.nodes
            .iter()
            .find(|(_, node)| node.node_info() == node_info)
            .map(|(handle, _)| handle)
    }

    /// Resolves a handle; `None` when the node has been removed.
    pub fn node(&self, handle: NodeHandle) -> Option<&Node> {
        self.nodes.get(handle)
    }

    pub fn node_mut(&mut self, handle: NodeHandle) -> Option<&mut Node> {
        self.nodes.get_mut(handle)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().map(|(_, node)| node)
    }

    /// Nodes matching `filter`, in insertion order.
    ///
    /// `PublishingTopic`, `Name` and `Watcher` stop at the first match.
    pub fn find_nodes(&self, filter: &NodeFilter) -> Vec<NodeHandle> {
        let first_only = matches!(
            filter,
            NodeFilter::PublishingTopic(_) | NodeFilter::Name(_) | NodeFilter::Watcher
        );
        let matches = self.nodes.iter().filter(|(_, node)| match filter {
            NodeFilter::All => true,
            NodeFilter::PublishingTopic(topic) => node.is_publishing_topic(topic),
            NodeFilter::SubscribingTopic(topic) => node.is_subscribing_topic(topic),
            NodeFilter::RequestingService(service) => node.is_requesting_service(service),
            NodeFilter::ServingService(service) => node.is_serving_service(service),
            NodeFilter::Name(name) => node.name() == name,
            NodeFilter::Watcher => node.is_watcher(),
        });
        if first_only {
            matches.take(1).map(|(handle, _)| handle).collect()
        } else {
            matches.map(|(handle, _)| handle).collect()
        }
    }

    /// Published topics across every node. A named filter yields at most one record.
    pub fn find_topic_infos(&self, filter: &TopicFilter) -> Vec<TopicInfo> {
        match filter {
            TopicFilter::All => self
                .nodes()
                .flat_map(|node| node.all_publishing_topic_infos().iter().cloned())
                .collect(),
            TopicFilter::Topic(topic) => self
                .nodes()
                .find_map(|node| node.topic_info(topic).cloned())
                .into_iter()
                .collect(),
        }
    }

    /// Served services across every node. A named filter yields at most one record.
    pub fn find_service_infos(&self, filter: &ServiceFilter) -> Vec<ServiceInfo> {
        match filter {
            ServiceFilter::All => self
                .nodes()
                .flat_map(|node| node.all_serving_service_infos().iter().cloned())
                .collect(),
            ServiceFilter::Service(service) => self
                .nodes()
                .find_map(|node| node.service_info(service).cloned())
                .into_iter()
                .collect(),
        }
    }

    /// Every topic some node of this client subscribes to, deduplicated.
    pub fn find_all_subscribing_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        for topic in self.nodes().flat_map(|node| node.all_subscribing_topics()) {
            if !topics.contains(topic) {
                topics.push(topic.clone());
            }
        }
        topics
    }

    /// Every service some node of this client requests, deduplicated.
    pub fn find_all_requesting_services(&self) -> Vec<String> {
        let mut services: Vec<String> = Vec::new();
        for service in self.nodes().flat_map(|node| node.all_requesting_services()) {
            if !services.contains(service) {
                services.push(service.clone());
            }
        }
        services
    }
}
