// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Master registry logic.
//!
//! [`Master`] answers every RPC synchronously and records the discovery pushes the answer
//! implies as [`Dispatch`]es. It does no I/O; the server drains the dispatches and delivers
//! them to each client's notification channel.

use crate::error::{Error, Result};
use crate::info::{
    ClientFilter, ClientInfo, InfoStatus, NodeFilter, NodeInfo, ServiceFilter, ServiceInfo,
    TopicFilter, TopicInfo,
};
use crate::registry::{Client, IdPool, Node};
use crate::rpc::*;
use tracing::{debug, info};

/// A notification addressed to one client.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub client_id: u32,
    pub notification: Notification,
}

#[derive(Debug)]
pub struct Master {
    pool: IdPool,
    clients: Vec<Client>,
    max_clients: usize,
    outbox: Vec<Dispatch>,
}

impl Master {
    pub fn new(max_clients: usize) -> Self {
        Self::with_pool(max_clients, IdPool::new())
    }

    pub fn with_pool(max_clients: usize, pool: IdPool) -> Self {
        Self {
            pool,
            clients: Vec::new(),
            max_clients,
            outbox: Vec::new(),
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn client_info(&self, client_id: u32) -> Option<&ClientInfo> {
        self.client(client_id).map(Client::client_info)
    }

    /// Notifications produced since the last call.
    pub fn take_dispatches(&mut self) -> Vec<Dispatch> {
        std::mem::take(&mut self.outbox)
    }

    pub fn handle(&mut self, request: MasterRequest) -> Result<MasterResponse> {
        let method = request.method_name();
        let result = match request {
            MasterRequest::RegisterClient(req) => self
                .register_client(req.client_info)
                .map(|client_info| RegisterClientResponse { client_info }.into()),
            MasterRequest::ListClients(req) => Ok(ListClientsResponse {
                client_infos: self.list_clients(&req.filter),
            }
            .into()),
            MasterRequest::RegisterNode(req) => self
                .register_node(req.node_info)
                .map(|node_info| RegisterNodeResponse { node_info }.into()),
            MasterRequest::UnregisterNode(req) => self
                .unregister_node(&req.node_info)
                .map(|_| UnregisterNodeResponse {}.into()),
            MasterRequest::ListNodes(req) => Ok(ListNodesResponse {
                node_infos: self.list_nodes(&req.filter),
            }
            .into()),
            MasterRequest::PublishTopic(req) => self
                .publish_topic(&req.node_info, req.topic_info)
                .map(|_| PublishTopicResponse {}.into()),
            MasterRequest::UnpublishTopic(req) => self
                .unpublish_topic(&req.node_info, &req.topic)
                .map(|_| UnpublishTopicResponse {}.into()),
            MasterRequest::SubscribeTopic(req) => self
                .subscribe_topic(&req.node_info, &req.topic)
                .map(|_| SubscribeTopicResponse {}.into()),
            MasterRequest::UnsubscribeTopic(req) => self
                .unsubscribe_topic(&req.node_info, &req.topic)
                .map(|_| UnsubscribeTopicResponse {}.into()),
            MasterRequest::ListTopics(req) => Ok(ListTopicsResponse {
                topic_infos: self.list_topics(&req.filter),
            }
            .into()),
            MasterRequest::RegisterServiceServer(req) => self
                .register_service_server(&req.node_info, req.service_info)
                .map(|_| RegisterServiceServerResponse {}.into()),
            MasterRequest::UnregisterServiceServer(req) => self
                .unregister_service_server(&req.node_info, &req.service)
                .map(|_| UnregisterServiceServerResponse {}.into()),
            MasterRequest::RegisterServiceClient(req) => self
                .register_service_client(&req.node_info, &req.service)
                .map(|_| RegisterServiceClientResponse {}.into()),
            MasterRequest::UnregisterServiceClient(req) => self
                .unregister_service_client(&req.node_info, &req.service)
                .map(|_| UnregisterServiceClientResponse {}.into()),
            MasterRequest::ListServices(req) => Ok(ListServicesResponse {
                service_infos: self.list_services(&req.filter),
            }
            .into()),
        };
        if let Err(e) = &result {
            debug!(method, "request rejected: {}", e);
        }
        result
    }

    /// Drops a client and its nodes, reporting everything it offered as unregistered.
    /// Returns false when the client is unknown.
    pub fn remove_client(&mut self, client_id: u32) -> bool {
        let Some(index) = self.clients.iter().position(|c| c.id() == client_id) else {
            return false;
        };
        let client = self.clients.remove(index);
        for node in client.nodes() {
            self.withdraw(node);
        }
        info!(client_id, nodes = client.node_count(), "client removed");
        true
    }

    fn register_client(&mut self, client_info: ClientInfo) -> Result<ClientInfo> {
        if !client_info.heart_beat_signaller_source.is_valid() {
            return Err(Error::InvalidArgument(
                "heart beat signaller source is invalid".into(),
            ));
        }
        if !client_info.master_notification_watcher_source.is_valid() {
            return Err(Error::InvalidArgument(
                "master notification watcher source is invalid".into(),
            ));
        }
        if self.clients.len() >= self.max_clients {
            return Err(Error::ResourceExhausted(format!(
                "client limit {} reached",
                self.max_clients
            )));
        }
        let client = Client::new_client(&client_info, &self.pool)?;
        let client_info = client.client_info().clone();
        self.clients.push(client);
        info!(client_id = client_info.id, "client registered");
        Ok(client_info)
    }

    fn list_clients(&self, filter: &ClientFilter) -> Vec<ClientInfo> {
        self.clients
            .iter()
            .filter(|c| match filter {
                ClientFilter::All => true,
                ClientFilter::Id(id) => c.id() == *id,
            })
            .map(|c| c.client_info().clone())
            .collect()
    }

    fn register_node(&mut self, mut node_info: NodeInfo) -> Result<NodeInfo> {
        if self.client(node_info.client_id).is_none() {
            return Err(client_not_found(node_info.client_id));
        }
        if node_info.name.is_empty() {
            node_info.name = self.generate_node_name();
        } else if !self.list_nodes(&NodeFilter::Name(node_info.name.clone())).is_empty() {
            return Err(Error::AlreadyExists(format!("node {}", node_info.name)));
        }

        let client_id = node_info.client_id;
        if node_info.watcher {
            for topic_info in self.list_topics(&TopicFilter::All) {
                self.outbox.push(Dispatch {
                    client_id,
                    notification: Notification::Topic(topic_info),
                });
            }
        }
        let client = self.client_mut(client_id)?;
        client.add_node(Node::new(node_info.clone()));
        info!(node = %node_info, "node registered");
        Ok(node_info)
    }

    fn unregister_node(&mut self, node_info: &NodeInfo) -> Result<()> {
        let client = self.client_mut(node_info.client_id)?;
        let handle = client
            .find_node(node_info)
            .ok_or_else(|| node_not_found(node_info))?;
        let node = client
            .node(handle)
            .cloned()
            .ok_or_else(|| node_not_found(node_info))?;
        client.remove_node(node_info);
        self.withdraw(&node);
        info!(node = %node_info, "node unregistered");
        Ok(())
    }

    fn list_nodes(&self, filter: &NodeFilter) -> Vec<NodeInfo> {
        self.clients
            .iter()
            .flat_map(|client| {
                client
                    .find_nodes(filter)
                    .into_iter()
                    .filter_map(move |handle| client.node(handle))
                    .map(|node| node.node_info().clone())
            })
            .collect()
    }

    fn publish_topic(&mut self, node_info: &NodeInfo, mut topic_info: TopicInfo) -> Result<()> {
        if topic_info.topic.is_empty() {
            return Err(Error::InvalidArgument("topic name is empty".into()));
        }
        if !topic_info.source.is_valid() {
            return Err(Error::InvalidArgument(format!(
                "topic {} has an invalid source",
                topic_info.topic
            )));
        }
        if !self
            .list_topics(&TopicFilter::Topic(topic_info.topic.clone()))
            .is_empty()
        {
            return Err(Error::AlreadyExists(format!(
                "topic {} is already published",
                topic_info.topic
            )));
        }
        topic_info.status = InfoStatus::Registered;
        self.node_mut(node_info)?
            .register_publishing_topic(topic_info.clone());
        debug!(node = %node_info, topic = %topic_info.topic, "topic published");
        self.notify_topic(topic_info);
        Ok(())
    }

    fn unpublish_topic(&mut self, node_info: &NodeInfo, topic: &str) -> Result<()> {
        self.node_mut(node_info)?
            .unregister_publishing_topic(topic)
            .ok_or_else(|| Error::NotFound(format!("{} does not publish {}", node_info, topic)))?;
        debug!(node = %node_info, topic, "topic unpublished");
        self.notify_topic(TopicInfo::unregistered(topic));
        Ok(())
    }

    fn subscribe_topic(&mut self, node_info: &NodeInfo, topic: &str) -> Result<()> {
        let node = self.node_mut(node_info)?;
        if node.is_subscribing_topic(topic) {
            return Err(Error::AlreadyExists(format!(
                "{} already subscribes to {}",
                node_info, topic
            )));
        }
        node.register_subscribing_topic(topic);
        debug!(node = %node_info, topic, "topic subscribed");
        if let Some(topic_info) = self
            .list_topics(&TopicFilter::Topic(topic.to_string()))
            .into_iter()
            .next()
        {
            self.outbox.push(Dispatch {
                client_id: node_info.client_id,
                notification: Notification::Topic(topic_info),
            });
        }
        Ok(())
    }

    fn unsubscribe_topic(&mut self, node_info: &NodeInfo, topic: &str) -> Result<()> {
        if !self.node_mut(node_info)?.unregister_subscribing_topic(topic) {
            return Err(Error::NotFound(format!(
                "{} does not subscribe to {}",
                node_info, topic
            )));
        }
        debug!(node = %node_info, topic, "topic unsubscribed");
        Ok(())
    }

    fn list_topics(&self, filter: &TopicFilter) -> Vec<TopicInfo> {
        let topics = self.clients.iter().flat_map(|c| c.find_topic_infos(filter));
        match filter {
            TopicFilter::All => topics.collect(),
            TopicFilter::Topic(_) => topics.take(1).collect(),
        }
    }

    fn register_service_server(
        &mut self,
        node_info: &NodeInfo,
        mut service_info: ServiceInfo,
    ) -> Result<()> {
        if service_info.service.is_empty() {
            return Err(Error::InvalidArgument("service name is empty".into()));
        }
        if !service_info.source.is_valid() {
            return Err(Error::InvalidArgument(format!(
                "service {} has an invalid source",
                service_info.service
            )));
        }
        if !self
            .list_services(&ServiceFilter::Service(service_info.service.clone()))
            .is_empty()
        {
            return Err(Error::AlreadyExists(format!(
                "service {} is already served",
                service_info.service
            )));
        }
        service_info.status = InfoStatus::Registered;
        self.node_mut(node_info)?
            .register_serving_service(service_info.clone());
        debug!(node = %node_info, service = %service_info.service, "service server registered");
        self.notify_service(service_info);
        Ok(())
    }

    fn unregister_service_server(&mut self, node_info: &NodeInfo, service: &str) -> Result<()> {
        self.node_mut(node_info)?
            .unregister_serving_service(service)
            .ok_or_else(|| Error::NotFound(format!("{} does not serve {}", node_info, service)))?;
        debug!(node = %node_info, service, "service server unregistered");
        self.notify_service(ServiceInfo::unregistered(service));
        Ok(())
    }

    fn register_service_client(&mut self, node_info: &NodeInfo, service: &str) -> Result<()> {
        let node = self.node_mut(node_info)?;
        if node.is_requesting_service(service) {
            return Err(Error::AlreadyExists(format!(
                "{} already requests {}",
                node_info, service
            )));
        }
        node.register_requesting_service(service);
        debug!(node = %node_info, service, "service client registered");
        if let Some(service_info) = self
            .list_services(&ServiceFilter::Service(service.to_string()))
            .into_iter()
            .next()
        {
            self.outbox.push(Dispatch {
                client_id: node_info.client_id,
                notification: Notification::Service(service_info),
            });
        }
        Ok(())
    }

    fn unregister_service_client(&mut self, node_info: &NodeInfo, service: &str) -> Result<()> {
        if !self
            .node_mut(node_info)?
            .unregister_requesting_service(service)
        {
            return Err(Error::NotFound(format!(
                "{} does not request {}",
                node_info, service
            )));
        }
        debug!(node = %node_info, service, "service client unregistered");
        Ok(())
    }

    fn list_services(&self, filter: &ServiceFilter) -> Vec<ServiceInfo> {
        let services = self.clients.iter().flat_map(|c| c.find_service_infos(filter));
        match filter {
            ServiceFilter::All => services.collect(),
            ServiceFilter::Service(_) => services.take(1).collect(),
        }
    }

    /// Reports every topic and service of a removed node as unregistered.
    fn withdraw(&mut self, node: &Node) {
        for topic_info in node.all_publishing_topic_infos() {
            self.notify_topic(TopicInfo::unregistered(topic_info.topic.clone()));
        }
        for service_info in node.all_serving_service_infos() {
            self.notify_service(ServiceInfo::unregistered(service_info.service.clone()));
        }
    }

    /// Queues `topic_info` for every client with a subscriber of the topic or a watcher node.
    fn notify_topic(&mut self, topic_info: TopicInfo) {
        let audience: Vec<u32> = self
            .clients
            .iter()
            .filter(|c| {
                !c.find_nodes(&NodeFilter::SubscribingTopic(topic_info.topic.clone()))
                    .is_empty()
                    || !c.find_nodes(&NodeFilter::Watcher).is_empty()
            })
            .map(Client::id)
            .collect();
        for client_id in audience {
            self.outbox.push(Dispatch {
                client_id,
                notification: Notification::Topic(topic_info.clone()),
            });
        }
    }

    /// Queues `service_info` for every client with a requester of the service.
    fn notify_service(&mut self, service_info: ServiceInfo) {
        let audience: Vec<u32> = self
            .clients
            .iter()
            .filter(|c| {
                !c.find_nodes(&NodeFilter::RequestingService(service_info.service.clone()))
                    .is_empty()
            })
            .map(Client::id)
            .collect();
        for client_id in audience {
            self.outbox.push(Dispatch {
                client_id,
                notification: Notification::Service(service_info.clone()),
            });
        }
    }

    fn generate_node_name(&self) -> String {
        loop {
            let name = format!("node-{}", uuid::Uuid::new_v4().simple());
            if self.list_nodes(&NodeFilter::Name(name.clone())).is_empty() {
                return name;
            }
        }
    }

    fn client(&self, client_id: u32) -> Option<&Client> {
        self.clients.iter().find(|c| c.id() == client_id)
    }

    fn client_mut(&mut self, client_id: u32) -> Result<&mut Client> {
        self.clients
            .iter_mut()
            .find(|c| c.id() == client_id)
            .ok_or_else(|| client_not_found(client_id))
    }

    fn node_mut(&mut self, node_info: &NodeInfo) -> Result<&mut Node> {
        let client = self.client_mut(node_info.client_id)?;
        let handle = client
            .find_node(node_info)
            .ok_or_else(|| node_not_found(node_info))?;
        client
            .node_mut(handle)
            .ok_or_else(|| node_not_found(node_info))
    }
}

fn client_not_found(client_id: u32) -> Error {
    Error::NotFound(format!("client {}", client_id))
}

fn node_not_found(node_info: &NodeInfo) -> Error {
    Error::NotFound(format!("node {}", node_info))
}
