// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A registered node and its topic/service relationships.

use crate::info::{NodeInfo, ServiceInfo, TopicInfo};

#[derive(Debug, Clone)]
pub struct Node {
    node_info: NodeInfo,
    publishing_topics: Vec<TopicInfo>,
    subscribing_topics: Vec<String>,
    serving_services: Vec<ServiceInfo>,
    requesting_services: Vec<String>,
}

impl Node {
    pub fn new(node_info: NodeInfo) -> Self {
        Self {
            node_info,
            publishing_topics: Vec::new(),
            subscribing_topics: Vec::new(),
            serving_services: Vec::new(),
            requesting_services: Vec::new(),
        }
    }

    pub fn node_info(&self) -> &NodeInfo {
        &self.node_info
    }

    pub fn name(&self) -> &str {
        &self.node_info.name
    }

    pub fn is_watcher(&self) -> bool {
        self.node_info.watcher
    }

    pub fn is_publishing_topic(&self, topic: &str) -> bool {
        self.topic_info(topic).is_some()
    }

    pub fn is_subscribing_topic(&self, topic: &str) -> bool {
        self.subscribing_topics.iter().any(|t| t == topic)
    }

    pub fn is_serving_service(&self, service: &str) -> bool {
        self.service_info(service).is_some()
    }

    pub fn is_requesting_service(&self, service: &str) -> bool {
        self.requesting_services.iter().any(|s| s == service)
    }

    pub fn topic_info(&self, topic: &str) -> Option<&TopicInfo> {
        self.publishing_topics.iter().find(|info| info.topic == topic)
    }

    pub fn service_info(&self, service: &str) -> Option<&ServiceInfo> {
        self.serving_services
            .iter()
            .find(|info| info.service == service)
    }

    pub fn all_publishing_topic_infos(&self) -> &[TopicInfo] {
        &self.publishing_topics
    }

    pub fn all_subscribing_topics(&self) -> &[String] {
        &self.subscribing_topics
    }

    pub fn all_serving_service_infos(&self) -> &[ServiceInfo] {
        &self.serving_services
    }

    pub fn all_requesting_services(&self) -> &[String] {
        &self.requesting_services
    }

    pub fn register_publishing_topic(&mut self, topic_info: TopicInfo) {
        self.unregister_publishing_topic(&topic_info.topic);
        self.publishing_topics.push(topic_info);
    }

    pub fn unregister_publishing_topic(&mut self, topic: &str) -> Option<TopicInfo> {
        let index = self.publishing_topics.iter().position(|t| t.topic == topic)?;
        Some(self.publishing_topics.remove(index))
    }

    pub fn register_subscribing_topic(&mut self, topic: impl Into<String>) {
        let topic = topic.into();
        if !self.is_subscribing_topic(&topic) {
            self.subscribing_topics.push(topic);
        }
    }

    pub fn unregister_subscribing_topic(&mut self, topic: &str) -> bool {
        let before = self.subscribing_topics.len();
        self.subscribing_topics.retain(|t| t != topic);
        before != self.subscribing_topics.len()
    }

    pub fn register_serving_service(&mut self, service_info: ServiceInfo) {
        self.unregister_serving_service(&service_info.service);
        self.serving_services.push(service_info);
    }

    pub fn unregister_serving_service(&mut self, service: &str) -> Option<ServiceInfo> {
        let index = self
            .serving_services
            .iter()
            .position(|s| s.service == service)?;
        Some(self.serving_services.remove(index))
    }

    pub fn register_requesting_service(&mut self, service: impl Into<String>) {
        let service = service.into();
        if !self.is_requesting_service(&service) {
            self.requesting_services.push(service);
        }
    }

    pub fn unregister_requesting_service(&mut self, service: &str) -> bool {
        let before = self.requesting_services.len();
        self.requesting_services.retain(|s| s != service);
        before != self.requesting_services.len()
    }
}
