// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request and response bodies of the master RPC surface.

use crate::info::{
    ClientFilter, ClientInfo, NodeFilter, NodeInfo, ServiceFilter, ServiceInfo, TopicFilter,
    TopicInfo,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterClientRequest {
    pub client_info: ClientInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterClientResponse {
    /// The submitted info with its assigned id.
    pub client_info: ClientInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListClientsRequest {
    pub filter: ClientFilter,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListClientsResponse {
    pub client_infos: Vec<ClientInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterNodeRequest {
    pub node_info: NodeInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterNodeResponse {
    /// The registered identity; carries the generated name when none was given.
    pub node_info: NodeInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnregisterNodeRequest {
    pub node_info: NodeInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnregisterNodeResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListNodesRequest {
    pub filter: NodeFilter,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListNodesResponse {
    pub node_infos: Vec<NodeInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishTopicRequest {
    pub node_info: NodeInfo,
    pub topic_info: TopicInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishTopicResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnpublishTopicRequest {
    pub node_info: NodeInfo,
    pub topic: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnpublishTopicResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeTopicRequest {
    pub node_info: NodeInfo,
    pub topic: String,
    #[serde(default)]
    pub type_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscribeTopicResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribeTopicRequest {
    pub node_info: NodeInfo,
    pub topic: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribeTopicResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListTopicsRequest {
    pub filter: TopicFilter,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListTopicsResponse {
    pub topic_infos: Vec<TopicInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterServiceServerRequest {
    pub node_info: NodeInfo,
    pub service_info: ServiceInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisterServiceServerResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnregisterServiceServerRequest {
    pub node_info: NodeInfo,
    pub service: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnregisterServiceServerResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterServiceClientRequest {
    pub node_info: NodeInfo,
    pub service: String,
    #[serde(default)]
    pub type_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisterServiceClientResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnregisterServiceClientRequest {
    pub node_info: NodeInfo,
    pub service: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnregisterServiceClientResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListServicesRequest {
    pub filter: ServiceFilter,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListServicesResponse {
    pub service_infos: Vec<ServiceInfo>,
}
