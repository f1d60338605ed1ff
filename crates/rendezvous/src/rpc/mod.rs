// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Master RPC surface.
//!
//! Every operation is a named request/response pair. [`MasterClient`] is the one seam between
//! callers and a master: the TCP client, the in-process [`MasterServer`](crate::MasterServer)
//! and test stubs all implement it. [`MasterClientExt`] adds one typed method per operation.
//!
//! Wire format (see [`wire`]):
//! ```text
//! +----------------+----------------------------------------------+
//! | Length (4B BE) | {"kind":"request","id":7,"request":{...}}    |
//! +----------------+----------------------------------------------+
//! ```

pub mod client;
pub mod messages;
pub mod wire;

pub use client::TcpMasterClient;
pub use messages::*;
pub use wire::{HeartBeat, Notification, RpcFrame};

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Something that answers master requests.
#[async_trait]
pub trait MasterClient: Send + Sync {
    async fn call(&self, request: MasterRequest) -> Result<MasterResponse>;
}

macro_rules! master_methods {
    ($($method:ident => $fn_name:ident($request:ident) -> $response:ident;)*) => {
        /// A request to the master, tagged by method name.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "method", content = "body")]
        pub enum MasterRequest {
            $($method($request),)*
        }

        /// A successful answer, tagged like the request it answers.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "method", content = "body")]
        pub enum MasterResponse {
            $($method($response),)*
        }

        impl MasterRequest {
            pub fn method_name(&self) -> &'static str {
                match self {
                    $(Self::$method(_) => stringify!($method),)*
                }
            }
        }

        impl MasterResponse {
            pub fn method_name(&self) -> &'static str {
                match self {
                    $(Self::$method(_) => stringify!($method),)*
                }
            }
        }

        $(
            impl From<$request> for MasterRequest {
                fn from(request: $request) -> Self {
                    Self::$method(request)
                }
            }

            impl From<$response> for MasterResponse {
                fn from(response: $response) -> Self {
                    Self::$method(response)
                }
            }
        )*

        /// Typed calls over any [`MasterClient`].
        #[async_trait]
        pub trait MasterClientExt: MasterClient {
            $(
                async fn $fn_name(&self, request: $request) -> Result<$response> {
                    match self.call(MasterRequest::$method(request)).await? {
                        MasterResponse::$method(response) => Ok(response),
                        other => Err(mismatched(stringify!($method), &other)),
                    }
                }
            )*
        }
    };
}

master_methods! {
    RegisterClient => register_client(RegisterClientRequest) -> RegisterClientResponse;
    ListClients => list_clients(ListClientsRequest) -> ListClientsResponse;
    RegisterNode => register_node(RegisterNodeRequest) -> RegisterNodeResponse;
    UnregisterNode => unregister_node(UnregisterNodeRequest) -> UnregisterNodeResponse;
    ListNodes => list_nodes(ListNodesRequest) -> ListNodesResponse;
    PublishTopic => publish_topic(PublishTopicRequest) -> PublishTopicResponse;
    UnpublishTopic => unpublish_topic(UnpublishTopicRequest) -> UnpublishTopicResponse;
    SubscribeTopic => subscribe_topic(SubscribeTopicRequest) -> SubscribeTopicResponse;
    UnsubscribeTopic => unsubscribe_topic(UnsubscribeTopicRequest) -> UnsubscribeTopicResponse;
    ListTopics => list_topics(ListTopicsRequest) -> ListTopicsResponse;
    RegisterServiceServer => register_service_server(RegisterServiceServerRequest) -> RegisterServiceServerResponse;
    UnregisterServiceServer => unregister_service_server(UnregisterServiceServerRequest) -> UnregisterServiceServerResponse;
    RegisterServiceClient => register_service_client(RegisterServiceClientRequest) -> RegisterServiceClientResponse;
    UnregisterServiceClient => unregister_service_client(UnregisterServiceClientRequest) -> UnregisterServiceClientResponse;
    ListServices => list_services(ListServicesRequest) -> ListServicesResponse;
}

impl<T: MasterClient + ?Sized> MasterClientExt for T {}

fn mismatched(expected: &str, got: &MasterResponse) -> Error {
    Error::DataLoss(format!(
        "expected {} response, got {}",
        expected,
        got.method_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::{ClientFilter, NodeInfo};
    use std::sync::Arc;

    /// Answers every request with an empty `ListClients` response.
    struct Fixed;

    #[async_trait]
    impl MasterClient for Fixed {
        async fn call(&self, _request: MasterRequest) -> Result<MasterResponse> {
            Ok(MasterResponse::ListClients(ListClientsResponse::default()))
        }
    }

    #[test]
    fn test_request_wire_shape() {
        let request = MasterRequest::from(ListClientsRequest {
            filter: ClientFilter::Id(3),
        });
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"method":"ListClients","body":{"filter":{"by":"id","value":3}}}"#
        );
        assert_eq!(request.method_name(), "ListClients");
    }

    #[tokio::test]
    async fn test_typed_call_through_trait_object() {
        let client: Arc<dyn MasterClient> = Arc::new(Fixed);
        let response = client
            .list_clients(ListClientsRequest {
                filter: ClientFilter::All,
            })
            .await
            .unwrap();
        assert!(response.client_infos.is_empty());
    }

    #[tokio::test]
    async fn test_mismatched_response_is_data_loss() {
        let err = Fixed
            .register_node(RegisterNodeRequest {
                node_info: NodeInfo::new("n"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DataLoss(msg) if msg.contains("RegisterNode")));
    }
}
