// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frames exchanged on master connections.
//!
//! Each frame travels as one length-prefixed JSON payload over a stream channel.

use super::{MasterRequest, MasterResponse};
use crate::error::Error;
use crate::info::{ServiceInfo, TopicInfo};
use serde::{Deserialize, Serialize};

/// RPC traffic between a client and the master. Responses echo the request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RpcFrame {
    Request {
        id: u64,
        request: MasterRequest,
    },
    Response {
        id: u64,
        result: std::result::Result<MasterResponse, Error>,
    },
}

/// Discovery push from the master to a client's notification watcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "info", rename_all = "snake_case")]
pub enum Notification {
    Topic(TopicInfo),
    Service(ServiceInfo),
}

/// One liveness signal from a client to the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartBeat {
    pub sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::UnregisterNodeResponse;

    #[test]
    fn test_error_response_frame() {
        let frame = RpcFrame::Response {
            id: 9,
            result: Err(Error::AlreadyExists("topic t".into())),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""kind":"response""#));
        assert!(json.contains(r#""Err""#));
        assert_eq!(serde_json::from_str::<RpcFrame>(&json).unwrap(), frame);
    }

    #[test]
    fn test_ok_response_frame() {
        let frame = RpcFrame::Response {
            id: 1,
            result: Ok(MasterResponse::UnregisterNode(UnregisterNodeResponse {})),
        };
        let back: RpcFrame = serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn test_notification_tag() {
        let json = serde_json::to_string(&Notification::Topic(TopicInfo::unregistered("t"))).unwrap();
        assert!(json.starts_with(r#"{"kind":"topic","info":"#));
    }
}
