// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # rendezvous
//!
//! Node discovery and session establishment for pub/sub and request/reply.
//!
//! A process builds a [`MasterProxy`], which registers the process as a *client* with the
//! master, keeps a heartbeat channel open so the master can detect a dead process, and listens
//! for the master's discovery pushes. Nodes, publishers, subscribers and services register
//! through the proxy; the master answers with [`TopicInfo`]/[`ServiceInfo`] records whose
//! [`ChannelSource`] tells the other side how to connect.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rendezvous::{
//!     communication::{Publisher, Settings},
//!     ChannelTypes, MasterProxy, NodeInfo, ProxyConfig,
//! };
//!
//! # async fn run(node_info: NodeInfo) -> rendezvous::Result<()> {
//! let proxy = MasterProxy::new(ProxyConfig::from_env());
//! proxy.start().await?;
//!
//! let publisher = Publisher::<String>::new(&proxy);
//! publisher
//!     .request_publish(&node_info, "chatter", ChannelTypes::TCP, Settings::default())
//!     .await?;
//! publisher.publish(&"hello".to_string()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Layout
//!
//! - [`channel`]: transports (TCP, UDP, UDS, shared memory, WebSocket) and endpoint descriptors
//! - [`registry`]: master-side client/node tables
//! - [`register_state`]: registration lifecycle shared by every registrable relationship
//! - [`rpc`]: master RPC messages, wire frames and the TCP client
//! - [`master`]: the master service
//! - [`proxy`]: the per-process orchestrator
//! - [`communication`]: publishers, subscribers, service clients and servers

pub mod channel;
pub mod communication;
pub mod error;
pub mod info;
pub mod master;
pub mod proxy;
pub mod register_state;
pub mod registry;
pub mod rpc;

pub use channel::{Channel, ChannelDef, ChannelSettings, ChannelSource, ChannelType, ChannelTypes};
pub use error::{Error, Result};
pub use info::{
    ClientFilter, ClientInfo, InfoStatus, NodeFilter, NodeInfo, ServiceFilter, ServiceInfo,
    TopicFilter, TopicInfo,
};
pub use master::{MasterConfig, MasterServer};
pub use proxy::{DefaultNode, MasterProxy, NodeLifecycle, ProxyConfig, TopicInfoWatcherNode};
pub use register_state::{RegisterState, State};
