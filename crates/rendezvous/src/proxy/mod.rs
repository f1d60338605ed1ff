// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-process master proxy.
//!
//! One [`MasterProxy`] is built by the process entry point and handed to every component that
//! talks to the master. Cloning it is cheap; all clones drive the same core task.
//!
//! ```text
//!   Publisher / Subscriber / Service*          HeartBeatSignaller  NotificationListener
//!            |  post / run                            |                   | post
//!            v                                        v                   v
//!   +-----------------------------------------------------------------------------+
//!   | ProxyCore (one task): nodes, endpoint RegisterStates, callbacks, guards    |
//!   +-----------------------------------------------------------------------------+
//!            | MasterClient
//!            v
//!        master (TCP RPC)
//! ```

pub mod config;
mod core;
mod heart_beat_signaller;
mod node;
mod notification_watcher;
mod task_runner;

pub use config::ProxyConfig;
pub use heart_beat_signaller::{
    heart_beat_duration, HeartBeatSignaller, DEFAULT_HEART_BEAT_DURATION, MAXIMUM_TRIAL,
};
pub use node::{DefaultNode, NodeLifecycle, TopicInfoWatcherDelegate, TopicInfoWatcherNode};
pub use notification_watcher::{MasterNotificationWatcher, ServiceInfoCallback, TopicInfoCallback};

pub(crate) use self::core::{DiscoveryHandler, EntryId, Interest};
pub(crate) use task_runner::{TaskGuard, TaskRunner};

use self::core::ProxyCore;
use crate::error::Result;
use crate::info::{ClientInfo, NodeInfo, ServiceInfo, TopicInfo};
use crate::rpc::{MasterClient, MasterRequest, MasterResponse};
use async_trait::async_trait;
use std::sync::Arc;

/// Handle to the process's master proxy.
#[derive(Clone)]
pub struct MasterProxy {
    pub(crate) runner: TaskRunner,
}

impl std::fmt::Debug for MasterProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterProxy").finish_non_exhaustive()
    }
}

impl MasterProxy {
    /// Builds a proxy that connects to the master over TCP on [`start`](Self::start).
    /// Must be called inside a tokio runtime.
    pub fn new(config: ProxyConfig) -> Self {
        Self::spawn(config, None)
    }

    /// Builds a proxy that talks to `master` instead of opening an RPC connection.
    pub fn with_master_client(config: ProxyConfig, master: Arc<dyn MasterClient>) -> Self {
        Self::spawn(config, Some(master))
    }

    fn spawn(config: ProxyConfig, master: Option<Arc<dyn MasterClient>>) -> Self {
        let runner = TaskRunner::spawn(move |runner| ProxyCore::new(runner, config, master));
        Self { runner }
    }

    /// Registers this process with the master and starts the heartbeat signaller and the
    /// notification listener. Later calls return the same `ClientInfo`; a failed start may be
    /// retried.
    pub async fn start(&self) -> Result<ClientInfo> {
        self.runner.request(|core, reply| core.start(reply)).await
    }

    pub async fn client_info(&self) -> Result<ClientInfo> {
        self.runner.run(|core| core.client_info()).await?
    }

    pub async fn config(&self) -> Result<ProxyConfig> {
        self.runner.run(|core| core.config().clone()).await
    }

    /// Stops the heartbeat signaller, the notification listener and every endpoint task.
    /// The master drops this client once heartbeats stop.
    pub fn shutdown(&self) {
        self.runner.post(|core| core.stop());
    }

    /// Registers `node_info` with the master and takes ownership of `node`.
    ///
    /// `node.on_init` runs before the request goes out, then `on_did_create` or `on_error`
    /// runs with the outcome. The client id of `node_info` is filled in; an empty name is
    /// replaced by a master-generated one.
    pub async fn request_register_node<N: NodeLifecycle>(
        &self,
        node_info: NodeInfo,
        node: N,
    ) -> Result<NodeInfo> {
        self.runner
            .request(move |core, reply| core.register_node(node_info, Box::new(node), reply))
            .await
    }

    /// Unregisters a node; its lifecycle object is dropped on success.
    pub async fn request_unregister_node(&self, node_info: &NodeInfo) -> Result<()> {
        let node_info = node_info.clone();
        self.runner
            .request(move |core, reply| core.unregister_node(node_info, reply))
            .await
    }

    pub async fn node_count(&self) -> Result<usize> {
        self.runner.run(|core| core.node_count()).await
    }

    pub fn set_topic_callback(
        &self,
        topic: impl Into<String>,
        callback: impl Fn(&TopicInfo) + Send + 'static,
    ) {
        let topic = topic.into();
        self.runner.post(move |core| {
            core.watcher_mut()
                .register_topic_callback(topic, Box::new(callback))
        });
    }

    pub fn unset_topic_callback(&self, topic: impl Into<String>) {
        let topic = topic.into();
        self.runner.post(move |core| {
            core.watcher_mut().unregister_topic_callback(&topic);
        });
    }

    pub fn set_all_topics_callback(&self, callback: impl Fn(&TopicInfo) + Send + 'static) {
        self.runner.post(move |core| {
            core.watcher_mut()
                .register_all_topics_callback(Box::new(callback))
        });
    }

    pub fn unset_all_topics_callback(&self) {
        self.runner.post(|core| {
            core.watcher_mut().unregister_all_topics_callback();
        });
    }

    pub fn set_service_callback(
        &self,
        service: impl Into<String>,
        callback: impl Fn(&ServiceInfo) + Send + 'static,
    ) {
        let service = service.into();
        self.runner.post(move |core| {
            core.watcher_mut()
                .register_service_callback(service, Box::new(callback))
        });
    }

    pub fn unset_service_callback(&self, service: impl Into<String>) {
        let service = service.into();
        self.runner.post(move |core| {
            core.watcher_mut().unregister_service_callback(&service);
        });
    }

    pub fn set_all_services_callback(&self, callback: impl Fn(&ServiceInfo) + Send + 'static) {
        self.runner.post(move |core| {
            core.watcher_mut()
                .register_all_services_callback(Box::new(callback))
        });
    }

    pub fn unset_all_services_callback(&self) {
        self.runner.post(|core| {
            core.watcher_mut().unregister_all_services_callback();
        });
    }
}

#[async_trait]
impl MasterClient for MasterProxy {
    async fn call(&self, request: MasterRequest) -> Result<MasterResponse> {
        let master = self.runner.run(|core| core.master()).await??;
        master.call(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::master::{MasterConfig, MasterServer};
    use crate::rpc::{ListNodesRequest, MasterClientExt};
    use crate::info::NodeFilter;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn spawn_master() -> MasterServer {
        let server = MasterServer::bind(MasterConfig::local()).await.unwrap();
        let runner = server.clone();
        tokio::spawn(async move { runner.run().await });
        server
    }

    fn proxy_for(server: &MasterServer) -> MasterProxy {
        MasterProxy::new(ProxyConfig::local(server.local_addr().unwrap()))
    }

    struct CountingNode {
        created: Arc<AtomicUsize>,
        failed: Arc<AtomicUsize>,
    }

    impl NodeLifecycle for CountingNode {
        fn on_did_create(&mut self, _proxy: &MasterProxy, _node_info: &NodeInfo) {
            self.created.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error(&mut self, _proxy: &MasterProxy, _error: &Error) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let server = spawn_master().await;
        let proxy = proxy_for(&server);
        let (first, second) = tokio::join!(proxy.start(), proxy.start());
        let first = first.unwrap();
        assert_eq!(first, second.unwrap());
        assert_eq!(proxy.start().await.unwrap(), first);
        assert_eq!(server.client_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_start_fails_when_master_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let proxy = MasterProxy::new(ProxyConfig::local(addr));
        assert!(proxy.start().await.unwrap_err().is_network());
        assert!(matches!(proxy.client_info().await, Err(Error::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_register_node_hooks() {
        let server = spawn_master().await;
        let proxy = proxy_for(&server);
        let client_info = proxy.start().await.unwrap();

        let created = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let node = || CountingNode {
            created: created.clone(),
            failed: failed.clone(),
        };

        let node_info = proxy
            .request_register_node(NodeInfo::new("camera"), node())
            .await
            .unwrap();
        assert_eq!(node_info.client_id, client_info.id);
        assert_eq!(created.load(Ordering::SeqCst), 1);

        let err = proxy
            .request_register_node(NodeInfo::new("camera"), node())
            .await
            .unwrap_err();
        assert!(err.is_invalid_state());
        assert_eq!(failed.load(Ordering::SeqCst), 0);

        let generated = proxy
            .request_register_node(NodeInfo::default(), node())
            .await
            .unwrap();
        assert!(!generated.name.is_empty());
        assert_eq!(proxy.node_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_master_rejection_runs_on_error() {
        let server = spawn_master().await;
        let first = proxy_for(&server);
        let second = proxy_for(&server);
        first.start().await.unwrap();
        second.start().await.unwrap();

        first
            .request_register_node(NodeInfo::new("lidar"), DefaultNode)
            .await
            .unwrap();

        let created = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let err = second
            .request_register_node(
                NodeInfo::new("lidar"),
                CountingNode {
                    created: created.clone(),
                    failed: failed.clone(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert_eq!(failed.load(Ordering::SeqCst), 1);
        assert_eq!(second.node_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unregister_node() {
        let server = spawn_master().await;
        let proxy = proxy_for(&server);
        proxy.start().await.unwrap();

        let node_info = proxy
            .request_register_node(NodeInfo::new("imu"), DefaultNode)
            .await
            .unwrap();
        proxy.request_unregister_node(&node_info).await.unwrap();
        assert_eq!(proxy.node_count().await.unwrap(), 0);
        assert!(matches!(
            proxy.request_unregister_node(&node_info).await,
            Err(Error::NotFound(_))
        ));

        let listed = proxy
            .list_nodes(ListNodesRequest {
                filter: NodeFilter::All,
            })
            .await
            .unwrap();
        assert!(listed.node_infos.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_lets_master_reap_client() {
        let server = spawn_master().await;
        let mut config = ProxyConfig::local(server.local_addr().unwrap());
        config.heart_beat_duration_ms = 20;
        let proxy = MasterProxy::new(config);
        proxy.start().await.unwrap();
        assert_eq!(server.client_count().await.unwrap(), 1);

        proxy.shutdown();
        tokio::time::timeout(Duration::from_secs(5), async {
            while server.client_count().await.unwrap() > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        assert!(matches!(proxy.client_info().await, Err(Error::Unavailable(_))));
    }
}
