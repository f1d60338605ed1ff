// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared fixtures: a loopback master and started proxies.

#![allow(dead_code)]

use rendezvous::{DefaultNode, MasterConfig, MasterProxy, MasterServer, NodeInfo, ProxyConfig};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(5);

pub async fn spawn_master() -> MasterServer {
    let server = MasterServer::bind(MasterConfig::local()).await.unwrap();
    let runner = server.clone();
    tokio::spawn(async move { runner.run().await });
    server
}

pub async fn start_proxy(server: &MasterServer) -> MasterProxy {
    let proxy = MasterProxy::new(ProxyConfig::local(server.local_addr().unwrap()));
    proxy.start().await.unwrap();
    proxy
}

pub async fn register_node(proxy: &MasterProxy, name: &str) -> NodeInfo {
    proxy
        .request_register_node(NodeInfo::new(name), DefaultNode)
        .await
        .unwrap()
}

/// Next value from `rx`, failing the test after [`WAIT`].
pub async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Polls `condition` until it holds, failing the test after [`WAIT`].
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
