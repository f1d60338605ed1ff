// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-flight register requests against a stub master.

use async_trait::async_trait;
use rendezvous::communication::{Settings, Subscriber};
use rendezvous::rpc::{
    MasterClient, MasterRequest, MasterResponse, RegisterClientResponse, SubscribeTopicResponse,
};
use rendezvous::{ChannelTypes, ClientInfo, Error, MasterProxy, NodeInfo, ProxyConfig, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Answers `RegisterClient`, holds every `SubscribeTopic` until released, and rejects the rest.
#[derive(Default)]
struct StubMaster {
    subscribe_calls: AtomicUsize,
    release: Notify,
}

#[async_trait]
impl MasterClient for StubMaster {
    async fn call(&self, request: MasterRequest) -> Result<MasterResponse> {
        match request {
            MasterRequest::RegisterClient(req) => Ok(RegisterClientResponse {
                client_info: ClientInfo {
                    id: 7,
                    ..req.client_info
                },
            }
            .into()),
            MasterRequest::SubscribeTopic(_) => {
                self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
                self.release.notified().await;
                Ok(SubscribeTopicResponse {}.into())
            }
            other => Err(Error::Unknown(format!(
                "stub does not answer {}",
                other.method_name()
            ))),
        }
    }
}

async fn started_proxy(stub: Arc<StubMaster>) -> MasterProxy {
    let config = ProxyConfig::local("127.0.0.1:1".parse().unwrap());
    let proxy = MasterProxy::with_master_client(config, stub);
    assert_eq!(proxy.start().await.unwrap().id, 7);
    proxy
}

async fn request_subscribe(subscriber: &Subscriber<String>) -> Result<()> {
    let mut node_info = NodeInfo::new("listener");
    node_info.client_id = 7;
    subscriber
        .request_subscribe(
            &node_info,
            "t",
            ChannelTypes::TCP,
            Settings::loopback(),
            |_| {},
            |_| {},
        )
        .await
}

#[tokio::test]
async fn test_register_while_registering_is_rejected_without_rpc() {
    let stub = Arc::new(StubMaster::default());
    let proxy = started_proxy(stub.clone()).await;
    let subscriber = Arc::new(Subscriber::<String>::new(&proxy));

    let first = {
        let subscriber = subscriber.clone();
        tokio::spawn(async move { request_subscribe(&subscriber).await })
    };
    tokio::time::timeout(Duration::from_secs(5), async {
        while stub.subscribe_calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let err = request_subscribe(&subscriber).await.unwrap_err();
    assert!(err.is_invalid_state(), "{}", err);
    assert!(matches!(
        err,
        Error::InvalidState {
            state: rendezvous::State::Registering,
            ..
        }
    ));
    assert_eq!(stub.subscribe_calls.load(Ordering::SeqCst), 1);

    stub.release.notify_one();
    first.await.unwrap().unwrap();
    assert!(subscriber.is_registered().await);

    let err = request_subscribe(&subscriber).await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidState {
            state: rendezvous::State::Registered,
            ..
        }
    ));
    assert_eq!(stub.subscribe_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_unregister_rolls_back_to_registered() {
    let stub = Arc::new(StubMaster::default());
    stub.release.notify_one();
    let proxy = started_proxy(stub.clone()).await;
    let subscriber = Subscriber::<String>::new(&proxy);
    request_subscribe(&subscriber).await.unwrap();

    let err = subscriber.request_unsubscribe().await.unwrap_err();
    assert!(matches!(err, Error::Unknown(_)));
    assert!(subscriber.is_registered().await);
}

#[tokio::test]
async fn test_unregister_before_register_is_invalid_state() {
    let stub = Arc::new(StubMaster::default());
    let proxy = started_proxy(stub).await;
    let subscriber = Subscriber::<String>::new(&proxy);

    let err = subscriber.request_unsubscribe().await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidState {
            state: rendezvous::State::Unregistered,
            ..
        }
    ));
}

#[tokio::test]
async fn test_endpoints_need_a_started_proxy() {
    let stub = Arc::new(StubMaster::default());
    let proxy = MasterProxy::with_master_client(
        ProxyConfig::local("127.0.0.1:1".parse().unwrap()),
        stub.clone(),
    );
    let subscriber = Subscriber::<String>::new(&proxy);
    assert!(matches!(
        request_subscribe(&subscriber).await,
        Err(Error::Unavailable(_))
    ));
    assert_eq!(stub.subscribe_calls.load(Ordering::SeqCst), 0);
}
