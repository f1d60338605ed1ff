// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publisher/subscriber rendezvous through a loopback master.

mod common;

use common::{recv, register_node, spawn_master, start_proxy, wait_until};
use rendezvous::communication::{Publisher, Settings, Subscriber};
use rendezvous::{ChannelTypes, InfoStatus, MasterProxy, NodeInfo, Result, TopicInfo};
use std::time::Duration;
use tokio::sync::mpsc;

struct SubscriberEvents {
    messages: mpsc::UnboundedReceiver<String>,
    statuses: mpsc::UnboundedReceiver<Result<InfoStatus>>,
}

async fn subscribe(
    subscriber: &Subscriber<String>,
    node_info: &NodeInfo,
    topic: &str,
    channel_types: ChannelTypes,
) -> SubscriberEvents {
    let (message_tx, messages) = mpsc::unbounded_channel();
    let (status_tx, statuses) = mpsc::unbounded_channel();
    subscriber
        .request_subscribe(
            node_info,
            topic,
            channel_types,
            Settings::loopback(),
            move |message| {
                let _ = message_tx.send(message);
            },
            move |status| {
                let _ = status_tx.send(status);
            },
        )
        .await
        .unwrap();
    SubscriberEvents { messages, statuses }
}

/// Publishes until the subscriber sees `text`; the publisher may not have accepted the
/// subscriber's connection yet when the first message goes out.
async fn deliver(publisher: &Publisher<String>, events: &mut SubscriberEvents, text: &str) {
    for _ in 0..100 {
        publisher.publish(&text.to_string()).await.unwrap();
        if let Ok(Some(received)) =
            tokio::time::timeout(Duration::from_millis(50), events.messages.recv()).await
        {
            assert_eq!(received, text);
            return;
        }
    }
    panic!("message {:?} never delivered", text);
}

fn topic_callback(proxy: &MasterProxy, topic: &str) -> mpsc::UnboundedReceiver<TopicInfo> {
    let (tx, rx) = mpsc::unbounded_channel();
    proxy.set_topic_callback(topic, move |info| {
        let _ = tx.send(info.clone());
    });
    rx
}

#[tokio::test]
async fn test_subscriber_connects_to_publisher_over_tcp() {
    let server = spawn_master().await;
    let talker_proxy = start_proxy(&server).await;
    let listener_proxy = start_proxy(&server).await;
    let talker = register_node(&talker_proxy, "talker").await;
    let listener = register_node(&listener_proxy, "listener").await;

    let publisher = Publisher::<String>::new(&talker_proxy);
    publisher
        .request_publish(&talker, "t", ChannelTypes::TCP, Settings::loopback())
        .await
        .unwrap();
    let advertised = publisher.topic_info().unwrap();

    let mut infos = topic_callback(&listener_proxy, "t");
    let subscriber = Subscriber::<String>::new(&listener_proxy);
    let mut events = subscribe(&subscriber, &listener, "t", ChannelTypes::TCP).await;

    let info = recv(&mut infos).await;
    assert_eq!(info.topic, "t");
    assert_eq!(info.status, InfoStatus::Registered);
    assert!(info.source.is_same(&advertised.source));

    assert_eq!(recv(&mut events.statuses).await.unwrap(), InfoStatus::Registered);
    assert!(subscriber.is_connected());

    deliver(&publisher, &mut events, "hello").await;
}

#[tokio::test]
async fn test_subscriber_before_publisher() {
    let server = spawn_master().await;
    let proxy = start_proxy(&server).await;
    let talker = register_node(&proxy, "talker").await;
    let listener = register_node(&proxy, "listener").await;

    let subscriber = Subscriber::<String>::new(&proxy);
    let mut events = subscribe(&subscriber, &listener, "late", ChannelTypes::TCP).await;
    assert!(!subscriber.is_connected());

    let publisher = Publisher::<String>::new(&proxy);
    publisher
        .request_publish(&talker, "late", ChannelTypes::TCP, Settings::loopback())
        .await
        .unwrap();

    assert_eq!(recv(&mut events.statuses).await.unwrap(), InfoStatus::Registered);
    deliver(&publisher, &mut events, "first").await;
}

#[tokio::test]
async fn test_unpublish_reports_unregistered() {
    let server = spawn_master().await;
    let talker_proxy = start_proxy(&server).await;
    let listener_proxy = start_proxy(&server).await;
    let talker = register_node(&talker_proxy, "talker").await;
    let listener = register_node(&listener_proxy, "listener").await;

    let publisher = Publisher::<String>::new(&talker_proxy);
    publisher
        .request_publish(&talker, "t", ChannelTypes::TCP, Settings::loopback())
        .await
        .unwrap();
    let subscriber = Subscriber::<String>::new(&listener_proxy);
    let mut events = subscribe(&subscriber, &listener, "t", ChannelTypes::TCP).await;
    assert_eq!(recv(&mut events.statuses).await.unwrap(), InfoStatus::Registered);

    let mut infos = topic_callback(&listener_proxy, "t");
    publisher.request_unpublish().await.unwrap();
    assert!(!publisher.is_publishing());

    let status = recv(&mut events.statuses).await;
    assert_eq!(status.unwrap(), InfoStatus::Unregistered);
    assert!(!subscriber.is_connected());
    assert!(subscriber.is_registered().await);

    let info = recv(&mut infos).await;
    assert_eq!(info.status, InfoStatus::Unregistered);
    assert!(info.source.is_empty());
}

#[tokio::test]
async fn test_dropped_client_unpublishes_its_topics() {
    let server = spawn_master().await;
    let mut config = rendezvous::ProxyConfig::local(server.local_addr().unwrap());
    config.heart_beat_duration_ms = 20;
    let talker_proxy = MasterProxy::new(config);
    talker_proxy.start().await.unwrap();
    let listener_proxy = start_proxy(&server).await;
    let talker = register_node(&talker_proxy, "talker").await;
    let listener = register_node(&listener_proxy, "listener").await;

    let publisher = Publisher::<String>::new(&talker_proxy);
    publisher
        .request_publish(&talker, "t", ChannelTypes::TCP, Settings::loopback())
        .await
        .unwrap();
    let subscriber = Subscriber::<String>::new(&listener_proxy);
    let mut events = subscribe(&subscriber, &listener, "t", ChannelTypes::TCP).await;
    assert_eq!(recv(&mut events.statuses).await.unwrap(), InfoStatus::Registered);

    talker_proxy.shutdown();
    wait_until(|| {
        let server = server.clone();
        async move { server.client_count().await.unwrap() == 1 }
    })
    .await;

    // The connection may drop before the master reports the topic gone.
    loop {
        match recv(&mut events.statuses).await {
            Ok(InfoStatus::Unregistered) => break,
            other => assert!(other.is_err() || other == Ok(InfoStatus::Registered)),
        }
    }
    assert!(!subscriber.is_connected());
}

#[cfg(unix)]
#[tokio::test]
async fn test_subscriber_picks_compatible_channel() {
    let server = spawn_master().await;
    let proxy = start_proxy(&server).await;
    let talker = register_node(&proxy, "talker").await;
    let listener = register_node(&proxy, "listener").await;

    let publisher = Publisher::<String>::new(&proxy);
    publisher
        .request_publish(
            &talker,
            "multi",
            ChannelTypes::TCP | ChannelTypes::UDS,
            Settings::loopback(),
        )
        .await
        .unwrap();
    let source = publisher.topic_info().unwrap().source;
    assert_eq!(source.channel_types(), ChannelTypes::TCP | ChannelTypes::UDS);

    let subscriber = Subscriber::<String>::new(&proxy);
    let mut events = subscribe(&subscriber, &listener, "multi", ChannelTypes::UDS).await;
    assert_eq!(recv(&mut events.statuses).await.unwrap(), InfoStatus::Registered);
    deliver(&publisher, &mut events, "over uds").await;
}

#[tokio::test]
async fn test_no_compatible_channel_is_reported() {
    let server = spawn_master().await;
    let proxy = start_proxy(&server).await;
    let talker = register_node(&proxy, "talker").await;
    let listener = register_node(&proxy, "listener").await;

    let publisher = Publisher::<String>::new(&proxy);
    publisher
        .request_publish(&talker, "tcp-only", ChannelTypes::TCP, Settings::loopback())
        .await
        .unwrap();

    let subscriber = Subscriber::<String>::new(&proxy);
    let mut events = subscribe(&subscriber, &listener, "tcp-only", ChannelTypes::UDP).await;
    let status = recv(&mut events.statuses).await;
    assert!(matches!(status, Err(rendezvous::Error::InvalidArgument(_))));
    assert!(!subscriber.is_connected());
}

#[tokio::test]
async fn test_second_publisher_for_topic_is_rejected() {
    let server = spawn_master().await;
    let proxy = start_proxy(&server).await;
    let first = register_node(&proxy, "first").await;
    let second = register_node(&proxy, "second").await;

    let publisher = Publisher::<String>::new(&proxy);
    publisher
        .request_publish(&first, "t", ChannelTypes::TCP, Settings::loopback())
        .await
        .unwrap();

    let rival = Publisher::<String>::new(&proxy);
    let err = rival
        .request_publish(&second, "t", ChannelTypes::TCP, Settings::loopback())
        .await
        .unwrap_err();
    assert!(matches!(err, rendezvous::Error::AlreadyExists(_)));
    assert!(!rival.is_registered().await);

    // Rolled back: a retry goes through the master again instead of failing locally.
    let retry = rival
        .request_publish(&second, "t", ChannelTypes::TCP, Settings::loopback())
        .await
        .unwrap_err();
    assert!(matches!(retry, rendezvous::Error::AlreadyExists(_)));
}
