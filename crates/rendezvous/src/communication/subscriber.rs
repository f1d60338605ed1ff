// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic subscriber.
//!
//! The master pushes the publisher's `TopicInfo` once both sides are registered. A `Registered`
//! info makes the subscriber connect to the first compatible channel of its source; an
//! `Unregistered` info tears the connection down. Both outcomes are reported through the status
//! callback.

use super::settings::Settings;
use crate::channel::{Channel, ChannelDef, ChannelSettings, ChannelSource, ChannelType, ChannelTypes};
use crate::error::{Error, Result};
use crate::info::{InfoStatus, NodeInfo, TopicInfo};
use crate::proxy::{DiscoveryHandler, EntryId, Interest, MasterProxy, TaskGuard};
use crate::rpc::{MasterClientExt, Notification, SubscribeTopicRequest, UnsubscribeTopicRequest};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

pub type MessageCallback<M> = Arc<dyn Fn(M) + Send + Sync>;

/// Receives `Ok(Registered)` once connected, `Ok(Unregistered)` when the publisher goes away,
/// and `Err` when connecting fails.
pub type StatusCallback = Arc<dyn Fn(Result<InfoStatus>) + Send + Sync>;

/// Connection flag guarded by a generation, so a superseded connection task cannot overwrite
/// the state of its replacement.
#[derive(Debug, Default)]
pub(crate) struct LinkStatus {
    inner: Mutex<(u64, bool)>,
}

impl LinkStatus {
    /// Starts a new generation, disconnected.
    pub(crate) fn next_generation(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.0 += 1;
        inner.1 = false;
        inner.0
    }

    /// Returns false when `generation` has been superseded.
    pub(crate) fn set_connected(&self, generation: u64, connected: bool) -> bool {
        let mut inner = self.inner.lock();
        if inner.0 != generation {
            return false;
        }
        inner.1 = connected;
        true
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.inner.lock().1
    }
}

struct Registration {
    node_info: NodeInfo,
    topic: String,
}

/// Receives `M` values from the publisher of one topic.
pub struct Subscriber<M> {
    proxy: MasterProxy,
    id: EntryId,
    link: Arc<LinkStatus>,
    registration: Mutex<Option<Registration>>,
    _marker: PhantomData<fn() -> M>,
}

impl<M> std::fmt::Debug for Subscriber<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field(
                "topic",
                &self.registration.lock().as_ref().map(|r| r.topic.clone()),
            )
            .field("connected", &self.link.is_connected())
            .finish()
    }
}

impl<M: DeserializeOwned + Send + 'static> Subscriber<M> {
    pub fn new(proxy: &MasterProxy) -> Self {
        Self {
            proxy: proxy.clone(),
            id: proxy.runner.next_entry_id(),
            link: Arc::new(LinkStatus::default()),
            registration: Mutex::new(None),
            _marker: PhantomData,
        }
    }

    /// Subscribes `node_info` to `topic`.
    ///
    /// Only transports in `channel_types` are used to reach the publisher. Fails with
    /// `InvalidState` without contacting the master while a previous request is in flight.
    pub async fn request_subscribe(
        &self,
        node_info: &NodeInfo,
        topic: &str,
        channel_types: ChannelTypes,
        settings: Settings,
        on_message: impl Fn(M) + Send + Sync + 'static,
        on_status: impl Fn(Result<InfoStatus>) + Send + Sync + 'static,
    ) -> Result<()> {
        if topic.is_empty() {
            return Err(Error::InvalidArgument("topic is empty".into()));
        }
        let id = self.id;
        let handler = discovery_handler::<M>(
            topic.to_string(),
            channel_types,
            settings.channel_settings(),
            self.link.clone(),
            Arc::new(on_message),
            Arc::new(on_status),
        );
        let interest = Interest::Topic(topic.to_string());
        let master = self
            .proxy
            .runner
            .run(move |core| core.begin_register(id, interest, Some(handler)))
            .await??;

        let outcome = master
            .subscribe_topic(SubscribeTopicRequest {
                node_info: node_info.clone(),
                topic: topic.to_string(),
                type_name: std::any::type_name::<M>().to_string(),
            })
            .await
            .map(|_| Vec::new());
        self.proxy
            .runner
            .run(move |core| core.finish_register(id, outcome))
            .await??;

        info!(%topic, node = %node_info, "topic subscribed");
        *self.registration.lock() = Some(Registration {
            node_info: node_info.clone(),
            topic: topic.to_string(),
        });
        Ok(())
    }

    /// Unsubscribes and drops the publisher connection.
    pub async fn request_unsubscribe(&self) -> Result<()> {
        let id = self.id;
        let master = self
            .proxy
            .runner
            .run(move |core| core.begin_unregister(id))
            .await??;
        let (node_info, topic) = self
            .registration
            .lock()
            .as_ref()
            .map(|r| (r.node_info.clone(), r.topic.clone()))
            .unwrap_or_default();

        let outcome = master
            .unsubscribe_topic(UnsubscribeTopicRequest {
                node_info,
                topic: topic.clone(),
            })
            .await
            .map(|_| ());
        self.proxy
            .runner
            .run(move |core| core.finish_unregister(id, outcome))
            .await??;

        self.link.next_generation();
        *self.registration.lock() = None;
        info!(%topic, "topic unsubscribed");
        Ok(())
    }

    /// True while a publisher connection is up.
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub async fn is_registered(&self) -> bool {
        let id = self.id;
        self.proxy
            .runner
            .run(move |core| core.is_endpoint_registered(id))
            .await
            .unwrap_or(false)
    }
}

impl<M> Drop for Subscriber<M> {
    fn drop(&mut self) {
        let id = self.id;
        self.proxy.runner.post(move |core| core.remove_endpoint(id));
    }
}

fn discovery_handler<M: DeserializeOwned + Send + 'static>(
    topic: String,
    channel_types: ChannelTypes,
    channel_settings: ChannelSettings,
    link: Arc<LinkStatus>,
    on_message: MessageCallback<M>,
    on_status: StatusCallback,
) -> DiscoveryHandler {
    let mut current: Option<ChannelSource> = None;
    Box::new(move |notification: &Notification, task: &mut Option<TaskGuard>| {
        let Notification::Topic(topic_info) = notification else {
            return;
        };
        match topic_info.status {
            InfoStatus::Registered => {
                let alive = task.as_ref().is_some_and(|t| !t.is_finished());
                if alive
                    && current
                        .as_ref()
                        .is_some_and(|source| source.is_same(&topic_info.source))
                {
                    trace!(%topic, "already connected to this source");
                    return;
                }
                let Some(def) = topic_info.source.find(channel_types).cloned() else {
                    warn!(%topic, source = ?topic_info.source, "no compatible channel");
                    on_status(Err(Error::InvalidArgument(format!(
                        "no channel of {:?} offered for topic {}",
                        channel_types, topic
                    ))));
                    return;
                };
                current = Some(topic_info.source.clone());
                let generation = link.next_generation();
                *task = Some(TaskGuard::spawn(receive_loop(
                    topic_info.clone(),
                    def,
                    channel_settings.clone(),
                    link.clone(),
                    generation,
                    on_message.clone(),
                    on_status.clone(),
                )));
            }
            InfoStatus::Unregistered => {
                debug!(%topic, "publisher unregistered");
                current = None;
                *task = None;
                link.next_generation();
                on_status(Ok(InfoStatus::Unregistered));
            }
        }
    })
}

async fn receive_loop<M: DeserializeOwned>(
    topic_info: TopicInfo,
    def: ChannelDef,
    settings: ChannelSettings,
    link: Arc<LinkStatus>,
    generation: u64,
    on_message: MessageCallback<M>,
    on_status: StatusCallback,
) {
    let topic = topic_info.topic;
    let mut channel = match Channel::connect(&def, &settings).await {
        Ok(channel) => channel,
        Err(e) => {
            warn!(%topic, %def, "connect failed: {}", e);
            on_status(Err(e));
            return;
        }
    };
    if !link.set_connected(generation, true) {
        return;
    }
    debug!(%topic, %def, "connected to publisher");
    on_status(Ok(InfoStatus::Registered));

    loop {
        match channel.receive().await {
            Ok(payload) => match serde_json::from_slice::<M>(&payload) {
                Ok(message) => on_message(message),
                Err(e) => warn!(%topic, "dropping undecodable message: {}", e),
            },
            // Datagram and shared-memory reads consume the oversized message.
            Err(e)
                if e.is_not_enough_buffer()
                    && matches!(channel.channel_type(), ChannelType::Udp | ChannelType::Shm) =>
            {
                warn!(%topic, "dropping message: {}", e);
            }
            Err(e) => {
                debug!(%topic, "publisher connection closed: {}", e);
                break;
            }
        }
    }
    link.set_connected(generation, false);
}
