// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic publisher.
//!
//! `request_publish` opens one listening channel per requested transport and advertises their
//! descriptors to the master. Accepted connections feed one broadcast task; every published
//! message goes to each live connection, and connections that fail are discarded.

use super::settings::Settings;
use crate::channel::{Channel, ChannelListener, ChannelSource, ChannelType, ChannelTypes, ShmChannel};
use crate::error::{Error, Result};
use crate::info::{InfoStatus, NodeInfo, TopicInfo};
use crate::proxy::{EntryId, Interest, MasterProxy, TaskGuard};
use crate::rpc::{MasterClientExt, PublishTopicRequest, UnpublishTopicRequest};
use parking_lot::Mutex;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

#[derive(Default)]
struct PublisherInner {
    node_info: Option<NodeInfo>,
    topic_info: Option<TopicInfo>,
    settings: Settings,
    sink: Option<mpsc::Sender<Vec<u8>>>,
}

/// Publishes `M` values on one topic.
pub struct Publisher<M> {
    proxy: MasterProxy,
    id: EntryId,
    inner: Arc<Mutex<PublisherInner>>,
    _marker: PhantomData<fn(&M)>,
}

impl<M> std::fmt::Debug for Publisher<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Publisher")
            .field("id", &self.id)
            .field("topic", &inner.topic_info.as_ref().map(|t| t.topic.as_str()))
            .field("publishing", &inner.sink.is_some())
            .finish()
    }
}

impl<M: Serialize> Publisher<M> {
    pub fn new(proxy: &MasterProxy) -> Self {
        Self {
            proxy: proxy.clone(),
            id: proxy.runner.next_entry_id(),
            inner: Arc::new(Mutex::new(PublisherInner::default())),
            _marker: PhantomData,
        }
    }

    /// Opens channels of every type in `channel_types` and publishes `topic` for `node_info`.
    ///
    /// Fails with `InvalidState` while a previous publish or unpublish is in flight or the
    /// topic is already published; the channels are closed again when the master rejects the
    /// topic.
    pub async fn request_publish(
        &self,
        node_info: &NodeInfo,
        topic: &str,
        channel_types: ChannelTypes,
        settings: Settings,
    ) -> Result<()> {
        if topic.is_empty() {
            return Err(Error::InvalidArgument("topic is empty".into()));
        }
        if channel_types.is_empty() {
            return Err(Error::InvalidArgument("no channel type requested".into()));
        }
        let id = self.id;
        let master = self
            .proxy
            .runner
            .run(move |core| core.begin_register(id, Interest::None, None))
            .await??;

        let opened = open_channels(topic, channel_types, &settings).await;
        let outcome = match opened {
            Ok((source, tasks, sink)) => {
                let topic_info = TopicInfo {
                    topic: topic.to_string(),
                    type_name: std::any::type_name::<M>().to_string(),
                    status: InfoStatus::Registered,
                    source,
                };
                let request = PublishTopicRequest {
                    node_info: node_info.clone(),
                    topic_info: topic_info.clone(),
                };
                master
                    .publish_topic(request)
                    .await
                    .map(|_| (topic_info, tasks, sink))
            }
            Err(e) => Err(e),
        };

        let (outcome, published) = match outcome {
            Ok((topic_info, tasks, sink)) => (Ok(tasks), Some((topic_info, sink))),
            Err(e) => (Err(e), None),
        };
        self.proxy
            .runner
            .run(move |core| core.finish_register(id, outcome))
            .await??;

        if let Some((topic_info, sink)) = published {
            info!(topic = %topic_info.topic, source = ?topic_info.source, "topic published");
            let mut inner = self.inner.lock();
            inner.node_info = Some(node_info.clone());
            inner.topic_info = Some(topic_info);
            inner.settings = settings;
            inner.sink = Some(sink);
        }
        Ok(())
    }

    /// Withdraws the topic from the master and closes every channel.
    pub async fn request_unpublish(&self) -> Result<()> {
        let id = self.id;
        let master = self
            .proxy
            .runner
            .run(move |core| core.begin_unregister(id))
            .await??;
        let (node_info, topic) = {
            let inner = self.inner.lock();
            let node_info = inner.node_info.clone().unwrap_or_default();
            let topic = inner
                .topic_info
                .as_ref()
                .map(|t| t.topic.clone())
                .unwrap_or_default();
            (node_info, topic)
        };

        let outcome = master
            .unpublish_topic(UnpublishTopicRequest {
                node_info,
                topic: topic.clone(),
            })
            .await
            .map(|_| ());
        self.proxy
            .runner
            .run(move |core| core.finish_unregister(id, outcome))
            .await??;

        info!(%topic, "topic unpublished");
        let mut inner = self.inner.lock();
        inner.sink = None;
        inner.topic_info = None;
        inner.node_info = None;
        Ok(())
    }

    /// Queues `message` for every connected subscriber.
    ///
    /// A message larger than a fixed buffer is rejected before anything is queued.
    pub async fn publish(&self, message: &M) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        let sink = {
            let inner = self.inner.lock();
            if !inner.settings.is_dynamic_buffer && payload.len() > inner.settings.buffer_size {
                return Err(Error::not_enough_buffer(
                    payload.len(),
                    inner.settings.buffer_size,
                ));
            }
            inner
                .sink
                .clone()
                .ok_or_else(|| Error::Aborted("topic is not published".into()))?
        };
        sink.send(payload)
            .await
            .map_err(|_| Error::Aborted("publisher channels are closed".into()))
    }

    /// Advertised info while published.
    pub fn topic_info(&self) -> Option<TopicInfo> {
        self.inner.lock().topic_info.clone()
    }

    pub fn is_publishing(&self) -> bool {
        self.inner.lock().sink.is_some()
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

impl<M> Drop for Publisher<M> {
    fn drop(&mut self) {
        let id = self.id;
        self.proxy.runner.post(move |core| core.remove_endpoint(id));
    }
}

/// Binds every requested channel and starts the broadcast task.
async fn open_channels(
    topic: &str,
    channel_types: ChannelTypes,
    settings: &Settings,
) -> Result<(ChannelSource, Vec<TaskGuard>, mpsc::Sender<Vec<u8>>)> {
    let channel_settings = settings.channel_settings();
    let (accepted_tx, accepted_rx) = mpsc::unbounded_channel::<Channel>();
    let mut defs = Vec::new();
    let mut tasks = Vec::new();
    let mut shm = None;

    for channel_type in channel_types.types() {
        if channel_type == ChannelType::Shm {
            let (writer, def) = ShmChannel::create(&channel_settings)?;
            defs.push(def);
            shm = Some(writer);
            continue;
        }
        let listener = ChannelListener::bind(channel_type, &channel_settings).await?;
        defs.push(listener.channel_def().clone());
        tasks.push(accept_loop(topic.to_string(), listener, accepted_tx.clone()));
    }

    let (sink, messages) = mpsc::channel(settings.queue_size.max(1));
    tasks.push(TaskGuard::spawn(broadcast(
        topic.to_string(),
        messages,
        accepted_rx,
        shm,
    )));
    Ok((ChannelSource::new(defs), tasks, sink))
}

fn accept_loop(
    topic: String,
    mut listener: ChannelListener,
    accepted: mpsc::UnboundedSender<Channel>,
) -> TaskGuard {
    TaskGuard::spawn(async move {
        loop {
            match listener.accept().await {
                Ok(channel) => {
                    debug!(%topic, channel_type = %channel.channel_type(), "subscriber connected");
                    if accepted.send(channel).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(%topic, "accept failed: {}", e),
            }
        }
    })
}

async fn broadcast(
    topic: String,
    mut messages: mpsc::Receiver<Vec<u8>>,
    mut accepted: mpsc::UnboundedReceiver<Channel>,
    mut shm: Option<ShmChannel>,
) {
    let mut peers: Vec<Channel> = Vec::new();
    loop {
        tokio::select! {
            Some(channel) = accepted.recv() => peers.push(channel),
            message = messages.recv() => {
                let Some(payload) = message else { break };
                if let Some(writer) = shm.as_mut() {
                    if let Err(e) = writer.send(&payload).await {
                        warn!(%topic, "shared memory write failed: {}", e);
                    }
                }
                let mut alive = Vec::with_capacity(peers.len());
                for mut peer in peers.drain(..) {
                    match peer.send(&payload).await {
                        Ok(()) => alive.push(peer),
                        Err(e) if e.is_not_enough_buffer() => {
                            warn!(%topic, "message dropped for one subscriber: {}", e);
                            alive.push(peer);
                        }
                        Err(e) => debug!(%topic, "discarding subscriber: {}", e),
                    }
                }
                peers = alive;
                trace!(%topic, peers = peers.len(), "message broadcast");
            }
        }
    }
    trace!(%topic, "broadcast stopped");
}
