// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery pushes from the master.
//!
//! [`NotificationListener`] accepts the master's notification connection and forwards every
//! [`Notification`] to the proxy core in arrival order. [`MasterNotificationWatcher`] holds the
//! user callbacks the core dispatches to: at most one per topic or service name (last
//! registration wins) plus an optional catch-all. An update fires the exact-name callback and
//! then the catch-all.

use super::task_runner::{TaskGuard, TaskRunner};
use crate::channel::{ChannelListener, ChannelSettings, ChannelSource, ChannelType};
use crate::error::Result;
use crate::info::{ServiceInfo, TopicInfo};
use crate::rpc::Notification;
use std::collections::HashMap;
use tracing::{debug, trace, warn};

pub type TopicInfoCallback = Box<dyn Fn(&TopicInfo) + Send>;
pub type ServiceInfoCallback = Box<dyn Fn(&ServiceInfo) + Send>;

#[derive(Default)]
pub struct MasterNotificationWatcher {
    topic_callbacks: HashMap<String, TopicInfoCallback>,
    all_topics_callback: Option<TopicInfoCallback>,
    service_callbacks: HashMap<String, ServiceInfoCallback>,
    all_services_callback: Option<ServiceInfoCallback>,
}

impl std::fmt::Debug for MasterNotificationWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterNotificationWatcher")
            .field("topics", &self.topic_callbacks.keys().collect::<Vec<_>>())
            .field("all_topics", &self.all_topics_callback.is_some())
            .field("services", &self.service_callbacks.keys().collect::<Vec<_>>())
            .field("all_services", &self.all_services_callback.is_some())
            .finish()
    }
}

impl MasterNotificationWatcher {
    pub fn register_topic_callback(&mut self, topic: impl Into<String>, callback: TopicInfoCallback) {
        self.topic_callbacks.insert(topic.into(), callback);
    }

    /// Returns false when nothing was registered for `topic`.
    pub fn unregister_topic_callback(&mut self, topic: &str) -> bool {
        self.topic_callbacks.remove(topic).is_some()
    }

    pub fn register_all_topics_callback(&mut self, callback: TopicInfoCallback) {
        self.all_topics_callback = Some(callback);
    }

    pub fn unregister_all_topics_callback(&mut self) -> bool {
        self.all_topics_callback.take().is_some()
    }

    pub fn register_service_callback(
        &mut self,
        service: impl Into<String>,
        callback: ServiceInfoCallback,
    ) {
        self.service_callbacks.insert(service.into(), callback);
    }

    pub fn unregister_service_callback(&mut self, service: &str) -> bool {
        self.service_callbacks.remove(service).is_some()
    }

    pub fn register_all_services_callback(&mut self, callback: ServiceInfoCallback) {
        self.all_services_callback = Some(callback);
    }

    pub fn unregister_all_services_callback(&mut self) -> bool {
        self.all_services_callback.take().is_some()
    }

    pub fn dispatch(&self, notification: &Notification) {
        match notification {
            Notification::Topic(topic_info) => {
                if let Some(callback) = self.topic_callbacks.get(&topic_info.topic) {
                    callback(topic_info);
                }
                if let Some(callback) = &self.all_topics_callback {
                    callback(topic_info);
                }
            }
            Notification::Service(service_info) => {
                if let Some(callback) = self.service_callbacks.get(&service_info.service) {
                    callback(service_info);
                }
                if let Some(callback) = &self.all_services_callback {
                    callback(service_info);
                }
            }
        }
    }
}

/// Accepting side of the master's notification connection.
#[derive(Debug)]
pub(crate) struct NotificationListener {
    listener: ChannelListener,
    channel_source: ChannelSource,
}

impl NotificationListener {
    pub(crate) async fn bind(settings: &ChannelSettings) -> Result<Self> {
        let listener = ChannelListener::bind(ChannelType::Tcp, settings).await?;
        let channel_source = ChannelSource::from(listener.channel_def().clone());
        Ok(Self {
            listener,
            channel_source,
        })
    }

    pub(crate) fn channel_source(&self) -> &ChannelSource {
        &self.channel_source
    }

    /// Forwards notifications to the core until aborted. A dropped connection is re-accepted.
    pub(crate) fn start(mut self, runner: TaskRunner) -> TaskGuard {
        TaskGuard::spawn(async move {
            loop {
                let mut channel = match self.listener.accept().await {
                    Ok(channel) => channel,
                    Err(e) => {
                        warn!("notification accept failed: {}", e);
                        continue;
                    }
                };
                debug!("master notification channel accepted");
                loop {
                    match channel.receive_message::<Notification>().await {
                        Ok(notification) => {
                            trace!(?notification, "notification received");
                            runner.post(move |core| core.on_notification(notification));
                        }
                        Err(e) if e.is_network() => {
                            debug!("master notification channel closed: {}", e);
                            break;
                        }
                        Err(e) => warn!("dropping malformed notification: {}", e),
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> TopicInfoCallback) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let make = move |label: &str| -> TopicInfoCallback {
            let sink = sink.clone();
            let label = label.to_string();
            Box::new(move |info: &TopicInfo| {
                sink.lock().unwrap().push(format!("{}:{}", label, info.topic));
            })
        };
        (log, make)
    }

    #[test]
    fn test_exact_and_catch_all_both_fire() {
        let (log, make) = recorder();
        let mut watcher = MasterNotificationWatcher::default();
        watcher.register_topic_callback("t", make("exact"));
        watcher.register_all_topics_callback(make("all"));

        watcher.dispatch(&Notification::Topic(TopicInfo::unregistered("t")));
        watcher.dispatch(&Notification::Topic(TopicInfo::unregistered("u")));
        assert_eq!(*log.lock().unwrap(), vec!["exact:t", "all:t", "all:u"]);
    }

    #[test]
    fn test_last_registration_wins() {
        let (log, make) = recorder();
        let mut watcher = MasterNotificationWatcher::default();
        watcher.register_topic_callback("t", make("first"));
        watcher.register_topic_callback("t", make("second"));

        watcher.dispatch(&Notification::Topic(TopicInfo::unregistered("t")));
        assert_eq!(*log.lock().unwrap(), vec!["second:t"]);
    }

    #[test]
    fn test_unregister_is_noop_when_absent() {
        let mut watcher = MasterNotificationWatcher::default();
        assert!(!watcher.unregister_topic_callback("t"));
        assert!(!watcher.unregister_all_services_callback());

        watcher.register_service_callback("s", Box::new(|_| {}));
        assert!(watcher.unregister_service_callback("s"));
        assert!(!watcher.unregister_service_callback("s"));
    }

    #[test]
    fn test_updates_keep_push_order() {
        let (log, make) = recorder();
        let mut watcher = MasterNotificationWatcher::default();
        watcher.register_all_topics_callback(make("all"));
        for topic in ["a", "a", "b"] {
            watcher.dispatch(&Notification::Topic(TopicInfo::unregistered(topic)));
        }
        assert_eq!(*log.lock().unwrap(), vec!["all:a", "all:a", "all:b"]);
    }
}
