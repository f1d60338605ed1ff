// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! State owned by the proxy's core task.
//!
//! Node entries, endpoint register states, notification callbacks and the background guards
//! all live here and are only touched from closures posted through the [`TaskRunner`].

use super::config::ProxyConfig;
use super::heart_beat_signaller::HeartBeatSignaller;
use super::node::NodeLifecycle;
use super::notification_watcher::{MasterNotificationWatcher, NotificationListener};
use super::task_runner::{Reply, TaskGuard, TaskRunner};
use super::MasterProxy;
use crate::error::{Error, Result};
use crate::info::{ClientInfo, NodeInfo};
use crate::register_state::RegisterState;
use crate::rpc::{
    MasterClient, MasterClientExt, Notification, RegisterClientRequest, RegisterNodeRequest,
    TcpMasterClient, UnregisterNodeRequest,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

pub(crate) type EntryId = u64;

/// Runs on the core for every discovery event an endpoint is interested in. The slot holds the
/// endpoint's connection task, if any.
pub(crate) type DiscoveryHandler = Box<dyn FnMut(&Notification, &mut Option<TaskGuard>) + Send>;

/// Which discovery pushes an endpoint wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Interest {
    None,
    Topic(String),
    Service(String),
}

impl Interest {
    fn matches(&self, notification: &Notification) -> bool {
        match (self, notification) {
            (Self::Topic(topic), Notification::Topic(info)) => *topic == info.topic,
            (Self::Service(service), Notification::Service(info)) => *service == info.service,
            _ => false,
        }
    }
}

enum StartState {
    Idle,
    Starting(Vec<Reply<ClientInfo>>),
    Started(ClientInfo),
}

struct NodeEntry {
    node_info: NodeInfo,
    state: RegisterState,
    lifecycle: Box<dyn NodeLifecycle>,
}

/// Register state and background work of one publisher, subscriber or service endpoint.
struct Endpoint {
    interest: Interest,
    state: RegisterState,
    deferred: VecDeque<Notification>,
    handler: Option<DiscoveryHandler>,
    tasks: Vec<TaskGuard>,
    link: Option<TaskGuard>,
}

impl Endpoint {
    fn new() -> Self {
        Self {
            interest: Interest::None,
            state: RegisterState::new(),
            deferred: VecDeque::new(),
            handler: None,
            tasks: Vec::new(),
            link: None,
        }
    }

    fn on_discovery(&mut self, notification: &Notification) {
        if self.state.is_transitioning() {
            trace!(state = %self.state.state(), "deferring discovery event");
            self.deferred.push_back(notification.clone());
        } else if self.state.is_registered() {
            if let Some(handler) = self.handler.as_mut() {
                handler(notification, &mut self.link);
            }
        } else {
            trace!("ignoring discovery event for unregistered endpoint");
        }
    }

    fn replay_deferred(&mut self) {
        let deferred = std::mem::take(&mut self.deferred);
        if !self.state.is_registered() {
            return;
        }
        for notification in &deferred {
            self.on_discovery(notification);
        }
    }

    fn teardown(&mut self) {
        self.tasks.clear();
        self.link = None;
        self.deferred.clear();
    }
}

struct Bootstrap {
    master: Arc<dyn MasterClient>,
    client_info: ClientInfo,
    signaller: HeartBeatSignaller,
    listener: NotificationListener,
}

pub(crate) struct ProxyCore {
    runner: TaskRunner,
    config: ProxyConfig,
    injected_master: Option<Arc<dyn MasterClient>>,
    master: Option<Arc<dyn MasterClient>>,
    start_state: StartState,
    watcher: MasterNotificationWatcher,
    nodes: HashMap<EntryId, NodeEntry>,
    endpoints: HashMap<EntryId, Endpoint>,
    background: Vec<TaskGuard>,
    stopped: bool,
}

impl ProxyCore {
    pub(crate) fn new(
        runner: TaskRunner,
        config: ProxyConfig,
        injected_master: Option<Arc<dyn MasterClient>>,
    ) -> Self {
        Self {
            runner,
            config,
            injected_master,
            master: None,
            start_state: StartState::Idle,
            watcher: MasterNotificationWatcher::default(),
            nodes: HashMap::new(),
            endpoints: HashMap::new(),
            background: Vec::new(),
            stopped: false,
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn proxy(&self) -> MasterProxy {
        MasterProxy {
            runner: self.runner.clone(),
        }
    }

    pub(crate) fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub(crate) fn watcher_mut(&mut self) -> &mut MasterNotificationWatcher {
        &mut self.watcher
    }

    pub(crate) fn client_info(&self) -> Result<ClientInfo> {
        match &self.start_state {
            StartState::Started(client_info) => Ok(client_info.clone()),
            _ => Err(not_started()),
        }
    }

    pub(crate) fn master(&self) -> Result<Arc<dyn MasterClient>> {
        self.master.clone().ok_or_else(not_started)
    }

    // ---- start / stop ----

    pub(crate) fn start(&mut self, reply: Reply<ClientInfo>) {
        match &mut self.start_state {
            StartState::Started(client_info) => reply.send(Ok(client_info.clone())),
            StartState::Starting(waiters) => waiters.push(reply),
            StartState::Idle => {
                self.start_state = StartState::Starting(vec![reply]);
                let config = self.config.clone();
                let injected = self.injected_master.clone();
                self.runner
                    .spawn_reply(bootstrap(config, injected), |core, result| {
                        core.on_started(result)
                    });
            }
        }
    }

    fn on_started(&mut self, result: Result<Bootstrap>) {
        let waiters = match std::mem::replace(&mut self.start_state, StartState::Idle) {
            StartState::Starting(waiters) => waiters,
            other => {
                self.start_state = other;
                return;
            }
        };
        match result {
            Ok(bootstrap) => {
                let client_info = bootstrap.client_info;
                info!(client_id = client_info.id, "registered with master");
                let runner = self.runner.clone();
                self.background.push(bootstrap.signaller.start(&client_info, move |error| {
                    runner.post(move |core| core.on_heart_beat_failed(error));
                }));
                self.background
                    .push(bootstrap.listener.start(self.runner.clone()));
                self.master = Some(bootstrap.master);
                self.start_state = StartState::Started(client_info.clone());
                for waiter in waiters {
                    waiter.send(Ok(client_info.clone()));
                }
            }
            Err(e) => {
                error!("master proxy start failed: {}", e);
                for waiter in waiters {
                    waiter.send(Err(e.clone()));
                }
            }
        }
    }

    fn on_heart_beat_failed(&mut self, error: Error) {
        error!(
            "heart beat signaller stopped, master will drop this client: {}",
            error
        );
    }

    pub(crate) fn stop(&mut self) {
        if self.stopped {
            return;
        }
        info!(
            nodes = self.nodes.len(),
            endpoints = self.endpoints.len(),
            "master proxy shutting down"
        );
        self.stopped = true;
        for endpoint in self.endpoints.values_mut() {
            endpoint.teardown();
        }
        self.endpoints.clear();
        self.nodes.clear();
        self.background.clear();
        self.master = None;
    }

    // ---- nodes ----

    pub(crate) fn register_node(
        &mut self,
        mut node_info: NodeInfo,
        mut lifecycle: Box<dyn NodeLifecycle>,
        reply: Reply<NodeInfo>,
    ) {
        let (master, client_info) = match (self.master(), self.client_info()) {
            (Ok(master), Ok(client_info)) => (master, client_info),
            (Err(e), _) | (_, Err(e)) => return reply.send(Err(e)),
        };
        node_info.client_id = client_info.id;

        let existing = self
            .nodes
            .values()
            .find(|entry| !node_info.name.is_empty() && entry.node_info == node_info);
        if let Some(entry) = existing {
            let error = match entry.state.clone().to_registering() {
                Err(e) => e,
                Ok(()) => Error::AlreadyExists(format!("node {}", node_info)),
            };
            return reply.send(Err(error));
        }

        let mut state = RegisterState::new();
        if let Err(e) = state.to_registering() {
            return reply.send(Err(e));
        }
        lifecycle.on_init(&self.proxy());

        let id = self.runner.next_entry_id();
        debug!(node = %node_info, "registering node");
        self.nodes.insert(
            id,
            NodeEntry {
                node_info: node_info.clone(),
                state,
                lifecycle,
            },
        );
        self.runner.spawn_reply(
            async move { master.register_node(RegisterNodeRequest { node_info }).await },
            move |core, result| core.on_node_registered(id, result.map(|r| r.node_info), reply),
        );
    }

    fn on_node_registered(&mut self, id: EntryId, result: Result<NodeInfo>, reply: Reply<NodeInfo>) {
        let proxy = self.proxy();
        let Some(entry) = self.nodes.get_mut(&id) else {
            return reply.send(Err(Error::Aborted("node dropped during registration".into())));
        };
        match result.and_then(|node_info| entry.state.to_registered().map(|()| node_info)) {
            Ok(node_info) => {
                info!(node = %node_info, "node registered");
                entry.node_info = node_info.clone();
                entry.lifecycle.on_did_create(&proxy, &node_info);
                reply.send(Ok(node_info));
            }
            Err(e) => {
                if let Err(state_error) = entry.state.to_unregistered() {
                    warn!("node rollback failed: {}", state_error);
                }
                entry.lifecycle.on_error(&proxy, &e);
                self.nodes.remove(&id);
                reply.send(Err(e));
            }
        }
    }

    pub(crate) fn unregister_node(&mut self, node_info: NodeInfo, reply: Reply<()>) {
        let master = match self.master() {
            Ok(master) => master,
            Err(e) => return reply.send(Err(e)),
        };
        let Some((&id, entry)) = self
            .nodes
            .iter_mut()
            .find(|(_, entry)| entry.node_info == node_info)
        else {
            return reply.send(Err(Error::NotFound(format!("node {}", node_info))));
        };
        if let Err(e) = entry.state.to_unregistering() {
            return reply.send(Err(e));
        }
        let node_info = entry.node_info.clone();
        self.runner.spawn_reply(
            async move {
                master
                    .unregister_node(UnregisterNodeRequest { node_info })
                    .await
            },
            move |core, result| core.on_node_unregistered(id, result.map(|_| ()), reply),
        );
    }

    fn on_node_unregistered(&mut self, id: EntryId, result: Result<()>, reply: Reply<()>) {
        let Some(entry) = self.nodes.get_mut(&id) else {
            return reply.send(result);
        };
        match result {
            Ok(()) => {
                info!(node = %entry.node_info, "node unregistered");
                self.nodes.remove(&id);
                reply.send(Ok(()));
            }
            Err(e) => {
                if let Err(state_error) = entry.state.to_registered() {
                    warn!("node rollback failed: {}", state_error);
                }
                reply.send(Err(e));
            }
        }
    }

    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }

    // ---- endpoints ----

    /// Moves endpoint `id` to `Registering`. Fails without side effects unless it is
    /// `Unregistered`.
    pub(crate) fn begin_register(
        &mut self,
        id: EntryId,
        interest: Interest,
        handler: Option<DiscoveryHandler>,
    ) -> Result<Arc<dyn MasterClient>> {
        let master = self.master()?;
        let endpoint = self.endpoints.entry(id).or_insert_with(Endpoint::new);
        endpoint.state.to_registering()?;
        endpoint.interest = interest;
        endpoint.handler = handler;
        Ok(master)
    }

    /// Completes a register: `Ok` keeps `tasks` alive with the endpoint, `Err` rolls back.
    /// Deferred discovery events are replayed afterwards.
    pub(crate) fn finish_register(&mut self, id: EntryId, outcome: Result<Vec<TaskGuard>>) -> Result<()> {
        let Some(endpoint) = self.endpoints.get_mut(&id) else {
            return Err(Error::Aborted("endpoint dropped during registration".into()));
        };
        let result = match outcome {
            Ok(tasks) => endpoint.state.to_registered().map(|()| {
                endpoint.tasks = tasks;
            }),
            Err(e) => {
                endpoint.state.to_unregistered()?;
                endpoint.teardown();
                Err(e)
            }
        };
        endpoint.replay_deferred();
        result
    }

    pub(crate) fn begin_unregister(&mut self, id: EntryId) -> Result<Arc<dyn MasterClient>> {
        let master = self.master()?;
        let Some(endpoint) = self.endpoints.get_mut(&id) else {
            // Never registered.
            return RegisterState::new().to_unregistering().map(|()| master);
        };
        endpoint.state.to_unregistering()?;
        Ok(master)
    }

    /// Completes an unregister: `Ok` tears the endpoint's tasks down, `Err` rolls back.
    pub(crate) fn finish_unregister(&mut self, id: EntryId, outcome: Result<()>) -> Result<()> {
        let Some(endpoint) = self.endpoints.get_mut(&id) else {
            return outcome;
        };
        let result = match outcome {
            Ok(()) => endpoint.state.to_unregistered().map(|()| endpoint.teardown()),
            Err(e) => {
                endpoint.state.to_registered()?;
                Err(e)
            }
        };
        endpoint.replay_deferred();
        result
    }

    pub(crate) fn remove_endpoint(&mut self, id: EntryId) {
        if let Some(mut endpoint) = self.endpoints.remove(&id) {
            trace!(id, state = %endpoint.state.state(), "endpoint dropped");
            endpoint.teardown();
        }
    }

    pub(crate) fn is_endpoint_registered(&self, id: EntryId) -> bool {
        self.endpoints
            .get(&id)
            .is_some_and(|endpoint| endpoint.state.is_registered())
    }

    // ---- notifications ----

    pub(crate) fn on_notification(&mut self, notification: Notification) {
        for endpoint in self.endpoints.values_mut() {
            if endpoint.interest.matches(&notification) {
                endpoint.on_discovery(&notification);
            }
        }
        self.watcher.dispatch(&notification);
    }
}

fn not_started() -> Error {
    Error::Unavailable("master proxy is not started".into())
}

async fn bootstrap(
    config: ProxyConfig,
    injected: Option<Arc<dyn MasterClient>>,
) -> Result<Bootstrap> {
    let master: Arc<dyn MasterClient> = match injected {
        Some(master) => master,
        None => Arc::new(
            TcpMasterClient::connect(
                config.master_addr(),
                &config.channel_settings,
                config.rpc_timeout(),
            )
            .await?,
        ),
    };
    let signaller = HeartBeatSignaller::bind(&config.channel_settings).await?;
    let listener = NotificationListener::bind(&config.channel_settings).await?;
    let client_info = ClientInfo {
        id: 0,
        heart_beat_signaller_source: signaller.channel_source().clone(),
        master_notification_watcher_source: listener.channel_source().clone(),
        heart_beat_duration_ms: config.heart_beat_duration_ms,
    };
    let response = master
        .register_client(RegisterClientRequest { client_info })
        .await?;
    Ok(Bootstrap {
        master,
        client_info: response.client_info,
        signaller,
        listener,
    })
}
