// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Master service: RPC listener, registry actor and per-client liveness.
//!
//! The registry lives in one actor task. RPC connections, heartbeat monitors and notifiers only
//! send it commands. For every registered client the actor runs two tasks: a heartbeat monitor
//! that connects to the client's signaller and reaps the client when signals stop, and a
//! notifier that connects to the client's watcher and forwards discovery pushes in order.

use super::config::MasterConfig;
use super::state::Master;
use crate::channel::{
    Channel, ChannelSettings, ChannelSource, ChannelTypes, TcpChannel, TcpChannelListener,
};
use crate::error::{Error, Result};
use crate::info::ClientInfo;
use crate::proxy::heart_beat_duration;
use crate::rpc::{HeartBeat, MasterClient, MasterRequest, MasterResponse, Notification, RpcFrame};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Stream transports the master can connect back over.
const CALLBACK_CHANNEL_TYPES: ChannelTypes = ChannelTypes::TCP.union(ChannelTypes::UDS);

enum Command {
    Call {
        request: MasterRequest,
        reply: oneshot::Sender<Result<MasterResponse>>,
    },
    ClientLost {
        client_id: u32,
        epoch: u64,
        reason: String,
    },
    ClientCount {
        reply: oneshot::Sender<usize>,
    },
}

/// Master service.
#[derive(Clone)]
pub struct MasterServer {
    config: Arc<MasterConfig>,
    listener: Arc<TcpChannelListener>,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: watch::Sender<bool>,
    running: Arc<AtomicBool>,
}

impl std::fmt::Debug for MasterServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterServer")
            .field("addr", &self.listener.local_addr().ok())
            .field("running", &self.is_running())
            .finish()
    }
}

impl MasterServer {
    /// Validates `config`, binds the RPC listener and starts the registry actor.
    pub async fn bind(config: MasterConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;

        let settings = config.channel_settings();
        let listener = TcpChannelListener::bind_port(&settings, config.port).await?;
        info!("Master listening on {}", listener.channel_def());

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let actor = RegistryActor {
            master: Master::new(config.max_clients),
            sessions: HashMap::new(),
            next_epoch: 0,
            commands: commands.clone(),
            settings,
            heart_beat_tolerance: config.heart_beat_tolerance,
        };
        tokio::spawn(actor.run(command_rx, shutdown_rx));

        Ok(Self {
            config: Arc::new(config),
            listener: Arc::new(listener),
            commands,
            shutdown,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    /// Accepts RPC connections until [`MasterServer::shutdown`].
    pub async fn run(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::Aborted("master already running".into()));
        }
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok(channel) => {
                            let peer_addr = channel.peer_addr();
                            debug!("New connection from {}", peer_addr);
                            let commands = self.commands.clone();
                            let shutdown = self.shutdown.subscribe();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(channel, commands, shutdown).await {
                                    warn!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = wait_shutdown(&mut shutdown) => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Stops the accept loop, every connection handler and the registry actor.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn client_count(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::ClientCount { reply })
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }
}

#[async_trait]
impl MasterClient for MasterServer {
    async fn call(&self, request: MasterRequest) -> Result<MasterResponse> {
        submit(&self.commands, request).await
    }
}

async fn wait_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn stopped() -> Error {
    Error::Unavailable("master stopped".into())
}

async fn submit(
    commands: &mpsc::UnboundedSender<Command>,
    request: MasterRequest,
) -> Result<MasterResponse> {
    let (reply, rx) = oneshot::channel();
    commands
        .send(Command::Call { request, reply })
        .map_err(|_| stopped())?;
    rx.await.map_err(|_| stopped())?
}

/// Serves one RPC connection; requests are answered in arrival order.
async fn handle_connection(
    channel: TcpChannel,
    commands: mpsc::UnboundedSender<Command>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let peer_addr = channel.peer_addr();
    let (mut reader, mut writer) = channel.into_split();

    loop {
        let payload = tokio::select! {
            result = reader.receive() => match result {
                Ok(payload) => payload,
                Err(_) => {
                    debug!("Connection closed: {}", peer_addr);
                    return Ok(());
                }
            },
            _ = wait_shutdown(&mut shutdown) => {
                debug!("Connection handler shutting down: {}", peer_addr);
                return Ok(());
            }
        };

        let (id, request) = match serde_json::from_slice::<RpcFrame>(&payload)? {
            RpcFrame::Request { id, request } => (id, request),
            RpcFrame::Response { id, .. } => {
                warn!(id, "unexpected response frame from {}", peer_addr);
                continue;
            }
        };
        trace!(id, method = request.method_name(), "rpc received");
        let result = submit(&commands, request).await;
        let frame = RpcFrame::Response { id, result };
        writer.send(&serde_json::to_vec(&frame)?).await?;
    }
}

/// Liveness tasks of one registered client.
struct Session {
    epoch: u64,
    notifier: mpsc::UnboundedSender<Notification>,
    tasks: [JoinHandle<()>; 2],
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

struct RegistryActor {
    master: Master,
    sessions: HashMap<u32, Session>,
    next_epoch: u64,
    commands: mpsc::UnboundedSender<Command>,
    settings: ChannelSettings,
    heart_beat_tolerance: u32,
}

impl RegistryActor {
    async fn run(
        mut self,
        mut command_rx: mpsc::UnboundedReceiver<Command>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let command = tokio::select! {
                command = command_rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
                _ = wait_shutdown(&mut shutdown) => break,
            };
            match command {
                Command::Call { request, reply } => {
                    let result = self.master.handle(request);
                    if let Ok(MasterResponse::RegisterClient(response)) = &result {
                        self.open_session(&response.client_info);
                    }
                    self.flush();
                    let _ = reply.send(result);
                }
                Command::ClientLost {
                    client_id,
                    epoch,
                    reason,
                } => {
                    let current = self.sessions.get(&client_id).map(|s| s.epoch);
                    if current != Some(epoch) {
                        trace!(client_id, epoch, "stale liveness report");
                        continue;
                    }
                    warn!(client_id, "client lost: {}", reason);
                    self.sessions.remove(&client_id);
                    self.master.remove_client(client_id);
                    self.flush();
                }
                Command::ClientCount { reply } => {
                    let _ = reply.send(self.master.client_count());
                }
            }
        }
        debug!("registry actor stopped");
    }

    fn open_session(&mut self, client_info: &ClientInfo) {
        let client_id = client_info.id;
        let epoch = self.next_epoch;
        self.next_epoch += 1;

        let (notifier, notification_rx) = mpsc::unbounded_channel();
        let deadline = heart_beat_duration(client_info) * self.heart_beat_tolerance;
        let monitor = tokio::spawn(monitor_heart_beat(
            Liveness {
                client_id,
                epoch,
                commands: self.commands.clone(),
            },
            client_info.heart_beat_signaller_source.clone(),
            self.settings.clone(),
            deadline,
        ));
        let forwarder = tokio::spawn(forward_notifications(
            Liveness {
                client_id,
                epoch,
                commands: self.commands.clone(),
            },
            client_info.master_notification_watcher_source.clone(),
            self.settings.clone(),
            notification_rx,
        ));
        // Replacing a session drops the old one, which aborts its tasks.
        self.sessions.insert(
            client_id,
            Session {
                epoch,
                notifier,
                tasks: [monitor, forwarder],
            },
        );
    }

    /// Hands queued dispatches to the client notifiers.
    fn flush(&mut self) {
        for dispatch in self.master.take_dispatches() {
            match self.sessions.get(&dispatch.client_id) {
                Some(session) => {
                    let _ = session.notifier.send(dispatch.notification);
                }
                None => trace!(client_id = dispatch.client_id, "no session for dispatch"),
            }
        }
    }
}

/// Reports a client as lost to the registry actor.
struct Liveness {
    client_id: u32,
    epoch: u64,
    commands: mpsc::UnboundedSender<Command>,
}

impl Liveness {
    fn lost(&self, reason: String) {
        let _ = self.commands.send(Command::ClientLost {
            client_id: self.client_id,
            epoch: self.epoch,
            reason,
        });
    }
}

async fn connect_back(source: &ChannelSource, settings: &ChannelSettings) -> Result<Channel> {
    let def = source.find(CALLBACK_CHANNEL_TYPES).ok_or_else(|| {
        Error::InvalidArgument("source offers no stream channel".into())
    })?;
    Channel::connect(def, settings).await
}

async fn monitor_heart_beat(
    liveness: Liveness,
    source: ChannelSource,
    settings: ChannelSettings,
    deadline: Duration,
) {
    let mut channel = match connect_back(&source, &settings).await {
        Ok(channel) => channel,
        Err(e) => return liveness.lost(format!("heart beat connect failed: {}", e)),
    };
    debug!(client_id = liveness.client_id, ?deadline, "monitoring heart beat");
    loop {
        match tokio::time::timeout(deadline, channel.receive_message::<HeartBeat>()).await {
            Ok(Ok(beat)) => trace!(client_id = liveness.client_id, sequence = beat.sequence, "heart beat"),
            Ok(Err(e)) => return liveness.lost(format!("heart beat channel failed: {}", e)),
            Err(_) => return liveness.lost(format!("no heart beat within {:?}", deadline)),
        }
    }
}

async fn forward_notifications(
    liveness: Liveness,
    source: ChannelSource,
    settings: ChannelSettings,
    mut notification_rx: mpsc::UnboundedReceiver<Notification>,
) {
    let mut channel = match connect_back(&source, &settings).await {
        Ok(channel) => channel,
        Err(e) => return liveness.lost(format!("notification connect failed: {}", e)),
    };
    while let Some(notification) = notification_rx.recv().await {
        if let Err(e) = channel.send_message(&notification).await {
            return liveness.lost(format!("notification channel failed: {}", e));
        }
    }
}
