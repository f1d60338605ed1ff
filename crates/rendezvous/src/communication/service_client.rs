// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request/reply client.
//!
//! Registration asks the master for the service; the server's `ServiceInfo` arrives as a
//! discovery push. `Registered` connects to the first TCP or UDS channel of its source and
//! reports through the connect-status callback; `Unregistered` shuts the connection down and
//! reports `Unregistered`. That is a normal lifecycle event, not an error.

use super::settings::Settings;
use super::subscriber::{LinkStatus, StatusCallback};
use crate::channel::{Channel, ChannelDef, ChannelSettings, ChannelSource, ChannelTypes};
use crate::error::{Error, Result};
use crate::info::{InfoStatus, NodeInfo};
use crate::proxy::{DiscoveryHandler, EntryId, Interest, MasterProxy, TaskGuard};
use crate::rpc::{
    MasterClientExt, Notification, RegisterServiceClientRequest, UnregisterServiceClientRequest,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

const SERVICE_CHANNEL_TYPES: ChannelTypes = ChannelTypes::TCP.union(ChannelTypes::UDS);

/// Connection to the current server. The channel is taken out for the duration of a call.
#[derive(Debug, Default)]
struct ServerLink {
    status: LinkStatus,
    channel: Mutex<Option<(u64, Channel)>>,
}

impl ServerLink {
    /// Puts a channel back after a call unless it was superseded meanwhile.
    fn restore(&self, generation: u64, channel: Channel) {
        let mut slot = self.channel.lock();
        if slot.is_none() && self.status.set_connected(generation, true) {
            *slot = Some((generation, channel));
        }
    }

    fn shutdown(&self) {
        self.status.next_generation();
        self.channel.lock().take();
    }
}

pub struct ServiceClient<Req, Resp> {
    proxy: MasterProxy,
    id: EntryId,
    link: Arc<ServerLink>,
    registration: Mutex<Option<(NodeInfo, String)>>,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> std::fmt::Debug for ServiceClient<Req, Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("id", &self.id)
            .field(
                "service",
                &self.registration.lock().as_ref().map(|(_, s)| s.clone()),
            )
            .field("connected", &self.link.status.is_connected())
            .finish()
    }
}

impl<Req, Resp> ServiceClient<Req, Resp>
where
    Req: Serialize + Send + 'static,
    Resp: DeserializeOwned + Send + 'static,
{
    pub fn new(proxy: &MasterProxy) -> Self {
        Self {
            proxy: proxy.clone(),
            id: proxy.runner.next_entry_id(),
            link: Arc::new(ServerLink::default()),
            registration: Mutex::new(None),
            _marker: PhantomData,
        }
    }

    /// Registers `node_info` as a client of `service`. `on_connect_status` follows the
    /// server: `Ok(Registered)` once connected, `Ok(Unregistered)` when it goes away,
    /// `Err` when connecting fails.
    pub async fn request_register(
        &self,
        node_info: &NodeInfo,
        service: &str,
        settings: Settings,
        on_connect_status: impl Fn(Result<InfoStatus>) + Send + Sync + 'static,
    ) -> Result<()> {
        if service.is_empty() {
            return Err(Error::InvalidArgument("service is empty".into()));
        }
        let id = self.id;
        let handler = discovery_handler(
            service.to_string(),
            settings.channel_settings(),
            self.link.clone(),
            Arc::new(on_connect_status),
        );
        let interest = Interest::Service(service.to_string());
        let master = self
            .proxy
            .runner
            .run(move |core| core.begin_register(id, interest, Some(handler)))
            .await??;

        let outcome = master
            .register_service_client(RegisterServiceClientRequest {
                node_info: node_info.clone(),
                service: service.to_string(),
                type_name: format!(
                    "{} -> {}",
                    std::any::type_name::<Req>(),
                    std::any::type_name::<Resp>()
                ),
            })
            .await
            .map(|_| Vec::new());
        self.proxy
            .runner
            .run(move |core| core.finish_register(id, outcome))
            .await??;

        info!(%service, node = %node_info, "service client registered");
        *self.registration.lock() = Some((node_info.clone(), service.to_string()));
        Ok(())
    }

    /// Unregisters and drops the server connection.
    pub async fn request_unregister(&self) -> Result<()> {
        let id = self.id;
        let master = self
            .proxy
            .runner
            .run(move |core| core.begin_unregister(id))
            .await??;
        let (node_info, service) = self.registration.lock().clone().unwrap_or_default();

        let outcome = master
            .unregister_service_client(UnregisterServiceClientRequest {
                node_info,
                service: service.clone(),
            })
            .await
            .map(|_| ());
        self.proxy
            .runner
            .run(move |core| core.finish_unregister(id, outcome))
            .await??;

        self.link.shutdown();
        *self.registration.lock() = None;
        info!(%service, "service client unregistered");
        Ok(())
    }

    /// Sends `request` and waits for the server's reply.
    ///
    /// Fails with `Unavailable` while no server is connected and with `Aborted` while another
    /// call is in flight.
    pub async fn call(&self, request: &Req) -> Result<Resp> {
        if !self.link.status.is_connected() {
            return Err(Error::Unavailable("service server is not connected".into()));
        }
        let (generation, mut channel) = self
            .link
            .channel
            .lock()
            .take()
            .ok_or_else(|| Error::Aborted("a call is already in flight".into()))?;

        let reply = async {
            channel.send_message(request).await?;
            channel
                .receive_message::<std::result::Result<Resp, Error>>()
                .await
        }
        .await;

        match reply {
            Ok(result) => {
                self.link.restore(generation, channel);
                result
            }
            // The reply frame was read whole; the stream is still usable.
            Err(e @ Error::DataLoss(_)) => {
                self.link.restore(generation, channel);
                Err(e)
            }
            Err(e) => {
                warn!("service call failed, dropping connection: {}", e);
                self.link.status.set_connected(generation, false);
                Err(e)
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.status.is_connected()
    }
}

impl<Req, Resp> Drop for ServiceClient<Req, Resp> {
    fn drop(&mut self) {
        let id = self.id;
        self.proxy.runner.post(move |core| core.remove_endpoint(id));
    }
}

fn discovery_handler(
    service: String,
    channel_settings: ChannelSettings,
    link: Arc<ServerLink>,
    on_status: StatusCallback,
) -> DiscoveryHandler {
    let mut current: Option<ChannelSource> = None;
    Box::new(move |notification: &Notification, task: &mut Option<TaskGuard>| {
        let Notification::Service(service_info) = notification else {
            return;
        };
        match service_info.status {
            InfoStatus::Registered => {
                if link.status.is_connected()
                    && current
                        .as_ref()
                        .is_some_and(|source| source.is_same(&service_info.source))
                {
                    trace!(%service, "already connected to this server");
                    return;
                }
                let Some(def) = service_info.source.find(SERVICE_CHANNEL_TYPES).cloned() else {
                    warn!(%service, source = ?service_info.source, "no stream channel offered");
                    on_status(Err(Error::InvalidArgument(format!(
                        "service {} offers no stream channel",
                        service
                    ))));
                    return;
                };
                current = Some(service_info.source.clone());
                link.channel.lock().take();
                let generation = link.status.next_generation();
                *task = Some(TaskGuard::spawn(connect(
                    service.clone(),
                    def,
                    channel_settings.clone(),
                    link.clone(),
                    generation,
                    on_status.clone(),
                )));
            }
            InfoStatus::Unregistered => {
                debug!(%service, "service server unregistered");
                current = None;
                *task = None;
                link.shutdown();
                on_status(Ok(InfoStatus::Unregistered));
            }
        }
    })
}

async fn connect(
    service: String,
    def: ChannelDef,
    settings: ChannelSettings,
    link: Arc<ServerLink>,
    generation: u64,
    on_status: StatusCallback,
) {
    match Channel::connect(&def, &settings).await {
        Ok(channel) => {
            {
                let mut slot = link.channel.lock();
                if !link.status.set_connected(generation, true) {
                    return;
                }
                *slot = Some((generation, channel));
            }
            debug!(%service, %def, "connected to service server");
            on_status(Ok(InfoStatus::Registered));
        }
        Err(e) => {
            warn!(%service, %def, "connect failed: {}", e);
            on_status(Err(e));
        }
    }
}
