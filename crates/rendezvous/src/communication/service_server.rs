// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request/reply server.
//!
//! Registration starts a TCP server and advertises it in the `ServiceInfo` source. Each
//! connection carries a sequence of JSON requests, each answered with a JSON
//! `Result<Resp, Error>`. A successful unregister shuts the server and its connections down.

use super::settings::Settings;
use crate::channel::{Channel, ChannelListener, ChannelSource, ChannelType};
use crate::error::{Error, Result};
use crate::info::{InfoStatus, NodeInfo, ServiceInfo};
use crate::proxy::{EntryId, Interest, MasterProxy, TaskGuard};
use crate::rpc::{MasterClientExt, RegisterServiceServerRequest, UnregisterServiceServerRequest};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

pub type RequestHandler<Req, Resp> = Arc<dyn Fn(Req) -> Result<Resp> + Send + Sync>;

pub struct ServiceServer<Req, Resp> {
    proxy: MasterProxy,
    id: EntryId,
    registration: Mutex<Option<(NodeInfo, ServiceInfo)>>,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> std::fmt::Debug for ServiceServer<Req, Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceServer")
            .field("id", &self.id)
            .field(
                "service",
                &self.registration.lock().as_ref().map(|(_, s)| s.service.clone()),
            )
            .finish()
    }
}

impl<Req, Resp> ServiceServer<Req, Resp>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + Sync + 'static,
{
    pub fn new(proxy: &MasterProxy) -> Self {
        Self {
            proxy: proxy.clone(),
            id: proxy.runner.next_entry_id(),
            registration: Mutex::new(None),
            _marker: PhantomData,
        }
    }

    /// Starts serving `service` with `handler` and registers it for `node_info`.
    pub async fn request_register(
        &self,
        node_info: &NodeInfo,
        service: &str,
        settings: Settings,
        handler: impl Fn(Req) -> Result<Resp> + Send + Sync + 'static,
    ) -> Result<()> {
        if service.is_empty() {
            return Err(Error::InvalidArgument("service is empty".into()));
        }
        let id = self.id;
        let master = self
            .proxy
            .runner
            .run(move |core| core.begin_register(id, Interest::None, None))
            .await??;

        let handler: RequestHandler<Req, Resp> = Arc::new(handler);
        let started = match ChannelListener::bind(ChannelType::Tcp, &settings.channel_settings()).await
        {
            Ok(listener) => {
                let service_info = ServiceInfo {
                    service: service.to_string(),
                    type_name: format!(
                        "{} -> {}",
                        std::any::type_name::<Req>(),
                        std::any::type_name::<Resp>()
                    ),
                    status: InfoStatus::Registered,
                    source: ChannelSource::from(listener.channel_def().clone()),
                };
                let task = serve(service.to_string(), listener, handler);
                master
                    .register_service_server(RegisterServiceServerRequest {
                        node_info: node_info.clone(),
                        service_info: service_info.clone(),
                    })
                    .await
                    .map(|_| (service_info, task))
            }
            Err(e) => Err(e),
        };

        let (outcome, service_info) = match started {
            Ok((service_info, task)) => (Ok(vec![task]), Some(service_info)),
            Err(e) => (Err(e), None),
        };
        self.proxy
            .runner
            .run(move |core| core.finish_register(id, outcome))
            .await??;

        if let Some(service_info) = service_info {
            info!(service = %service_info.service, source = ?service_info.source, "service registered");
            *self.registration.lock() = Some((node_info.clone(), service_info));
        }
        Ok(())
    }

    /// Withdraws the service and shuts the server down.
    pub async fn request_unregister(&self) -> Result<()> {
        let id = self.id;
        let master = self
            .proxy
            .runner
            .run(move |core| core.begin_unregister(id))
            .await??;
        let (node_info, service) = self
            .registration
            .lock()
            .as_ref()
            .map(|(node_info, info)| (node_info.clone(), info.service.clone()))
            .unwrap_or_default();

        let outcome = master
            .unregister_service_server(UnregisterServiceServerRequest {
                node_info,
                service: service.clone(),
            })
            .await
            .map(|_| ());
        self.proxy
            .runner
            .run(move |core| core.finish_unregister(id, outcome))
            .await??;

        *self.registration.lock() = None;
        info!(%service, "service unregistered");
        Ok(())
    }

    pub fn service_info(&self) -> Option<ServiceInfo> {
        self.registration.lock().as_ref().map(|(_, info)| info.clone())
    }
}

impl<Req, Resp> Drop for ServiceServer<Req, Resp> {
    fn drop(&mut self) {
        let id = self.id;
        self.proxy.runner.post(move |core| core.remove_endpoint(id));
    }
}

/// Accepts connections until aborted; connections are aborted with it.
fn serve<Req, Resp>(
    service: String,
    mut listener: ChannelListener,
    handler: RequestHandler<Req, Resp>,
) -> TaskGuard
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + Sync + 'static,
{
    TaskGuard::spawn(async move {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(channel) => {
                        debug!(%service, "service client connected");
                        connections.spawn(handle_connection(service.clone(), channel, handler.clone()));
                    }
                    Err(e) => warn!(%service, "accept failed: {}", e),
                },
                Some(_) = connections.join_next() => {}
            }
        }
    })
}

async fn handle_connection<Req, Resp>(
    service: String,
    mut channel: Channel,
    handler: RequestHandler<Req, Resp>,
) where
    Req: DeserializeOwned,
    Resp: Serialize,
{
    loop {
        let result: std::result::Result<Resp, Error> = match channel.receive_message::<Req>().await {
            Ok(request) => handler(request),
            Err(e) if matches!(e, Error::DataLoss(_)) => Err(e),
            Err(e) => {
                debug!(%service, "service connection closed: {}", e);
                return;
            }
        };
        if let Err(e) = channel.send_message(&result).await {
            debug!(%service, "reply failed: {}", e);
            return;
        }
        trace!(%service, ok = result.is_ok(), "request answered");
    }
}
