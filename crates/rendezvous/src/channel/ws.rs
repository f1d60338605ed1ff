// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WebSocket channel (server side).
//!
//! Publishers expose a WebSocket endpoint for browser-style consumers. The listener runs a small
//! axum server that upgrades every request on `/` and hands the socket to [`WsChannelListener::accept`].
//! Payloads travel as binary messages.

use super::buffer::{ChannelBuffer, ChannelSettings};
use super::def::{ChannelDef, IpEndpoint};
use crate::error::{Error, Result};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Pending upgraded sockets not yet accepted.
const ACCEPT_BACKLOG: usize = 16;

pub struct WsChannel {
    socket: WebSocket,
    send_buffer: ChannelBuffer,
    receive_buffer: ChannelBuffer,
    connected: bool,
}

impl std::fmt::Debug for WsChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsChannel")
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

impl WsChannel {
    fn new(socket: WebSocket, settings: &ChannelSettings) -> Self {
        Self {
            socket,
            send_buffer: ChannelBuffer::new(settings.send_buffer),
            receive_buffer: ChannelBuffer::new(settings.receive_buffer),
            connected: true,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.send_buffer.reserve(payload.len())?;
        if let Err(e) = self.socket.send(Message::Binary(payload.to_vec())).await {
            self.connected = false;
            return Err(Error::Network(e.to_string()));
        }
        Ok(())
    }

    pub async fn receive(&mut self) -> Result<Vec<u8>> {
        loop {
            let payload = match self.socket.next().await {
                Some(Ok(Message::Binary(data))) => data,
                Some(Ok(Message::Text(text))) => text.into_bytes(),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => {
                    self.connected = false;
                    return Err(Error::Network("websocket closed by peer".into()));
                }
                Some(Err(e)) => {
                    self.connected = false;
                    return Err(Error::Network(e.to_string()));
                }
            };
            self.receive_buffer.reserve(payload.len())?;
            return Ok(payload);
        }
    }
}

/// axum server feeding upgraded sockets to `accept`. Dropping it stops the server.
#[derive(Debug)]
pub struct WsChannelListener {
    upgraded: mpsc::Receiver<WebSocket>,
    local_addr: SocketAddr,
    channel_def: ChannelDef,
    settings: ChannelSettings,
    server: JoinHandle<()>,
}

async fn upgrade(
    ws: WebSocketUpgrade,
    State(upgraded): State<mpsc::Sender<WebSocket>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        if upgraded.send(socket).await.is_err() {
            debug!("websocket listener closed, dropping upgraded socket");
        }
    })
}

impl WsChannelListener {
    pub async fn bind(settings: &ChannelSettings) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::new(settings.bind_ip, 0))
            .await
            .map_err(|e| Error::Network(format!("bind {}: {}", settings.bind_ip, e)))?;
        let local_addr = listener.local_addr()?;
        let (tx, upgraded) = mpsc::channel(ACCEPT_BACKLOG);

        let app = Router::new().route("/", get(upgrade)).with_state(tx);
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!("websocket server stopped: {}", e);
            }
        });

        let channel_def = ChannelDef::Ws(IpEndpoint::new(
            settings.advertised_ip().to_string(),
            local_addr.port(),
        ));
        debug!(%local_addr, def = %channel_def, "websocket listener bound");
        Ok(Self {
            upgraded,
            local_addr,
            channel_def,
            settings: settings.clone(),
            server,
        })
    }

    pub fn channel_def(&self) -> &ChannelDef {
        &self.channel_def
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn accept(&mut self) -> Result<WsChannel> {
        let socket = self
            .upgraded
            .recv()
            .await
            .ok_or_else(|| Error::Network("websocket server stopped".into()))?;
        Ok(WsChannel::new(socket, &self.settings))
    }
}

impl Drop for WsChannelListener {
    fn drop(&mut self) {
        self.server.abort();
    }
}
