// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport channels.
//!
//! [`Channel`] is a closed set of transports with a common send/receive surface. `send` and
//! `receive` take `&mut self`, so a channel never has two sends or two receives in flight.
//! Stream transports that need a concurrent reader and writer split first (see
//! [`TcpChannel::into_split`]).
//!
//! [`ChannelListener`] is the accepting side for the transports that have connections.
//! Shared memory has none: a writer is created directly with [`ShmChannel::create`].

pub mod buffer;
pub mod def;
pub(crate) mod framed;
pub mod shm;
pub mod tcp;
pub mod udp;
#[cfg(unix)]
pub mod uds;
pub mod ws;

pub use buffer::{BufferPolicy, ChannelBuffer, ChannelSettings};
pub use def::{
    all_channel_types, ChannelDef, ChannelSource, ChannelType, ChannelTypes, IpEndpoint,
    ShmEndpoint, ShmMode, UdsEndpoint,
};
pub use shm::ShmChannel;
pub use tcp::{TcpChannel, TcpChannelListener};
pub use udp::{UdpChannel, UdpChannelListener};
#[cfg(unix)]
pub use uds::{UdsChannel, UdsChannelListener};
pub use ws::{WsChannel, WsChannelListener};

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A connected channel.
#[derive(Debug)]
pub enum Channel {
    Tcp(TcpChannel),
    Udp(UdpChannel),
    #[cfg(unix)]
    Uds(UdsChannel),
    Shm(ShmChannel),
    Ws(WsChannel),
}

impl Channel {
    /// Connects to `def`. WebSocket endpoints only accept browser-style consumers.
    pub async fn connect(def: &ChannelDef, settings: &ChannelSettings) -> Result<Self> {
        if !def.is_valid() {
            return Err(Error::InvalidArgument(format!("invalid channel def {}", def)));
        }
        match def {
            ChannelDef::Tcp(ep) => Ok(Self::Tcp(
                TcpChannel::connect(ep.socket_addr()?, settings).await?,
            )),
            ChannelDef::Udp(ep) => Ok(Self::Udp(
                UdpChannel::connect(ep.socket_addr()?, settings).await?,
            )),
            #[cfg(unix)]
            ChannelDef::Uds(ep) => Ok(Self::Uds(UdsChannel::connect(ep, settings).await?)),
            #[cfg(not(unix))]
            ChannelDef::Uds(_) => Err(Error::InvalidArgument(
                "unix domain sockets are not supported on this platform".into(),
            )),
            ChannelDef::Shm(ep) => Ok(Self::Shm(ShmChannel::open(ep, settings)?)),
            ChannelDef::Ws(_) => Err(Error::InvalidArgument(
                "websocket channels only accept browser connections".into(),
            )),
        }
    }

    pub fn channel_type(&self) -> ChannelType {
        match self {
            Self::Tcp(_) => ChannelType::Tcp,
            Self::Udp(_) => ChannelType::Udp,
            #[cfg(unix)]
            Self::Uds(_) => ChannelType::Uds,
            Self::Shm(_) => ChannelType::Shm,
            Self::Ws(_) => ChannelType::Ws,
        }
    }

    /// True while the transport connection is up; always true for shared memory.
    pub fn is_connected(&self) -> bool {
        match self {
            Self::Tcp(c) => c.is_connected(),
            Self::Udp(c) => c.is_connected(),
            #[cfg(unix)]
            Self::Uds(c) => c.is_connected(),
            Self::Shm(c) => c.is_connected(),
            Self::Ws(c) => c.is_connected(),
        }
    }

    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        match self {
            Self::Tcp(c) => c.send(payload).await,
            Self::Udp(c) => c.send(payload).await,
            #[cfg(unix)]
            Self::Uds(c) => c.send(payload).await,
            Self::Shm(c) => c.send(payload).await,
            Self::Ws(c) => c.send(payload).await,
        }
    }

    pub async fn receive(&mut self) -> Result<Vec<u8>> {
        match self {
            Self::Tcp(c) => c.receive().await,
            Self::Udp(c) => c.receive().await,
            #[cfg(unix)]
            Self::Uds(c) => c.receive().await,
            Self::Shm(c) => c.receive().await,
            Self::Ws(c) => c.receive().await,
        }
    }

    /// Sends `message` as JSON.
    pub async fn send_message<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        self.send(&payload).await
    }

    /// Receives one JSON message.
    pub async fn receive_message<T: DeserializeOwned>(&mut self) -> Result<T> {
        let payload = self.receive().await?;
        Ok(serde_json::from_slice(&payload)?)
    }
}

/// Accepting side of a connection-oriented transport.
#[derive(Debug)]
pub enum ChannelListener {
    Tcp(TcpChannelListener),
    Udp(UdpChannelListener),
    #[cfg(unix)]
    Uds(UdsChannelListener),
    Ws(WsChannelListener),
}

impl ChannelListener {
    /// Binds a listener of `channel_type`. Shared memory has no listener.
    pub async fn bind(channel_type: ChannelType, settings: &ChannelSettings) -> Result<Self> {
        match channel_type {
            ChannelType::Tcp => Ok(Self::Tcp(TcpChannelListener::bind(settings).await?)),
            ChannelType::Udp => Ok(Self::Udp(UdpChannelListener::bind(settings).await?)),
            #[cfg(unix)]
            ChannelType::Uds => Ok(Self::Uds(UdsChannelListener::bind(settings).await?)),
            #[cfg(not(unix))]
            ChannelType::Uds => Err(Error::InvalidArgument(
                "unix domain sockets are not supported on this platform".into(),
            )),
            ChannelType::Ws => Ok(Self::Ws(WsChannelListener::bind(settings).await?)),
            ChannelType::Shm => Err(Error::InvalidArgument(
                "shared memory channels have no listener".into(),
            )),
        }
    }

    pub fn channel_def(&self) -> &ChannelDef {
        match self {
            Self::Tcp(l) => l.channel_def(),
            Self::Udp(l) => l.channel_def(),
            #[cfg(unix)]
            Self::Uds(l) => l.channel_def(),
            Self::Ws(l) => l.channel_def(),
        }
    }

    pub async fn accept(&mut self) -> Result<Channel> {
        match self {
            Self::Tcp(l) => Ok(Channel::Tcp(l.accept().await?)),
            Self::Udp(l) => Ok(Channel::Udp(l.accept().await?)),
            #[cfg(unix)]
            Self::Uds(l) => Ok(Channel::Uds(l.accept().await?)),
            Self::Ws(l) => Ok(Channel::Ws(l.accept().await?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        seq: u32,
        text: String,
    }

    async fn round_trip(channel_type: ChannelType) {
        let settings = ChannelSettings::loopback();
        let mut listener = ChannelListener::bind(channel_type, &settings).await.unwrap();
        let def = listener.channel_def().clone();
        assert_eq!(def.channel_type(), channel_type);

        let mut client = Channel::connect(&def, &settings).await.unwrap();
        let mut server = listener.accept().await.unwrap();

        let sample = Sample {
            seq: 7,
            text: "hello".into(),
        };
        server.send_message(&sample).await.unwrap();
        assert_eq!(client.receive_message::<Sample>().await.unwrap(), sample);
        assert_eq!(client.channel_type(), channel_type);
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_tcp_channel_round_trip() {
        round_trip(ChannelType::Tcp).await;
    }

    #[tokio::test]
    async fn test_udp_channel_round_trip() {
        round_trip(ChannelType::Udp).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_uds_channel_round_trip() {
        round_trip(ChannelType::Uds).await;
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_and_ws_defs() {
        let settings = ChannelSettings::loopback();
        let invalid = ChannelDef::Tcp(IpEndpoint::new("not-an-ip", 1));
        assert!(matches!(
            Channel::connect(&invalid, &settings).await,
            Err(Error::InvalidArgument(_))
        ));
        let ws = ChannelDef::Ws(IpEndpoint::new("127.0.0.1", 1));
        assert!(matches!(
            Channel::connect(&ws, &settings).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_shm_has_no_listener() {
        let err = ChannelListener::bind(ChannelType::Shm, &ChannelSettings::loopback()).await;
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_malformed_message_is_data_loss() {
        let settings = ChannelSettings::loopback();
        let mut listener = ChannelListener::bind(ChannelType::Tcp, &settings).await.unwrap();
        let def = listener.channel_def().clone();
        let mut client = Channel::connect(&def, &settings).await.unwrap();
        let mut server = listener.accept().await.unwrap();

        server.send(b"{not json").await.unwrap();
        assert!(matches!(
            client.receive_message::<Sample>().await,
            Err(Error::DataLoss(_))
        ));
    }
}
