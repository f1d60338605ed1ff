// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP channel.
//!
//! UDP has no connection, so a subscriber announces itself by sending [`HELLO`] to the
//! publisher's socket. The listener turns every new announcing peer into a [`UdpChannel`] that
//! shares the bound socket. Each payload travels as a single datagram.

use super::buffer::{ChannelBuffer, ChannelSettings};
use super::def::{ChannelDef, IpEndpoint};
use crate::error::{Error, Result};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, trace};

/// Largest payload a single IPv4 datagram can carry.
pub const MAX_DATAGRAM_PAYLOAD: usize = 65_507;

/// Registration datagram sent by the connecting side.
pub(crate) const HELLO: &[u8] = b"rdv-udp-hello";

#[derive(Debug)]
pub struct UdpChannel {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    send_buffer: ChannelBuffer,
    receive_buffer: ChannelBuffer,
    connected: bool,
}

impl UdpChannel {
    /// Binds an ephemeral socket and registers with the listener at `addr`.
    pub async fn connect(addr: SocketAddr, settings: &ChannelSettings) -> Result<Self> {
        let local: IpAddr = match addr {
            SocketAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
            SocketAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
        };
        let socket = UdpSocket::bind(SocketAddr::new(local, 0)).await?;
        socket.connect(addr).await?;
        socket.send(HELLO).await?;
        debug!(%addr, "udp channel registered with peer");
        Ok(Self::new(Arc::new(socket), addr, settings))
    }

    fn new(socket: Arc<UdpSocket>, peer: SocketAddr, settings: &ChannelSettings) -> Self {
        Self {
            socket,
            peer,
            send_buffer: ChannelBuffer::new(settings.send_buffer),
            receive_buffer: ChannelBuffer::new(settings.receive_buffer),
            connected: true,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.send_buffer.reserve(payload.len())?;
        if payload.len() > MAX_DATAGRAM_PAYLOAD {
            return Err(Error::Aborted(format!(
                "payload of {} bytes exceeds a single datagram",
                payload.len()
            )));
        }
        if let Err(e) = self.socket.send_to(payload, self.peer).await {
            self.connected = false;
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn receive(&mut self) -> Result<Vec<u8>> {
        let mut datagram = vec![0u8; MAX_DATAGRAM_PAYLOAD];
        loop {
            let (len, from) = match self.socket.recv_from(&mut datagram).await {
                Ok(received) => received,
                Err(e) => {
                    self.connected = false;
                    return Err(e.into());
                }
            };
            if from != self.peer {
                trace!(%from, "dropping datagram from unexpected peer");
                continue;
            }
            self.receive_buffer.reserve(len)?;
            datagram.truncate(len);
            return Ok(datagram);
        }
    }
}

/// Bound socket waiting for peers to announce themselves.
#[derive(Debug)]
pub struct UdpChannelListener {
    socket: Arc<UdpSocket>,
    peers: HashSet<SocketAddr>,
    channel_def: ChannelDef,
    settings: ChannelSettings,
}

impl UdpChannelListener {
    pub async fn bind(settings: &ChannelSettings) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::new(settings.bind_ip, 0)).await?;
        let local = socket.local_addr()?;
        let channel_def = ChannelDef::Udp(IpEndpoint::new(
            settings.advertised_ip().to_string(),
            local.port(),
        ));
        debug!(%local, def = %channel_def, "udp listener bound");
        Ok(Self {
            socket: Arc::new(socket),
            peers: HashSet::new(),
            channel_def,
            settings: settings.clone(),
        })
    }

    pub fn channel_def(&self) -> &ChannelDef {
        &self.channel_def
    }

    /// Waits for the next previously unseen peer.
    pub async fn accept(&mut self) -> Result<UdpChannel> {
        let mut buf = [0u8; 64];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            if &buf[..len] != HELLO {
                trace!(%from, len, "ignoring non-hello datagram");
                continue;
            }
            if self.peers.insert(from) {
                debug!(peer = %from, "udp peer registered");
                return Ok(UdpChannel::new(self.socket.clone(), from, &self.settings));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::buffer::BufferPolicy;

    #[tokio::test]
    async fn test_hello_then_datagrams() {
        let settings = ChannelSettings::loopback();
        let mut listener = UdpChannelListener::bind(&settings).await.unwrap();
        let addr = listener.channel_def().socket_addr().unwrap();

        let mut client = UdpChannel::connect(addr, &settings).await.unwrap();
        let mut server_side = listener.accept().await.unwrap();
        assert_eq!(server_side.peer_addr().port(), client.socket.local_addr().unwrap().port());

        server_side.send(b"sample").await.unwrap();
        assert_eq!(client.receive().await.unwrap(), b"sample");
    }

    #[tokio::test]
    async fn test_fixed_buffer_rejects_large_datagram() {
        let settings = ChannelSettings::loopback().with_buffers(BufferPolicy::fixed(4));
        let mut listener = UdpChannelListener::bind(&settings).await.unwrap();
        let addr = listener.channel_def().socket_addr().unwrap();
        let _client = UdpChannel::connect(addr, &settings).await.unwrap();
        let mut server_side = listener.accept().await.unwrap();

        assert!(server_side
            .send(b"too large")
            .await
            .unwrap_err()
            .is_not_enough_buffer());
    }
}
