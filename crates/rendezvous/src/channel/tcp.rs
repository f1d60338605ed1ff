// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP channel.

use super::buffer::{ChannelBuffer, ChannelSettings};
use super::def::{ChannelDef, IpEndpoint};
use super::framed;
use crate::error::{Error, Result};
use std::net::SocketAddr;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// A connected TCP stream carrying length-prefixed frames.
#[derive(Debug)]
pub struct TcpChannel {
    stream: TcpStream,
    peer_addr: SocketAddr,
    send_buffer: ChannelBuffer,
    receive_buffer: ChannelBuffer,
    connected: bool,
}

impl TcpChannel {
    pub async fn connect(addr: SocketAddr, settings: &ChannelSettings) -> Result<Self> {
        let stream = tokio::time::timeout(settings.connect_timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Network(format!("connect to {} timed out", addr)))?
            .map_err(|e| Error::Network(format!("connect to {}: {}", addr, e)))?;
        debug!(%addr, "tcp channel connected");
        Ok(Self::from_stream(stream, addr, settings))
    }

    fn from_stream(stream: TcpStream, peer_addr: SocketAddr, settings: &ChannelSettings) -> Self {
        // Frames are small and latency sensitive.
        let _ = stream.set_nodelay(true);
        Self {
            stream,
            peer_addr,
            send_buffer: ChannelBuffer::new(settings.send_buffer),
            receive_buffer: ChannelBuffer::new(settings.receive_buffer),
            connected: true,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        let result = framed::write_frame(&mut self.stream, &mut self.send_buffer, payload).await;
        if matches!(&result, Err(e) if e.is_network()) {
            self.connected = false;
        }
        result
    }

    pub async fn receive(&mut self) -> Result<Vec<u8>> {
        let result = framed::read_frame(&mut self.stream, &mut self.receive_buffer).await;
        // Any failure past the header leaves the stream out of sync.
        if result.is_err() {
            self.connected = false;
        }
        result
    }

    /// Splits into independently owned halves so one task can read while another writes.
    pub fn into_split(self) -> (TcpChannelReader, TcpChannelWriter) {
        let (read, write) = self.stream.into_split();
        (
            TcpChannelReader {
                half: read,
                buffer: self.receive_buffer,
            },
            TcpChannelWriter {
                half: write,
                buffer: self.send_buffer,
            },
        )
    }
}

/// Read half of a [`TcpChannel`].
#[derive(Debug)]
pub struct TcpChannelReader {
    half: OwnedReadHalf,
    buffer: ChannelBuffer,
}

impl TcpChannelReader {
    pub async fn receive(&mut self) -> Result<Vec<u8>> {
        framed::read_frame(&mut self.half, &mut self.buffer).await
    }
}

/// Write half of a [`TcpChannel`].
#[derive(Debug)]
pub struct TcpChannelWriter {
    half: OwnedWriteHalf,
    buffer: ChannelBuffer,
}

impl TcpChannelWriter {
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        framed::write_frame(&mut self.half, &mut self.buffer, payload).await
    }
}

/// Listening side; every accepted connection becomes its own [`TcpChannel`].
#[derive(Debug)]
pub struct TcpChannelListener {
    listener: TcpListener,
    channel_def: ChannelDef,
    settings: ChannelSettings,
}

impl TcpChannelListener {
    /// Binds `settings.bind_ip` on an ephemeral port.
    pub async fn bind(settings: &ChannelSettings) -> Result<Self> {
        Self::bind_port(settings, 0).await
    }

    pub async fn bind_port(settings: &ChannelSettings, port: u16) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::new(settings.bind_ip, port))
            .await
            .map_err(|e| Error::Network(format!("bind {}:{}: {}", settings.bind_ip, port, e)))?;
        let local = listener.local_addr()?;
        let channel_def = ChannelDef::Tcp(IpEndpoint::new(
            settings.advertised_ip().to_string(),
            local.port(),
        ));
        debug!(%local, def = %channel_def, "tcp listener bound");
        Ok(Self {
            listener,
            channel_def,
            settings: settings.clone(),
        })
    }

    pub fn channel_def(&self) -> &ChannelDef {
        &self.channel_def
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn accept(&self) -> Result<TcpChannel> {
        let (stream, peer) = self.listener.accept().await?;
        debug!(%peer, "tcp channel accepted");
        Ok(TcpChannel::from_stream(stream, peer, &self.settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::buffer::BufferPolicy;
    use std::time::Duration;

    async fn pair(settings: &ChannelSettings) -> (TcpChannel, TcpChannel) {
        let listener = TcpChannelListener::bind(settings).await.unwrap();
        let addr = listener.channel_def().socket_addr().unwrap();
        let (client, server) = tokio::join!(TcpChannel::connect(addr, settings), listener.accept());
        (client.unwrap(), server.unwrap())
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let (mut client, mut server) = pair(&ChannelSettings::loopback()).await;
        client.send(b"ping").await.unwrap();
        assert_eq!(server.receive().await.unwrap(), b"ping");
        server.send(b"pong").await.unwrap();
        assert_eq!(client.receive().await.unwrap(), b"pong");
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_listener_advertises_bound_port() {
        let listener = TcpChannelListener::bind(&ChannelSettings::loopback())
            .await
            .unwrap();
        let advertised = listener.channel_def().socket_addr().unwrap();
        assert_eq!(advertised, listener.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_peer_close_marks_disconnected() {
        let (client, mut server) = pair(&ChannelSettings::loopback()).await;
        drop(client);
        assert!(server.receive().await.unwrap_err().is_network());
        assert!(!server.is_connected());
    }

    #[tokio::test]
    async fn test_split_halves() {
        let (client, mut server) = pair(&ChannelSettings::loopback()).await;
        let (mut reader, mut writer) = client.into_split();
        writer.send(b"request").await.unwrap();
        assert_eq!(server.receive().await.unwrap(), b"request");
        server.send(b"response").await.unwrap();
        assert_eq!(reader.receive().await.unwrap(), b"response");
    }

    #[tokio::test]
    async fn test_connect_refused_is_network_error() {
        let listener = TcpChannelListener::bind(&ChannelSettings::loopback())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let settings = ChannelSettings {
            connect_timeout_ms: 500,
            ..ChannelSettings::loopback()
        };
        assert!(TcpChannel::connect(addr, &settings).await.unwrap_err().is_network());
    }

    #[tokio::test]
    async fn test_oversized_send_keeps_stream_usable() {
        let settings = ChannelSettings::loopback().with_buffers(BufferPolicy::fixed(8));
        let (mut client, mut server) = pair(&settings).await;

        assert!(client.send(&[7u8; 32]).await.unwrap_err().is_not_enough_buffer());
        assert!(client.is_connected());

        let nothing = tokio::time::timeout(Duration::from_millis(100), server.receive()).await;
        assert!(nothing.is_err(), "no bytes may reach the peer");

        client.send(b"fits").await.unwrap();
        assert_eq!(server.receive().await.unwrap(), b"fits");
    }
}
