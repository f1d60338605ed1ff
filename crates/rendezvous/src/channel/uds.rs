// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Unix domain socket channel (filesystem path or Linux abstract namespace).

use super::buffer::{ChannelBuffer, ChannelSettings};
use super::def::{ChannelDef, UdsEndpoint};
use super::framed;
use crate::error::{Error, Result};
use std::path::PathBuf;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct UdsChannel {
    stream: UnixStream,
    send_buffer: ChannelBuffer,
    receive_buffer: ChannelBuffer,
    connected: bool,
}

impl UdsChannel {
    pub async fn connect(endpoint: &UdsEndpoint, settings: &ChannelSettings) -> Result<Self> {
        let stream = if endpoint.abstract_namespace {
            connect_abstract(&endpoint.path)?
        } else {
            tokio::time::timeout(settings.connect_timeout(), UnixStream::connect(&endpoint.path))
                .await
                .map_err(|_| Error::Network(format!("connect to {} timed out", endpoint.path)))?
                .map_err(|e| Error::Network(format!("connect to {}: {}", endpoint.path, e)))?
        };
        debug!(path = %endpoint.path, abstract_namespace = endpoint.abstract_namespace, "uds channel connected");
        Ok(Self::from_stream(stream, settings))
    }

    fn from_stream(stream: UnixStream, settings: &ChannelSettings) -> Self {
        Self {
            stream,
            send_buffer: ChannelBuffer::new(settings.send_buffer),
            receive_buffer: ChannelBuffer::new(settings.receive_buffer),
            connected: true,
        }
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
        if result.is_err() {
            self.connected = false;
        }
        result
    }
}

#[cfg(target_os = "linux")]
fn connect_abstract(name: &str) -> Result<UnixStream> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::{SocketAddr, UnixStream as StdUnixStream};

    let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
    let stream = StdUnixStream::connect_addr(&addr)?;
    stream.set_nonblocking(true)?;
    Ok(UnixStream::from_std(stream)?)
}

#[cfg(not(target_os = "linux"))]
fn connect_abstract(_name: &str) -> Result<UnixStream> {
    Err(Error::InvalidArgument(
        "abstract unix sockets are only supported on linux".into(),
    ))
}

#[cfg(target_os = "linux")]
fn bind_abstract(name: &str) -> Result<UnixListener> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::{SocketAddr, UnixListener as StdUnixListener};

    let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
    let listener = StdUnixListener::bind_addr(&addr)?;
    listener.set_nonblocking(true)?;
    Ok(UnixListener::from_std(listener)?)
}

#[cfg(not(target_os = "linux"))]
fn bind_abstract(_name: &str) -> Result<UnixListener> {
    Err(Error::InvalidArgument(
        "abstract unix sockets are only supported on linux".into(),
    ))
}

#[derive(Debug)]
pub struct UdsChannelListener {
    listener: UnixListener,
    channel_def: ChannelDef,
    settings: ChannelSettings,
    /// Filesystem entry removed on drop.
    socket_file: Option<PathBuf>,
}

impl UdsChannelListener {
    /// Binds a fresh socket: an abstract name on Linux, a file in the temp directory elsewhere.
    pub async fn bind(settings: &ChannelSettings) -> Result<Self> {
        let name = format!("rdv-{}", uuid::Uuid::new_v4().simple());
        let endpoint = if cfg!(target_os = "linux") {
            UdsEndpoint {
                path: name,
                abstract_namespace: true,
            }
        } else {
            UdsEndpoint {
                path: std::env::temp_dir()
                    .join(format!("{}.sock", name))
                    .to_string_lossy()
                    .into_owned(),
                abstract_namespace: false,
            }
        };
        Self::bind_endpoint(endpoint, settings)
    }

    pub fn bind_endpoint(endpoint: UdsEndpoint, settings: &ChannelSettings) -> Result<Self> {
        if !ChannelDef::Uds(endpoint.clone()).is_valid() {
            return Err(Error::InvalidArgument("empty unix socket path".into()));
        }
        let (listener, socket_file) = if endpoint.abstract_namespace {
            (bind_abstract(&endpoint.path)?, None)
        } else {
            let path = PathBuf::from(&endpoint.path);
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
            (UnixListener::bind(&path)?, Some(path))
        };
        let channel_def = ChannelDef::Uds(endpoint);
        debug!(def = %channel_def, "uds listener bound");
        Ok(Self {
            listener,
            channel_def,
            settings: settings.clone(),
            socket_file,
        })
    }

    pub fn channel_def(&self) -> &ChannelDef {
        &self.channel_def
    }

    pub async fn accept(&self) -> Result<UdsChannel> {
        let (stream, _) = self.listener.accept().await?;
        Ok(UdsChannel::from_stream(stream, &self.settings))
    }
}

impl Drop for UdsChannelListener {
    fn drop(&mut self) {
        if let Some(path) = &self.socket_file {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), "failed to remove socket file: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_path_socket_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rdv.sock");
        let endpoint = UdsEndpoint {
            path: path.to_string_lossy().into_owned(),
            abstract_namespace: false,
        };
        let settings = ChannelSettings::default();
        let listener = UdsChannelListener::bind_endpoint(endpoint.clone(), &settings).unwrap();

        let (client, server) =
            tokio::join!(UdsChannel::connect(&endpoint, &settings), listener.accept());
        let (mut client, mut server) = (client.unwrap(), server.unwrap());
        client.send(b"over uds").await.unwrap();
        assert_eq!(server.receive().await.unwrap(), b"over uds");

        drop(listener);
        assert!(!path.exists());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_abstract_socket_round_trip() {
        let settings = ChannelSettings::default();
        let listener = UdsChannelListener::bind(&settings).await.unwrap();
        let endpoint = match listener.channel_def() {
            ChannelDef::Uds(ep) => ep.clone(),
            other => panic!("unexpected def {}", other),
        };
        assert!(endpoint.abstract_namespace);

        let (client, server) =
            tokio::join!(UdsChannel::connect(&endpoint, &settings), listener.accept());
        let (mut client, mut server) = (client.unwrap(), server.unwrap());
        server.send(b"abstract").await.unwrap();
        assert_eq!(client.receive().await.unwrap(), b"abstract");
    }

    #[test]
    fn test_empty_path_is_rejected() {
        let endpoint = UdsEndpoint {
            path: String::new(),
            abstract_namespace: false,
        };
        let err = UdsChannelListener::bind_endpoint(endpoint, &ChannelSettings::default());
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
    }
}
