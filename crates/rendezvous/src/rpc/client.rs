// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP client for the master RPC surface.
//!
//! One connection carries every call. A writer task drains an outbound queue, a reader task
//! matches responses to pending calls by id. When the connection drops, every pending call fails
//! with [`Error::Unavailable`] and later calls fail immediately.

use super::wire::RpcFrame;
use super::{MasterClient, MasterRequest, MasterResponse};
use crate::channel::{ChannelSettings, TcpChannel};
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

type Pending = DashMap<u64, oneshot::Sender<Result<MasterResponse>>>;

pub struct TcpMasterClient {
    master_addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    pending: Arc<Pending>,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    rpc_timeout: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for TcpMasterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpMasterClient")
            .field("master_addr", &self.master_addr)
            .field("pending", &self.pending.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl TcpMasterClient {
    pub async fn connect(
        master_addr: SocketAddr,
        settings: &ChannelSettings,
        rpc_timeout: Duration,
    ) -> Result<Self> {
        let channel = TcpChannel::connect(master_addr, settings)
            .await
            .map_err(|e| Error::Network(format!("master {} unreachable: {}", master_addr, e)))?;
        let (mut reader, mut writer) = channel.into_split();

        let pending: Arc<Pending> = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let writer_closed = closed.clone();
        let writer_task = tokio::spawn(async move {
            while let Some(payload) = outbound_rx.recv().await {
                if let Err(e) = writer.send(&payload).await {
                    warn!(%master_addr, "master rpc write failed: {}", e);
                    writer_closed.store(true, Ordering::SeqCst);
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_closed = closed.clone();
        let reader_task = tokio::spawn(async move {
            loop {
                let payload = match reader.receive().await {
                    Ok(payload) => payload,
                    Err(e) => {
                        debug!(%master_addr, "master rpc connection closed: {}", e);
                        break;
                    }
                };
                match serde_json::from_slice::<RpcFrame>(&payload) {
                    Ok(RpcFrame::Response { id, result }) => {
                        match reader_pending.remove(&id) {
                            Some((_, waiter)) => {
                                let _ = waiter.send(result);
                            }
                            None => trace!(id, "response for an abandoned call"),
                        }
                    }
                    Ok(RpcFrame::Request { id, .. }) => {
                        warn!(id, "unexpected request frame from master");
                    }
                    Err(e) => warn!("malformed frame from master: {}", e),
                }
            }
            reader_closed.store(true, Ordering::SeqCst);
            fail_pending(&reader_pending);
        });

        debug!(%master_addr, "connected to master");
        Ok(Self {
            master_addr,
            outbound,
            pending,
            closed,
            next_id: AtomicU64::new(1),
            rpc_timeout,
            tasks: vec![writer_task, reader_task],
        })
    }

    pub fn master_addr(&self) -> SocketAddr {
        self.master_addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn fail_pending(pending: &Pending) {
    let ids: Vec<u64> = pending.iter().map(|entry| *entry.key()).collect();
    for id in ids {
        if let Some((_, waiter)) = pending.remove(&id) {
            let _ = waiter.send(Err(Error::Unavailable(
                "connection to master closed".into(),
            )));
        }
    }
}

#[async_trait]
impl MasterClient for TcpMasterClient {
    async fn call(&self, request: MasterRequest) -> Result<MasterResponse> {
        if self.is_closed() {
            return Err(Error::Unavailable("connection to master closed".into()));
        }
        let method = request.method_name();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::to_vec(&RpcFrame::Request { id, request })?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        if self.outbound.send(payload).is_err() || self.is_closed() {
            self.pending.remove(&id);
            return Err(Error::Unavailable("connection to master closed".into()));
        }
        trace!(id, method, "rpc sent");

        match tokio::time::timeout(self.rpc_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Unavailable("connection to master closed".into())),
            Err(_) => {
                self.pending.remove(&id);
                Err(Error::Unavailable(format!(
                    "{} timed out after {:?}",
                    method, self.rpc_timeout
                )))
            }
        }
    }
}

impl Drop for TcpMasterClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::TcpChannelListener;
    use crate::info::ClientFilter;
    use crate::rpc::{ListClientsRequest, ListClientsResponse, MasterClientExt};

    #[tokio::test]
    async fn test_call_matches_response_by_id() {
        let settings = ChannelSettings::loopback();
        let listener = TcpChannelListener::bind(&settings).await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let mut channel = listener.accept().await.unwrap();
            let payload = channel.receive().await.unwrap();
            let RpcFrame::Request { id, .. } = serde_json::from_slice(&payload).unwrap() else {
                panic!("expected a request");
            };
            let response = RpcFrame::Response {
                id,
                result: Ok(MasterResponse::ListClients(ListClientsResponse::default())),
            };
            channel
                .send(&serde_json::to_vec(&response).unwrap())
                .await
                .unwrap();
        });

        let client = TcpMasterClient::connect(addr, &settings, Duration::from_secs(2))
            .await
            .unwrap();
        let response = client
            .list_clients(ListClientsRequest {
                filter: ClientFilter::All,
            })
            .await
            .unwrap();
        assert!(response.client_infos.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_fails_pending_call() {
        let settings = ChannelSettings::loopback();
        let listener = TcpChannelListener::bind(&settings).await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let mut channel = listener.accept().await.unwrap();
            let _ = channel.receive().await;
            drop(channel);
        });

        let client = TcpMasterClient::connect(addr, &settings, Duration::from_secs(5))
            .await
            .unwrap();
        let err = client
            .list_clients(ListClientsRequest {
                filter: ClientFilter::All,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_unreachable_master_is_network_error() {
        let settings = ChannelSettings::loopback();
        let addr = {
            let listener = TcpChannelListener::bind(&settings).await.unwrap();
            listener.local_addr().unwrap()
        };
        let err = TcpMasterClient::connect(addr, &settings, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_network());
    }
}
