// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client-side liveness channel.
//!
//! The signaller listens first so its [`ChannelSource`] can go into the `ClientInfo` sent with
//! `RegisterClient`. Once registered, a worker task accepts the master's connection and sends a
//! [`HeartBeat`] every period. Accept and signal failures share one trial counter, reset by
//! every successful signal; reaching [`MAXIMUM_TRIAL`] consecutive failures is fatal.

use super::task_runner::TaskGuard;
use crate::channel::{ChannelListener, ChannelSettings, ChannelSource, ChannelType};
use crate::error::{Error, Result};
use crate::info::ClientInfo;
use crate::rpc::HeartBeat;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

pub const MAXIMUM_TRIAL: u32 = 5;

pub const DEFAULT_HEART_BEAT_DURATION: Duration = Duration::from_secs(1);

/// Signalling period for `client_info`; zero selects [`DEFAULT_HEART_BEAT_DURATION`].
pub fn heart_beat_duration(client_info: &ClientInfo) -> Duration {
    match client_info.heart_beat_duration_ms {
        0 => DEFAULT_HEART_BEAT_DURATION,
        ms => Duration::from_millis(ms),
    }
}

#[derive(Debug)]
pub struct HeartBeatSignaller {
    listener: ChannelListener,
    channel_source: ChannelSource,
}

impl HeartBeatSignaller {
    pub async fn bind(settings: &ChannelSettings) -> Result<Self> {
        let listener = ChannelListener::bind(ChannelType::Tcp, settings).await?;
        let channel_source = ChannelSource::from(listener.channel_def().clone());
        debug!(source = %listener.channel_def(), "heart beat signaller listening");
        Ok(Self {
            listener,
            channel_source,
        })
    }

    pub fn channel_source(&self) -> &ChannelSource {
        &self.channel_source
    }

    /// Starts accepting and signalling on a worker task. `on_fatal` runs once if the
    /// signaller gives up.
    pub(crate) fn start(
        self,
        client_info: &ClientInfo,
        on_fatal: impl FnOnce(Error) + Send + 'static,
    ) -> TaskGuard {
        let period = heart_beat_duration(client_info);
        let client_id = client_info.id;
        TaskGuard::spawn(async move {
            let error = self.signal_loop(client_id, period).await;
            error!(client_id, "heart beat signaller gave up: {}", error);
            on_fatal(error);
        })
    }

    /// Returns only on a fatal failure.
    async fn signal_loop(mut self, client_id: u32, period: Duration) -> Error {
        let mut trial = 0;
        let mut sequence = 0u64;
        loop {
            let mut channel = match self.listener.accept().await {
                Ok(channel) => channel,
                Err(e) => {
                    trial += 1;
                    warn!(client_id, trial, "heart beat accept failed: {}", e);
                    if trial >= MAXIMUM_TRIAL {
                        return e;
                    }
                    continue;
                }
            };
            debug!(client_id, ?period, "heart beat channel accepted");

            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                match channel.send_message(&HeartBeat { sequence }).await {
                    Ok(()) => {
                        trace!(client_id, sequence, "heart beat sent");
                        sequence += 1;
                        trial = 0;
                    }
                    Err(e) => {
                        trial += 1;
                        warn!(client_id, trial, "heart beat signal failed: {}", e);
                        if trial >= MAXIMUM_TRIAL {
                            return e;
                        }
                        // The channel is gone; wait for the master to reconnect.
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_heart_beat_duration_default() {
        assert_eq!(
            heart_beat_duration(&ClientInfo::default()),
            DEFAULT_HEART_BEAT_DURATION
        );
        let client_info = ClientInfo {
            heart_beat_duration_ms: 250,
            ..Default::default()
        };
        assert_eq!(heart_beat_duration(&client_info), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_signals_after_accept() {
        let settings = ChannelSettings::loopback();
        let signaller = HeartBeatSignaller::bind(&settings).await.unwrap();
        let def = signaller.channel_source().channel_defs[0].clone();
        let client_info = ClientInfo {
            id: 4,
            heart_beat_duration_ms: 10,
            ..Default::default()
        };
        let fatal = Arc::new(AtomicBool::new(false));
        let flag = fatal.clone();
        let _guard = signaller.start(&client_info, move |_| flag.store(true, Ordering::SeqCst));

        let mut master_side = Channel::connect(&def, &settings).await.unwrap();
        for expected in 0..3 {
            let beat: HeartBeat = master_side.receive_message().await.unwrap();
            assert_eq!(beat.sequence, expected);
        }
        assert!(!fatal.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_reconnect_after_master_drops() {
        let settings = ChannelSettings::loopback();
        let signaller = HeartBeatSignaller::bind(&settings).await.unwrap();
        let def = signaller.channel_source().channel_defs[0].clone();
        let client_info = ClientInfo {
            heart_beat_duration_ms: 5,
            ..Default::default()
        };
        let _guard = signaller.start(&client_info, |_| {});

        let first = Channel::connect(&def, &settings).await.unwrap();
        drop(first);

        let mut second = Channel::connect(&def, &settings).await.unwrap();
        let beat: HeartBeat = tokio::time::timeout(Duration::from_secs(5), second.receive_message())
            .await
            .unwrap()
            .unwrap();
        assert!(beat.sequence < 1_000);
    }
}
