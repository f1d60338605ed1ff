// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Task queue of the proxy core.
//!
//! [`ProxyCore`] is owned by one task. Everything else reaches it by posting closures through a
//! [`TaskRunner`]; background futures hand their results back the same way. Closures run one at
//! a time in posting order.

use super::core::ProxyCore;
use crate::error::{Error, Result};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{trace, warn};

type Task = Box<dyn FnOnce(&mut ProxyCore) + Send>;

#[derive(Clone)]
pub(crate) struct TaskRunner {
    tx: mpsc::UnboundedSender<Task>,
    next_entry_id: Arc<AtomicU64>,
}

impl TaskRunner {
    /// Spawns the core task.
    pub(crate) fn spawn(make_core: impl FnOnce(TaskRunner) -> ProxyCore + Send + 'static) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let runner = Self {
            tx,
            next_entry_id: Arc::new(AtomicU64::new(1)),
        };
        let core_runner = runner.clone();
        tokio::spawn(async move {
            let mut core = make_core(core_runner);
            while let Some(task) = rx.recv().await {
                task(&mut core);
                if core.is_stopped() {
                    break;
                }
            }
            trace!("proxy core stopped");
        });
        runner
    }

    /// Queues `task`; dropped silently once the core has stopped.
    pub(crate) fn post(&self, task: impl FnOnce(&mut ProxyCore) + Send + 'static) {
        if self.tx.send(Box::new(task)).is_err() {
            trace!("task posted after proxy core stopped");
        }
    }

    /// Runs `task` on the core and waits for its result.
    pub(crate) async fn run<T: Send + 'static>(
        &self,
        task: impl FnOnce(&mut ProxyCore) -> T + Send + 'static,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.post(move |core| {
            let _ = tx.send(task(core));
        });
        rx.await.map_err(|_| core_stopped())
    }

    /// Posts `task` with a [`Reply`] and waits for the result it sends.
    pub(crate) async fn request<T: Send + 'static>(
        &self,
        task: impl FnOnce(&mut ProxyCore, Reply<T>) + Send + 'static,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.post(move |core| task(core, Reply(tx)));
        rx.await.map_err(|_| core_stopped())?
    }

    /// Drives `future` in the background and hands its output to `on_done` on the core.
    pub(crate) fn spawn_reply<F, T>(
        &self,
        future: F,
        on_done: impl FnOnce(&mut ProxyCore, T) + Send + 'static,
    ) where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let runner = self.clone();
        tokio::spawn(async move {
            let output = future.await;
            runner.post(move |core| on_done(core, output));
        });
    }

    pub(crate) fn next_entry_id(&self) -> u64 {
        self.next_entry_id.fetch_add(1, Ordering::Relaxed)
    }
}

pub(crate) fn core_stopped() -> Error {
    Error::Unavailable("master proxy stopped".into())
}

/// Completion of a posted request. A failure nobody waits for is logged.
pub(crate) struct Reply<T>(oneshot::Sender<Result<T>>);

impl<T> Reply<T> {
    pub(crate) fn send(self, result: Result<T>) {
        if let Err(Err(e)) = self.0.send(result) {
            warn!("request failed with no one waiting: {}", e);
        }
    }
}

/// Aborts its task on drop.
#[derive(Debug)]
pub(crate) struct TaskGuard(JoinHandle<()>);

impl TaskGuard {
    pub(crate) fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(future))
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}
