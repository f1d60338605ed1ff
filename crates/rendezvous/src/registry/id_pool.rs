// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pooled client id generator.
//!
//! Ids are random within `[0, limit)` and never handed out twice while a lease is alive.
//! Dropping an [`IdLease`] returns its id to the pool.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Never handed out.
pub const INVALID_ID: u32 = u32::MAX;

#[derive(Debug)]
struct PoolState {
    live: HashSet<u32>,
    limit: u32,
}

/// Shared id generator.
#[derive(Debug, Clone)]
pub struct IdPool {
    state: Arc<Mutex<PoolState>>,
}

impl Default for IdPool {
    fn default() -> Self {
        Self::new()
    }
}

impl IdPool {
    /// Full range, every u32 except [`INVALID_ID`].
    pub fn new() -> Self {
        Self::with_limit(INVALID_ID)
    }

    /// Ids in `[0, limit)`.
    pub fn with_limit(limit: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                live: HashSet::new(),
                limit: limit.min(INVALID_ID),
            })),
        }
    }

    /// Leases a fresh id, or `None` when every id is live.
    pub fn generate(&self) -> Option<IdLease> {
        let mut state = self.state.lock();
        if state.live.len() as u64 >= u64::from(state.limit) {
            return None;
        }
        loop {
            let id = fastrand::u32(0..state.limit);
            if state.live.insert(id) {
                return Some(IdLease {
                    id,
                    state: self.state.clone(),
                });
            }
        }
    }

    pub fn is_live(&self, id: u32) -> bool {
        self.state.lock().live.contains(&id)
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }
}

/// A live id; returned to its pool on drop.
pub struct IdLease {
    id: u32,
    state: Arc<Mutex<PoolState>>,
}

impl IdLease {
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl fmt::Debug for IdLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IdLease").field(&self.id).finish()
    }
}

impl Drop for IdLease {
    fn drop(&mut self) {
        self.state.lock().live.remove(&self.id);
    }
}
