// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The master: client registry, discovery pushes and liveness tracking.

pub mod config;
mod server;
mod state;

pub use config::{ConfigError, MasterConfig};
pub use server::MasterServer;
pub use state::{Dispatch, Master};
