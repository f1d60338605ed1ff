// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publishers, subscribers, service servers and service clients.
//!
//! Each endpoint is built on a [`MasterProxy`](crate::MasterProxy) and owns one register state
//! kept on the proxy core. Register and unregister requests fail with `InvalidState` while
//! another request of the same endpoint is in flight; a failed request rolls back so it can be
//! retried. Discovery pushes arriving mid-transition are replayed once the transition ends.
//!
//! Messages travel as JSON.

pub mod publisher;
pub mod service_client;
pub mod service_server;
pub mod settings;
pub mod subscriber;

pub use publisher::Publisher;
pub use service_client::ServiceClient;
pub use service_server::ServiceServer;
pub use settings::Settings;
pub use subscriber::{StatusCallback, Subscriber};
