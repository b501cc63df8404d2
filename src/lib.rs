// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device Lifecycle - connection lifecycle patterns for device integrations.
//!
//! This library provides the connection plumbing shared by smart-home style
//! device integrations. A concrete device supplies the I/O through a small
//! set of async hooks; the library runs the lifecycle around them and reports
//! every transition as an event.
//!
//! # Lifecycle Patterns
//!
//! - **Stateless**: one reachability check per `connect()`, independent
//!   requests afterwards ([`StatelessDevice`])
//! - **Polling**: one connection step, then a status query every interval
//!   ([`PollingDevice`])
//! - **Streaming**: a socket whose messages are processed as they arrive
//!   ([`WebSocketDevice`])
//! - **Persistent**: a long-lived session reopened with exponential backoff
//!   whenever it drops ([`PersistentConnectionDevice`])
//!
//! # Events
//!
//! Every device owns an [`EventEmitter`]. The patterns emit `CONNECTING`,
//! `CONNECTED`, `DISCONNECTED` and `ERROR`; devices emit `UPDATE` with fresh
//! state and `PAIRED` after pairing. Hook failures never reach the caller of
//! `connect()`: they are logged and emitted as `ERROR` events.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use device_lifecycle::{
//!     Device, DeviceBase, DeviceIdentity, DeviceInterface, EventEmitter, EventKind,
//!     StatelessDevice, StatelessHooks,
//! };
//! use device_lifecycle::protocol::Method;
//!
//! struct Projector {
//!     base: DeviceBase<String, ()>,
//! }
//!
//! impl DeviceIdentity for Projector {
//!     fn identifier(&self) -> &str { "projector" }
//!     fn name(&self) -> &str { "Living room projector" }
//!     fn address(&self) -> Option<&str> { Some(self.base.config().as_str()) }
//!     fn log_id(&self) -> &str { "Living room projector" }
//! }
//!
//! impl DeviceInterface for Projector {
//!     type Config = String;
//!     type State = ();
//!
//!     fn base(&self) -> &DeviceBase<String, ()> { &self.base }
//! }
//!
//! #[async_trait]
//! impl StatelessHooks for Projector {
//!     async fn verify_connection(&self) -> device_lifecycle::Result<()> {
//!         let url = format!("http://{}/status", self.base.config());
//!         self.http_request(Method::GET, &url).await?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let events = EventEmitter::new();
//!     events.on(EventKind::Error, |event| {
//!         eprintln!("{} failed: {:?}", event.identifier(), event.message());
//!     });
//!
//!     let base = DeviceBase::new(Arc::new("192.168.1.60".to_string()), events);
//!     let device = StatelessDevice::new(Projector { base });
//!
//!     device.connect().await;
//!     println!("connected: {}", device.is_connected());
//!     device.disconnect().await;
//! }
//! ```
//!
//! # Features
//!
//! - `http` (default): the [`protocol`] module and
//!   [`StatelessHooks::http_request`], built on `reqwest`

pub mod device;
pub mod error;
pub mod event;
#[cfg(feature = "http")]
pub mod protocol;
pub mod state;

pub use device::{
    Backoff, BackoffPolicy, Device, DeviceBase, DeviceIdentity, DeviceInterface,
    PersistentConnectionDevice, PersistentConnectionHooks, PollingConfig, PollingDevice,
    PollingHooks, StatelessDevice, StatelessHooks, WebSocketDevice, WebSocketHooks,
};
pub use error::{DeviceError, Error, ProtocolError, Result};
pub use event::{DeviceEvent, EventEmitter, EventKind, ListenerId};
#[cfg(feature = "http")]
pub use protocol::HttpConfig;
pub use state::ConnectionState;
