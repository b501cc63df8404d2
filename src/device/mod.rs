// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device contracts and connection lifecycle patterns.
//!
//! A concrete device is a plain struct that owns a [`DeviceBase`] and
//! implements [`DeviceIdentity`], [`DeviceInterface`] and the hook trait of
//! one lifecycle pattern. Wrapping it in the matching runtime gives a
//! [`Device`] the hosting application can connect and disconnect:
//!
//! | Pattern                | Hooks                          | Runtime                          |
//! |------------------------|--------------------------------|----------------------------------|
//! | One-shot reachability  | [`StatelessHooks`]             | [`StatelessDevice`]              |
//! | Periodic polling       | [`PollingHooks`]               | [`PollingDevice`]                |
//! | Message stream         | [`WebSocketHooks`]             | [`WebSocketDevice`]              |
//! | Reconnecting session   | [`PersistentConnectionHooks`]  | [`PersistentConnectionDevice`]   |
//!
//! The runtimes report progress exclusively through events: `connect()`
//! returns once the attempt has been started (or finished, for the stateless
//! and polling patterns) and never surfaces hook failures to the caller.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use device_lifecycle::device::{
//!     Device, DeviceBase, DeviceIdentity, DeviceInterface, PollingConfig, PollingDevice,
//!     PollingHooks,
//! };
//! use device_lifecycle::event::{EventEmitter, EventKind};
//!
//! struct Thermostat {
//!     base: DeviceBase<String, f32>,
//! }
//!
//! impl DeviceIdentity for Thermostat {
//!     fn identifier(&self) -> &str { "thermostat-1" }
//!     fn name(&self) -> &str { "Hallway" }
//!     fn address(&self) -> Option<&str> { Some(self.base.config().as_str()) }
//!     fn log_id(&self) -> &str { "Hallway" }
//! }
//!
//! impl DeviceInterface for Thermostat {
//!     type Config = String;
//!     type State = f32;
//!
//!     fn base(&self) -> &DeviceBase<String, f32> { &self.base }
//! }
//!
//! #[async_trait]
//! impl PollingHooks for Thermostat {
//!     async fn establish_connection(&self) -> device_lifecycle::Result<()> { Ok(()) }
//!
//!     async fn poll_device(&self) -> device_lifecycle::Result<()> {
//!         self.base.set_state(21.5);
//!         self.emit_update(serde_json::json!({"temperature": 21.5}));
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() {
//! let events = EventEmitter::new();
//! events.on(EventKind::Update, |event| println!("{:?}", event.data()));
//!
//! let base = DeviceBase::new(Arc::new("192.168.1.40".to_string()), events);
//! let device = PollingDevice::new(Thermostat { base }, PollingConfig::default());
//! device.connect().await;
//! // ...
//! device.disconnect().await;
//! # }
//! ```

mod backoff;
mod base;
mod persistent;
mod polling;
mod stateless;
mod websocket;

pub use backoff::{Backoff, BackoffPolicy};
pub use base::DeviceBase;
pub use persistent::{PersistentConnectionDevice, PersistentConnectionHooks};
pub use polling::{PollingConfig, PollingDevice, PollingHooks};
pub use stateless::{StatelessDevice, StatelessHooks};
pub use websocket::{WebSocketDevice, WebSocketHooks};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::event::{DeviceEvent, EventEmitter};
use crate::state::ConnectionState;

/// Identity accessors every device exposes.
pub trait DeviceIdentity: Send + Sync {
    /// Returns the stable device identifier carried by every event.
    fn identifier(&self) -> &str;

    /// Returns the human-readable device name.
    fn name(&self) -> &str;

    /// Returns the network address of the device, if it has one.
    fn address(&self) -> Option<&str>;

    /// Returns the label used to tag log records for this device.
    fn log_id(&self) -> &str;
}

/// Shared contract of every concrete device.
///
/// Implementors embed a [`DeviceBase`] and return it from [`base`](Self::base);
/// the provided methods give hook implementations access to the event channel
/// and the state slot.
pub trait DeviceInterface: DeviceIdentity + 'static {
    /// Configuration record supplied by the device registry.
    type Config: Send + Sync + 'static;

    /// Cached device state, written only by the concrete device.
    type State: Clone + Send + Sync + 'static;

    /// Returns the embedded base.
    fn base(&self) -> &DeviceBase<Self::Config, Self::State>;

    /// Returns the configuration record.
    fn device_config(&self) -> &Self::Config {
        self.base().config()
    }

    /// Returns the device's event channel.
    fn events(&self) -> &EventEmitter {
        self.base().events()
    }

    /// Returns the cached device state, `None` until the device writes it.
    fn state(&self) -> Option<Self::State> {
        self.base().state()
    }

    /// Emits an event on the device's channel.
    ///
    /// Does not change the connection state; only the lifecycle runtime
    /// moves it.
    fn emit(&self, event: DeviceEvent) {
        self.base().emit(event);
    }

    /// Emits an `UPDATE` event carrying `data`.
    fn emit_update(&self, data: Value) {
        self.emit(DeviceEvent::update(self.identifier(), data));
    }
}

/// A device with a connection lifecycle, as seen by the hosting application.
///
/// Implemented by the four pattern runtimes. The trait is object safe, so
/// devices of different patterns can be stored side by side as
/// `Box<dyn Device>`.
#[async_trait]
pub trait Device: Send + Sync {
    /// Returns the identity of the wrapped device.
    fn identity(&self) -> &dyn DeviceIdentity;

    /// Returns the device's event channel.
    fn events(&self) -> &EventEmitter;

    /// Returns the current connection state.
    fn connection_state(&self) -> ConnectionState;

    /// Returns a receiver notified on every connection state transition.
    fn watch_connection_state(&self) -> watch::Receiver<ConnectionState>;

    /// Starts connecting to the device.
    ///
    /// Progress and failures are reported through events only.
    async fn connect(&self);

    /// Disconnects from the device.
    ///
    /// Always ends by emitting `DISCONNECTED`, even if the device was never
    /// connected.
    async fn disconnect(&self);

    /// Returns the device identifier.
    fn identifier(&self) -> &str {
        self.identity().identifier()
    }

    /// Returns the device name.
    fn name(&self) -> &str {
        self.identity().name()
    }

    /// Returns the device address.
    fn address(&self) -> Option<&str> {
        self.identity().address()
    }

    /// Returns the device log label.
    fn log_id(&self) -> &str {
        self.identity().log_id()
    }

    /// Returns true if the device is connected.
    fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }
}

/// Cancels a lifecycle task if it is still running and waits for it to end.
///
/// The cancellation outcome is absorbed; a panic inside the task is logged.
pub(crate) async fn stop_task(task: JoinHandle<()>, log_id: &str) {
    if !task.is_finished() {
        task.abort();
    }

    match task.await {
        Ok(()) => {}
        Err(err) if err.is_cancelled() => {
            tracing::trace!(device = %log_id, "Lifecycle task cancelled");
        }
        Err(err) => {
            tracing::error!(device = %log_id, error = %err, "Lifecycle task panicked");
        }
    }
}

/// Returns true if the task exists and has not finished.
pub(crate) fn is_running(task: Option<&JoinHandle<()>>) -> bool {
    task.is_some_and(|task| !task.is_finished())
}
