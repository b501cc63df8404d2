// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stateless request pattern.
//!
//! No connection is held: `connect()` performs one reachability check and
//! every later request is independent.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};

use super::{Device, DeviceIdentity, DeviceInterface};
use crate::error::Result;
use crate::event::{DeviceEvent, EventEmitter};
use crate::state::ConnectionState;
#[cfg(feature = "http")]
use crate::protocol::{self, HttpConfig, Method, Response};

/// Hooks for devices with a stateless request API.
#[async_trait]
pub trait StatelessHooks: DeviceInterface {
    /// Verifies that the device is reachable.
    ///
    /// Should perform a single cheap request and fail if it does not succeed.
    async fn verify_connection(&self) -> Result<()>;

    /// Returns the configuration used by [`http_request`](Self::http_request).
    #[cfg(feature = "http")]
    fn http_config(&self) -> HttpConfig {
        HttpConfig::default()
    }

    /// Performs one HTTP request against the device.
    ///
    /// Each call builds its own client with the configured timeout; a
    /// non-success status is returned as an error.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`](crate::ProtocolError) wrapped in
    /// [`Error::Protocol`](crate::Error::Protocol) on transport failure,
    /// timeout or non-success status.
    #[cfg(feature = "http")]
    async fn http_request(&self, method: Method, url: &str) -> Result<Response> {
        Ok(protocol::request(&self.http_config(), method, url).await?)
    }
}

/// Runtime for the stateless request pattern.
///
/// `connect()` emits `CONNECTING`, runs
/// [`verify_connection`](StatelessHooks::verify_connection) and emits
/// `CONNECTED` or `ERROR`. `disconnect()` only marks the device disconnected.
/// No background task is ever started.
pub struct StatelessDevice<D> {
    device: Arc<D>,
    lifecycle: Mutex<()>,
}

impl<D: StatelessHooks> StatelessDevice<D> {
    /// Wraps a concrete device.
    #[must_use]
    pub fn new(device: D) -> Self {
        Self::from_arc(Arc::new(device))
    }

    /// Wraps a concrete device that is already shared.
    #[must_use]
    pub fn from_arc(device: Arc<D>) -> Self {
        Self {
            device,
            lifecycle: Mutex::new(()),
        }
    }

    /// Returns the concrete device.
    #[must_use]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Returns the cached device state.
    #[must_use]
    pub fn state(&self) -> Option<D::State> {
        self.device.state()
    }
}

#[async_trait]
impl<D: StatelessHooks> Device for StatelessDevice<D> {
    fn identity(&self) -> &dyn DeviceIdentity {
        &*self.device
    }

    fn events(&self) -> &EventEmitter {
        self.device.events()
    }

    fn connection_state(&self) -> ConnectionState {
        self.device.base().connection_state()
    }

    fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.device.base().watch_connection_state()
    }

    async fn connect(&self) {
        let _guard = self.lifecycle.lock().await;
        let device = &*self.device;

        tracing::debug!(
            device = %device.log_id(),
            address = device.address().unwrap_or("-"),
            "Connecting to device"
        );
        device.base().emit_lifecycle(DeviceEvent::connecting(device.identifier()));

        match device.verify_connection().await {
            Ok(()) => {
                device.base().emit_lifecycle(DeviceEvent::connected(device.identifier()));
                tracing::info!(device = %device.log_id(), "Connected");
            }
            Err(err) => {
                tracing::error!(device = %device.log_id(), error = %err, "Connection error");
                device
                    .base()
                    .emit_lifecycle(DeviceEvent::error(device.identifier(), err.to_string()));
            }
        }
    }

    async fn disconnect(&self) {
        let _guard = self.lifecycle.lock().await;
        let device = &*self.device;

        tracing::debug!(device = %device.log_id(), "Disconnecting from device");
        device.base().emit_lifecycle(DeviceEvent::disconnected(device.identifier()));
    }
}

impl<D: StatelessHooks> std::fmt::Debug for StatelessDevice<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatelessDevice")
            .field("identifier", &self.device.identifier())
            .field("connection_state", &self.connection_state())
            .finish_non_exhaustive()
    }
}
