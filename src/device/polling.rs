// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Periodic polling pattern.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{Device, DeviceIdentity, DeviceInterface, is_running, stop_task};
use crate::error::Result;
use crate::event::{DeviceEvent, EventEmitter};
use crate::state::ConnectionState;

/// Configuration for polling devices.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use device_lifecycle::device::PollingConfig;
///
/// let config = PollingConfig::new().with_poll_interval(Duration::from_secs(5));
/// assert_eq!(config.poll_interval(), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    poll_interval: Duration,
}

impl PollingConfig {
    /// Default interval between polls.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

    /// Creates a configuration with the default interval.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets the interval between polls.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Returns the interval between polls.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Hooks for devices that must be polled for status.
#[async_trait]
pub trait PollingHooks: DeviceInterface {
    /// Establishes the initial connection. Called once per `connect()`.
    async fn establish_connection(&self) -> Result<()>;

    /// Queries the device for its current status.
    ///
    /// Called once per poll interval. Implementations emit `UPDATE` events
    /// for changed data; failures are logged and polling continues.
    async fn poll_device(&self) -> Result<()>;
}

struct PollRuntime {
    task: Option<JoinHandle<()>>,
    stop: CancellationToken,
}

/// Runtime for the polling pattern.
///
/// `connect()` establishes the connection once and starts a background task
/// that calls [`poll_device`](PollingHooks::poll_device) every poll interval.
/// The wait between polls ends early when `disconnect()` is called. A failed
/// `establish_connection` is reported as `ERROR` and not retried.
pub struct PollingDevice<D> {
    device: Arc<D>,
    config: PollingConfig,
    runtime: Mutex<PollRuntime>,
}

impl<D: PollingHooks> PollingDevice<D> {
    /// Wraps a concrete device.
    #[must_use]
    pub fn new(device: D, config: PollingConfig) -> Self {
        Self::from_arc(Arc::new(device), config)
    }

    /// Wraps a concrete device that is already shared.
    #[must_use]
    pub fn from_arc(device: Arc<D>, config: PollingConfig) -> Self {
        Self {
            device,
            config,
            runtime: Mutex::new(PollRuntime {
                task: None,
                stop: CancellationToken::new(),
            }),
        }
    }

    /// Returns the concrete device.
    #[must_use]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Returns the polling configuration.
    #[must_use]
    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    /// Returns the cached device state.
    #[must_use]
    pub fn state(&self) -> Option<D::State> {
        self.device.state()
    }

    /// Returns true while the poll task is running.
    pub async fn is_polling(&self) -> bool {
        is_running(self.runtime.lock().await.task.as_ref())
    }
}

#[async_trait]
impl<D: PollingHooks> Device for PollingDevice<D> {
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
        let mut runtime = self.runtime.lock().await;
        let device = &*self.device;

        if is_running(runtime.task.as_ref()) {
            tracing::debug!(
                device = %device.log_id(),
                "Already connected and polling, skipping connect"
            );
            return;
        }

        tracing::debug!(device = %device.log_id(), "Connecting and starting poll");
        device.base().emit_lifecycle(DeviceEvent::connecting(device.identifier()));

        match device.establish_connection().await {
            Ok(()) => {
                let stop = CancellationToken::new();
                runtime.stop = stop.clone();
                device.base().emit_lifecycle(DeviceEvent::connected(device.identifier()));
                runtime.task = Some(tokio::spawn(poll_loop(
                    Arc::clone(&self.device),
                    self.config.poll_interval,
                    stop,
                )));
                tracing::info!(
                    device = %device.log_id(),
                    interval_ms =
                        u64::try_from(self.config.poll_interval.as_millis()).unwrap_or(u64::MAX),
                    "Connected and polling started"
                );
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
        let mut runtime = self.runtime.lock().await;
        let device = &*self.device;

        tracing::debug!(device = %device.log_id(), "Disconnecting and stopping poll");
        runtime.stop.cancel();

        if let Some(task) = runtime.task.take() {
            stop_task(task, device.log_id()).await;
        }

        device.base().emit_lifecycle(DeviceEvent::disconnected(device.identifier()));
    }
}

async fn poll_loop<D: PollingHooks>(device: Arc<D>, interval: Duration, stop: CancellationToken) {
    tracing::debug!(device = %device.log_id(), "Poll loop started");

    while !stop.is_cancelled() {
        if let Err(err) = device.poll_device().await {
            tracing::error!(device = %device.log_id(), error = %err, "Poll error");
        }

        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }

    tracing::debug!(device = %device.log_id(), "Poll loop stopped");
}

impl<D: PollingHooks> std::fmt::Debug for PollingDevice<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingDevice")
            .field("identifier", &self.device.identifier())
            .field("config", &self.config)
            .field("connection_state", &self.connection_state())
            .finish_non_exhaustive()
    }
}
