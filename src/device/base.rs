// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! State shared by every concrete device.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use crate::event::{DeviceEvent, EventEmitter};
use crate::state::ConnectionState;

/// Configuration reference, event channel and state slot of one device.
///
/// Concrete devices embed a `DeviceBase` and expose it through
/// [`DeviceInterface::base`](super::DeviceInterface::base).
///
/// The configuration is held by `Arc` and never mutated; ownership stays with
/// whatever registry created it. The state slot starts empty and is written
/// only through [`set_state`](Self::set_state).
pub struct DeviceBase<C, S> {
    config: Arc<C>,
    events: EventEmitter,
    state: RwLock<Option<S>>,
    connection_tx: watch::Sender<ConnectionState>,
}

impl<C, S: Clone> DeviceBase<C, S> {
    /// Creates a base for a device with the given configuration and channel.
    #[must_use]
    pub fn new(config: Arc<C>, events: EventEmitter) -> Self {
        let (connection_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            events,
            state: RwLock::new(None),
            connection_tx,
        }
    }

    /// Returns the configuration record.
    #[must_use]
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Returns a shared handle to the configuration record.
    #[must_use]
    pub fn shared_config(&self) -> Arc<C> {
        Arc::clone(&self.config)
    }

    /// Returns the event channel.
    #[must_use]
    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Returns a copy of the cached state.
    #[must_use]
    pub fn state(&self) -> Option<S> {
        self.state.read().clone()
    }

    /// Replaces the cached state, returning the previous value.
    pub fn set_state(&self, state: S) -> Option<S> {
        self.state.write().replace(state)
    }

    /// Clears the cached state, returning the previous value.
    pub fn clear_state(&self) -> Option<S> {
        self.state.write().take()
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection_tx.borrow().clone()
    }

    /// Creates a receiver for connection state transitions.
    #[must_use]
    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection_tx.subscribe()
    }

    /// Emits an event on the device's channel.
    ///
    /// The connection state is owned by the lifecycle runtimes and is not
    /// affected by events emitted here, including `ERROR`.
    pub fn emit(&self, event: DeviceEvent) {
        self.events.emit(event);
    }

    /// Emits a lifecycle event, moving the connection state first.
    ///
    /// Listeners therefore observe the state the event describes.
    pub(crate) fn emit_lifecycle(&self, event: DeviceEvent) {
        self.connection_tx.send_if_modified(|current| {
            let next = current.transition(&event);
            if next == *current {
                false
            } else {
                *current = next;
                true
            }
        });
        self.events.emit(event);
    }
}

impl<C, S> fmt::Debug for DeviceBase<C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBase")
            .field("events", &self.events)
            .field("connection_state", &*self.connection_tx.borrow())
            .finish_non_exhaustive()
    }
}
