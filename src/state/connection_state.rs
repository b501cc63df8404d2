// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};

use crate::event::DeviceEvent;

/// Connection state of a device.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Device is not connected.
    #[default]
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Device is connected and operational.
    Connected,
    /// The last attempt failed with an error.
    Failed(String),
}

impl ConnectionState {
    /// Returns true if the device is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns true if the device is in a failed state.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Returns the state that follows this one after `event`.
    ///
    /// `UPDATE` and `PAIRED` events leave the state unchanged.
    #[must_use]
    pub fn transition(&self, event: &DeviceEvent) -> Self {
        match event {
            DeviceEvent::Connecting { .. } => Self::Connecting,
            DeviceEvent::Connected { .. } => Self::Connected,
            DeviceEvent::Disconnected { .. } => Self::Disconnected,
            DeviceEvent::Error { message, .. } => Self::Failed(message.clone()),
            DeviceEvent::Update { .. } | DeviceEvent::Paired { .. } => self.clone(),
        }
    }
}
