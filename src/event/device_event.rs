// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device event types.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of event kinds a device can emit.
///
/// Discriminants are stable and match the numeric codes used by hosting
/// applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum EventKind {
    /// A connection attempt has started.
    Connecting = 0,
    /// The device is connected.
    Connected = 1,
    /// The device was disconnected.
    Disconnected = 2,
    /// The device completed pairing. Never emitted by the lifecycle engine.
    Paired = 3,
    /// A hook failed.
    Error = 4,
    /// The device reported new data.
    Update = 5,
}

impl EventKind {
    /// All event kinds, in discriminant order.
    pub const ALL: [Self; 6] = [
        Self::Connecting,
        Self::Connected,
        Self::Disconnected,
        Self::Paired,
        Self::Error,
        Self::Update,
    ];

    /// Returns the numeric code of this kind.
    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Returns the kind with the given numeric code.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Disconnected => "DISCONNECTED",
            Self::Paired => "PAIRED",
            Self::Error => "ERROR",
            Self::Update => "UPDATE",
        };
        f.write_str(name)
    }
}

/// An event emitted by a device.
///
/// Every event carries the identifier of the device that emitted it; some
/// kinds carry a payload.
///
/// # Examples
///
/// ```
/// use device_lifecycle::event::{DeviceEvent, EventKind};
///
/// let event = DeviceEvent::error("tv-01", "connection refused");
/// assert_eq!(event.kind(), EventKind::Error);
/// assert_eq!(event.identifier(), "tv-01");
/// assert_eq!(event.message(), Some("connection refused"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceEvent {
    /// A connection attempt has started.
    Connecting {
        /// The device identifier.
        identifier: String,
    },
    /// The device is connected.
    Connected {
        /// The device identifier.
        identifier: String,
    },
    /// The device was disconnected.
    Disconnected {
        /// The device identifier.
        identifier: String,
    },
    /// The device completed pairing.
    Paired {
        /// The device identifier.
        identifier: String,
        /// Optional pairing details supplied by the device.
        data: Option<Value>,
    },
    /// A hook failed.
    Error {
        /// The device identifier.
        identifier: String,
        /// Human-readable failure message.
        message: String,
    },
    /// The device reported new data.
    Update {
        /// The device identifier.
        identifier: String,
        /// Device-specific payload.
        data: Value,
    },
}

impl DeviceEvent {
    /// Creates a connecting event.
    #[must_use]
    pub fn connecting(identifier: impl Into<String>) -> Self {
        Self::Connecting {
            identifier: identifier.into(),
        }
    }

    /// Creates a connected event.
    #[must_use]
    pub fn connected(identifier: impl Into<String>) -> Self {
        Self::Connected {
            identifier: identifier.into(),
        }
    }

    /// Creates a disconnected event.
    #[must_use]
    pub fn disconnected(identifier: impl Into<String>) -> Self {
        Self::Disconnected {
            identifier: identifier.into(),
        }
    }

    /// Creates a paired event.
    #[must_use]
    pub fn paired(identifier: impl Into<String>, data: Option<Value>) -> Self {
        Self::Paired {
            identifier: identifier.into(),
            data,
        }
    }

    /// Creates an error event.
    #[must_use]
    pub fn error(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            identifier: identifier.into(),
            message: message.into(),
        }
    }

    /// Creates an update event.
    #[must_use]
    pub fn update(identifier: impl Into<String>, data: Value) -> Self {
        Self::Update {
            identifier: identifier.into(),
            data,
        }
    }

    /// Returns the kind of this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connecting { .. } => EventKind::Connecting,
            Self::Connected { .. } => EventKind::Connected,
            Self::Disconnected { .. } => EventKind::Disconnected,
            Self::Paired { .. } => EventKind::Paired,
            Self::Error { .. } => EventKind::Error,
            Self::Update { .. } => EventKind::Update,
        }
    }

    /// Returns the identifier of the device that emitted this event.
    #[must_use]
    pub fn identifier(&self) -> &str {
        match self {
            Self::Connecting { identifier }
            | Self::Connected { identifier }
            | Self::Disconnected { identifier }
            | Self::Paired { identifier, .. }
            | Self::Error { identifier, .. }
            | Self::Update { identifier, .. } => identifier,
        }
    }

    /// Returns the failure message of an error event.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Error { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Returns the payload of an update or paired event.
    #[must_use]
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Update { data, .. } => Some(data),
            Self::Paired { data, .. } => data.as_ref(),
            _ => None,
        }
    }

    /// Returns `true` if this event reports a connection transition.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Connecting { .. } | Self::Connected { .. } | Self::Disconnected { .. }
        )
    }
}
