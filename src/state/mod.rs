// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection state tracking.
//!
//! The [`ConnectionState`] of a device is derived from the lifecycle events
//! its runtime emits and published through a watch channel, so hosting
//! applications can either poll it or await transitions.
//!
//! # Examples
//!
//! ```
//! use device_lifecycle::event::DeviceEvent;
//! use device_lifecycle::state::ConnectionState;
//!
//! let state = ConnectionState::Disconnected;
//! let next = state.transition(&DeviceEvent::connecting("dev"));
//! assert_eq!(next, ConnectionState::Connecting);
//! ```

mod connection_state;

pub use connection_state::ConnectionState;
