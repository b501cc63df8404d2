// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event system for device lifecycle notifications.
//!
//! Every device owns an [`EventEmitter`]. The lifecycle patterns emit
//! [`DeviceEvent`]s on it as connections are attempted, established, lost and
//! closed; concrete devices emit their own `UPDATE` (and `PAIRED`) events.
//!
//! # Examples
//!
//! ```
//! use device_lifecycle::event::{DeviceEvent, EventEmitter, EventKind};
//!
//! let events = EventEmitter::new();
//!
//! // Synchronous listener for one kind
//! let id = events.on(EventKind::Error, |event| {
//!     eprintln!("{}: {:?}", event.identifier(), event.message());
//! });
//!
//! // Async receiver for all kinds
//! let mut rx = events.subscribe();
//!
//! events.emit(DeviceEvent::error("projector", "lamp timeout"));
//! events.off(id);
//! ```

mod device_event;
mod emitter;

pub use device_event::{DeviceEvent, EventKind};
pub use emitter::{EventEmitter, ListenerId};
