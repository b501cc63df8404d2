// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-device event emitter.
//!
//! - [`ListenerId`] - Unique identifier for removing a listener
//! - [`EventEmitter`] - Listener registry plus broadcast channel

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::{DeviceEvent, EventKind};

/// Default channel capacity for the broadcast side of the emitter.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Unique identifier for a registered listener.
///
/// Returned by [`EventEmitter::on`] and [`EventEmitter::once`]; pass it to
/// [`EventEmitter::off`] to remove the listener. IDs are unique within an
/// emitter's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Returns the raw ID value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({})", self.0)
    }
}

/// Type alias for listener callbacks.
type Callback = Arc<dyn Fn(&DeviceEvent) + Send + Sync>;

struct Listener {
    id: ListenerId,
    kind: EventKind,
    once: bool,
    callback: Callback,
}

struct Inner {
    next_id: AtomicU64,
    /// Kept in registration order.
    listeners: RwLock<Vec<Listener>>,
    sender: broadcast::Sender<DeviceEvent>,
}

/// Publish/subscribe channel for the events of one device.
///
/// Listeners are registered per [`EventKind`] and invoked synchronously, in
/// registration order, on the task that emits the event. Every event is also
/// published on a bounded broadcast channel for async consumers obtained with
/// [`subscribe`](Self::subscribe).
///
/// Emission is fire-and-forget: it never blocks and never fails. Listeners
/// must return quickly since they run on the device's lifecycle task.
///
/// Cloning an emitter is cheap; clones share listeners and channel.
///
/// # Examples
///
/// ```
/// use device_lifecycle::event::{DeviceEvent, EventEmitter, EventKind};
///
/// let events = EventEmitter::new();
/// events.on(EventKind::Connected, |event| {
///     println!("{} connected", event.identifier());
/// });
///
/// events.emit(DeviceEvent::connected("receiver-01"));
/// ```
#[derive(Clone)]
pub struct EventEmitter {
    inner: Arc<Inner>,
}

impl EventEmitter {
    /// Creates a new emitter with default broadcast capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a new emitter with the specified broadcast capacity.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events buffered per subscriber
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(1),
                listeners: RwLock::new(Vec::new()),
                sender,
            }),
        }
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn register(&self, kind: EventKind, once: bool, callback: Callback) -> ListenerId {
        let id = self.next_id();
        self.inner.listeners.write().push(Listener {
            id,
            kind,
            once,
            callback,
        });
        id
    }

    /// Registers a listener for events of the given kind.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&DeviceEvent) + Send + Sync + 'static,
    {
        self.register(kind, false, Arc::new(listener))
    }

    /// Registers a listener that is removed after its first invocation.
    pub fn once<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&DeviceEvent) + Send + Sync + 'static,
    {
        self.register(kind, true, Arc::new(listener))
    }

    /// Removes a listener.
    ///
    /// Returns `true` if a listener was found and removed.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|listener| listener.id != id);
        listeners.len() != before
    }

    /// Removes all listeners of one kind, or every listener when `kind` is `None`.
    pub fn remove_all_listeners(&self, kind: Option<EventKind>) {
        let mut listeners = self.inner.listeners.write();
        match kind {
            Some(kind) => listeners.retain(|listener| listener.kind != kind),
            None => listeners.clear(),
        }
    }

    /// Returns the number of listeners registered for a kind.
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner
            .listeners
            .read()
            .iter()
            .filter(|listener| listener.kind == kind)
            .count()
    }

    /// Subscribes to every event emitted after this call.
    ///
    /// A receiver that falls behind by more than the channel capacity loses
    /// the oldest events (`RecvError::Lagged`).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.inner.sender.subscribe()
    }

    /// Returns the number of active broadcast subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }

    /// Emits an event to the listeners of its kind and to all subscribers.
    ///
    /// Listeners run outside the registry lock, so they may register or
    /// remove listeners themselves.
    pub fn emit(&self, event: DeviceEvent) {
        let kind = event.kind();
        let callbacks: Vec<Callback> = {
            let mut listeners = self.inner.listeners.write();
            let matching = listeners
                .iter()
                .filter(|listener| listener.kind == kind)
                .map(|listener| Arc::clone(&listener.callback))
                .collect();
            listeners.retain(|listener| !(listener.once && listener.kind == kind));
            matching
        };

        for callback in &callbacks {
            callback(&event);
        }

        // No subscribers is not an error
        let _ = self.inner.sender.send(event);
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.inner.listeners.read().len())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
