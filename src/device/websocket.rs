// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Streaming message-loop pattern.
//!
//! The socket type is supplied by the concrete device, so any framed stream
//! (WebSocket, SSE, line-delimited TCP) fits this pattern.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{Device, DeviceIdentity, DeviceInterface, is_running, stop_task};
use crate::error::Result;
use crate::event::{DeviceEvent, EventEmitter};
use crate::state::ConnectionState;

/// Hooks for devices that push messages over a stream.
#[async_trait]
pub trait WebSocketHooks: DeviceInterface {
    /// Open stream handle.
    type Socket: Send + 'static;

    /// One decoded message.
    type Message: Send + 'static;

    /// Opens the stream.
    async fn create_websocket(&self) -> Result<Self::Socket>;

    /// Closes the stream.
    async fn close_websocket(&self, socket: Self::Socket) -> Result<()>;

    /// Waits for the next message; `Ok(None)` means the stream was closed.
    async fn receive_message(&self, socket: &mut Self::Socket) -> Result<Option<Self::Message>>;

    /// Processes one message, typically by emitting an `UPDATE` event.
    async fn handle_message(&self, message: Self::Message) -> Result<()>;
}

type SocketSlot<S> = Arc<Mutex<Option<S>>>;

struct StreamRuntime {
    task: Option<JoinHandle<()>>,
    stop: CancellationToken,
}

/// Runtime for the streaming pattern.
///
/// `connect()` opens the socket and starts a message loop that feeds every
/// received message to [`handle_message`](WebSocketHooks::handle_message)
/// until the stream ends, a hook fails (reported as `ERROR`), or
/// `disconnect()` is called. `disconnect()` stops the loop and then closes the
/// socket if one is open.
pub struct WebSocketDevice<D: WebSocketHooks> {
    device: Arc<D>,
    socket: SocketSlot<D::Socket>,
    runtime: Mutex<StreamRuntime>,
}

impl<D: WebSocketHooks> WebSocketDevice<D> {
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
            socket: Arc::new(Mutex::new(None)),
            runtime: Mutex::new(StreamRuntime {
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

    /// Returns the cached device state.
    #[must_use]
    pub fn state(&self) -> Option<D::State> {
        self.device.state()
    }

    /// Returns true while the message loop is running.
    pub async fn is_receiving(&self) -> bool {
        is_running(self.runtime.lock().await.task.as_ref())
    }

    /// Returns true if a socket is open.
    ///
    /// Never waits: a socket held by the running message loop counts as open.
    #[must_use]
    pub fn has_socket(&self) -> bool {
        self.socket.try_lock().map_or(true, |slot| slot.is_some())
    }

    async fn close_socket(&self) {
        let socket = self.socket.lock().await.take();
        if let Some(socket) = socket {
            if let Err(err) = self.device.close_websocket(socket).await {
                tracing::warn!(
                    device = %self.device.log_id(),
                    error = %err,
                    "Error closing WebSocket"
                );
            }
        }
    }
}

#[async_trait]
impl<D: WebSocketHooks> Device for WebSocketDevice<D> {
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
            tracing::debug!(device = %device.log_id(), "WebSocket already open, skipping connect");
            return;
        }

        // A stream that ended on its own leaves its socket behind.
        self.close_socket().await;

        tracing::debug!(
            device = %device.log_id(),
            address = device.address().unwrap_or("-"),
            "Connecting WebSocket"
        );
        device.base().emit_lifecycle(DeviceEvent::connecting(device.identifier()));

        match device.create_websocket().await {
            Ok(socket) => {
                *self.socket.lock().await = Some(socket);
                let stop = CancellationToken::new();
                runtime.stop = stop.clone();
                device.base().emit_lifecycle(DeviceEvent::connected(device.identifier()));
                runtime.task = Some(tokio::spawn(message_loop(
                    Arc::clone(&self.device),
                    Arc::clone(&self.socket),
                    stop,
                )));
                tracing::info!(device = %device.log_id(), "WebSocket connected");
            }
            Err(err) => {
                tracing::error!(
                    device = %device.log_id(),
                    error = %err,
                    "WebSocket connection error"
                );
                device
                    .base()
                    .emit_lifecycle(DeviceEvent::error(device.identifier(), err.to_string()));
            }
        }
    }

    async fn disconnect(&self) {
        let mut runtime = self.runtime.lock().await;
        let device = &*self.device;

        tracing::debug!(device = %device.log_id(), "Disconnecting WebSocket");
        runtime.stop.cancel();

        if let Some(task) = runtime.task.take() {
            stop_task(task, device.log_id()).await;
        }

        self.close_socket().await;
        device.base().emit_lifecycle(DeviceEvent::disconnected(device.identifier()));
    }
}

async fn message_loop<D: WebSocketHooks>(
    device: Arc<D>,
    socket: SocketSlot<D::Socket>,
    stop: CancellationToken,
) {
    tracing::debug!(device = %device.log_id(), "WebSocket message loop started");

    let outcome = {
        let mut slot = socket.lock().await;
        match slot.as_mut() {
            Some(socket) => receive_until_closed(&*device, socket, &stop).await,
            None => Ok(()),
        }
    };

    if let Err(err) = outcome {
        tracing::error!(device = %device.log_id(), error = %err, "WebSocket error");
        device
            .base()
            .emit_lifecycle(DeviceEvent::error(device.identifier(), err.to_string()));
    }

    tracing::debug!(device = %device.log_id(), "WebSocket message loop stopped");
}

async fn receive_until_closed<D: WebSocketHooks>(
    device: &D,
    socket: &mut D::Socket,
    stop: &CancellationToken,
) -> Result<()> {
    while !stop.is_cancelled() {
        let received = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            received = device.receive_message(socket) => received?,
        };

        let Some(message) = received else {
            tracing::debug!(device = %device.log_id(), "WebSocket closed by peer");
            break;
        };

        device.handle_message(message).await?;
    }
    Ok(())
}

impl<D: WebSocketHooks> std::fmt::Debug for WebSocketDevice<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketDevice")
            .field("identifier", &self.device.identifier())
            .field("connection_state", &self.connection_state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::{Value, json};

    use super::*;
    use crate::device::DeviceBase;
    use crate::error::{Error, ProtocolError};
    use crate::event::EventKind;

    /// Scripted stream: yields queued frames, then either ends or stays silent.
    struct Feed {
        frames: VecDeque<Result<Value>>,
        hang_when_empty: bool,
    }

    struct Player {
        base: DeviceBase<(), Value>,
        script: parking_lot::Mutex<Option<Feed>>,
        fail_open: AtomicBool,
        handled: AtomicUsize,
        closed: AtomicUsize,
    }

    impl DeviceIdentity for Player {
        fn identifier(&self) -> &str {
            "player"
        }

        fn name(&self) -> &str {
            "Media player"
        }

        fn address(&self) -> Option<&str> {
            Some("ws://10.0.0.30/events")
        }

        fn log_id(&self) -> &str {
            "player"
        }
    }

    impl DeviceInterface for Player {
        type Config = ();
        type State = Value;

        fn base(&self) -> &DeviceBase<(), Value> {
            &self.base
        }
    }

    #[async_trait]
    impl WebSocketHooks for Player {
        type Socket = Feed;
        type Message = Value;

        async fn create_websocket(&self) -> Result<Feed> {
            if self.fail_open.load(Ordering::SeqCst) {
                return Err(ProtocolError::ConnectionFailed("handshake rejected".into()).into());
            }
            self.script
                .lock()
                .take()
                .ok_or_else(|| Error::other("no script"))
        }

        async fn close_websocket(&self, _socket: Feed) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn receive_message(&self, socket: &mut Feed) -> Result<Option<Value>> {
            match socket.frames.pop_front() {
                Some(frame) => frame.map(Some),
                None if socket.hang_when_empty => {
                    std::future::pending::<()>().await;
                    Ok(None)
                }
                None => Ok(None),
            }
        }

        async fn handle_message(&self, message: Value) -> Result<()> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            self.base.set_state(message.clone());
            self.emit_update(message);
            Ok(())
        }
    }

    fn player(frames: Vec<Result<Value>>, hang_when_empty: bool) -> WebSocketDevice<Player> {
        WebSocketDevice::new(Player {
            base: DeviceBase::new(Arc::new(()), EventEmitter::new()),
            script: parking_lot::Mutex::new(Some(Feed {
                frames: frames.into(),
                hang_when_empty,
            })),
            fail_open: AtomicBool::new(false),
            handled: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        })
    }

    async fn wait_for_loop_exit(device: &WebSocketDevice<Player>) {
        for _ in 0..100 {
            if !device.is_receiving().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("message loop did not exit");
    }

    #[tokio::test(start_paused = true)]
    async fn three_messages_then_end_of_stream() {
        let device = player(
            vec![Ok(json!({"track": 1})), Ok(json!({"track": 2})), Ok(json!({"track": 3}))],
            false,
        );
        let mut rx = device.events().subscribe();

        device.connect().await;
        wait_for_loop_exit(&device).await;

        assert_eq!(device.device().handled.load(Ordering::SeqCst), 3);
        let kinds: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|event| event.kind())
            .collect();
        assert_eq!(
            kinds,
            [
                EventKind::Connecting,
                EventKind::Connected,
                EventKind::Update,
                EventKind::Update,
                EventKind::Update,
            ]
        );
        assert_eq!(device.state(), Some(json!({"track": 3})));
    }

    #[tokio::test(start_paused = true)]
    async fn receive_error_emits_error_and_ends_loop() {
        let device = player(
            vec![
                Ok(json!("hello")),
                Err(ProtocolError::ConnectionClosed.into()),
                Ok(json!("never")),
            ],
            false,
        );
        let mut rx = device.events().subscribe();

        device.connect().await;
        wait_for_loop_exit(&device).await;

        assert_eq!(device.device().handled.load(Ordering::SeqCst), 1);
        let last = std::iter::from_fn(|| rx.try_recv().ok()).last().unwrap();
        assert_eq!(
            last,
            DeviceEvent::error("player", "protocol error: connection closed by peer")
        );
        assert!(device.connection_state().is_failed());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_stops_loop_and_closes_socket() {
        let device = player(vec![Ok(json!(1))], true);
        device.connect().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(device.is_receiving().await);
        // held by the running loop, reported without waiting
        assert!(device.has_socket());

        device.disconnect().await;

        assert!(!device.is_receiving().await);
        assert!(!device.has_socket());
        assert_eq!(device.device().closed.load(Ordering::SeqCst), 1);
        assert_eq!(device.connection_state(), ConnectionState::Disconnected);

        let handled = device.device().handled.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(device.device().handled.load(Ordering::SeqCst), handled);
    }

    #[tokio::test(start_paused = true)]
    async fn socket_closed_after_stream_ended() {
        let device = player(vec![], false);
        device.connect().await;
        wait_for_loop_exit(&device).await;

        assert!(device.has_socket());
        device.disconnect().await;
        assert_eq!(device.device().closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn create_failure_leaves_no_task() {
        let device = player(vec![], true);
        device.device().fail_open.store(true, Ordering::SeqCst);
        let mut rx = device.events().subscribe();

        device.connect().await;

        assert!(!device.is_receiving().await);
        assert!(!device.has_socket());
        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::Connecting);
        assert_eq!(
            rx.recv().await.unwrap(),
            DeviceEvent::error(
                "player",
                "protocol error: connection failed: handshake rejected"
            )
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_without_connect() {
        let device = player(vec![], false);
        let mut rx = device.events().subscribe();

        device.disconnect().await;

        assert_eq!(device.device().closed.load(Ordering::SeqCst), 0);
        assert_eq!(rx.recv().await.unwrap(), DeviceEvent::disconnected("player"));
        assert!(rx.try_recv().is_err());
    }
}
