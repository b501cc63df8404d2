// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persistent connection pattern with automatic reconnection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::backoff::{Backoff, BackoffPolicy};
use super::{Device, DeviceIdentity, DeviceInterface, is_running, stop_task};
use crate::error::Result;
use crate::event::{DeviceEvent, EventEmitter};
use crate::state::ConnectionState;

/// Hooks for devices that hold a long-lived session.
#[async_trait]
pub trait PersistentConnectionHooks: DeviceInterface {
    /// Open session handle.
    type Connection: Send + 'static;

    /// Opens a session.
    async fn establish_connection(&self) -> Result<Self::Connection>;

    /// Keeps the session alive.
    ///
    /// Should not return while the session is healthy. `Ok(())` means the
    /// session ended cleanly and a new one is opened right away, so an
    /// implementation that returns `Ok(())` immediately reconnects in a busy
    /// loop. `Err` means the session dropped and the next attempt waits for
    /// the backoff delay.
    async fn maintain_connection(&self, connection: &mut Self::Connection) -> Result<()>;

    /// Closes a session.
    async fn close_connection(&self, connection: Self::Connection) -> Result<()>;
}

type ConnectionSlot<C> = Arc<Mutex<Option<C>>>;

/// `close_connection` call in flight, run on its own task.
type CloseSlot = Arc<Mutex<Option<JoinHandle<()>>>>;

struct SupervisorRuntime {
    task: Option<JoinHandle<()>>,
    stop: CancellationToken,
}

/// Runtime for the persistent connection pattern.
///
/// `connect()` starts a supervisor task that opens the session, keeps it
/// alive through [`maintain_connection`](PersistentConnectionHooks::maintain_connection),
/// and reopens it whenever it drops. Failed attempts are reported as `ERROR`
/// and followed by an exponential backoff delay taken from the
/// [`BackoffPolicy`]; the delay returns to its base value after every
/// successful connection.
///
/// # Examples
///
/// ```no_run
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # use async_trait::async_trait;
/// # use device_lifecycle::device::*;
/// # use device_lifecycle::event::EventEmitter;
/// # struct Hub { base: DeviceBase<(), ()> }
/// # impl DeviceIdentity for Hub {
/// #     fn identifier(&self) -> &str { "hub" }
/// #     fn name(&self) -> &str { "Hub" }
/// #     fn address(&self) -> Option<&str> { None }
/// #     fn log_id(&self) -> &str { "hub" }
/// # }
/// # impl DeviceInterface for Hub {
/// #     type Config = ();
/// #     type State = ();
/// #     fn base(&self) -> &DeviceBase<(), ()> { &self.base }
/// # }
/// # #[async_trait]
/// # impl PersistentConnectionHooks for Hub {
/// #     type Connection = ();
/// #     async fn establish_connection(&self) -> device_lifecycle::Result<()> { Ok(()) }
/// #     async fn maintain_connection(&self, _: &mut ()) -> device_lifecycle::Result<()> {
/// #         // Hold the session until the transport reports a drop.
/// #         std::future::pending::<()>().await;
/// #         Ok(())
/// #     }
/// #     async fn close_connection(&self, _: ()) -> device_lifecycle::Result<()> { Ok(()) }
/// # }
/// # async fn example() {
/// let hub = Hub { base: DeviceBase::new(Arc::new(()), EventEmitter::new()) };
/// let policy = BackoffPolicy::new()
///     .with_initial_delay(Duration::from_secs(1))
///     .with_max_delay(Duration::from_secs(60));
///
/// let device = PersistentConnectionDevice::new(hub, policy);
/// device.connect().await;
/// # }
/// ```
pub struct PersistentConnectionDevice<D: PersistentConnectionHooks> {
    device: Arc<D>,
    backoff: Arc<parking_lot::Mutex<Backoff>>,
    connection: ConnectionSlot<D::Connection>,
    closing: CloseSlot,
    runtime: Mutex<SupervisorRuntime>,
}

impl<D: PersistentConnectionHooks> PersistentConnectionDevice<D> {
    /// Wraps a concrete device.
    #[must_use]
    pub fn new(device: D, policy: BackoffPolicy) -> Self {
        Self::from_arc(Arc::new(device), policy)
    }

    /// Wraps a concrete device that is already shared.
    #[must_use]
    pub fn from_arc(device: Arc<D>, policy: BackoffPolicy) -> Self {
        Self {
            device,
            backoff: Arc::new(parking_lot::Mutex::new(Backoff::new(policy))),
            connection: Arc::new(Mutex::new(None)),
            closing: Arc::new(Mutex::new(None)),
            runtime: Mutex::new(SupervisorRuntime {
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

    /// Returns the backoff policy.
    #[must_use]
    pub fn policy(&self) -> BackoffPolicy {
        self.backoff.lock().policy().clone()
    }

    /// Returns the delay waited after the most recent failure.
    #[must_use]
    pub fn current_backoff(&self) -> Duration {
        self.backoff.lock().current()
    }

    /// Returns the number of consecutive failed attempts.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.backoff.lock().failures()
    }

    /// Returns true while the supervisor task is running.
    pub async fn is_supervising(&self) -> bool {
        is_running(self.runtime.lock().await.task.as_ref())
    }
}

#[async_trait]
impl<D: PersistentConnectionHooks> Device for PersistentConnectionDevice<D> {
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
                "Supervisor already running, skipping connect"
            );
            return;
        }

        tracing::debug!(
            device = %device.log_id(),
            address = device.address().unwrap_or("-"),
            "Starting connection supervisor"
        );

        // A supervisor that gave up leaves its failure count behind.
        self.backoff.lock().reset();

        let stop = CancellationToken::new();
        runtime.stop = stop.clone();
        runtime.task = Some(tokio::spawn(supervise(
            Arc::clone(&self.device),
            Arc::clone(&self.connection),
            Arc::clone(&self.closing),
            Arc::clone(&self.backoff),
            stop,
        )));
    }

    async fn disconnect(&self) {
        let mut runtime = self.runtime.lock().await;
        let device = &*self.device;

        tracing::debug!(device = %device.log_id(), "Stopping connection supervisor");
        runtime.stop.cancel();

        if let Some(task) = runtime.task.take() {
            stop_task(task, device.log_id()).await;
        }

        release(&self.device, &self.connection, &self.closing).await;
        device.base().emit_lifecycle(DeviceEvent::disconnected(device.identifier()));
    }
}

/// Closes and clears the stored connection, if any.
///
/// The close runs on its own task and stays registered in `closing` until it
/// completes, so aborting the caller cannot cut `close_connection` short: the
/// next `release` waits for it instead.
async fn release<D: PersistentConnectionHooks>(
    device: &Arc<D>,
    slot: &ConnectionSlot<D::Connection>,
    closing: &CloseSlot,
) {
    let mut pending = closing.lock().await;

    if pending.is_none() {
        let connection = slot.lock().await.take();
        if let Some(connection) = connection {
            let device = Arc::clone(device);
            *pending = Some(tokio::spawn(async move {
                if let Err(err) = device.close_connection(connection).await {
                    tracing::warn!(
                        device = %device.log_id(),
                        error = %err,
                        "Error closing connection"
                    );
                }
            }));
        }
    }

    if let Some(task) = pending.as_mut() {
        if let Err(err) = task.await {
            tracing::error!(device = %device.log_id(), error = %err, "Close task panicked");
        }
        *pending = None;
    }
}

async fn supervise<D: PersistentConnectionHooks>(
    device: Arc<D>,
    slot: ConnectionSlot<D::Connection>,
    closing: CloseSlot,
    backoff: Arc<parking_lot::Mutex<Backoff>>,
    stop: CancellationToken,
) {
    tracing::debug!(device = %device.log_id(), "Supervisor started");

    while !stop.is_cancelled() {
        device
            .base()
            .emit_lifecycle(DeviceEvent::connecting(device.identifier()));

        let err = match run_session(&*device, &slot, &backoff).await {
            Ok(()) => {
                tracing::debug!(device = %device.log_id(), "Connection ended, reconnecting");
                release(&device, &slot, &closing).await;
                continue;
            }
            Err(err) => err,
        };

        tracing::error!(device = %device.log_id(), error = %err, "Connection error");
        device
            .base()
            .emit_lifecycle(DeviceEvent::error(device.identifier(), err.to_string()));
        release(&device, &slot, &closing).await;

        let (delay, failures, retry) = {
            let mut backoff = backoff.lock();
            let delay = backoff.record_failure();
            (delay, backoff.failures(), backoff.should_retry())
        };

        if !retry {
            tracing::error!(device = %device.log_id(), failures, "Giving up reconnecting");
            device.base().emit_lifecycle(DeviceEvent::error(
                device.identifier(),
                format!("giving up after {failures} consecutive failures"),
            ));
            break;
        }

        tracing::debug!(
            device = %device.log_id(),
            failures,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Waiting before reconnect"
        );

        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    tracing::debug!(device = %device.log_id(), "Supervisor stopped");
}

/// Opens one session and keeps it alive until it ends.
async fn run_session<D: PersistentConnectionHooks>(
    device: &D,
    slot: &ConnectionSlot<D::Connection>,
    backoff: &parking_lot::Mutex<Backoff>,
) -> Result<()> {
    let connection = device.establish_connection().await?;
    backoff.lock().reset();

    let mut guard = slot.lock().await;
    let connection = guard.insert(connection);
    device.base().emit_lifecycle(DeviceEvent::connected(device.identifier()));
    tracing::info!(device = %device.log_id(), "Connection established");

    device.maintain_connection(connection).await
}

impl<D: PersistentConnectionHooks> std::fmt::Debug for PersistentConnectionDevice<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentConnectionDevice")
            .field("identifier", &self.device.identifier())
            .field("connection_state", &self.connection_state())
            .field("backoff", &*self.backoff.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex as SyncMutex;
    use tokio::time::Instant;

    use super::*;
    use crate::device::DeviceBase;
    use crate::error::{Error, ProtocolError};
    use crate::event::EventKind;

    /// Scripted outcome of one `establish_connection` call.
    #[derive(Clone, Copy)]
    enum Attempt {
        Refuse,
        /// Session that drops with an error after the given time.
        DropAfter(u64),
        /// Session that ends cleanly after the given time.
        EndAfter(u64),
        /// Session that stays up.
        Hold,
    }

    struct Session {
        id: usize,
        attempt: Attempt,
    }

    struct Hub {
        base: DeviceBase<(), ()>,
        script: SyncMutex<Vec<Attempt>>,
        attempts: SyncMutex<Vec<Instant>>,
        closed: SyncMutex<Vec<usize>>,
        opened: AtomicUsize,
        log: Arc<SyncMutex<Vec<EventKind>>>,
        /// Last event seen by each `close_connection` call.
        last_event_at_close: SyncMutex<Vec<Option<EventKind>>>,
        close_delay: SyncMutex<Duration>,
    }

    impl DeviceIdentity for Hub {
        fn identifier(&self) -> &str {
            "hub"
        }

        fn name(&self) -> &str {
            "Bridge hub"
        }

        fn address(&self) -> Option<&str> {
            Some("10.0.0.2:8883")
        }

        fn log_id(&self) -> &str {
            "hub"
        }
    }

    impl DeviceInterface for Hub {
        type Config = ();
        type State = ();

        fn base(&self) -> &DeviceBase<(), ()> {
            &self.base
        }
    }

    #[async_trait]
    impl PersistentConnectionHooks for Hub {
        type Connection = Session;

        async fn establish_connection(&self) -> Result<Session> {
            self.attempts.lock().push(Instant::now());
            let attempt = {
                let mut script = self.script.lock();
                if script.len() > 1 { script.remove(0) } else { script[0] }
            };
            match attempt {
                Attempt::Refuse => Err(ProtocolError::ConnectionFailed("refused".into()).into()),
                attempt => Ok(Session {
                    id: self.opened.fetch_add(1, Ordering::SeqCst),
                    attempt,
                }),
            }
        }

        async fn maintain_connection(&self, session: &mut Session) -> Result<()> {
            match session.attempt {
                Attempt::DropAfter(ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Err(ProtocolError::ConnectionClosed.into())
                }
                Attempt::EndAfter(ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(())
                }
                Attempt::Hold => {
                    std::future::pending::<()>().await;
                    Ok(())
                }
                Attempt::Refuse => Err(Error::other("unreachable session")),
            }
        }

        async fn close_connection(&self, session: Session) -> Result<()> {
            let last = self.log.lock().last().copied();
            self.last_event_at_close.lock().push(last);

            let delay = *self.close_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.closed.lock().push(session.id);
            Ok(())
        }
    }

    fn hub(script: Vec<Attempt>, policy: BackoffPolicy) -> PersistentConnectionDevice<Hub> {
        let events = EventEmitter::new();
        let log = Arc::new(SyncMutex::new(Vec::new()));
        for kind in EventKind::ALL {
            let log = Arc::clone(&log);
            events.on(kind, move |event| log.lock().push(event.kind()));
        }

        PersistentConnectionDevice::new(
            Hub {
                base: DeviceBase::new(Arc::new(()), events),
                script: SyncMutex::new(script),
                attempts: SyncMutex::new(Vec::new()),
                closed: SyncMutex::new(Vec::new()),
                opened: AtomicUsize::new(0),
                log,
                last_event_at_close: SyncMutex::new(Vec::new()),
                close_delay: SyncMutex::new(Duration::ZERO),
            },
            policy,
        )
    }

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(400))
    }

    fn attempt_gaps(device: &PersistentConnectionDevice<Hub>) -> Vec<Duration> {
        device
            .device()
            .attempts
            .lock()
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn connects_and_holds_session() {
        let device = hub(vec![Attempt::Hold], fast_policy());
        let mut rx = device.events().subscribe();

        device.connect().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(device.is_connected());
        assert!(device.is_supervising().await);
        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::Connecting);
        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::Connected);
        assert_eq!(device.device().attempts.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempts_back_off_exponentially() {
        let device = hub(vec![Attempt::Refuse], fast_policy());
        device.connect().await;

        tokio::time::sleep(Duration::from_millis(1_250)).await;

        // Waits of 100, 200, 400, 400 ms between attempts.
        let gaps = attempt_gaps(&device);
        assert!(gaps.len() >= 4, "gaps: {gaps:?}");
        assert_eq!(&gaps[..4], [100, 200, 400, 400].map(Duration::from_millis));
        assert_eq!(device.current_backoff(), Duration::from_millis(400));
        assert!(!device.is_connected());

        device.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn error_event_per_failed_attempt() {
        let device = hub(vec![Attempt::Refuse], fast_policy());
        let mut rx = device.events().subscribe();

        device.connect().await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        device.disconnect().await;

        let kinds: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|event| event.kind())
            .collect();
        assert_eq!(
            kinds,
            [
                EventKind::Connecting,
                EventKind::Error,
                EventKind::Connecting,
                EventKind::Error,
                EventKind::Disconnected,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_session_is_closed_and_reopened_after_base_delay() {
        let device = hub(
            vec![Attempt::DropAfter(50), Attempt::Refuse, Attempt::Hold],
            fast_policy(),
        );
        device.connect().await;

        tokio::time::sleep(Duration::from_millis(500)).await;

        // drop at 50, wait 100, refused at 150, wait 200, connect at 350
        let gaps = attempt_gaps(&device);
        assert_eq!(gaps, [150, 200].map(Duration::from_millis));
        assert_eq!(*device.device().closed.lock(), [0]);
        assert!(device.is_connected());
        assert_eq!(device.consecutive_failures(), 0);

        device.disconnect().await;
        assert_eq!(*device.device().closed.lock(), [0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn error_is_emitted_before_session_is_closed() {
        let device = hub(vec![Attempt::DropAfter(10), Attempt::Hold], fast_policy());
        device.connect().await;

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*device.device().closed.lock(), [0]);
        assert_eq!(
            device.device().last_event_at_close.lock().first(),
            Some(&Some(EventKind::Error))
        );
        device.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_waits_for_close_in_progress() {
        let device = hub(vec![Attempt::DropAfter(10), Attempt::Refuse], fast_policy());
        *device.device().close_delay.lock() = Duration::from_millis(100);
        device.connect().await;

        // session dropped at 10 ms, its close runs until 110 ms
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(device.device().closed.lock().is_empty());

        let started = Instant::now();
        device.disconnect().await;

        assert_eq!(*device.device().closed.lock(), [0]);
        assert_eq!(started.elapsed(), Duration::from_millis(60));
        assert_eq!(device.device().log.lock().last(), Some(&EventKind::Disconnected));
        assert_eq!(device.device().attempts.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_backoff() {
        let device = hub(
            vec![
                Attempt::Refuse,
                Attempt::Refuse,
                Attempt::DropAfter(10),
                Attempt::Refuse,
                Attempt::Hold,
            ],
            fast_policy(),
        );
        device.connect().await;

        tokio::time::sleep(Duration::from_secs(1)).await;

        // 100, 200, then 10 ms of session followed by the base delay
        let gaps = attempt_gaps(&device);
        assert_eq!(gaps, [100, 200, 110, 200].map(Duration::from_millis));

        device.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn clean_end_reconnects_immediately() {
        let device = hub(vec![Attempt::EndAfter(30), Attempt::Hold], fast_policy());
        let mut rx = device.events().subscribe();

        device.connect().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(attempt_gaps(&device), [Duration::from_millis(30)]);
        assert_eq!(*device.device().closed.lock(), [0]);
        let errors = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|event| event.kind() == EventKind::Error)
            .count();
        assert_eq!(errors, 0);

        device.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let device = hub(vec![Attempt::Refuse], fast_policy().with_max_retries(2));
        let mut rx = device.events().subscribe();

        device.connect().await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(device.device().attempts.lock().len(), 3);
        assert!(!device.is_supervising().await);

        let last = std::iter::from_fn(|| rx.try_recv().ok()).last().unwrap();
        assert_eq!(
            last,
            DeviceEvent::error("hub", "giving up after 3 consecutive failures")
        );
        assert!(device.connection_state().is_failed());

        // A new connect starts over with a fresh failure count.
        device.connect().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(device.device().attempts.lock().len(), 4);
        device.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_interrupts_backoff_wait() {
        let device = hub(
            vec![Attempt::Refuse],
            BackoffPolicy::new().with_initial_delay(Duration::from_secs(10)),
        );
        device.connect().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let started = Instant::now();
        device.disconnect().await;
        assert!(started.elapsed() < Duration::from_secs(1));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(device.device().attempts.lock().len(), 1);
        assert_eq!(device.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_connect_is_a_no_op() {
        let device = hub(vec![Attempt::Hold], fast_policy());

        device.connect().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        device.connect().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(device.device().attempts.lock().len(), 1);
        device.disconnect().await;
        assert_eq!(*device.device().closed.lock(), [0]);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_without_connect() {
        let device = hub(vec![Attempt::Hold], fast_policy());
        let mut rx = device.events().subscribe();

        device.disconnect().await;

        assert!(device.device().closed.lock().is_empty());
        assert_eq!(rx.recv().await.unwrap(), DeviceEvent::disconnected("hub"));
        assert!(rx.try_recv().is_err());
    }
}
