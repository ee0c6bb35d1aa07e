//! One-producer-many-consumer byte fan-out (spec.md §4.2, §8 invariant 3).
//!
//! Directly generalizes the upstream transcoder's
//! `broadcast::Sender<Bytes>` + `ClientGuard` (`manager.rs`) from MP4-fragment
//! fan-out to MPEG-TS byte fan-out. A client attached after byte `b` was
//! broadcast only ever observes bytes strictly after `b`: `broadcast::Sender`
//! already gives every new subscriber a receiver starting at the channel's
//! current tail, so this falls out of the primitive rather than needing to be
//! reimplemented.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::info;

const CHANNEL_CAPACITY: usize = 4096;

/// Idle-timer deadline, armed whenever the client count drops to zero while
/// the encoder is running and cleared on the next attach (spec.md §4.2). Kept
/// behind a plain `std::sync::Mutex` rather than `tokio::sync::Mutex` so the
/// synchronous `Drop` path (automatic writer close, not just an explicit
/// `RemoveClient`) can arm it without spawning a task.
struct IdleState {
    running: Arc<AtomicBool>,
    deadline: StdMutex<Option<Instant>>,
    timer: Duration,
}

impl IdleState {
    fn arm_if_running(&self) {
        if self.running.load(Ordering::Acquire) {
            *self.deadline.lock().unwrap() = Some(Instant::now() + self.timer);
        }
    }

    fn cancel(&self) {
        *self.deadline.lock().unwrap() = None;
    }

    fn is_expired(&self) -> bool {
        matches!(*self.deadline.lock().unwrap(), Some(d) if Instant::now() >= d)
    }
}

#[derive(Clone)]
pub struct Fanout {
    tx: broadcast::Sender<Bytes>,
    client_count: Arc<AtomicUsize>,
    idle: Arc<IdleState>,
}

/// Borrowed by the HTTP layer for the lifetime of one client's stream.
/// Dropping it (response body dropped, client disconnected) decrements the
/// fan-out's client count and, if that was the last client, arms the
/// idle-timer itself: `ReleaseClient` and connection teardown share this one
/// code path rather than only the explicit API call doing so.
pub struct FanoutClient {
    rx: broadcast::Receiver<Bytes>,
    _guard: ClientGuard,
}

impl FanoutClient {
    pub async fn recv(&mut self) -> Option<Result<Bytes, broadcast::error::RecvError>> {
        loop {
            match self.rx.recv().await {
                Ok(bytes) => return Some(Ok(bytes)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

struct ClientGuard {
    client_count: Arc<AtomicUsize>,
    idle: Arc<IdleState>,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        let prev = self.client_count.fetch_sub(1, Ordering::AcqRel);
        let now = prev.saturating_sub(1);
        info!("fan-out client detached (client_count={now})");
        if now == 0 {
            self.idle.arm_if_running();
        }
    }
}

impl Fanout {
    pub fn new(running: Arc<AtomicBool>, idle_timer: Duration) -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            client_count: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(IdleState { running, deadline: StdMutex::new(None), timer: idle_timer }),
        }
    }

    /// Attaches a new writer, cancelling any pending idle-timer. Write-drop
    /// semantics (spec.md §4.2) fall out of `broadcast`: a slow subscriber
    /// that falls behind the channel's ring buffer gets `Lagged` and catches
    /// back up, it never blocks the producer or other subscribers.
    pub fn add_client(&self) -> FanoutClient {
        let new_count = self.client_count.fetch_add(1, Ordering::AcqRel) + 1;
        info!("fan-out client attached (client_count={new_count})");
        self.idle.cancel();
        FanoutClient {
            rx: self.tx.subscribe(),
            _guard: ClientGuard { client_count: self.client_count.clone(), idle: self.idle.clone() },
        }
    }

    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::Acquire)
    }

    /// Producer-side send. Returns immediately regardless of subscriber
    /// count; a send with zero subscribers is simply dropped by `broadcast`.
    pub fn send(&self, bytes: Bytes) {
        let _ = self.tx.send(bytes);
    }

    /// Arms the idle-timer if the client count is currently zero; used by
    /// `CaptureEncoder::note_client_count_zero` for an explicit `RemoveClient`
    /// call. The automatic path is `ClientGuard`'s `Drop`.
    pub fn arm_idle_if_empty(&self) {
        if self.client_count() == 0 {
            self.idle.arm_if_running();
        }
    }

    pub fn is_idle_expired(&self) -> bool {
        self.idle.is_expired()
    }

    pub fn clear_idle(&self) {
        self.idle.cancel();
    }
}
