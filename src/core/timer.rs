//! Interruptible waiting between ticks.
//!
//! A [`CancellableTimer`] sleeps towards a deadline in chunks no longer than
//! the heartbeat period. After every chunk it services the heartbeat and
//! checks the shared shutdown flag, so neither a long holdoff nor a slow
//! sampling interval delays shutdown or starves the liveness ping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Smallest sleep chunk, so a zero ping period cannot spin.
const MIN_CHUNK: Duration = Duration::from_millis(1);

/// Reply from the liveness collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStatus {
    Continue,
    Abort,
    Timeout,
}

/// Liveness ping serviced while the engine sleeps.
pub trait Heartbeat {
    fn ping(&mut self, interval_hint: Duration) -> HeartbeatStatus;
}

/// Heartbeat for runs without a process-control supervisor.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHeartbeat;

impl Heartbeat for NoHeartbeat {
    fn ping(&mut self, _interval_hint: Duration) -> HeartbeatStatus {
        HeartbeatStatus::Continue
    }
}

/// Cloneable process-wide shutdown request.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the engine to flush and stop.
    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Elapsed,
    Cancelled,
    Aborted(HeartbeatStatus),
}

/// Deadline plus chunk period.
#[derive(Debug, Clone, Copy)]
pub struct CancellableTimer {
    deadline: Instant,
    chunk: Duration,
}

impl CancellableTimer {
    /// Timer expiring `duration` from now.
    pub fn after(duration: Duration, chunk: Duration) -> Self {
        Self::until(Instant::now() + duration, chunk)
    }

    /// Timer expiring at `deadline`.
    pub fn until(deadline: Instant, chunk: Duration) -> Self {
        Self {
            deadline,
            chunk: chunk.max(MIN_CHUNK),
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Sleep until the deadline, a shutdown request, or a heartbeat abort.
    pub fn wait(&self, shutdown: &ShutdownHandle, heartbeat: &mut dyn Heartbeat) -> WaitOutcome {
        loop {
            if shutdown.is_requested() {
                return WaitOutcome::Cancelled;
            }
            let remaining = self.remaining();
            if remaining.is_zero() {
                return WaitOutcome::Elapsed;
            }

            thread::sleep(remaining.min(self.chunk));

            match heartbeat.ping(self.chunk) {
                HeartbeatStatus::Continue => {}
                status => return WaitOutcome::Aborted(status),
            }
        }
    }
}
