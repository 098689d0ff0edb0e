//! [`LoopWatchdog`] – stall detector for the background service loop.
//!
//! The service loop calls [`LoopWatchdog::beat`] once per tick from its own
//! thread; a supervisor on another thread polls
//! [`LoopWatchdog::is_stalled`].  The heartbeat is a single atomic so neither
//! side ever takes a lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Heartbeat shared between the service loop and its supervisor.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use agv_kernel::watchdog::LoopWatchdog;
///
/// let wd = LoopWatchdog::new(Duration::from_secs(1));
/// wd.beat();
/// assert!(!wd.is_stalled());
/// ```
#[derive(Debug)]
pub struct LoopWatchdog {
    origin: Instant,
    /// Milliseconds since `origin` at the last heartbeat.
    last_beat_ms: AtomicU64,
    timeout: Duration,
}

impl LoopWatchdog {
    /// Create a watchdog whose deadline starts now.
    pub fn new(timeout: Duration) -> Self {
        Self {
            origin: Instant::now(),
            last_beat_ms: AtomicU64::new(0),
            timeout,
        }
    }

    /// Record a heartbeat.
    pub fn beat(&self) {
        let now = elapsed_ms(self.origin);
        self.last_beat_ms.store(now, Ordering::Release);
    }

    /// Time since the last heartbeat.
    pub fn since_last_beat(&self) -> Duration {
        let last = self.last_beat_ms.load(Ordering::Acquire);
        Duration::from_millis(elapsed_ms(self.origin).saturating_sub(last))
    }

    /// `true` once no heartbeat has arrived for longer than the timeout.
    pub fn is_stalled(&self) -> bool {
        self.since_last_beat() > self.timeout
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn elapsed_ms(origin: Instant) -> u64 {
    u64::try_from(origin.elapsed().as_millis()).unwrap_or(u64::MAX)
}
