//! Heartbeat liveness tracking
//!
//! Lock-free: the receive task records pongs while status readers poll the
//! age from other tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Tracks the time since the last heartbeat reply
///
/// Timestamps are milliseconds relative to a monotonic start instant.
pub struct Heartbeat {
    start_instant: Instant,
    /// Last pong (or connect time when no pong arrived yet)
    last_pong_ms: AtomicU64,
    timeout: Duration,
}

impl Heartbeat {
    pub fn new(timeout: Duration) -> Self {
        Self {
            start_instant: Instant::now(),
            last_pong_ms: AtomicU64::new(0),
            timeout,
        }
    }

    fn current_time_ms(&self) -> u64 {
        self.start_instant.elapsed().as_millis() as u64
    }

    /// Restart the liveness window, called when a connection is established
    pub fn reset(&self) {
        self.last_pong_ms
            .store(self.current_time_ms(), Ordering::Relaxed);
    }

    pub fn record_pong(&self) {
        self.last_pong_ms
            .fetch_max(self.current_time_ms(), Ordering::Relaxed);
    }

    /// Time since the last pong (or since the last reset)
    pub fn ping_age(&self) -> Duration {
        let last = self.last_pong_ms.load(Ordering::Relaxed);
        Duration::from_millis(self.current_time_ms().saturating_sub(last))
    }

    pub fn is_alive(&self) -> bool {
        self.ping_age() <= self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_alive_until_timeout() {
        let heartbeat = Heartbeat::new(Duration::from_millis(50));
        heartbeat.reset();
        assert!(heartbeat.is_alive());

        thread::sleep(Duration::from_millis(80));
        assert!(!heartbeat.is_alive());

        heartbeat.record_pong();
        assert!(heartbeat.is_alive());
        assert!(heartbeat.ping_age() < Duration::from_millis(50));
    }
}
