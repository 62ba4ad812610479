//! Per-connection rate limiting
//!
//! Each connection carries a monotonically incrementing counter; a single
//! shared sweep task resets every counter on a fixed cadence, so there are no
//! per-connection timers. Exceeding the ceiling within a window is a hard
//! cutoff: the connection is closed with the distinguished close code and its
//! remaining frames are dropped by disconnection, not buffered.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;

use wavelink_core::{RateLimitConfig, Result, WavelinkError};

// ----------------------------------------------------------------------------
// Rate Limiter
// ----------------------------------------------------------------------------

/// Shared rate limiter tracking one counter per live connection
pub struct RateLimiter {
    config: RateLimitConfig,
    counters: DashMap<u64, Arc<AtomicU32>>,
}

impl RateLimiter {
    /// Create a rate limiter with the given configuration
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            counters: DashMap::new(),
        }
    }

    /// Register a counter for a newly accepted connection
    pub fn register(&self, conn_id: u64) {
        self.counters
            .insert(conn_id, Arc::new(AtomicU32::new(0)));
    }

    /// Drop the counter when its connection closes
    pub fn deregister(&self, conn_id: u64) {
        self.counters.remove(&conn_id);
    }

    /// Record one inbound message for a connection.
    ///
    /// Errs once the count within the current window exceeds the ceiling;
    /// the caller must close the connection and stop processing its frames.
    pub fn record(&self, conn_id: u64) -> Result<()> {
        let counter = match self.counters.get(&conn_id) {
            Some(entry) => Arc::clone(entry.value()),
            // Unregistered connections are already on their way out.
            None => return Ok(()),
        };

        let count = counter.fetch_add(1, Ordering::Relaxed) + 1;
        if count > self.config.ceiling {
            return Err(WavelinkError::RateLimited {
                count,
                ceiling: self.config.ceiling,
            });
        }
        Ok(())
    }

    /// Reset every counter; called by the shared sweep
    pub fn sweep(&self) {
        for entry in self.counters.iter() {
            entry.value().store(0, Ordering::Relaxed);
        }
    }

    /// Number of tracked connections
    pub fn tracked_connections(&self) -> usize {
        self.counters.len()
    }

    /// Spawn the single shared sweep task for this limiter
    pub fn spawn_sweeper(limiter: Arc<Self>) -> JoinHandle<()> {
        let window = limiter.config.window;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(window);
            // The first tick fires immediately; skip it.
            interval.tick().await;
            loop {
                interval.tick().await;
                limiter.sweep();
            }
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limiter(ceiling: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            ceiling,
            window: Duration::from_secs(1),
        })
    }

    #[test]
    fn test_allows_up_to_ceiling() {
        let limiter = limiter(50);
        limiter.register(1);

        for _ in 0..50 {
            assert!(limiter.record(1).is_ok());
        }
        assert!(limiter.record(1).is_err());
    }

    #[test]
    fn test_sweep_opens_a_fresh_window() {
        let limiter = limiter(2);
        limiter.register(1);

        assert!(limiter.record(1).is_ok());
        assert!(limiter.record(1).is_ok());
        assert!(limiter.record(1).is_err());

        limiter.sweep();
        assert!(limiter.record(1).is_ok());
    }

    #[test]
    fn test_counters_are_per_connection() {
        let limiter = limiter(1);
        limiter.register(1);
        limiter.register(2);

        assert!(limiter.record(1).is_ok());
        assert!(limiter.record(1).is_err());
        // Connection 2 has its own window.
        assert!(limiter.record(2).is_ok());
    }

    #[test]
    fn test_deregister_removes_counter() {
        let limiter = limiter(1);
        limiter.register(1);
        assert_eq!(limiter.tracked_connections(), 1);

        limiter.deregister(1);
        assert_eq!(limiter.tracked_connections(), 0);
        // Recording for an unknown connection is a no-op.
        assert!(limiter.record(1).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_resets_on_cadence() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            ceiling: 1,
            window: Duration::from_millis(100),
        }));
        limiter.register(1);
        let sweeper = RateLimiter::spawn_sweeper(Arc::clone(&limiter));

        assert!(limiter.record(1).is_ok());
        assert!(limiter.record(1).is_err());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(limiter.record(1).is_ok());

        sweeper.abort();
    }
}
