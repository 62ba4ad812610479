//! Centralized protocol configuration defaults
//!
//! Shared timing and limit defaults consumed by both the server and the
//! client crates. Deployment-specific surfaces (bind address, TLS paths,
//! endpoint lists) live with the crate that owns them.

use std::time::Duration;

// ----------------------------------------------------------------------------
// Protocol Timing
// ----------------------------------------------------------------------------

/// Core timing defaults
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Bound on how long a caller waits for a correlated reply
    pub request_timeout: Duration,
    /// Bound on how long a connection may sit mid-handshake
    pub handshake_timeout: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

// ----------------------------------------------------------------------------
// Rate Limiting Configuration
// ----------------------------------------------------------------------------

/// Configuration for the per-connection rate limiter
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum messages per connection per window; exceeding it closes the
    /// connection
    pub ceiling: u32,
    /// Window between counter sweeps
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            ceiling: 50,
            window: Duration::from_secs(1),
        }
    }
}

impl RateLimitConfig {
    /// Permissive limits for tests that send bursts
    pub fn permissive() -> Self {
        Self {
            ceiling: 10_000,
            window: Duration::from_secs(1),
        }
    }
}
