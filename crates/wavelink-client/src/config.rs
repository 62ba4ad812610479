//! Client configuration surface

use std::time::Duration;

use wavelink_core::ProtocolConfig;

// ----------------------------------------------------------------------------
// Client Configuration
// ----------------------------------------------------------------------------

/// Configuration for a Wavelink client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server endpoints, tried round-robin; e.g. `ws://host:port/ws`
    pub endpoints: Vec<String>,
    /// Fixed delay between reconnection attempts
    pub backoff: Duration,
    /// Bound on dialing one endpoint before moving to the next
    pub connect_timeout: Duration,
    /// Bound on how long a request waits for its reply once transmitted
    pub request_timeout: Duration,
    /// Bound on how long a connection may sit mid-handshake
    pub handshake_timeout: Duration,
}

impl ClientConfig {
    /// Configuration for a single endpoint with protocol-default timing
    pub fn new<E: Into<String>>(endpoint: E) -> Self {
        Self::with_endpoints(vec![endpoint.into()])
    }

    /// Configuration for a failover endpoint list
    pub fn with_endpoints(endpoints: Vec<String>) -> Self {
        let timing = ProtocolConfig::default();
        Self {
            endpoints,
            backoff: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            request_timeout: timing.request_timeout,
            handshake_timeout: timing.handshake_timeout,
        }
    }
}
