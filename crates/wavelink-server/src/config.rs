//! Server configuration surface
//!
//! Covers only what the transport core consumes: listening address, optional
//! TLS material, rate-limit ceiling and handshake timing. Business
//! configuration lives with the embedding application.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use wavelink_core::RateLimitConfig;

// ----------------------------------------------------------------------------
// TLS Material Paths
// ----------------------------------------------------------------------------

/// PEM file locations for the optional TLS listener
#[derive(Debug, Clone)]
pub struct TlsPaths {
    /// Server certificate (leaf)
    pub cert: PathBuf,
    /// Server private key
    pub key: PathBuf,
    /// Optional intermediate chain, appended after the leaf
    pub chain: Option<PathBuf>,
}

// ----------------------------------------------------------------------------
// Server Configuration
// ----------------------------------------------------------------------------

/// Configuration for a Wavelink server instance
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listening address
    pub bind_addr: SocketAddr,
    /// TLS material; plaintext transport when absent (local/diagnostic use)
    pub tls: Option<TlsPaths>,
    /// Per-connection rate limiting
    pub rate_limit: RateLimitConfig,
    /// Bound on how long a connection may sit mid-handshake
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([127, 0, 0, 1], 9230).into(),
            tls: None,
            rate_limit: RateLimitConfig::default(),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Bind to an ephemeral local port; used by tests
    pub fn ephemeral() -> Self {
        Self {
            bind_addr: ([127, 0, 0, 1], 0).into(),
            ..Self::default()
        }
    }
}
