//! Server error types
//!
//! Distinguishes connection-fatal conditions (handshake failure, rate-limit
//! violation, socket faults) from per-frame noise that is logged and dropped.
//! Routing and authorization failures never appear here; they are structured
//! replies, not errors.

use wavelink_core::WavelinkError;

// ----------------------------------------------------------------------------
// Server Error Type
// ----------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] WavelinkError),

    #[error("Network I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Connection closed during handshake")]
    HandshakeClosed,
}

impl ServerError {
    /// Whether this error represents a rate-limit violation, which closes
    /// the connection with the distinguished close code.
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            ServerError::Protocol(WavelinkError::RateLimited { .. })
        )
    }
}

pub type Result<T> = core::result::Result<T, ServerError>;
