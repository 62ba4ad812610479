//! Error types for the Wavelink protocol
//!
//! This module contains the unified error type used throughout the core,
//! mirroring the transport's error taxonomy: handshake failures are fatal for
//! a connection, frame-level decode/decrypt failures are droppable noise, and
//! routing/authorization failures are surfaced as structured replies rather
//! than errors.

// ----------------------------------------------------------------------------
// Core Error Type
// ----------------------------------------------------------------------------

/// Core error types for the Wavelink protocol
#[derive(Debug, thiserror::Error)]
pub enum WavelinkError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Session state invalid: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Rate limited: {count} messages in current window (ceiling {ceiling})")]
    RateLimited { count: u32, ceiling: u32 },
}

impl WavelinkError {
    /// Create a cryptographic error with a message
    pub fn crypto<T: Into<String>>(message: T) -> Self {
        WavelinkError::Crypto(message.into())
    }

    /// Create a handshake failure. Fatal for the connection; only a fresh
    /// connection may retry.
    pub fn handshake<T: Into<String>>(message: T) -> Self {
        WavelinkError::Handshake(message.into())
    }

    /// Create an invalid frame error with a message
    pub fn invalid_frame<T: Into<String>>(message: T) -> Self {
        WavelinkError::InvalidFrame(message.into())
    }

    /// Create a session state error
    pub fn invalid_state<E: Into<String>, A: Into<String>>(expected: E, actual: A) -> Self {
        WavelinkError::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, WavelinkError>;
