//! Wavelink Core Protocol Implementation
//!
//! This crate provides the codec, envelope format, session cryptography and
//! request correlation used by the Wavelink session transport. It performs no
//! socket I/O of its own; the server and client crates drive these state
//! machines against a live connection.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod codec;
pub mod config;
pub mod correlate;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod session;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use codec::Value;
pub use config::{ProtocolConfig, RateLimitConfig};
pub use correlate::{CorrelationId, ReplyOutcome, RequestCorrelator};
pub use crypto::{ExchangeKeyPair, SessionCipher};
pub use error::{Result, WavelinkError};
pub use frame::{Frame, HandshakeMessage, ReplyError};
pub use session::{HandshakeState, SessionCrypto};

/// Close code sent when a connection is dropped for exceeding the rate ceiling.
pub const CLOSE_RATE_LIMITED: u16 = 4429;
