//! Wavelink server: encrypted real-time session transport
//!
//! Accepts WebSocket connections, runs the key-exchange handshake, then
//! routes encrypted action frames through a static route table with
//! authentication and permission preconditions. A plaintext diagnostic
//! endpoint shares the same router. Embedders register handlers via
//! [`Router::builder`] and start a [`Server`].

pub mod config;
pub mod connection;
pub mod error;
pub mod rate_limiter;
pub mod registry;
pub mod router;
pub mod server;
pub mod tls;

pub use config::{ServerConfig, TlsPaths};
pub use connection::ConnectionMode;
pub use error::{Result, ServerError};
pub use rate_limiter::RateLimiter;
pub use registry::{PushError, SessionRegistry};
pub use router::{
    ActionHandler, ActionOutcome, AuthenticatedIdentity, DomainError, FnHandler, Router,
    RouterBuilder, SessionChange,
};
pub use server::Server;
