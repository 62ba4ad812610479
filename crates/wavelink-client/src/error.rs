//! Client error types

use wavelink_core::WavelinkError;

// ----------------------------------------------------------------------------
// Client Error Type
// ----------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] WavelinkError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("No endpoints configured")]
    NoEndpoints,

    #[error("Client is shut down")]
    Closed,
}

pub type Result<T> = core::result::Result<T, ClientError>;
