//! Listener and accept loop
//!
//! Binds a TCP listener (optionally wrapped in TLS), upgrades each inbound
//! connection to WebSocket, and selects the wire mode from the request path:
//! `/ws` for the encrypted transport, `/diag` for the plaintext diagnostic
//! endpoint. Anything else is refused at upgrade time.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::connection::{self, ConnectionContext, ConnectionMode, ConnectionTable};
use crate::error::{Result, ServerError};
use crate::rate_limiter::RateLimiter;
use crate::registry::SessionRegistry;
use crate::router::Router;
use crate::tls;

// ----------------------------------------------------------------------------
// Server
// ----------------------------------------------------------------------------

/// A running Wavelink server
pub struct Server {
    local_addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    connections: Arc<ConnectionTable>,
    accept_task: JoinHandle<()>,
    sweeper_task: JoinHandle<()>,
}

impl Server {
    /// Bind the listener and start accepting connections
    pub async fn start(config: ServerConfig, router: Router) -> Result<Self> {
        let acceptor = match &config.tls {
            Some(paths) => Some(tls::build_acceptor(paths)?),
            None => None,
        };

        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            tls = acceptor.is_some(),
            "wavelink server listening"
        );

        let router = Arc::new(router);
        let registry = Arc::new(SessionRegistry::new());
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let connections = Arc::new(ConnectionTable::new());
        let sweeper_task = RateLimiter::spawn_sweeper(Arc::clone(&limiter));

        let shared = SharedState {
            router,
            registry: Arc::clone(&registry),
            limiter,
            connections: Arc::clone(&connections),
            handshake_timeout: config.handshake_timeout,
        };
        let accept_task = tokio::spawn(accept_loop(listener, acceptor, shared));

        Ok(Self {
            local_addr,
            registry,
            connections,
            accept_task,
            sweeper_task,
        })
    }

    /// Address the listener actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Session registry, for pushing unsolicited frames to identities
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Stop accepting, close every live connection and drop all sessions
    pub fn shutdown(&self) {
        self.accept_task.abort();
        self.sweeper_task.abort();
        self.connections.close_all("server shutting down");
        self.registry.clear();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ----------------------------------------------------------------------------
// Accept Loop
// ----------------------------------------------------------------------------

struct SharedState {
    router: Arc<Router>,
    registry: Arc<SessionRegistry>,
    limiter: Arc<RateLimiter>,
    connections: Arc<ConnectionTable>,
    handshake_timeout: std::time::Duration,
}

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

async fn accept_loop(listener: TcpListener, acceptor: Option<TlsAcceptor>, shared: SharedState) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "accept failed");
                continue;
            }
        };

        let conn_id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
        let ctx = ConnectionContext {
            conn_id,
            // Mode is filled in once the upgrade request is seen.
            mode: ConnectionMode::Encrypted,
            router: Arc::clone(&shared.router),
            registry: Arc::clone(&shared.registry),
            limiter: Arc::clone(&shared.limiter),
            connections: Arc::clone(&shared.connections),
            handshake_timeout: shared.handshake_timeout,
        };
        let acceptor = acceptor.clone();

        tokio::spawn(async move {
            info!(conn_id, %peer, "inbound connection");
            match acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => upgrade_and_run(ctx, tls_stream).await,
                    Err(e) => warn!(conn_id, error = %e, "tls accept failed"),
                },
                None => upgrade_and_run(ctx, stream).await,
            }
        });
    }
}

async fn upgrade_and_run<S>(mut ctx: ConnectionContext, stream: S)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut mode = None;
    let callback = |req: &Request, resp: Response| -> core::result::Result<Response, ErrorResponse> {
        mode = match req.uri().path() {
            "/ws" => Some(ConnectionMode::Encrypted),
            "/diag" => Some(ConnectionMode::Diagnostic),
            other => {
                let mut refusal = ErrorResponse::new(Some(format!("no such endpoint: {other}")));
                *refusal.status_mut() = tokio_tungstenite::tungstenite::http::StatusCode::NOT_FOUND;
                return Err(refusal);
            }
        };
        Ok(resp)
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(conn_id = ctx.conn_id, error = %e, "websocket upgrade failed");
            return;
        }
    };

    // The callback ran exactly once on success.
    let Some(mode) = mode else {
        warn!(conn_id = ctx.conn_id, "upgrade completed without a path");
        return;
    };
    ctx.mode = mode;
    connection::run(ctx, ws).await;
}

// ----------------------------------------------------------------------------
// Errors surfaced to embedders
// ----------------------------------------------------------------------------

/// Validate a configuration before start, for friendlier CLI errors
pub fn validate_config(config: &ServerConfig) -> Result<()> {
    if let Some(paths) = &config.tls {
        if !paths.cert.exists() {
            return Err(ServerError::Configuration(format!(
                "certificate file not found: {}",
                paths.cert.display()
            )));
        }
        if !paths.key.exists() {
            return Err(ServerError::Configuration(format!(
                "private key file not found: {}",
                paths.key.display()
            )));
        }
    }
    if config.rate_limit.ceiling == 0 {
        return Err(ServerError::Configuration(
            "rate limit ceiling must be positive".into(),
        ));
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsPaths;
    use wavelink_core::RateLimitConfig;

    #[test]
    fn test_validate_rejects_missing_tls_material() {
        let config = ServerConfig {
            tls: Some(TlsPaths {
                cert: "/nonexistent/cert.pem".into(),
                key: "/nonexistent/key.pem".into(),
                chain: None,
            }),
            ..ServerConfig::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_ceiling() {
        let config = ServerConfig {
            rate_limit: RateLimitConfig {
                ceiling: 0,
                ..RateLimitConfig::default()
            },
            ..ServerConfig::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_shutdown_clears_sessions() {
        use crate::router::AuthenticatedIdentity;

        let server = Server::start(ServerConfig::ephemeral(), Router::builder().build())
            .await
            .unwrap();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        server
            .registry()
            .bind(AuthenticatedIdentity::new("alice"), 1, tx);
        assert_eq!(server.registry().len(), 1);

        server.shutdown();
        assert!(server.registry().is_empty());
    }

    #[tokio::test]
    async fn test_server_binds_ephemeral_port() {
        let server = Server::start(ServerConfig::ephemeral(), Router::builder().build())
            .await
            .unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert_eq!(server.connection_count(), 0);
        server.shutdown();
    }
}
