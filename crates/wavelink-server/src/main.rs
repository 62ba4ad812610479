//! Wavelink server binary
//!
//! Standalone entrypoint wiring CLI flags into a [`ServerConfig`] and
//! registering a minimal diagnostic route set. Real deployments embed the
//! server crate and register their own handlers.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wavelink_core::{RateLimitConfig, Value};
use wavelink_server::{
    ActionOutcome, FnHandler, Router, Server, ServerConfig, TlsPaths,
};

#[derive(Parser, Debug)]
#[command(name = "wavelink-server", about = "Encrypted real-time session transport server")]
struct Args {
    /// Listening address
    #[arg(long, env = "WAVELINK_BIND", default_value = "127.0.0.1:9230")]
    bind: SocketAddr,

    /// TLS certificate (PEM); plaintext transport when omitted
    #[arg(long, env = "WAVELINK_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(long, env = "WAVELINK_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Optional intermediate certificate chain (PEM)
    #[arg(long, env = "WAVELINK_TLS_CHAIN")]
    tls_chain: Option<PathBuf>,

    /// Per-connection message ceiling per rate-limit window
    #[arg(long, env = "WAVELINK_RATE_CEILING", default_value_t = 50)]
    rate_ceiling: u32,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let tls = match (self.tls_cert, self.tls_key) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert,
                key,
                chain: self.tls_chain,
            }),
            _ => None,
        };
        ServerConfig {
            bind_addr: self.bind,
            tls,
            rate_limit: RateLimitConfig {
                ceiling: self.rate_ceiling,
                ..RateLimitConfig::default()
            },
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Args::parse().into_config();
    wavelink_server::server::validate_config(&config).context("invalid configuration")?;

    let router = Router::builder()
        .route(
            "system/diagnostics/ping",
            FnHandler(|_identity, _payload| async {
                Ok(ActionOutcome::reply(Value::map([(
                    "pong",
                    Value::Bool(true),
                )])))
            }),
        )
        .build();

    let server = Server::start(config, router)
        .await
        .context("failed to start server")?;
    tracing::info!(addr = %server.local_addr(), "serving until interrupted");

    tokio::signal::ctrl_c().await.context("signal handling")?;
    tracing::info!("shutting down");
    server.shutdown();
    Ok(())
}
