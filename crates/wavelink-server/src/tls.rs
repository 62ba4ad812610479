//! Optional TLS listener configuration
//!
//! Builds a rustls acceptor from the PEM paths in [`TlsPaths`]. Plaintext
//! transport stays supported; TLS is engaged only when certificate material
//! is configured.

use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

use crate::config::TlsPaths;
use crate::error::{Result, ServerError};

// ----------------------------------------------------------------------------
// Acceptor Construction
// ----------------------------------------------------------------------------

/// Build a TLS acceptor from PEM files on disk
pub fn build_acceptor(paths: &TlsPaths) -> Result<TlsAcceptor> {
    // The ring provider is the only one compiled in; installing it twice is
    // harmless.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cert_pem = std::fs::read(&paths.cert)?;
    let mut certs = parse_certificates(&cert_pem)?;
    if certs.is_empty() {
        return Err(ServerError::TlsConfig(format!(
            "no certificates found in {}",
            paths.cert.display()
        )));
    }

    if let Some(chain_path) = &paths.chain {
        let chain_pem = std::fs::read(chain_path)?;
        certs.extend(parse_certificates(&chain_pem)?);
    }

    let key_pem = std::fs::read(&paths.key)?;
    let key = parse_private_key(&key_pem)?;

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::TlsConfig(format!("server config error: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Parse PEM-encoded certificates
fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    CertificateDer::pem_slice_iter(pem)
        .collect::<core::result::Result<Vec<_>, _>>()
        .map_err(|e| ServerError::TlsConfig(format!("failed to parse certificates: {e}")))
}

/// Parse a PEM-encoded private key
fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    PrivateKeyDer::from_pem_slice(pem)
        .map_err(|e| ServerError::TlsConfig(format!("failed to parse private key: {e}")))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_pem_is_rejected() {
        assert!(parse_certificates(b"not a certificate").unwrap_or_default().is_empty());
        assert!(parse_private_key(b"not a key").is_err());
    }
}
