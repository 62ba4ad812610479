//! Per-connection session crypto context and handshake state machine
//!
//! [`SessionCrypto`] owns the local exchange keypair, the remote public key
//! and the derived symmetric session key for one connection. It is sans-IO:
//! the server and client crates feed it received frames and transmit whatever
//! it returns.
//!
//! Wire sequence:
//!
//! 1. client -> server, text: `{ "type": "key_exchange", "key": <b64> }`
//! 2. server -> client, text: `{ "type": "key_exchange", "key": <b64> }`
//! 3. server -> client, binary: session key sealed under the client key
//! 4. client -> server, binary: the same key echoed, sealed under the
//!    server key (the symmetric-key ack)
//!
//! Failures at any stage are fatal for the connection; a fresh connection is
//! the only retry path.

use crate::crypto::{self, ExchangeKeyPair, SessionCipher};
use crate::frame::{self, Frame, HandshakeMessage};
use crate::{codec, Result, WavelinkError};

// ----------------------------------------------------------------------------
// Handshake State
// ----------------------------------------------------------------------------

/// Handshake progress for one connection. Transitions are one-directional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Waiting for the peer's public key
    AwaitingRemoteKey,
    /// Key material is in flight; waiting for the sealed key or its ack
    AwaitingSymmetricKeyAck,
    /// Session key established on both ends
    Ready,
}

impl HandshakeState {
    fn name(self) -> &'static str {
        match self {
            HandshakeState::AwaitingRemoteKey => "awaiting_remote_key",
            HandshakeState::AwaitingSymmetricKeyAck => "awaiting_symmetric_key_ack",
            HandshakeState::Ready => "ready",
        }
    }
}

// ----------------------------------------------------------------------------
// Session Crypto Context
// ----------------------------------------------------------------------------

/// Per-connection crypto context composing the exchange keypair, the remote
/// public key and the symmetric session cipher.
#[derive(Debug)]
pub struct SessionCrypto {
    keypair: ExchangeKeyPair,
    remote_public: Option<[u8; 32]>,
    session_key: Option<[u8; 32]>,
    state: HandshakeState,
}

impl SessionCrypto {
    /// Create a fresh context with a new keypair.
    ///
    /// Key generation failure aborts the connection.
    pub fn new() -> Result<Self> {
        let keypair =
            ExchangeKeyPair::generate().map_err(|e| WavelinkError::handshake(e.to_string()))?;
        Ok(Self {
            keypair,
            remote_public: None,
            session_key: None,
            state: HandshakeState::AwaitingRemoteKey,
        })
    }

    /// Current handshake state
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Whether application frames may be encrypted/decrypted
    pub fn is_ready(&self) -> bool {
        self.state == HandshakeState::Ready
    }

    /// The outbound `key_exchange` control message for this side
    pub fn local_key_exchange(&self) -> HandshakeMessage {
        HandshakeMessage::KeyExchange {
            key: self.keypair.export_public_key(),
        }
    }

    /// Import the peer's public key from its `key_exchange` message.
    ///
    /// Learned once; a second key for the same connection is a handshake
    /// violation.
    pub fn learn_remote_key(&mut self, exported: &str) -> Result<()> {
        if self.remote_public.is_some() {
            return Err(WavelinkError::handshake("remote key already established"));
        }
        let key = crypto::import_public_key(exported)
            .map_err(|e| WavelinkError::handshake(e.to_string()))?;
        self.remote_public = Some(key);
        Ok(())
    }

    fn remote_public(&self) -> Result<&[u8; 32]> {
        self.remote_public
            .as_ref()
            .ok_or_else(|| WavelinkError::handshake("remote key not yet learned"))
    }

    fn expect_state(&self, expected: HandshakeState) -> Result<()> {
        if self.state != expected {
            return Err(WavelinkError::invalid_state(
                expected.name(),
                self.state.name(),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Server side
    // ------------------------------------------------------------------

    /// Generate the session key and seal it under the client's public key.
    ///
    /// Server side, after the client's key is learned. Returns the sealed
    /// blob to transmit as a binary frame.
    pub fn issue_session_key(&mut self) -> Result<Vec<u8>> {
        self.expect_state(HandshakeState::AwaitingRemoteKey)?;

        let key = SessionCipher::generate_key()
            .map_err(|e| WavelinkError::handshake(e.to_string()))?;
        let offer = frame::encode_key_offer(&key)?;
        let sealed = crypto::seal(self.remote_public()?, &offer)
            .map_err(|e| WavelinkError::handshake(e.to_string()))?;

        self.session_key = Some(key);
        self.state = HandshakeState::AwaitingSymmetricKeyAck;
        Ok(sealed)
    }

    /// Accept the client's sealed ack and verify it echoes the issued key.
    ///
    /// Server side; completes the handshake.
    pub fn accept_key_ack(&mut self, blob: &[u8]) -> Result<()> {
        self.expect_state(HandshakeState::AwaitingSymmetricKeyAck)?;

        let plaintext = crypto::open(&self.keypair, blob)
            .map_err(|e| WavelinkError::handshake(e.to_string()))?;
        let echoed = frame::decode_key_offer(&plaintext)?;

        match self.session_key {
            Some(issued) if issued == echoed => {
                self.state = HandshakeState::Ready;
                tracing::debug!("session key acknowledged, channel ready");
                Ok(())
            }
            _ => Err(WavelinkError::handshake("key ack does not match issued key")),
        }
    }

    // ------------------------------------------------------------------
    // Client side
    // ------------------------------------------------------------------

    /// Note that the sealed session key is now expected.
    ///
    /// Client side, after the server's `key_exchange` is learned.
    pub fn await_session_key(&mut self) -> Result<()> {
        self.expect_state(HandshakeState::AwaitingRemoteKey)?;
        self.remote_public()?;
        self.state = HandshakeState::AwaitingSymmetricKeyAck;
        Ok(())
    }

    /// Unwrap the server's sealed session key and build the ack.
    ///
    /// Client side; completes the handshake and returns the sealed ack to
    /// transmit. The caller then emits its socket-ready signal.
    pub fn accept_session_key(&mut self, blob: &[u8]) -> Result<Vec<u8>> {
        self.expect_state(HandshakeState::AwaitingSymmetricKeyAck)?;

        let plaintext = crypto::open(&self.keypair, blob)
            .map_err(|e| WavelinkError::handshake(e.to_string()))?;
        let key = frame::decode_key_offer(&plaintext)?;

        let offer = frame::encode_key_offer(&key)?;
        let ack = crypto::seal(self.remote_public()?, &offer)
            .map_err(|e| WavelinkError::handshake(e.to_string()))?;

        self.session_key = Some(key);
        self.state = HandshakeState::Ready;
        tracing::debug!("session key accepted, channel ready");
        Ok(ack)
    }

    // ------------------------------------------------------------------
    // Post-handshake framing
    // ------------------------------------------------------------------

    /// The session cipher, available once Ready
    pub fn cipher(&self) -> Result<SessionCipher> {
        match (self.state, self.session_key) {
            (HandshakeState::Ready, Some(key)) => Ok(SessionCipher::new(key)),
            _ => Err(WavelinkError::invalid_state(
                HandshakeState::Ready.name(),
                self.state.name(),
            )),
        }
    }

    /// Encode and encrypt a frame. Rejected before Ready.
    pub fn encrypt_frame(&self, frame: &Frame) -> Result<Vec<u8>> {
        let encoded = codec::encode(frame)?;
        self.cipher()?.encrypt(&encoded)
    }

    /// Decrypt and decode a frame. Rejected before Ready.
    pub fn decrypt_frame(&self, data: &[u8]) -> Result<Frame> {
        let plaintext = self.cipher()?.decrypt(data)?;
        codec::decode(&plaintext)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
