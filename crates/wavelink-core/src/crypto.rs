//! Cryptographic primitives for the Wavelink handshake and session cipher
//!
//! The handshake bootstraps a symmetric session key over an asymmetric
//! channel: each side holds a fresh X25519 exchange keypair, public halves
//! travel as base64 text, and the session key is transported inside a sealed
//! box (ephemeral X25519 + SHA-256 key derivation + AES-256-GCM). Once both
//! sides hold the key, every frame is encrypted by [`SessionCipher`].

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand_core::{CryptoRng, OsRng, RngCore};
use sha2::{Digest, Sha256};
use x25519_dalek::{x25519, X25519_BASEPOINT_BYTES};

use crate::{Result, WavelinkError};

/// Nonce size for AES-GCM (96 bits)
const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size
const TAG_SIZE: usize = 16;

// ----------------------------------------------------------------------------
// Exchange Key Pair (X25519)
// ----------------------------------------------------------------------------

/// X25519 key pair for the session-key exchange.
///
/// Generated fresh per connection, never persisted or reused.
#[derive(Debug)]
pub struct ExchangeKeyPair {
    private_key: [u8; 32],
    public_key: [u8; 32],
}

impl ExchangeKeyPair {
    /// Generate a new random exchange key pair
    pub fn generate() -> Result<Self> {
        Self::generate_with_rng(&mut OsRng)
    }

    /// Generate a new exchange key pair with custom RNG
    pub fn generate_with_rng<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self> {
        let mut private_key = [0u8; 32];
        rng.try_fill_bytes(&mut private_key)
            .map_err(|_| WavelinkError::crypto("random generation failed"))?;

        let public_key = x25519(private_key, X25519_BASEPOINT_BYTES);
        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// Get the public key bytes
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.public_key
    }

    /// Export the public key in transportable text form
    pub fn export_public_key(&self) -> String {
        BASE64.encode(self.public_key)
    }
}

/// Import a peer public key from its transportable text form
pub fn import_public_key(text: &str) -> Result<[u8; 32]> {
    let bytes = BASE64
        .decode(text.trim())
        .map_err(|_| WavelinkError::crypto("public key is not valid base64"))?;

    let mut key = [0u8; 32];
    if bytes.len() != key.len() {
        return Err(WavelinkError::crypto("public key has wrong length"));
    }
    key.copy_from_slice(&bytes);
    Ok(key)
}

// ----------------------------------------------------------------------------
// Sealed Box (asymmetric key wrap)
// ----------------------------------------------------------------------------

/// Derive the wrapping key for a sealed box from the DH shared secret and
/// both public halves.
fn wrap_key(shared: &[u8; 32], ephemeral_pub: &[u8; 32], recipient_pub: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(shared);
    hasher.update(ephemeral_pub);
    hasher.update(recipient_pub);
    let digest = hasher.finalize();

    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

/// Encrypt a payload so only the holder of `recipient_pub`'s private key can
/// read it. Output layout: `ephemeral_pub(32) || nonce(12) || ciphertext`.
pub fn seal(recipient_pub: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let ephemeral = ExchangeKeyPair::generate()?;
    let shared = x25519(ephemeral.private_key, *recipient_pub);
    if shared == [0u8; 32] {
        return Err(WavelinkError::crypto("degenerate shared secret"));
    }

    let key = wrap_key(&shared, &ephemeral.public_key, recipient_pub);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|_| WavelinkError::crypto("invalid wrapping key length"))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng
        .try_fill_bytes(&mut nonce_bytes)
        .map_err(|_| WavelinkError::crypto("random generation failed"))?;

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| WavelinkError::crypto("seal encryption failed"))?;

    let mut out = Vec::with_capacity(32 + NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&ephemeral.public_key);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a sealed box with the recipient's key pair
pub fn open(recipient: &ExchangeKeyPair, blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < 32 + NONCE_SIZE + TAG_SIZE {
        return Err(WavelinkError::crypto("sealed box too short"));
    }

    let mut ephemeral_pub = [0u8; 32];
    ephemeral_pub.copy_from_slice(&blob[..32]);
    let nonce = &blob[32..32 + NONCE_SIZE];
    let ciphertext = &blob[32 + NONCE_SIZE..];

    let shared = x25519(recipient.private_key, ephemeral_pub);
    if shared == [0u8; 32] {
        return Err(WavelinkError::crypto("degenerate shared secret"));
    }

    let key = wrap_key(&shared, &ephemeral_pub, &recipient.public_key);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|_| WavelinkError::crypto("invalid wrapping key length"))?;

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| WavelinkError::crypto("seal decryption failed"))
}

// ----------------------------------------------------------------------------
// Session Cipher (AES-256-GCM)
// ----------------------------------------------------------------------------

/// Authenticated symmetric cipher for post-handshake frames.
///
/// Holds only the 32-byte session key; cheap to clone so reader and writer
/// halves of a connection can each keep one. Output layout per message:
/// `nonce(12) || ciphertext`.
#[derive(Clone)]
pub struct SessionCipher {
    key: [u8; 32],
}

impl core::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionCipher").finish_non_exhaustive()
    }
}

impl SessionCipher {
    /// Create a cipher from an established session key
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Generate a fresh random session key
    pub fn generate_key() -> Result<[u8; 32]> {
        let mut key = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut key)
            .map_err(|_| WavelinkError::crypto("random generation failed"))?;
        Ok(key)
    }

    /// Encrypt a message under the session key
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|_| WavelinkError::crypto("invalid session key length"))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|_| WavelinkError::crypto("random generation failed"))?;

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| WavelinkError::crypto("session encryption failed"))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a message under the session key
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(WavelinkError::crypto("ciphertext too short"));
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|_| WavelinkError::crypto("invalid session key length"))?;

        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| WavelinkError::crypto("session decryption failed"))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_export_import() {
        let keypair = ExchangeKeyPair::generate().unwrap();
        let exported = keypair.export_public_key();
        let imported = import_public_key(&exported).unwrap();
        assert_eq!(imported, keypair.public_key_bytes());

        assert!(import_public_key("not base64!!!").is_err());
        assert!(import_public_key("AAAA").is_err()); // wrong length
    }

    #[test]
    fn test_sealed_box_roundtrip() {
        let recipient = ExchangeKeyPair::generate().unwrap();
        let blob = seal(&recipient.public_key_bytes(), b"session key material").unwrap();
        let opened = open(&recipient, &blob).unwrap();
        assert_eq!(opened, b"session key material");
    }

    #[test]
    fn test_sealed_box_wrong_recipient_fails() {
        let recipient = ExchangeKeyPair::generate().unwrap();
        let other = ExchangeKeyPair::generate().unwrap();

        let blob = seal(&recipient.public_key_bytes(), b"secret").unwrap();
        assert!(open(&other, &blob).is_err());
    }

    #[test]
    fn test_sealed_box_rejects_short_input() {
        let recipient = ExchangeKeyPair::generate().unwrap();
        assert!(open(&recipient, &[0u8; 10]).is_err());
    }

    #[test]
    fn test_session_cipher_roundtrip() {
        let key = SessionCipher::generate_key().unwrap();
        let cipher = SessionCipher::new(key);

        let ciphertext = cipher.encrypt(b"hello").unwrap();
        assert_ne!(&ciphertext[NONCE_SIZE..], b"hello".as_slice());
        assert_eq!(cipher.decrypt(&ciphertext).unwrap(), b"hello");
    }

    #[test]
    fn test_session_cipher_detects_tampering() {
        let cipher = SessionCipher::new([3u8; 32]);
        let mut ciphertext = cipher.encrypt(b"payload").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;
        assert!(cipher.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn test_wrong_session_key_fails() {
        let a = SessionCipher::new([1u8; 32]);
        let b = SessionCipher::new([2u8; 32]);
        let ciphertext = a.encrypt(b"payload").unwrap();
        assert!(b.decrypt(&ciphertext).is_err());
    }
}
