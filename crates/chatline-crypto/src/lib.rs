//! # chatline-crypto
//!
//! Signature-based identity proof for chatline sessions.
//!
//! Clients prove ownership of a public key by signing a server-issued nonce.
//! The scheme is Ed25519; keys and signatures are exchanged as standard
//! base64 text so they fit on a protocol line.
//!
//! ```rust
//! use chatline_crypto::{generate_key_pair, sign, verify};
//!
//! let keys = generate_key_pair();
//! let signature = sign(&keys.private_key, "nonce").unwrap();
//! assert!(verify(&keys.public_key, &signature, "nonce"));
//! assert!(!verify(&keys.public_key, &signature, "other"));
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

/// Crypto errors surfaced to client-side tooling.
///
/// Verification never returns these; a bad credential is just `false`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Key text is not valid base64.
    #[error("Key is not valid base64")]
    Encoding,

    /// Decoded key has the wrong length.
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    KeyLength { expected: usize, actual: usize },
}

/// A freshly generated key pair, base64 encoded.
#[derive(Debug, Clone)]
pub struct KeyPair {
    /// The 32-byte signing seed. Keep this on the client.
    pub private_key: String,
    /// The 32-byte verifying key sent to the server.
    pub public_key: String,
}

/// Generate a new Ed25519 key pair for provisioning a client.
#[must_use]
pub fn generate_key_pair() -> KeyPair {
    let signing = SigningKey::generate(&mut OsRng);
    KeyPair {
        private_key: STANDARD.encode(signing.to_bytes()),
        public_key: STANDARD.encode(signing.verifying_key().to_bytes()),
    }
}

/// Derive the public key text for a private key.
///
/// # Errors
///
/// Returns an error if the private key is not a base64 32-byte seed.
pub fn public_key_for(private_key: &str) -> Result<String, CryptoError> {
    let signing = decode_signing_key(private_key)?;
    Ok(STANDARD.encode(signing.verifying_key().to_bytes()))
}

/// Sign `text` with a base64 private key, returning a base64 signature.
///
/// Ed25519 signatures are deterministic, so equal inputs sign identically.
///
/// # Errors
///
/// Returns an error if the private key is not a base64 32-byte seed.
pub fn sign(private_key: &str, text: &str) -> Result<String, CryptoError> {
    let signing = decode_signing_key(private_key)?;
    Ok(STANDARD.encode(signing.sign(text.as_bytes()).to_bytes()))
}

/// Check that `signature` is a valid signature of `text` under `public_key`.
///
/// Malformed keys or signatures yield `false`.
#[must_use]
pub fn verify(public_key: &str, signature: &str, text: &str) -> bool {
    let Some(key) = decode_array::<32>(public_key) else {
        return false;
    };
    let Ok(verifying) = VerifyingKey::from_bytes(&key) else {
        return false;
    };
    let Some(sig) = decode_array::<64>(signature) else {
        return false;
    };

    verifying
        .verify(text.as_bytes(), &Signature::from_bytes(&sig))
        .is_ok()
}

/// Generate a fresh challenge nonce for the handshake.
#[must_use]
pub fn generate_nonce() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn decode_signing_key(private_key: &str) -> Result<SigningKey, CryptoError> {
    let bytes = STANDARD
        .decode(private_key.trim())
        .map_err(|_| CryptoError::Encoding)?;
    let seed: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::KeyLength {
            expected: 32,
            actual: bytes.len(),
        })?;
    Ok(SigningKey::from_bytes(&seed))
}

fn decode_array<const N: usize>(text: &str) -> Option<[u8; N]> {
    let bytes = STANDARD.decode(text.trim()).ok()?;
    bytes.as_slice().try_into().ok()
}
