//! Cryptographic operations for the AGORA auth service
//!
//! Ed25519 signature verification, address derivation and nonce
//! generation.
//!
//! ## Signing pitfall
//!
//! The challenge is delivered as hex, but the message an agent signs is
//! the *decoded* 32 nonce bytes, never the 64-character hex text.
//! Signing the hex string produces a valid signature over the wrong
//! message and verification fails. [`sign_challenge`] does the decoding
//! for Rust clients.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::types::Address;

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Crypto operation errors
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("Invalid hex: {0}")]
    InvalidHex(String),
}

pub const PUBLIC_KEY_LENGTH: usize = ed25519_dalek::PUBLIC_KEY_LENGTH;
pub const SIGNATURE_LENGTH: usize = ed25519_dalek::SIGNATURE_LENGTH;
pub const NONCE_LENGTH: usize = 32;

/// Parse raw public key bytes into an Ed25519 verifying key.
///
/// Rejects anything that is not exactly 32 bytes or not a valid curve
/// point.
pub fn parse_public_key(bytes: &[u8]) -> CryptoResult<VerifyingKey> {
    let key_array: [u8; PUBLIC_KEY_LENGTH] = bytes.try_into().map_err(|_| {
        CryptoError::InvalidPublicKey(format!(
            "Ed25519 key must be {} bytes, got {}",
            PUBLIC_KEY_LENGTH,
            bytes.len()
        ))
    })?;

    VerifyingKey::from_bytes(&key_array).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// Decode a hex-encoded public key
pub fn decode_public_key_hex(public_key_hex: &str) -> CryptoResult<Vec<u8>> {
    hex::decode(public_key_hex.trim()).map_err(|e| CryptoError::InvalidHex(e.to_string()))
}

/// Verify an Ed25519 signature.
///
/// Returns `false` for any malformed key or signature instead of
/// erroring, so callers cannot distinguish "garbage input" from "wrong
/// signature".
pub fn verify_signature(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = parse_public_key(public_key) else {
        return false;
    };
    let Ok(sig_array) = <[u8; SIGNATURE_LENGTH]>::try_from(signature) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_array);

    key.verify(message, &signature).is_ok()
}

/// Derive an agent address: first 8 bytes of SHA-256(public key), as
/// 16 lowercase hex characters.
pub fn derive_address(public_key: &[u8]) -> Address {
    let digest = Sha256::digest(public_key);
    Address::from_digest_prefix(&digest[..8])
}

/// Compute SHA256 hash of data (hex encoded)
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Generate a fresh 32-byte challenge nonce from the OS RNG
pub fn generate_nonce() -> [u8; NONCE_LENGTH] {
    let mut bytes = [0u8; NONCE_LENGTH];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Sign a hex challenge the way the verifier expects: over the decoded
/// nonce bytes. Returns the signature as hex.
pub fn sign_challenge(signing_key: &SigningKey, challenge_hex: &str) -> CryptoResult<String> {
    let nonce = hex::decode(challenge_hex).map_err(|e| CryptoError::InvalidHex(e.to_string()))?;
    Ok(hex::encode(signing_key.sign(&nonce).to_bytes()))
}
