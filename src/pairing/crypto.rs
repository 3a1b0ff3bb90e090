// src/pairing/crypto.rs
//! Cryptographic primitives for the pairing handshake and message sealing
//!
//! This module provides the key agreement and AEAD operations the rest of the
//! client relies on: X25519 Diffie-Hellman, HKDF-SHA256 key derivation, and
//! AES-256-GCM for message bodies.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use log::{error, trace};
use rand::{rngs::OsRng, Rng, RngCore};
use sha2::Sha256;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::models::{SharedKey, SHARED_KEY_SIZE};

/// Errors related to cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Error during AES-GCM encryption or decryption
    #[error("AES-GCM error: {0}")]
    AesGcmError(String),

    /// Error during KDF derivation
    #[error("KDF error: {0}")]
    KdfError(String),

    /// Invalid input data
    #[error("Invalid input: {0}")]
    InvalidInputError(String),
}

/// The size of the IV in bytes for AES-GCM (96 bits)
pub const AES_IV_SIZE: usize = 12;

/// HKDF context string binding derived keys to this protocol
const SHARED_KEY_INFO: &[u8] = b"parley shared key v1";

/// Generate a static X25519 key pair for the pairing handshake
pub fn generate_keypair() -> (Vec<u8>, Vec<u8>) {
    trace!("Generating X25519 key pair");

    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);

    (secret.to_bytes().to_vec(), public.as_bytes().to_vec())
}

/// Perform a Diffie-Hellman key exchange with X25519
pub fn diffie_hellman(secret_key: &[u8], public_key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if secret_key.len() != 32 {
        error!("Invalid X25519 secret key length: {}", secret_key.len());
        return Err(CryptoError::InvalidInputError(format!(
            "Invalid secret key length: {}",
            secret_key.len()
        )));
    }
    if public_key.len() != 32 {
        error!("Invalid X25519 public key length: {}", public_key.len());
        return Err(CryptoError::InvalidInputError(format!(
            "Invalid public key length: {}",
            public_key.len()
        )));
    }

    let mut secret_bytes = [0u8; 32];
    secret_bytes.copy_from_slice(secret_key);
    let mut public_bytes = [0u8; 32];
    public_bytes.copy_from_slice(public_key);

    let secret = StaticSecret::from(secret_bytes);
    let public = PublicKey::from(public_bytes);

    let shared = secret.diffie_hellman(&public);
    Ok(shared.as_bytes().to_vec())
}

/// Derive a key using HKDF with SHA-256
pub fn hkdf_derive(
    salt: &[u8],
    ikm: &[u8],
    info: &[u8],
    output_len: usize,
) -> Result<Vec<u8>, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; output_len];

    if let Err(e) = hk.expand(info, &mut okm) {
        error!("HKDF expansion failed: {}", e);
        return Err(CryptoError::KdfError(format!("HKDF expansion failed: {}", e)));
    }

    Ok(okm)
}

/// Derive the per-contact shared key from a completed DH exchange.
///
/// Both sides of the handshake call this with their own secret and the
/// remote public key; the HKDF info string binds the result to this
/// protocol version.
pub fn derive_shared_key(secret_key: &[u8], remote_public: &[u8]) -> Result<SharedKey, CryptoError> {
    let dh = diffie_hellman(secret_key, remote_public)?;
    let okm = hkdf_derive(&[], &dh, SHARED_KEY_INFO, SHARED_KEY_SIZE)?;

    let mut key = [0u8; SHARED_KEY_SIZE];
    key.copy_from_slice(&okm);
    Ok(SharedKey::from_bytes(key))
}

/// Encrypt a message body with AES-256-GCM. The random IV is prefixed to
/// the returned ciphertext.
pub fn seal(key: &SharedKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::AesGcmError(format!("Failed to create cipher: {}", e)))?;

    let mut iv = [0u8; AES_IV_SIZE];
    OsRng.fill_bytes(&mut iv);
    trace!("Sealing {} bytes with IV {}", plaintext.len(), hex::encode(iv));

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| CryptoError::AesGcmError(format!("Encryption failed: {}", e)))?;

    let mut out = Vec::with_capacity(AES_IV_SIZE + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt an IV-prefixed AES-256-GCM ciphertext produced by [`seal`]
pub fn open(key: &SharedKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() <= AES_IV_SIZE {
        return Err(CryptoError::InvalidInputError(format!(
            "Ciphertext too short: {} bytes",
            data.len()
        )));
    }

    let (iv, ciphertext) = data.split_at(AES_IV_SIZE);
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::AesGcmError(format!("Failed to create cipher: {}", e)))?;

    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|e| CryptoError::AesGcmError(format!("Decryption failed: {}", e)))
}

/// Generate a fresh 6-digit pairing code
pub fn generate_code_value() -> String {
    let n: u32 = OsRng.gen_range(0..1_000_000);
    format!("{:06}", n)
}

/// Check that a pairing code is exactly six ASCII digits
pub fn is_valid_code_format(code: &str) -> bool {
    code.len() == crate::pairing::CODE_LEN && code.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_key_agreement() {
        let (secret_a, public_a) = generate_keypair();
        let (secret_b, public_b) = generate_keypair();

        let key_a = derive_shared_key(&secret_a, &public_b).unwrap();
        let key_b = derive_shared_key(&secret_b, &public_a).unwrap();

        assert_eq!(key_a, key_b, "both sides must derive the same key");
    }

    #[test]
    fn test_shared_keys_differ_per_peer() {
        let (secret_a, _) = generate_keypair();
        let (_, public_b) = generate_keypair();
        let (_, public_c) = generate_keypair();

        let key_ab = derive_shared_key(&secret_a, &public_b).unwrap();
        let key_ac = derive_shared_key(&secret_a, &public_c).unwrap();

        assert_ne!(key_ab, key_ac);
    }

    #[test]
    fn test_seal_open_round_trip() {
        let (secret_a, public_a) = generate_keypair();
        let key = derive_shared_key(&secret_a, &public_a).unwrap();

        let sealed = seal(&key, b"hello over the lan").unwrap();
        assert_ne!(&sealed[AES_IV_SIZE..], b"hello over the lan");

        let opened = open(&key, &sealed).unwrap();
        assert_eq!(opened, b"hello over the lan");
    }

    #[test]
    fn test_open_rejects_wrong_key() {
        let (secret_a, public_a) = generate_keypair();
        let (secret_b, public_b) = generate_keypair();
        let key = derive_shared_key(&secret_a, &public_a).unwrap();
        let other = derive_shared_key(&secret_b, &public_b).unwrap();

        let sealed = seal(&key, b"secret").unwrap();
        assert!(open(&other, &sealed).is_err());
    }

    #[test]
    fn test_open_rejects_truncated_input() {
        let (secret, public) = generate_keypair();
        let key = derive_shared_key(&secret, &public).unwrap();
        assert!(open(&key, &[0u8; AES_IV_SIZE]).is_err());
    }

    #[test]
    fn test_code_format() {
        for _ in 0..32 {
            let code = generate_code_value();
            assert!(is_valid_code_format(&code), "bad code: {}", code);
        }

        assert!(!is_valid_code_format("12345"));
        assert!(!is_valid_code_format("1234567"));
        assert!(!is_valid_code_format("12a456"));
        assert!(!is_valid_code_format(""));
    }

    #[test]
    fn test_hkdf_is_deterministic() {
        let a = hkdf_derive(b"salt", b"ikm", b"info", 32).unwrap();
        let b = hkdf_derive(b"salt", b"ikm", b"info", 32).unwrap();
        let c = hkdf_derive(b"salt", b"ikm", b"other", 32).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
