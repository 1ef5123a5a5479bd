//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation. Capsule headers
//! are bound to the ciphertext as associated data.

use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload, generic_array::GenericArray},
    XChaCha20Poly1305,
};

use kync_common::{KyncError, Result};
use crate::keys::KEY_LENGTH;

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Bytes added to a plaintext by [`seal`].
pub const SEAL_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

fn cipher_for(key: &[u8]) -> Result<XChaCha20Poly1305> {
    if key.len() != KEY_LENGTH {
        return Err(KyncError::InternalError(format!(
            "Invalid key length: expected {}, got {}",
            KEY_LENGTH,
            key.len()
        )));
    }
    Ok(XChaCha20Poly1305::new(GenericArray::from_slice(key)))
}

/// Encrypt `plaintext` and authenticate it together with `aad`.
///
/// # Preconditions
/// - `key` must be exactly KEY_LENGTH bytes
///
/// # Postconditions
/// - Returns nonce || ciphertext || tag
/// - The nonce is randomly generated
/// - The output length is plaintext length + SEAL_OVERHEAD
///
/// # Errors
/// - `InternalError` if the key length is wrong or encryption fails
pub fn seal(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|_| KyncError::InternalError("Encryption failed".to_string()))?;

    // Prepend nonce to ciphertext
    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypt a `seal` output and verify it against `aad`.
///
/// # Errors
/// - `InternalError` if the key length is wrong
/// - `IntegrityCheckFailed` if the input is too short or the tag does not
///   verify (wrong key, tampered ciphertext or tampered `aad`)
///
/// # Security
/// - Authenticates before returning any plaintext
pub fn open(key: &[u8], sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    if sealed.len() < SEAL_OVERHEAD {
        return Err(KyncError::IntegrityCheckFailed);
    }

    let (nonce_bytes, encrypted) = sealed.split_at(NONCE_SIZE);
    let nonce = GenericArray::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, Payload { msg: encrypted, aad })
        .map_err(|_| KyncError::IntegrityCheckFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = [42u8; KEY_LENGTH];
        let sealed = seal(&key, b"Hello, World!", b"header").unwrap();
        let opened = open(&key, &sealed, b"header").unwrap();

        assert_eq!(opened, b"Hello, World!");
    }

    #[test]
    fn test_sealed_size() {
        let key = [42u8; KEY_LENGTH];
        let plaintext = b"Test message";

        let sealed = seal(&key, plaintext, &[]).unwrap();
        assert_eq!(sealed.len(), plaintext.len() + SEAL_OVERHEAD);
    }

    #[test]
    fn test_different_nonce_each_time() {
        let key = [42u8; KEY_LENGTH];

        let ct1 = seal(&key, b"Same plaintext", &[]).unwrap();
        let ct2 = seal(&key, b"Same plaintext", &[]).unwrap();

        assert_ne!(&ct1[..NONCE_SIZE], &ct2[..NONCE_SIZE]);
        assert_ne!(ct1, ct2);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal(&[1u8; KEY_LENGTH], b"Secret data", &[]).unwrap();
        let result = open(&[2u8; KEY_LENGTH], &sealed, &[]);

        assert_eq!(result.unwrap_err(), KyncError::IntegrityCheckFailed);
    }

    #[test]
    fn test_tampered_aad_fails() {
        let key = [42u8; KEY_LENGTH];
        let sealed = seal(&key, b"Important data", b"item-a").unwrap();

        assert_eq!(
            open(&key, &sealed, b"item-b").unwrap_err(),
            KyncError::IntegrityCheckFailed
        );
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = [42u8; KEY_LENGTH];
        let mut sealed = seal(&key, b"Important data", &[]).unwrap();
        sealed[NONCE_SIZE + 5] ^= 0xFF;

        assert!(open(&key, &sealed, &[]).is_err());
    }

    #[test]
    fn test_short_input_fails() {
        let key = [42u8; KEY_LENGTH];
        assert_eq!(
            open(&key, &[0u8; SEAL_OVERHEAD - 1], &[]).unwrap_err(),
            KyncError::IntegrityCheckFailed
        );
    }

    #[test]
    fn test_invalid_key_length() {
        let result = seal(&[0u8; 16], b"data", &[]);
        assert_eq!(result.unwrap_err().category(), "InternalError");
    }

    #[test]
    fn test_empty_plaintext() {
        let key = [42u8; KEY_LENGTH];
        let sealed = seal(&key, b"", &[]).unwrap();
        assert_eq!(open(&key, &sealed, &[]).unwrap(), b"");
    }
}
