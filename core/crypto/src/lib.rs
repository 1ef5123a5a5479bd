//! Cryptographic primitives for KYNC crypto items.
//!
//! This module provides:
//! - Authenticated encryption using XChaCha20-Poly1305 with associated data
//! - Per-capsule key derivation using BLAKE2b
//! - Authentication factor verifiers using Argon2id
//! - Secure key management with automatic zeroization
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext, factor or key material is ever logged
//! - Constant-time comparisons for factor verification

pub mod aead;
pub mod kdf;
pub mod keys;
pub mod verifier;

pub use aead::{open, seal, NONCE_SIZE, SEAL_OVERHEAD, TAG_SIZE};
pub use kdf::{hash_factor, KdfParams};
pub use keys::{CapsuleKey, ItemKey, Salt, KEY_LENGTH, SALT_LENGTH};
pub use verifier::AuthVerifier;
