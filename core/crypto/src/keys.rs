//! Key types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use kync_common::{KyncError, Result};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of salts in bytes.
pub const SALT_LENGTH: usize = 32;

/// Domain separator for per-capsule keys.
const CAPSULE_KEY_CONTEXT: &[u8] = b"kync-capsule";

/// Root key material of a crypto item.
///
/// Every capsule sealed by an item is encrypted under a key derived from
/// this one and a per-capsule salt.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ItemKey {
    key: [u8; KEY_LENGTH],
}

impl ItemKey {
    /// Create an item key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Create an item key from a slice.
    ///
    /// # Errors
    /// - `BadConfig` if the slice is not exactly KEY_LENGTH bytes
    pub fn from_slice(key: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LENGTH] = key.try_into().map_err(|_| {
            KyncError::BadConfig(format!("Item key must be {} bytes", KEY_LENGTH))
        })?;
        Ok(Self { key })
    }

    /// Generate a random item key.
    pub fn generate() -> Self {
        Self {
            key: rand::random::<[u8; KEY_LENGTH]>(),
        }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Derive the key for a single capsule.
    ///
    /// Uses blake2b over the item key, the capsule salt and a fixed context.
    pub fn derive_capsule_key(&self, salt: &Salt) -> CapsuleKey {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(&self.key);
        hasher.update(salt.as_bytes());
        hasher.update(CAPSULE_KEY_CONTEXT);

        let result = hasher.finalize();
        let mut derived = [0u8; KEY_LENGTH];
        derived.copy_from_slice(&result);
        CapsuleKey { key: derived }
    }
}

impl fmt::Debug for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemKey([REDACTED])")
    }
}

/// Key protecting exactly one capsule.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CapsuleKey {
    key: [u8; KEY_LENGTH],
}

impl CapsuleKey {
    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for CapsuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapsuleKey([REDACTED])")
    }
}

/// Salt for key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt(pub [u8; SALT_LENGTH]);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        Self(rand::random::<[u8; SALT_LENGTH]>())
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }
}
