//! Key derivation using Argon2id.
//!
//! Argon2id is a memory-hard password hashing function that provides
//! resistance to both GPU and time-memory trade-off attacks. KYNC uses it to
//! turn an authentication factor (password, PIN, token response) into a
//! verifier digest.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::keys::{Salt, KEY_LENGTH};
use kync_common::{KyncError, Result};

/// Parameters for Argon2id key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Create moderate parameters for mobile devices.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }

    /// Minimal parameters for unit tests. Never use for real factors.
    pub fn testing() -> Self {
        Self {
            memory_cost: 64,
            time_cost: 1,
            parallelism: 1,
        }
    }

    /// Check that Argon2id accepts these parameters.
    ///
    /// # Errors
    /// - `BadConfig` if a cost is out of range
    pub fn validate(&self) -> Result<()> {
        self.argon2_params().map(|_| ())
    }

    fn argon2_params(&self) -> Result<Params> {
        Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(KEY_LENGTH),
        )
        .map_err(|e| KyncError::BadConfig(format!("Invalid KDF parameters: {}", e)))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::moderate()
    }
}

/// Hash an authentication factor with Argon2id.
///
/// # Preconditions
/// - `factor` must not be empty
/// - `params` must have valid Argon2id parameters
///
/// # Postconditions
/// - Returns a KEY_LENGTH digest, zeroized on drop
/// - The digest is deterministic given the same inputs
///
/// # Errors
/// - `InvalidArgument` if the factor is empty
/// - `BadConfig` if the Argon2id parameters are invalid
///
/// # Security
/// - The factor is not stored or logged
pub fn hash_factor(
    factor: &[u8],
    salt: &Salt,
    params: &KdfParams,
) -> Result<Zeroizing<[u8; KEY_LENGTH]>> {
    if factor.is_empty() {
        return Err(KyncError::InvalidArgument(
            "Authentication factor cannot be empty".to_string(),
        ));
    }

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.argon2_params()?);

    let mut digest = Zeroizing::new([0u8; KEY_LENGTH]);
    argon2
        .hash_password_into(factor, salt.as_bytes(), digest.as_mut())
        .map_err(|e| KyncError::InternalError(format!("Key derivation failed: {}", e)))?;

    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_factor_deterministic() {
        let salt = Salt::from_bytes([42u8; 32]);
        let params = KdfParams::testing();

        let h1 = hash_factor(b"1234", &salt, &params).unwrap();
        let h2 = hash_factor(b"1234", &salt, &params).unwrap();

        assert_eq!(*h1, *h2);
    }

    #[test]
    fn test_hash_factor_different_salt() {
        let params = KdfParams::testing();

        let h1 = hash_factor(b"1234", &Salt::from_bytes([1u8; 32]), &params).unwrap();
        let h2 = hash_factor(b"1234", &Salt::from_bytes([2u8; 32]), &params).unwrap();

        assert_ne!(*h1, *h2);
    }

    #[test]
    fn test_hash_factor_different_factor() {
        let salt = Salt::from_bytes([42u8; 32]);
        let params = KdfParams::testing();

        let h1 = hash_factor(b"1234", &salt, &params).unwrap();
        let h2 = hash_factor(b"4321", &salt, &params).unwrap();

        assert_ne!(*h1, *h2);
    }

    #[test]
    fn test_hash_factor_empty_fails() {
        let result = hash_factor(b"", &Salt::generate(), &KdfParams::testing());
        assert_eq!(result.unwrap_err().category(), "InvalidArgument");
    }

    #[test]
    fn test_invalid_params_are_bad_config() {
        let params = KdfParams {
            memory_cost: 1,
            time_cost: 0,
            parallelism: 0,
        };
        let result = hash_factor(b"1234", &Salt::generate(), &params);
        assert_eq!(result.unwrap_err().category(), "BadConfig");
        assert_eq!(params.validate().unwrap_err().category(), "BadConfig");

        KdfParams::default().validate().unwrap();
        KdfParams::testing().validate().unwrap();
    }
}
