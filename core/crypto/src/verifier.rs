//! Stored verifiers for authentication factors.
//!
//! A verifier is an Argon2id digest of the enrolled factor plus its salt and
//! the cost parameters it was enrolled with. Verification recomputes the
//! digest under those same parameters and compares in constant time, which
//! is semantically byte equality with the enrolled factor without keeping
//! the factor itself around.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::kdf::{hash_factor, KdfParams};
use crate::keys::{Salt, KEY_LENGTH, SALT_LENGTH};
use kync_common::{KyncError, Result};

/// Enrolled authentication factor verifier.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AuthVerifier {
    #[zeroize(skip)]
    salt: Salt,
    #[zeroize(skip)]
    params: KdfParams,
    digest: [u8; KEY_LENGTH],
}

impl AuthVerifier {
    /// Enroll a factor.
    ///
    /// # Errors
    /// - `InvalidArgument` if the factor is empty
    /// - `BadConfig` if the KDF parameters are invalid
    pub fn enroll(factor: &[u8], params: &KdfParams) -> Result<Self> {
        let salt = Salt::generate();
        let digest = hash_factor(factor, &salt, params)?;
        Ok(Self {
            salt,
            params: params.clone(),
            digest: *digest,
        })
    }

    /// Check `factor` against the enrolled one.
    ///
    /// Returns `Ok(false)` for a wrong or empty factor; only KDF failures
    /// are errors.
    pub fn verify(&self, factor: &[u8]) -> Result<bool> {
        if factor.is_empty() {
            return Ok(false);
        }
        let candidate = hash_factor(factor, &self.salt, &self.params)?;
        Ok(candidate.as_slice().ct_eq(self.digest.as_slice()).into())
    }

    /// Cost parameters the factor was enrolled with.
    pub fn params(&self) -> &KdfParams {
        &self.params
    }
}

impl fmt::Debug for AuthVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthVerifier([REDACTED])")
    }
}

/// Serialized form: base64 salt and digest plus the enrollment cost.
#[derive(Serialize, Deserialize)]
struct StoredVerifier {
    salt: String,
    hash: String,
    kdf: KdfParams,
}

impl Serialize for AuthVerifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        StoredVerifier {
            salt: STANDARD.encode(self.salt.as_bytes()),
            hash: STANDARD.encode(self.digest),
            kdf: self.params.clone(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AuthVerifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        use serde::de::Error;

        let stored = StoredVerifier::deserialize(deserializer)?;
        stored.kdf.validate().map_err(D::Error::custom)?;

        let salt: [u8; SALT_LENGTH] = STANDARD
            .decode(&stored.salt)
            .map_err(D::Error::custom)?
            .try_into()
            .map_err(|_| D::Error::custom("verifier salt has wrong length"))?;
        let raw = Zeroizing::new(STANDARD.decode(&stored.hash).map_err(D::Error::custom)?);
        let digest = <[u8; KEY_LENGTH]>::try_from(raw.as_slice())
            .map_err(|_| D::Error::custom("verifier hash has wrong length"))?;
        Ok(Self {
            salt: Salt::from_bytes(salt),
            params: stored.kdf,
            digest,
        })
    }
}

impl TryFrom<&str> for AuthVerifier {
    type Error = KyncError;

    /// Parse a verifier from its JSON form.
    fn try_from(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| KyncError::BadConfig(e.to_string()))
    }
}
