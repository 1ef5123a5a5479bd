//! Error taxonomy shared by every KYNC layer.
//!
//! Each variant maps to a stable category identifier used across the C ABI,
//! plus an auxiliary `info` code (e.g. retries left after a failed
//! authentication) so callers never have to parse descriptions.

use thiserror::Error;

/// Sentinel `info` value meaning "no retry limit".
pub const UNLIMITED_INFO: u64 = u64::MAX;

/// Top-level error type for KYNC operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KyncError {
    /// The requested API major version is not supported.
    #[error("Incompatible API version: requested {requested:#06x}, supported {supported:#06x}")]
    IncompatibleVersion { requested: u16, supported: u16 },

    /// The selected crypto item does not exist.
    #[error("Unknown crypto item: {0}")]
    UnknownItem(String),

    /// The config could not be interpreted.
    #[error("Bad config: {0}")]
    BadConfig(String),

    /// The capsule is not self-consistent.
    #[error("Malformed capsule: {0}")]
    MalformedCapsule(String),

    /// Authentication is mandatory but no factor was supplied.
    #[error("Authentication required")]
    AuthenticationRequired,

    /// The supplied factor was rejected (or the capsule failed to open while
    /// authentication was in play).
    #[error("Authentication failed")]
    AuthenticationFailed {
        /// Retries left, `None` if unlimited.
        retries_left: Option<u64>,
    },

    /// Retries are exhausted for this key.
    #[error("Locked out: no retries remaining")]
    LockedOut,

    /// The capsule failed its integrity check.
    #[error("Integrity check failed")]
    IntegrityCheckFailed,

    /// The output sink rejected a segment.
    #[error("Sink write failed: {0}")]
    SinkWriteFailed(String),

    /// A caller passed an unusable argument across the boundary.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No plugin is registered for a capsule format.
    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    /// Catch-all for failures of the underlying transforms.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl KyncError {
    /// Stable category identifier.
    pub fn category(&self) -> &'static str {
        match self {
            KyncError::IncompatibleVersion { .. } => "IncompatibleVersion",
            KyncError::UnknownItem(_) => "UnknownItem",
            KyncError::BadConfig(_) => "BadConfig",
            KyncError::MalformedCapsule(_) => "MalformedCapsule",
            KyncError::AuthenticationRequired => "AuthenticationRequired",
            KyncError::AuthenticationFailed { .. } => "AuthenticationFailed",
            KyncError::LockedOut => "LockedOut",
            KyncError::IntegrityCheckFailed => "IntegrityCheckFailed",
            KyncError::SinkWriteFailed(_) => "SinkWriteFailed",
            KyncError::InvalidArgument(_) => "InvalidArgument",
            KyncError::UnknownPlugin(_) => "UnknownPlugin",
            KyncError::InternalError(_) => "InternalError",
        }
    }

    /// Category-specific auxiliary code.
    pub fn info(&self) -> u64 {
        match self {
            KyncError::IncompatibleVersion { supported, .. } => u64::from(*supported),
            KyncError::AuthenticationRequired => 1,
            KyncError::AuthenticationFailed { retries_left } => {
                retries_left.unwrap_or(UNLIMITED_INFO)
            }
            _ => 0,
        }
    }

    /// Description without the category prefix, as carried across the ABI.
    ///
    /// [`KyncError::from_parts`] turns it back into the same variant.
    pub fn detail(&self) -> String {
        match self {
            KyncError::UnknownItem(detail)
            | KyncError::BadConfig(detail)
            | KyncError::MalformedCapsule(detail)
            | KyncError::SinkWriteFailed(detail)
            | KyncError::InvalidArgument(detail)
            | KyncError::UnknownPlugin(detail)
            | KyncError::InternalError(detail) => detail.clone(),
            other => other.to_string(),
        }
    }

    /// Rebuild an error from its wire form.
    ///
    /// Unknown categories become `InternalError` so a misbehaving plugin can
    /// never be mistaken for a success.
    pub fn from_parts(category: &str, description: &str, info: u64) -> Self {
        let description = description.to_string();
        match category {
            "IncompatibleVersion" => KyncError::IncompatibleVersion {
                requested: 0,
                supported: u16::try_from(info).unwrap_or(0),
            },
            "UnknownItem" => KyncError::UnknownItem(description),
            "BadConfig" => KyncError::BadConfig(description),
            "MalformedCapsule" => KyncError::MalformedCapsule(description),
            "AuthenticationRequired" => KyncError::AuthenticationRequired,
            "AuthenticationFailed" => KyncError::AuthenticationFailed {
                retries_left: match info {
                    UNLIMITED_INFO => None,
                    n => Some(n),
                },
            },
            "LockedOut" => KyncError::LockedOut,
            "IntegrityCheckFailed" => KyncError::IntegrityCheckFailed,
            "SinkWriteFailed" => KyncError::SinkWriteFailed(description),
            "InvalidArgument" => KyncError::InvalidArgument(description),
            "UnknownPlugin" => KyncError::UnknownPlugin(description),
            "InternalError" => KyncError::InternalError(description),
            other => KyncError::InternalError(format!("{}: {}", other, description)),
        }
    }
}

/// Result type alias using the KYNC error.
pub type Result<T> = std::result::Result<T, KyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failed_info_carries_retries() {
        let limited = KyncError::AuthenticationFailed { retries_left: Some(2) };
        assert_eq!(limited.info(), 2);

        let unlimited = KyncError::AuthenticationFailed { retries_left: None };
        assert_eq!(unlimited.info(), UNLIMITED_INFO);
    }

    #[test]
    fn test_from_parts_restores_category() {
        let errors = [
            KyncError::UnknownItem("x".into()),
            KyncError::BadConfig("x".into()),
            KyncError::MalformedCapsule("x".into()),
            KyncError::AuthenticationRequired,
            KyncError::AuthenticationFailed { retries_left: Some(4) },
            KyncError::AuthenticationFailed { retries_left: None },
            KyncError::LockedOut,
            KyncError::IntegrityCheckFailed,
            KyncError::SinkWriteFailed("x".into()),
            KyncError::InternalError("x".into()),
        ];
        for error in errors {
            let restored = KyncError::from_parts(error.category(), "x", error.info());
            assert_eq!(restored, error);
        }
    }

    #[test]
    fn test_detail_roundtrips() {
        let error = KyncError::UnknownItem("Key7".into());
        assert_eq!(error.detail(), "Key7");
        assert_eq!(
            KyncError::from_parts(error.category(), &error.detail(), error.info()),
            error
        );
        assert_eq!(KyncError::LockedOut.detail(), "Locked out: no retries remaining");
    }

    #[test]
    fn test_unknown_category_is_internal() {
        let error = KyncError::from_parts("EWHATEVER", "boom", 7);
        assert_eq!(error.category(), "InternalError");
    }
}
