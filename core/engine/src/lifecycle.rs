//! Plugin lifecycle: API version negotiation and diagnostic logging.

use std::fmt;
use tracing::level_filters::LevelFilter;
use tracing::{debug, warn};

use kync_common::{KyncError, Result};

/// Plugin API version.
///
/// # Compatibility
/// - Same major version: compatible
/// - Different major version: incompatible
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion {
    pub major: u8,
    pub minor: u8,
}

impl ApiVersion {
    /// Version implemented by this crate.
    pub const CURRENT: ApiVersion = ApiVersion { major: 1, minor: 0 };

    /// Decode the `major << 8 | minor` wire form.
    pub fn from_wire(value: u16) -> Self {
        let [major, minor] = value.to_be_bytes();
        Self { major, minor }
    }

    /// Encode as `major << 8 | minor`.
    pub fn to_wire(self) -> u16 {
        u16::from_be_bytes([self.major, self.minor])
    }

    /// Check if this version is compatible with another.
    pub fn is_compatible_with(&self, other: &ApiVersion) -> bool {
        self.major == other.major
    }

    /// Agree on a version with a host requesting `requested`.
    ///
    /// Returns the lower of both versions within the shared major.
    ///
    /// # Errors
    /// - `IncompatibleVersion` if the major versions differ
    pub fn negotiate(self, requested: ApiVersion) -> Result<ApiVersion> {
        if !self.is_compatible_with(&requested) {
            return Err(KyncError::IncompatibleVersion {
                requested: requested.to_wire(),
                supported: self.to_wire(),
            });
        }
        Ok(self.min(requested))
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Map the ABI log level to a tracing filter.
pub fn level_filter(log_level: u8) -> LevelFilter {
    match log_level {
        0 => LevelFilter::OFF,
        1 => LevelFilter::ERROR,
        2 => LevelFilter::WARN,
        3 => LevelFilter::INFO,
        4 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Install a stderr subscriber at `log_level`.
///
/// Best effort: if the process already has a global subscriber it is kept.
/// Returns whether this call installed one.
pub fn init_logging(log_level: u8) -> bool {
    let installed = tracing_subscriber::fmt()
        .with_max_level(level_filter(log_level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok();

    if installed {
        debug!(log_level, "Logging initialized");
    } else {
        warn!("A tracing subscriber is already installed, log level {} not applied", log_level);
    }
    installed
}
