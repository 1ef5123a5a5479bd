//! Common types used throughout KYNC.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

use crate::KyncError;

/// Maximum length of a crypto item identifier in bytes.
pub const MAX_ITEM_ID_LEN: usize = 255;

/// Identifier of a crypto item, unique within a plugin instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemId(String);

impl ItemId {
    /// Create a new ItemId from a string.
    ///
    /// # Preconditions
    /// - `id` must be non-empty
    /// - `id` must be at most MAX_ITEM_ID_LEN bytes
    /// - `id` must not contain NUL bytes (ids are NUL-separated on the wire)
    ///
    /// # Errors
    /// - Returns `BadConfig` if any precondition is violated
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(KyncError::BadConfig("Item id cannot be empty".to_string()));
        }
        if id.len() > MAX_ITEM_ID_LEN {
            return Err(KyncError::BadConfig(format!(
                "Item id exceeds {} bytes",
                MAX_ITEM_ID_LEN
            )));
        }
        if id.contains('\0') {
            return Err(KyncError::BadConfig(
                "Item id cannot contain NUL".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Parse an identifier from raw selector bytes.
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        let id = std::str::from_utf8(bytes)
            .map_err(|_| KyncError::BadConfig("Item selector is not UTF-8".to_string()))?;
        Self::new(id)
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the identifier bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Length of the identifier in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; identifiers are never empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<String> for ItemId {
    type Error = KyncError;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<ItemId> for String {
    fn from(id: ItemId) -> Self {
        id.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two independently configurable operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Sealing a secret into a capsule.
    Protect,
    /// Opening a capsule.
    Recover,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Protect => write!(f, "protect"),
            OperationKind::Recover => write!(f, "recover"),
        }
    }
}

/// Sensitive data wrapper that zeroizes on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    /// Create new sensitive bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for SensitiveBytes {
    fn from(data: &[u8]) -> Self {
        Self(data.to_vec())
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes([REDACTED; {} bytes])", self.0.len())
    }
}
