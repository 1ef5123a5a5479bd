//! Crypto item registry.
//!
//! The set of items a plugin offers is fixed when the plugin is built and
//! never changes afterwards, so lookups need no locking.

use std::collections::HashSet;
use tracing::debug;

use crate::policy::ItemPolicy;
use kync_common::{ItemId, KyncError, Result};

/// A named sealing capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoItem {
    id: ItemId,
    policy: ItemPolicy,
}

impl CryptoItem {
    /// Create an item.
    pub fn new(id: ItemId, policy: ItemPolicy) -> Self {
        Self { id, policy }
    }

    /// The item identifier.
    pub fn id(&self) -> &ItemId {
        &self.id
    }

    /// The item's authentication policy.
    pub fn policy(&self) -> &ItemPolicy {
        &self.policy
    }
}

/// Immutable, enumerable set of crypto items.
#[derive(Debug, Clone)]
pub struct ItemRegistry {
    items: Vec<CryptoItem>,
    default: Option<ItemId>,
}

impl ItemRegistry {
    /// Build a registry.
    ///
    /// # Preconditions
    /// - At least one item
    /// - Item ids are unique
    /// - `default`, if given, names one of the items
    ///
    /// # Errors
    /// - `BadConfig` if any precondition is violated
    pub fn new(items: Vec<CryptoItem>, default: Option<ItemId>) -> Result<Self> {
        if items.is_empty() {
            return Err(KyncError::BadConfig(
                "A plugin must offer at least one crypto item".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for item in &items {
            if !seen.insert(item.id.clone()) {
                return Err(KyncError::BadConfig(format!(
                    "Duplicate crypto item '{}'",
                    item.id
                )));
            }
        }

        if let Some(default) = &default {
            if !seen.contains(default) {
                return Err(KyncError::BadConfig(format!(
                    "Default item '{}' is not registered",
                    default
                )));
            }
        }

        Ok(Self { items, default })
    }

    /// All items in registration order.
    pub fn items(&self) -> &[CryptoItem] {
        &self.items
    }

    /// All item ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &ItemId> {
        self.items.iter().map(|item| &item.id)
    }

    /// Look up an item by id.
    pub fn get(&self, id: &ItemId) -> Option<&CryptoItem> {
        self.items.iter().find(|item| &item.id == id)
    }

    /// Resolve a config selector to an item.
    ///
    /// An absent selector picks the sole item or the documented default. A
    /// present selector must name a registered item exactly; there is no
    /// fallback, so a weaker item can never be substituted unnoticed.
    ///
    /// # Errors
    /// - `BadConfig` if the selector is malformed, or absent with several
    ///   items and no default
    /// - `UnknownItem` if the selector names no registered item
    pub fn resolve(&self, selector: Option<&[u8]>) -> Result<&CryptoItem> {
        let item = match selector {
            None => match (self.items.as_slice(), &self.default) {
                ([only], _) => only,
                (_, Some(default)) => self.get(default).ok_or_else(|| {
                    KyncError::InternalError("Default item vanished".to_string())
                })?,
                _ => {
                    return Err(KyncError::BadConfig(
                        "No item selected and no default item defined".to_string(),
                    ))
                }
            },
            Some(bytes) => {
                let id = ItemId::from_bytes(bytes)?;
                self.get(&id)
                    .ok_or_else(|| KyncError::UnknownItem(id.to_string()))?
            }
        };
        debug!(item = %item.id, "Resolved crypto item");
        Ok(item)
    }

    /// Length of the longest item id.
    pub fn max_id_len(&self) -> usize {
        self.ids().map(ItemId::len).max().unwrap_or(0)
    }

    /// Encode all ids as concatenated NUL-terminated strings.
    pub fn encode_ids(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_ids_len());
        for id in self.ids() {
            buf.extend_from_slice(id.as_bytes());
            buf.push(0);
        }
        buf
    }

    /// Length of [`ItemRegistry::encode_ids`].
    pub fn encoded_ids_len(&self) -> usize {
        self.ids().map(|id| id.len() + 1).sum()
    }
}

/// Decode a NUL-terminated id list, scanning up to `buf.len()`.
///
/// A trailing fragment without terminator is rejected.
pub fn decode_ids(buf: &[u8]) -> Result<Vec<ItemId>> {
    let mut ids = Vec::new();
    let mut rest = buf;
    while !rest.is_empty() {
        let end = rest.iter().position(|b| *b == 0).ok_or_else(|| {
            KyncError::InvalidArgument("Unterminated item id".to_string())
        })?;
        ids.push(ItemId::from_bytes(&rest[..end])?);
        rest = &rest[end + 1..];
    }
    Ok(ids)
}
