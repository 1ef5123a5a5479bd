//! Common utilities and types shared across KYNC modules.
//!
//! This module provides foundational types that are used throughout the codebase,
//! ensuring consistency and type safety.

pub mod error;
pub mod types;

pub use error::{KyncError, Result, UNLIMITED_INFO};
pub use types::{ItemId, OperationKind, SensitiveBytes, MAX_ITEM_ID_LEN};
