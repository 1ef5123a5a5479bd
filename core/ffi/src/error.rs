//! FFI error handling
//!
//! Thread-local error storage for FFI functions. Every export clears the
//! slot on entry and fills it on failure, so a successful call never leaves
//! a stale error behind.

use std::cell::RefCell;
use std::ffi::{c_char, CStr};

use crate::types::KyncErrorInfo;
use kync_common::KyncError;

thread_local! {
    static LAST_ERROR: RefCell<Option<StoredError>> = const { RefCell::new(None) };
}

/// The last error of the current thread in its wire form.
struct StoredError {
    category: &'static CStr,
    description: String,
    info: u64,
}

/// Static C string naming the category of `error`.
pub fn category_cstr(error: &KyncError) -> &'static CStr {
    match error {
        KyncError::IncompatibleVersion { .. } => c"IncompatibleVersion",
        KyncError::UnknownItem(_) => c"UnknownItem",
        KyncError::BadConfig(_) => c"BadConfig",
        KyncError::MalformedCapsule(_) => c"MalformedCapsule",
        KyncError::AuthenticationRequired => c"AuthenticationRequired",
        KyncError::AuthenticationFailed { .. } => c"AuthenticationFailed",
        KyncError::LockedOut => c"LockedOut",
        KyncError::IntegrityCheckFailed => c"IntegrityCheckFailed",
        KyncError::SinkWriteFailed(_) => c"SinkWriteFailed",
        KyncError::InvalidArgument(_) => c"InvalidArgument",
        KyncError::UnknownPlugin(_) => c"UnknownPlugin",
        KyncError::InternalError(_) => c"InternalError",
    }
}

/// Set the last error for the current thread.
///
/// Returns the static category string the export hands back to C.
pub fn set_last_error(error: KyncError) -> *const c_char {
    tracing::debug!(category = error.category(), "FFI call failed");
    let category = category_cstr(&error);
    let stored = StoredError {
        category,
        description: error.detail(),
        info: error.info(),
    };
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = Some(stored);
    });
    category.as_ptr()
}

/// Clear the last error for the current thread.
pub fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Describe the last error without consuming it.
///
/// The description pointer borrows the thread-local slot and stays valid
/// until the slot is next cleared or replaced.
pub fn last_error_info() -> KyncErrorInfo {
    LAST_ERROR.with(|e| match e.borrow().as_ref() {
        None => KyncErrorInfo::none(),
        Some(stored) => KyncErrorInfo {
            category_ptr: stored.category.as_ptr(),
            category_len: stored.category.to_bytes().len(),
            description_ptr: stored.description.as_ptr(),
            description_len: stored.description.len(),
            info: stored.info,
        },
    })
}
