//! C ABI of the KYNC software plugin
//!
//! This module exports the plugin functions declared by `kync.h`. All
//! functions are designed to be safe to call from foreign code: they return
//! `NULL` on success or a pointer to a static category string, and never
//! unwind into the caller.

#![allow(clippy::missing_safety_doc)]

pub mod error;
pub mod foreign;
pub mod instance;
pub mod types;

use std::ffi::c_char;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use crate::instance::get_plugin;
use crate::types::{optional, required, CallbackSink, KyncErrorInfo, KyncSlice, KyncWrite};
use kync_common::{KyncError, Result};
use kync_engine::{ApiVersion, Plugin};

pub use foreign::{ForeignPlugin, PluginVtable};

/// Run an export body with the error slot protocol.
fn ffi_call(name: &'static str, body: impl FnOnce() -> Result<()>) -> *const c_char {
    error::clear_last_error();
    let result = panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|_| {
        tracing::error!(function = name, "Panic in FFI call");
        Err(KyncError::InternalError(format!("Panic in {}", name)))
    });
    match result {
        Ok(()) => ptr::null(),
        Err(e) => error::set_last_error(e),
    }
}

/// Write `value` through an out-pointer.
unsafe fn write_out<T>(out: *mut T, value: T, name: &str) -> Result<()> {
    let out = out
        .as_mut()
        .ok_or_else(|| KyncError::InvalidArgument(format!("{} is null", name)))?;
    *out = value;
    Ok(())
}

/// Initialize the plugin with a required API version and a stderr log level.
///
/// # Safety
/// This function is safe to call from foreign code.
#[no_mangle]
pub extern "C" fn init(api: u16, log_level: u8) -> *const c_char {
    ffi_call("init", || {
        let negotiated = get_plugin()?.init(ApiVersion::from_wire(api), log_level)?;
        tracing::debug!(api = negotiated.to_wire(), "Negotiated API version");
        Ok(())
    })
}

/// The API version implemented by this library (`major << 8 | minor`).
#[no_mangle]
pub extern "C" fn api_version() -> u16 {
    ApiVersion::CURRENT.to_wire()
}

/// Write the plugin/format id to `sink`.
///
/// # Safety
/// - `sink` must point to a valid `write_t`
#[no_mangle]
pub unsafe extern "C" fn id(sink: *mut KyncWrite) -> *const c_char {
    ffi_call("id", || {
        let mut sink = CallbackSink::new(sink)?;
        get_plugin()?.id(&mut sink)
    })
}

/// Write every config as a separate segment to `sink`.
///
/// # Safety
/// - `sink` must point to a valid `write_t`
#[no_mangle]
pub unsafe extern "C" fn configs(sink: *mut KyncWrite) -> *const c_char {
    ffi_call("configs", || {
        let mut sink = CallbackSink::new(sink)?;
        get_plugin()?.configs(&mut sink)
    })
}

/// Write all crypto item ids as concatenated NUL-terminated strings.
///
/// # Safety
/// - `sink` must point to a valid `write_t`
#[no_mangle]
pub unsafe extern "C" fn crypto_item_ids(sink: *mut KyncWrite) -> *const c_char {
    ffi_call("crypto_item_ids", || {
        let mut sink = CallbackSink::new(sink)?;
        get_plugin()?.crypto_item_ids(&mut sink)
    })
}

/// Set the application context label; `NULL` restores the default.
///
/// # Safety
/// - `context` must be `NULL` or point to a valid `slice_t`
#[no_mangle]
pub unsafe extern "C" fn set_context(context: *const KyncSlice) -> *const c_char {
    ffi_call("set_context", || get_plugin()?.set_context(optional(context)?))
}

/// Query the authentication requirements to protect under `config`.
///
/// # Safety
/// - `is_required` and `retries` must be valid for writes
/// - `config` must be `NULL` or point to a valid `slice_t`
#[no_mangle]
pub unsafe extern "C" fn auth_info_protect(
    is_required: *mut u8,
    retries: *mut u64,
    config: *const KyncSlice,
) -> *const c_char {
    ffi_call("auth_info_protect", || {
        let requirement = get_plugin()?.auth_info_protect(optional(config)?)?;
        write_out(is_required, u8::from(requirement.required), "is_required")?;
        write_out(retries, requirement.retries.to_wire(), "retries")
    })
}

/// Query the authentication requirements to recover under `config`.
///
/// # Safety
/// - `is_required` and `retries` must be valid for writes
/// - `config` must be `NULL` or point to a valid `slice_t`
#[no_mangle]
pub unsafe extern "C" fn auth_info_recover(
    is_required: *mut u8,
    retries: *mut u64,
    config: *const KyncSlice,
) -> *const c_char {
    ffi_call("auth_info_recover", || {
        let requirement = get_plugin()?.auth_info_recover(optional(config)?)?;
        write_out(is_required, u8::from(requirement.required), "is_required")?;
        write_out(retries, requirement.retries.to_wire(), "retries")
    })
}

/// Seal `data` and write the capsule to `sink`.
///
/// # Safety
/// - `sink` must point to a valid `write_t`
/// - `data` must point to a valid `slice_t`
/// - `config` and `auth` must be `NULL` or point to a valid `slice_t`
#[no_mangle]
pub unsafe extern "C" fn protect(
    sink: *mut KyncWrite,
    data: *const KyncSlice,
    config: *const KyncSlice,
    auth: *const KyncSlice,
) -> *const c_char {
    ffi_call("protect", || {
        let mut sink = CallbackSink::new(sink)?;
        let data = required(data, "data")?;
        get_plugin()?.protect(&mut sink, data, optional(config)?, optional(auth)?)
    })
}

/// Open the capsule in `data` and write the recovered secret to `sink`.
///
/// # Safety
/// - `sink` must point to a valid `write_t`
/// - `data` must point to a valid `slice_t`
/// - `auth` must be `NULL` or point to a valid `slice_t`
#[no_mangle]
pub unsafe extern "C" fn recover(
    sink: *mut KyncWrite,
    data: *const KyncSlice,
    auth: *const KyncSlice,
) -> *const c_char {
    ffi_call("recover", || {
        let mut sink = CallbackSink::new(sink)?;
        let data = required(data, "data")?;
        get_plugin()?.recover(&mut sink, data, optional(auth)?)
    })
}

/// Compute the buffer size `fn_name` needs for an `input_len` input.
///
/// # Safety
/// - `fn_name` must point to a valid `slice_t`
/// - `out` must be valid for writes
#[no_mangle]
pub unsafe extern "C" fn buf_len(
    fn_name: *const KyncSlice,
    input_len: usize,
    out: *mut usize,
) -> *const c_char {
    ffi_call("buf_len", || {
        let name = required(fn_name, "fn_name")?;
        let len = get_plugin()?.buf_len(name, input_len)?;
        write_out(out, len, "out")
    })
}

/// Copy the last error of the calling thread into `out`.
///
/// `out->category_ptr` is `NULL` if the last call succeeded. The pointers
/// stay valid until the next call on the same thread.
///
/// # Safety
/// - `out` must be `NULL` or valid for writes
#[no_mangle]
pub unsafe extern "C" fn last_error(out: *mut KyncErrorInfo) {
    if let Some(out) = out.as_mut() {
        *out = error::last_error_info();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::{c_void, CStr};

    unsafe extern "C" fn collect(handle: *mut c_void, data: *const KyncSlice) -> *const c_char {
        let out = &mut *(handle as *mut Vec<u8>);
        out.extend_from_slice((*data).as_bytes().unwrap());
        ptr::null()
    }

    fn category(ret: *const c_char) -> Option<String> {
        (!ret.is_null()).then(|| unsafe { CStr::from_ptr(ret) }.to_string_lossy().into_owned())
    }

    #[test]
    fn test_init_rejects_other_major() {
        assert_eq!(category(init(0x0100, 0)), None);
        assert_eq!(category(init(0x0200, 0)).as_deref(), Some("IncompatibleVersion"));

        let mut info = KyncErrorInfo::default();
        unsafe { last_error(&mut info) };
        assert_eq!(info.info, u64::from(api_version()));

        // A successful call clears the slot.
        assert_eq!(category(init(0x0100, 0)), None);
        unsafe { last_error(&mut info) };
        assert!(info.category_ptr.is_null());
    }

    #[test]
    fn test_roundtrip_over_abi() {
        let mut capsule: Vec<u8> = Vec::new();
        let mut sink = KyncWrite {
            handle: &mut capsule as *mut Vec<u8> as *mut c_void,
            write: collect,
        };
        let data = KyncSlice::from_bytes(b"abi secret");
        let ret = unsafe { protect(&mut sink, &data, ptr::null(), ptr::null()) };
        assert_eq!(category(ret), None);

        let mut recovered: Vec<u8> = Vec::new();
        let mut sink = KyncWrite {
            handle: &mut recovered as *mut Vec<u8> as *mut c_void,
            write: collect,
        };
        let capsule_slice = KyncSlice::from_bytes(&capsule);
        let ret = unsafe { recover(&mut sink, &capsule_slice, ptr::null()) };
        assert_eq!(category(ret), None);
        assert_eq!(recovered, b"abi secret");
    }

    #[test]
    fn test_null_arguments() {
        let data = KyncSlice::from_bytes(b"x");
        let ret = unsafe { protect(ptr::null_mut(), &data, ptr::null(), ptr::null()) };
        assert_eq!(category(ret).as_deref(), Some("InvalidArgument"));

        let ret = unsafe { auth_info_protect(ptr::null_mut(), ptr::null_mut(), ptr::null()) };
        assert_eq!(category(ret).as_deref(), Some("InvalidArgument"));

        // Must not crash.
        unsafe { last_error(ptr::null_mut()) };
    }

    #[test]
    fn test_auth_info_and_buf_len() {
        let mut is_required = 7u8;
        let mut retries = 0u64;
        let ret = unsafe { auth_info_recover(&mut is_required, &mut retries, ptr::null()) };
        assert_eq!(category(ret), None);
        assert_eq!(is_required, 0);
        assert_eq!(retries, u64::MAX);

        let empty = KyncSlice::from_bytes(b"");
        let ret = unsafe { auth_info_protect(&mut is_required, &mut retries, &empty) };
        assert_eq!(category(ret).as_deref(), Some("BadConfig"));

        let mut len = 0usize;
        let name = KyncSlice::from_bytes(b"recover");
        assert_eq!(category(unsafe { buf_len(&name, 42, &mut len) }), None);
        assert_eq!(len, 42);

        let name = KyncSlice::from_bytes(b"nope");
        let ret = unsafe { buf_len(&name, 42, &mut len) };
        assert_eq!(category(ret).as_deref(), Some("InvalidArgument"));
    }

    #[test]
    fn test_last_error_description() {
        let capsule = KyncSlice::from_bytes(b"not a capsule");
        let mut out: Vec<u8> = Vec::new();
        let mut sink = KyncWrite {
            handle: &mut out as *mut Vec<u8> as *mut c_void,
            write: collect,
        };
        let ret = unsafe { recover(&mut sink, &capsule, ptr::null()) };
        assert_eq!(category(ret).as_deref(), Some("MalformedCapsule"));

        let mut info = KyncErrorInfo::default();
        unsafe { last_error(&mut info) };
        let description = unsafe {
            std::slice::from_raw_parts(info.description_ptr, info.description_len)
        };
        assert_eq!(std::str::from_utf8(description).unwrap(), "bad magic");
        assert!(out.is_empty());
    }
}
