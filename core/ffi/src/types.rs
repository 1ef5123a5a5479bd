//! FFI-safe types
//!
//! Types that can cross the FFI boundary safely. cbindgen exports them as
//! `slice_t`, `write_t` and `error_t`.

use std::ffi::{c_char, c_void, CStr};
use std::ptr;
use std::slice;

use kync_common::{KyncError, Result};
use kync_engine::{Sink, SinkError};

/// A borrowed byte slice.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct KyncSlice {
    /// The data; may be null when `len` is zero
    pub ptr: *const u8,
    /// The data length
    pub len: usize,
}

impl KyncSlice {
    /// Borrow a Rust slice for the duration of a call.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            ptr: bytes.as_ptr(),
            len: bytes.len(),
        }
    }

    /// View the slice as Rust bytes.
    ///
    /// # Safety
    /// - `ptr` must be valid for reads of `len` bytes for `'a`, or null with `len == 0`
    pub unsafe fn as_bytes<'a>(&self) -> Result<&'a [u8]> {
        if self.ptr.is_null() {
            if self.len == 0 {
                return Ok(&[]);
            }
            return Err(KyncError::InvalidArgument(
                "Slice has null data but non-zero length".to_string(),
            ));
        }
        Ok(slice::from_raw_parts(self.ptr, self.len))
    }
}

/// Resolve an optional slice parameter.
///
/// A null pointer is absent; a slice of length zero is present but empty.
///
/// # Safety
/// - `slice` must be null or point to a valid `KyncSlice` whose data outlives `'a`
pub unsafe fn optional<'a>(slice: *const KyncSlice) -> Result<Option<&'a [u8]>> {
    match slice.as_ref() {
        None => Ok(None),
        Some(slice) => slice.as_bytes().map(Some),
    }
}

/// Resolve a mandatory slice parameter.
///
/// # Safety
/// Same as [`optional`].
pub unsafe fn required<'a>(slice: *const KyncSlice, name: &str) -> Result<&'a [u8]> {
    optional(slice)?
        .ok_or_else(|| KyncError::InvalidArgument(format!("{} is null", name)))
}

/// Sink callback returning null on success or a static error description.
pub type WriteFn = unsafe extern "C" fn(handle: *mut c_void, data: *const KyncSlice) -> *const c_char;

/// A write callback with its opaque handle.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct KyncWrite {
    /// An opaque handle to the data sink
    pub handle: *mut c_void,
    /// Pushes a segment to `handle`
    pub write: WriteFn,
}

/// [`Sink`] adapter over a C write callback.
pub struct CallbackSink<'a> {
    write: &'a KyncWrite,
}

impl<'a> CallbackSink<'a> {
    /// Wrap a caller-provided callback.
    ///
    /// # Safety
    /// - `write` must be null or point to a valid `KyncWrite` for `'a`
    pub unsafe fn new(write: *mut KyncWrite) -> Result<Self> {
        let write = write
            .as_ref()
            .ok_or_else(|| KyncError::InvalidArgument("sink is null".to_string()))?;
        Ok(Self { write })
    }
}

impl Sink for CallbackSink<'_> {
    fn write(&mut self, segment: &[u8]) -> std::result::Result<(), SinkError> {
        let data = KyncSlice::from_bytes(segment);
        // SAFETY: the caller guarantees the callback and handle are valid for
        // the duration of the call; `data` outlives the callback.
        let error = unsafe { (self.write.write)(self.write.handle, &data) };
        if error.is_null() {
            return Ok(());
        }
        // SAFETY: a non-null return is a static NUL-terminated string.
        let description = unsafe { CStr::from_ptr(error) };
        Err(SinkError(description.to_string_lossy().into_owned()))
    }
}

/// Error details copied out by `last_error`.
///
/// `category_ptr` is null when the last call succeeded. Pointers stay valid
/// until the next call on the same thread.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct KyncErrorInfo {
    /// Stable category identifier (UTF-8, NUL-terminated)
    pub category_ptr: *const c_char,
    /// Category length without terminator
    pub category_len: usize,
    /// Human readable description (UTF-8, not NUL-terminated)
    pub description_ptr: *const u8,
    /// Description length
    pub description_len: usize,
    /// Auxiliary code (retries left, supported version, ...)
    pub info: u64,
}

impl KyncErrorInfo {
    /// The "no error" value.
    pub fn none() -> Self {
        Self {
            category_ptr: ptr::null(),
            category_len: 0,
            description_ptr: ptr::null(),
            description_len: 0,
            info: 0,
        }
    }
}

impl Default for KyncErrorInfo {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_distinguishes_absent_and_empty() {
        let empty = KyncSlice {
            ptr: ptr::null(),
            len: 0,
        };
        let data = KyncSlice::from_bytes(b"abc");

        unsafe {
            assert_eq!(optional(ptr::null()).unwrap(), None);
            assert_eq!(optional(&empty).unwrap(), Some(&[][..]));
            assert_eq!(optional(&data).unwrap(), Some(&b"abc"[..]));
        }
    }

    #[test]
    fn test_null_data_with_length_rejected() {
        let bad = KyncSlice {
            ptr: ptr::null(),
            len: 4,
        };
        let err = unsafe { optional(&bad) }.unwrap_err();
        assert_eq!(err.category(), "InvalidArgument");
        assert!(unsafe { required(ptr::null(), "data") }.is_err());
    }

    unsafe extern "C" fn collect(handle: *mut c_void, data: *const KyncSlice) -> *const c_char {
        let out = &mut *(handle as *mut Vec<u8>);
        out.extend_from_slice((*data).as_bytes().unwrap());
        ptr::null()
    }

    unsafe extern "C" fn reject(_handle: *mut c_void, _data: *const KyncSlice) -> *const c_char {
        c"disk full".as_ptr()
    }

    #[test]
    fn test_callback_sink() {
        let mut out: Vec<u8> = Vec::new();
        let mut write = KyncWrite {
            handle: &mut out as *mut Vec<u8> as *mut c_void,
            write: collect,
        };
        {
            let mut sink = unsafe { CallbackSink::new(&mut write) }.unwrap();
            sink.write(b"ab").unwrap();
            sink.write(b"cd").unwrap();
        }
        assert_eq!(out, b"abcd");

        let mut failing = KyncWrite {
            handle: ptr::null_mut(),
            write: reject,
        };
        let mut sink = unsafe { CallbackSink::new(&mut failing) }.unwrap();
        assert_eq!(sink.write(b"x").unwrap_err(), SinkError("disk full".to_string()));

        assert!(unsafe { CallbackSink::new(ptr::null_mut()) }.is_err());
    }
}
