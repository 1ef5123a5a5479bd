//! Host-side view of a C plugin.
//!
//! [`ForeignPlugin`] drives a plugin through its exported C functions and
//! presents it as a [`Plugin`], so a host can put natively linked or
//! dynamically loaded plugins into a [`kync_engine::PluginPool`] next to
//! in-process ones. Loading the symbols is left to the host.

use std::ffi::{c_char, c_void, CStr};
use std::ptr;
use std::slice;
use tracing::debug;

use crate::types::{KyncErrorInfo, KyncSlice, KyncWrite};
use kync_common::{KyncError, Result};
use kync_engine::{ApiVersion, AuthRequirement, Plugin, Retries, Sink};

pub type InitFn = unsafe extern "C" fn(api: u16, log_level: u8) -> *const c_char;
pub type SinkFn = unsafe extern "C" fn(sink: *mut KyncWrite) -> *const c_char;
pub type SetContextFn = unsafe extern "C" fn(context: *const KyncSlice) -> *const c_char;
pub type AuthInfoFn = unsafe extern "C" fn(
    is_required: *mut u8,
    retries: *mut u64,
    config: *const KyncSlice,
) -> *const c_char;
pub type ProtectFn = unsafe extern "C" fn(
    sink: *mut KyncWrite,
    data: *const KyncSlice,
    config: *const KyncSlice,
    auth: *const KyncSlice,
) -> *const c_char;
pub type RecoverFn = unsafe extern "C" fn(
    sink: *mut KyncWrite,
    data: *const KyncSlice,
    auth: *const KyncSlice,
) -> *const c_char;
pub type BufLenFn =
    unsafe extern "C" fn(fn_name: *const KyncSlice, input_len: usize, out: *mut usize) -> *const c_char;
pub type LastErrorFn = unsafe extern "C" fn(out: *mut KyncErrorInfo);

/// The function table of a C plugin.
///
/// `last_error` is optional; without it errors carry their category only.
#[derive(Debug, Clone, Copy)]
pub struct PluginVtable {
    pub init: InitFn,
    pub id: SinkFn,
    pub configs: SinkFn,
    pub crypto_item_ids: SinkFn,
    pub set_context: SetContextFn,
    pub auth_info_protect: AuthInfoFn,
    pub auth_info_recover: AuthInfoFn,
    pub protect: ProtectFn,
    pub recover: RecoverFn,
    pub buf_len: BufLenFn,
    pub last_error: Option<LastErrorFn>,
}

impl PluginVtable {
    /// The table of the exports of this library.
    pub fn native() -> Self {
        Self {
            init: crate::init,
            id: crate::id,
            configs: crate::configs,
            crypto_item_ids: crate::crypto_item_ids,
            set_context: crate::set_context,
            auth_info_protect: crate::auth_info_protect,
            auth_info_recover: crate::auth_info_recover,
            protect: crate::protect,
            recover: crate::recover,
            buf_len: crate::buf_len,
            last_error: Some(crate::last_error),
        }
    }
}

/// A plugin reached through its C function table.
pub struct ForeignPlugin {
    vtable: PluginVtable,
}

impl ForeignPlugin {
    /// Wrap a function table.
    ///
    /// # Safety
    /// - Every function must follow the `kync.h` contract for the lifetime
    ///   of the returned value
    pub unsafe fn new(vtable: PluginVtable) -> Self {
        Self { vtable }
    }

    /// The plugin exported by this library.
    pub fn native() -> Self {
        Self {
            vtable: PluginVtable::native(),
        }
    }

    /// Turn a returned category pointer into a result.
    fn check(&self, ret: *const c_char) -> Result<()> {
        if ret.is_null() {
            return Ok(());
        }

        // SAFETY: a non-null return is a static NUL-terminated string.
        let category = unsafe { CStr::from_ptr(ret) }.to_string_lossy().into_owned();
        let mut info = KyncErrorInfo::none();
        if let Some(last_error) = self.vtable.last_error {
            // SAFETY: `info` is valid for writes.
            unsafe { last_error(&mut info) };
        }

        let description = if info.description_ptr.is_null() {
            String::new()
        } else {
            // SAFETY: the plugin keeps the description alive until its next call.
            let bytes = unsafe { slice::from_raw_parts(info.description_ptr, info.description_len) };
            String::from_utf8_lossy(bytes).into_owned()
        };

        debug!(%category, "Plugin call failed");
        Err(KyncError::from_parts(&category, &description, info.info))
    }

    /// Call `f` with a `write_t` forwarding to `sink`.
    fn with_sink(
        &self,
        sink: &mut dyn Sink,
        f: impl FnOnce(*mut KyncWrite) -> *const c_char,
    ) -> Result<()> {
        let mut sink: &mut dyn Sink = sink;
        let mut write = KyncWrite {
            handle: &mut sink as *mut &mut dyn Sink as *mut c_void,
            write: host_write,
        };
        let ret = f(&mut write);
        self.check(ret)
    }

    fn auth_info(&self, f: AuthInfoFn, config: Option<&[u8]>) -> Result<AuthRequirement> {
        let config = config.map(KyncSlice::from_bytes);
        let mut is_required = 0u8;
        let mut retries = 0u64;
        // SAFETY: all pointers are valid for the duration of the call.
        let ret = unsafe { f(&mut is_required, &mut retries, opt_ptr(&config)) };
        self.check(ret)?;
        Ok(AuthRequirement {
            required: is_required != 0,
            retries: Retries::from_wire(retries),
        })
    }
}

fn opt_ptr(slice: &Option<KyncSlice>) -> *const KyncSlice {
    slice.as_ref().map_or(ptr::null(), |slice| slice as *const KyncSlice)
}

/// `write_t` callback forwarding to a `&mut dyn Sink` behind `handle`.
unsafe extern "C" fn host_write(handle: *mut c_void, data: *const KyncSlice) -> *const c_char {
    let sink = &mut *(handle as *mut &mut dyn Sink);
    let bytes = match data.as_ref().map(|data| data.as_bytes()) {
        Some(Ok(bytes)) => bytes,
        _ => return c"invalid segment".as_ptr(),
    };
    match sink.write(bytes) {
        Ok(()) => ptr::null(),
        Err(e) => {
            debug!(len = bytes.len(), "Host sink rejected segment: {}", e);
            c"host sink rejected segment".as_ptr()
        }
    }
}

impl Plugin for ForeignPlugin {
    fn init(&self, requested: ApiVersion, log_level: u8) -> Result<ApiVersion> {
        // SAFETY: plain values only.
        let ret = unsafe { (self.vtable.init)(requested.to_wire(), log_level) };
        self.check(ret)?;
        Ok(requested)
    }

    fn id(&self, sink: &mut dyn Sink) -> Result<()> {
        // SAFETY: `write` is valid for the duration of the call.
        self.with_sink(sink, |write| unsafe { (self.vtable.id)(write) })
    }

    fn configs(&self, sink: &mut dyn Sink) -> Result<()> {
        self.with_sink(sink, |write| unsafe { (self.vtable.configs)(write) })
    }

    fn crypto_item_ids(&self, sink: &mut dyn Sink) -> Result<()> {
        self.with_sink(sink, |write| unsafe { (self.vtable.crypto_item_ids)(write) })
    }

    fn set_context(&self, context: Option<&[u8]>) -> Result<()> {
        let context = context.map(KyncSlice::from_bytes);
        let ret = unsafe { (self.vtable.set_context)(opt_ptr(&context)) };
        self.check(ret)
    }

    fn auth_info_protect(&self, config: Option<&[u8]>) -> Result<AuthRequirement> {
        self.auth_info(self.vtable.auth_info_protect, config)
    }

    fn auth_info_recover(&self, config: Option<&[u8]>) -> Result<AuthRequirement> {
        self.auth_info(self.vtable.auth_info_recover, config)
    }

    fn protect(
        &self,
        sink: &mut dyn Sink,
        data: &[u8],
        config: Option<&[u8]>,
        auth: Option<&[u8]>,
    ) -> Result<()> {
        let data = KyncSlice::from_bytes(data);
        let config = config.map(KyncSlice::from_bytes);
        let auth = auth.map(KyncSlice::from_bytes);
        self.with_sink(sink, |write| unsafe {
            (self.vtable.protect)(write, &data, opt_ptr(&config), opt_ptr(&auth))
        })
    }

    fn recover(&self, sink: &mut dyn Sink, capsule: &[u8], auth: Option<&[u8]>) -> Result<()> {
        let capsule = KyncSlice::from_bytes(capsule);
        let auth = auth.map(KyncSlice::from_bytes);
        self.with_sink(sink, |write| unsafe {
            (self.vtable.recover)(write, &capsule, opt_ptr(&auth))
        })
    }

    fn buf_len(&self, fn_name: &[u8], input_len: usize) -> Result<usize> {
        let name = KyncSlice::from_bytes(fn_name);
        let mut len = 0usize;
        let ret = unsafe { (self.vtable.buf_len)(&name, input_len, &mut len) };
        self.check(ret)?;
        Ok(len)
    }
}
