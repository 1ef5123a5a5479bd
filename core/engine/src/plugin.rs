//! Plugin interface and the software reference plugin.

use std::sync::RwLock;
use tracing::{debug, info};

use crate::buffer::{emit, Operation, Sink, SizeBounds};
use crate::capsule::overhead;
use crate::engine::SealEngine;
use crate::lifecycle::{init_logging, ApiVersion};
use crate::policy::AuthRequirement;
use crate::registry::decode_ids;
use crate::settings::PluginSettings;
use kync_common::{ItemId, KyncError, OperationKind, Result};

/// Capability set every plugin offers.
///
/// Optional byte parameters are `Option<&[u8]>`: `None` is absent and
/// `Some(&[])` is present but empty. Implementations must keep the two apart.
pub trait Plugin: Send + Sync {
    /// Negotiate the API version and configure diagnostics.
    ///
    /// # Errors
    /// - `IncompatibleVersion` if the requested major version is unsupported
    fn init(&self, requested: ApiVersion, log_level: u8) -> Result<ApiVersion>;

    /// Write the plugin format uid.
    fn id(&self, sink: &mut dyn Sink) -> Result<()>;

    /// Write every accepted config, one segment each.
    fn configs(&self, sink: &mut dyn Sink) -> Result<()>;

    /// Write all crypto item ids as NUL-terminated strings.
    fn crypto_item_ids(&self, sink: &mut dyn Sink) -> Result<()>;

    /// Set the application context label; `None` restores the default.
    fn set_context(&self, context: Option<&[u8]>) -> Result<()>;

    /// Whether protect needs a factor under `config`, and the retries left.
    fn auth_info_protect(&self, config: Option<&[u8]>) -> Result<AuthRequirement>;

    /// Whether recover needs a factor under `config`, and the retries left.
    fn auth_info_recover(&self, config: Option<&[u8]>) -> Result<AuthRequirement>;

    /// Seal `data` into a capsule.
    fn protect(
        &self,
        sink: &mut dyn Sink,
        data: &[u8],
        config: Option<&[u8]>,
        auth: Option<&[u8]>,
    ) -> Result<()>;

    /// Recover the data sealed in `capsule`.
    fn recover(&self, sink: &mut dyn Sink, capsule: &[u8], auth: Option<&[u8]>) -> Result<()>;

    /// Upper bound of the bytes `fn_name` writes for an `input_len` input.
    ///
    /// # Errors
    /// - `InvalidArgument` if `fn_name` is not a sized operation
    fn buf_len(&self, fn_name: &[u8], input_len: usize) -> Result<usize>;

    /// The plugin uid as bytes.
    fn uid(&self) -> Result<Vec<u8>> {
        let mut uid = Vec::new();
        self.id(&mut uid)?;
        Ok(uid)
    }

    /// All crypto item ids.
    fn item_ids(&self) -> Result<Vec<ItemId>> {
        let mut encoded = Vec::new();
        self.crypto_item_ids(&mut encoded)?;
        decode_ids(&encoded)
    }

    /// [`Plugin::protect`] into a new vector.
    fn protect_to_vec(
        &self,
        data: &[u8],
        config: Option<&[u8]>,
        auth: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        let mut capsule = Vec::new();
        self.protect(&mut capsule, data, config, auth)?;
        Ok(capsule)
    }

    /// [`Plugin::recover`] into a new vector.
    fn recover_to_vec(&self, capsule: &[u8], auth: Option<&[u8]>) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.recover(&mut data, capsule, auth)?;
        Ok(data)
    }
}

/// Software plugin sealing with XChaCha20-Poly1305 item keys.
pub struct SoftwarePlugin {
    uid: String,
    engine: SealEngine,
    bounds: SizeBounds,
    context: RwLock<String>,
}

impl SoftwarePlugin {
    /// Build a plugin from settings.
    ///
    /// # Errors
    /// - `BadConfig` if the settings are inconsistent
    pub fn from_settings(settings: &PluginSettings) -> Result<Self> {
        let engine = settings.build_engine()?;
        let registry = engine.registry();
        let bounds = SizeBounds {
            id_len: settings.uid.len(),
            item_ids_len: registry.encoded_ids_len(),
            capsule_overhead: overhead(registry.max_id_len()),
        };

        info!(
            uid = %settings.uid,
            items = registry.items().len(),
            "Software plugin ready"
        );

        Ok(Self {
            uid: settings.uid.clone(),
            engine,
            bounds,
            context: RwLock::new(String::new()),
        })
    }

    /// Sizing bounds of this plugin.
    pub fn size_bounds(&self) -> SizeBounds {
        self.bounds
    }

    fn context(&self) -> Result<String> {
        self.context
            .read()
            .map(|context| context.clone())
            .map_err(|_| KyncError::InternalError("Context lock poisoned".to_string()))
    }
}

impl Plugin for SoftwarePlugin {
    fn init(&self, requested: ApiVersion, log_level: u8) -> Result<ApiVersion> {
        init_logging(log_level);
        let negotiated = ApiVersion::CURRENT.negotiate(requested)?;
        info!(%requested, %negotiated, "Plugin initialized");
        Ok(negotiated)
    }

    fn id(&self, sink: &mut dyn Sink) -> Result<()> {
        emit(sink, self.uid.as_bytes())
    }

    fn configs(&self, sink: &mut dyn Sink) -> Result<()> {
        for id in self.engine.registry().ids() {
            emit(sink, id.as_bytes())?;
        }
        Ok(())
    }

    fn crypto_item_ids(&self, sink: &mut dyn Sink) -> Result<()> {
        emit(sink, &self.engine.registry().encode_ids())
    }

    fn set_context(&self, context: Option<&[u8]>) -> Result<()> {
        let next = match context {
            None => String::new(),
            Some(bytes) => match std::str::from_utf8(bytes) {
                Ok(context) => context.to_string(),
                Err(_) => {
                    debug!(len = bytes.len(), "Ignoring non-UTF-8 context");
                    return Ok(());
                }
            },
        };

        let mut context = self
            .context
            .write()
            .map_err(|_| KyncError::InternalError("Context lock poisoned".to_string()))?;
        debug!(len = next.len(), "Context set");
        *context = next;
        Ok(())
    }

    fn auth_info_protect(&self, config: Option<&[u8]>) -> Result<AuthRequirement> {
        self.engine
            .auth_requirements(OperationKind::Protect, config)
    }

    fn auth_info_recover(&self, config: Option<&[u8]>) -> Result<AuthRequirement> {
        self.engine
            .auth_requirements(OperationKind::Recover, config)
    }

    fn protect(
        &self,
        sink: &mut dyn Sink,
        data: &[u8],
        config: Option<&[u8]>,
        auth: Option<&[u8]>,
    ) -> Result<()> {
        self.engine
            .protect(&self.context()?, sink, data, config, auth)
    }

    fn recover(&self, sink: &mut dyn Sink, capsule: &[u8], auth: Option<&[u8]>) -> Result<()> {
        self.engine.recover(&self.context()?, sink, capsule, auth)
    }

    fn buf_len(&self, fn_name: &[u8], input_len: usize) -> Result<usize> {
        let op = Operation::from_name(fn_name)?;
        Ok(self.bounds.required_len(op, input_len))
    }
}
