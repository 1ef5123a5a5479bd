//! Host-side plugin pool.
//!
//! A pool routes protect calls to a plugin chosen by uid and wraps each
//! capsule in an envelope naming that plugin, so recover can find it again.
//!
//! # Envelope format
//! - Magic `KYNP` (4 bytes) + version (1 byte)
//! - Plugin uid length (1 byte) + uid
//! - Capsule produced by the plugin

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::buffer::{emit, Sink};
use crate::plugin::Plugin;
use kync_common::{KyncError, Result};

/// Envelope magic bytes.
pub const ENVELOPE_MAGIC: &[u8; 4] = b"KYNP";

/// Current envelope version.
pub const ENVELOPE_VERSION: u8 = 1;

/// Registry of plugins keyed by uid.
#[derive(Default)]
pub struct PluginPool {
    plugins: HashMap<Vec<u8>, Arc<dyn Plugin>>,
}

impl PluginPool {
    /// Create a new empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under its own uid.
    ///
    /// # Preconditions
    /// - The plugin's uid must be unique within the pool
    ///
    /// # Errors
    /// - `BadConfig` if the uid is empty, too long or already registered
    /// - Any error the plugin reports for `id`
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<()> {
        let uid = plugin.uid()?;
        if uid.is_empty() || uid.len() > usize::from(u8::MAX) {
            return Err(KyncError::BadConfig(
                "Plugin uid must be 1 to 255 bytes".to_string(),
            ));
        }
        if self.plugins.contains_key(&uid) {
            return Err(KyncError::BadConfig(format!(
                "Plugin '{}' is already registered",
                String::from_utf8_lossy(&uid)
            )));
        }

        info!(uid = %String::from_utf8_lossy(&uid), "Registered plugin");
        self.plugins.insert(uid, plugin);
        Ok(())
    }

    /// Look up a plugin by uid.
    ///
    /// # Errors
    /// - `UnknownPlugin` if no plugin has this uid
    pub fn get(&self, uid: &[u8]) -> Result<&Arc<dyn Plugin>> {
        self.plugins
            .get(uid)
            .ok_or_else(|| KyncError::UnknownPlugin(String::from_utf8_lossy(uid).into_owned()))
    }

    /// Sorted uids of all registered plugins.
    pub fn uids(&self) -> Vec<Vec<u8>> {
        let mut uids: Vec<_> = self.plugins.keys().cloned().collect();
        uids.sort();
        uids
    }

    /// Check if a plugin is registered.
    pub fn has_plugin(&self, uid: &[u8]) -> bool {
        self.plugins.contains_key(uid)
    }

    /// Seal `data` with plugin `uid` and write the enveloped capsule to `sink`.
    ///
    /// # Errors
    /// - `UnknownPlugin` if no plugin has this uid
    /// - Anything the plugin's `protect` reports
    pub fn protect(
        &self,
        uid: &[u8],
        sink: &mut dyn Sink,
        data: &[u8],
        config: Option<&[u8]>,
        auth: Option<&[u8]>,
    ) -> Result<()> {
        let plugin = self.get(uid)?;

        // Seal first so nothing reaches the sink when the plugin fails.
        let capsule = plugin.protect_to_vec(data, config, auth)?;
        emit(sink, &envelope_header(uid)?)?;
        emit(sink, &capsule)
    }

    /// Route an enveloped capsule to its plugin and recover it into `sink`.
    ///
    /// # Errors
    /// - `MalformedCapsule` if the envelope cannot be parsed
    /// - `UnknownPlugin` if the named plugin is not registered
    /// - Anything the plugin's `recover` reports
    pub fn recover(&self, sink: &mut dyn Sink, envelope: &[u8], auth: Option<&[u8]>) -> Result<()> {
        let (plugin, capsule) = self.route(envelope)?;
        plugin.recover(sink, capsule, auth)
    }

    /// Find the plugin an envelope belongs to and the capsule it carries.
    pub fn route<'a>(&self, envelope: &'a [u8]) -> Result<(&Arc<dyn Plugin>, &'a [u8])> {
        let (uid, capsule) = split_envelope(envelope)?;
        debug!(uid = %String::from_utf8_lossy(uid), "Routing capsule");
        Ok((self.get(uid)?, capsule))
    }
}

fn envelope_header(uid: &[u8]) -> Result<Vec<u8>> {
    let uid_len = u8::try_from(uid.len())
        .map_err(|_| KyncError::InternalError("Plugin uid too long".to_string()))?;
    let mut header = Vec::with_capacity(ENVELOPE_MAGIC.len() + 2 + uid.len());
    header.extend_from_slice(ENVELOPE_MAGIC);
    header.push(ENVELOPE_VERSION);
    header.push(uid_len);
    header.extend_from_slice(uid);
    Ok(header)
}

fn split_envelope(envelope: &[u8]) -> Result<(&[u8], &[u8])> {
    let malformed = |reason: &str| KyncError::MalformedCapsule(format!("Envelope: {}", reason));

    let rest = envelope
        .strip_prefix(ENVELOPE_MAGIC.as_slice())
        .ok_or_else(|| malformed("bad magic"))?;
    let (&version, rest) = rest.split_first().ok_or_else(|| malformed("truncated"))?;
    if version != ENVELOPE_VERSION {
        return Err(malformed("unsupported version"));
    }
    let (&uid_len, rest) = rest.split_first().ok_or_else(|| malformed("truncated"))?;
    let uid_len = usize::from(uid_len);
    if uid_len == 0 || rest.len() < uid_len {
        return Err(malformed("bad uid"));
    }
    Ok(rest.split_at(uid_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::SoftwarePlugin;
    use crate::settings::{ItemSettings, PluginSettings};
    use kync_common::ItemId;

    fn software(uid: &str) -> Arc<dyn Plugin> {
        let settings = PluginSettings {
            uid: uid.to_string(),
            default_item: None,
            items: vec![ItemSettings::open(ItemId::new("Default").unwrap())],
        };
        Arc::new(SoftwarePlugin::from_settings(&settings).unwrap())
    }

    fn pool() -> PluginPool {
        let mut pool = PluginPool::new();
        pool.register(software("kync.one")).unwrap();
        pool.register(software("kync.two")).unwrap();
        pool
    }

    #[test]
    fn test_register_and_list() {
        let pool = pool();
        assert_eq!(pool.uids(), vec![b"kync.one".to_vec(), b"kync.two".to_vec()]);
        assert!(pool.has_plugin(b"kync.one"));
        assert!(!pool.has_plugin(b"kync.three"));
    }

    #[test]
    fn test_duplicate_uid_rejected() {
        let mut pool = pool();
        let err = pool.register(software("kync.one")).unwrap_err();
        assert_eq!(err.category(), "BadConfig");
    }

    #[test]
    fn test_routes_to_sealing_plugin() {
        let pool = pool();
        let mut envelope = Vec::new();
        pool.protect(b"kync.two", &mut envelope, b"data", None, None)
            .unwrap();
        assert!(envelope.starts_with(b"KYNP\x01\x08kync.two"));

        let (plugin, _) = pool.route(&envelope).unwrap();
        assert_eq!(plugin.uid().unwrap(), b"kync.two");

        let mut data = Vec::new();
        pool.recover(&mut data, &envelope, None).unwrap();
        assert_eq!(data, b"data");
    }

    #[test]
    fn test_unknown_plugin() {
        let pool = pool();
        let mut sink = Vec::new();
        let err = pool
            .protect(b"kync.nope", &mut sink, b"data", None, None)
            .unwrap_err();
        assert_eq!(err, KyncError::UnknownPlugin("kync.nope".to_string()));

        let mut envelope = Vec::new();
        pool.protect(b"kync.one", &mut envelope, b"data", None, None)
            .unwrap();
        let other = PluginPool::new();
        assert_eq!(
            other.recover(&mut sink, &envelope, None).unwrap_err().category(),
            "UnknownPlugin"
        );
        assert!(sink.is_empty());
    }

    #[test]
    fn test_malformed_envelope() {
        let pool = pool();
        let cases: [&[u8]; 6] = [
            b"",
            b"KYNP",
            b"KYNX\x01\x01a",
            b"KYNP\x02\x01a",
            b"KYNP\x01\x00",
            b"KYNP\x01\x09kync",
        ];
        for bad in cases {
            let mut sink = Vec::new();
            assert_eq!(
                pool.recover(&mut sink, bad, None).unwrap_err().category(),
                "MalformedCapsule"
            );
        }
    }

    #[test]
    fn test_failed_protect_writes_nothing() {
        let pool = pool();
        let mut sink = Vec::new();
        let err = pool
            .protect(b"kync.one", &mut sink, b"data", Some(b"Missing"), None)
            .unwrap_err();
        assert_eq!(err.category(), "UnknownItem");
        assert!(sink.is_empty());
    }
}
