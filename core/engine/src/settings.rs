//! Settings of the software plugin.
//!
//! Settings are plain JSON. A host points the plugin at a settings file
//! through the `KYNC_SETTINGS` environment variable; without it the plugin
//! runs with a single unauthenticated item and a process-scoped random key.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::Path;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::engine::{ItemMaterial, SealEngine};
use crate::policy::{ItemPolicy, Retries};
use crate::registry::{CryptoItem, ItemRegistry};
use kync_common::{ItemId, KyncError, Result};
use kync_crypto::{AuthVerifier, ItemKey};

/// Environment variable naming the settings file.
pub const SETTINGS_ENV: &str = "KYNC_SETTINGS";

/// Uid of the default software plugin.
pub const DEFAULT_UID: &str = "kync.software.v1";

/// Item of the default settings.
pub const DEFAULT_ITEM: &str = "software.xchacha20";

/// One configured crypto item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSettings {
    /// Item identifier, also its config selector.
    pub id: ItemId,
    /// Whether protect needs a factor.
    #[serde(default)]
    pub protect_auth: bool,
    /// Whether recover needs a factor.
    #[serde(default)]
    pub recover_auth: bool,
    /// Failed attempts tolerated per operation; absent means unlimited.
    #[serde(default)]
    pub max_retries: Option<u64>,
    /// Enrolled factor, required when any operation needs one. It carries
    /// the Argon2id cost it was enrolled with.
    #[serde(default)]
    pub verifier: Option<AuthVerifier>,
    /// Base64 item key; a random key is generated when absent.
    #[serde(default)]
    pub key: Option<String>,
}

impl ItemSettings {
    /// An item that never asks for a factor.
    pub fn open(id: ItemId) -> Self {
        Self {
            id,
            protect_auth: false,
            recover_auth: false,
            max_retries: None,
            verifier: None,
            key: None,
        }
    }

    /// The item's policy.
    pub fn policy(&self) -> ItemPolicy {
        ItemPolicy {
            protect_auth: self.protect_auth,
            recover_auth: self.recover_auth,
            max_retries: self.max_retries.map_or(Retries::Unlimited, Retries::Remaining),
        }
    }

    fn item_key(&self) -> Result<ItemKey> {
        match &self.key {
            None => Ok(ItemKey::generate()),
            Some(encoded) => {
                let raw = Zeroizing::new(STANDARD.decode(encoded).map_err(|_| {
                    KyncError::BadConfig(format!("Key of item '{}' is not valid base64", self.id))
                })?);
                ItemKey::from_slice(&raw)
            }
        }
    }
}

/// Software plugin settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSettings {
    /// Plugin format uid.
    pub uid: String,
    /// Item used when no config is given.
    #[serde(default)]
    pub default_item: Option<ItemId>,
    /// Offered crypto items.
    pub items: Vec<ItemSettings>,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            uid: DEFAULT_UID.to_string(),
            default_item: None,
            items: ItemId::new(DEFAULT_ITEM)
                .map(ItemSettings::open)
                .into_iter()
                .collect(),
        }
    }
}

impl PluginSettings {
    /// Serialize settings to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| KyncError::BadConfig(e.to_string()))
    }

    /// Deserialize and validate settings from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self =
            serde_json::from_str(json).map_err(|e| KyncError::BadConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            KyncError::BadConfig(format!("Cannot read settings {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Loading plugin settings");
        Self::from_json(&json)
    }

    /// Load settings from the file named by `KYNC_SETTINGS`, or the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_optional_path(std::env::var_os(SETTINGS_ENV))
    }

    fn from_optional_path(path: Option<OsString>) -> Result<Self> {
        match path {
            Some(path) if !path.is_empty() => Self::from_file(path),
            _ => {
                info!("No settings file configured, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Check the settings for consistency.
    ///
    /// # Errors
    /// - `BadConfig` for an empty uid or item list, duplicate item ids, an
    ///   unknown default item, or an authenticated item without a usable
    ///   verifier
    pub fn validate(&self) -> Result<()> {
        if self.uid.is_empty() || self.uid.len() > usize::from(u8::MAX) {
            return Err(KyncError::BadConfig(
                "Plugin uid must be 1 to 255 bytes".to_string(),
            ));
        }
        if self.items.is_empty() {
            return Err(KyncError::BadConfig("No crypto items configured".to_string()));
        }

        let mut seen = HashSet::new();
        for item in &self.items {
            if !seen.insert(&item.id) {
                return Err(KyncError::BadConfig(format!(
                    "Duplicate crypto item '{}'",
                    item.id
                )));
            }
            if (item.protect_auth || item.recover_auth) && item.verifier.is_none() {
                return Err(KyncError::BadConfig(format!(
                    "Item '{}' requires authentication but has no verifier",
                    item.id
                )));
            }
            if let Some(verifier) = &item.verifier {
                verifier.params().validate().map_err(|e| {
                    KyncError::BadConfig(format!("Verifier of item '{}': {}", item.id, e))
                })?;
            }
        }

        if let Some(default) = &self.default_item {
            if !seen.contains(default) {
                return Err(KyncError::BadConfig(format!(
                    "Default item '{}' is not configured",
                    default
                )));
            }
        }
        Ok(())
    }

    /// Build the seal engine these settings describe.
    pub fn build_engine(&self) -> Result<SealEngine> {
        self.validate()?;

        let mut items = Vec::with_capacity(self.items.len());
        let mut material = HashMap::with_capacity(self.items.len());
        for item in &self.items {
            items.push(CryptoItem::new(item.id.clone(), item.policy()));
            material.insert(
                item.id.clone(),
                ItemMaterial::new(item.item_key()?, item.verifier.clone()),
            );
        }

        let registry = ItemRegistry::new(items, self.default_item.clone())?;
        SealEngine::new(registry, material)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kync_common::OperationKind;
    use kync_crypto::KdfParams;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn authenticated_settings() -> PluginSettings {
        let kdf = KdfParams::testing();
        let verifier = AuthVerifier::enroll(b"Testolope", &kdf).unwrap();
        PluginSettings {
            uid: "kync.test".to_string(),
            default_item: Some(ItemId::new("Default").unwrap()),
            items: vec![
                ItemSettings::open(ItemId::new("Default").unwrap()),
                ItemSettings {
                    id: ItemId::new("Pin").unwrap(),
                    protect_auth: false,
                    recover_auth: true,
                    max_retries: Some(3),
                    verifier: Some(verifier),
                    key: Some(STANDARD.encode([5u8; 32])),
                },
            ],
        }
    }

    #[test]
    fn test_default_settings_are_valid() {
        let settings = PluginSettings::default();
        settings.validate().unwrap();
        let engine = settings.build_engine().unwrap();
        assert_eq!(engine.registry().items().len(), 1);
    }

    #[test]
    fn test_json_roundtrip_keeps_verifier() {
        let settings = authenticated_settings();
        let json = settings.to_json().unwrap();
        let parsed = PluginSettings::from_json(&json).unwrap();

        assert_eq!(parsed.uid, "kync.test");
        assert_eq!(parsed.items[1].verifier, settings.items[1].verifier);
        assert_eq!(parsed.items[1].policy().max_retries, Retries::Remaining(3));
        assert!(parsed.build_engine().is_ok());
    }

    #[test]
    fn test_minimal_json() {
        let json = r#"{ "uid": "kync.min", "items": [ { "id": "Default" } ] }"#;
        let settings = PluginSettings::from_json(json).unwrap();
        assert_eq!(settings.items[0].policy(), ItemPolicy::open());
    }

    #[test]
    fn test_unusable_verifier_cost_rejected_on_load() {
        let json = authenticated_settings().to_json().unwrap();
        assert!(json.contains(r#""time_cost": 1"#));

        let broken = json
            .replace(r#""memory_cost": 64"#, r#""memory_cost": 1"#)
            .replace(r#""time_cost": 1"#, r#""time_cost": 0"#)
            .replace(r#""parallelism": 1"#, r#""parallelism": 0"#);
        let err = PluginSettings::from_json(&broken).unwrap_err();
        assert_eq!(err.category(), "BadConfig");
    }

    #[test]
    fn test_correct_factor_never_spends_retries() {
        // A plugin-level cost that differs from enrollment does not matter.
        let mut value: serde_json::Value =
            serde_json::from_str(&authenticated_settings().to_json().unwrap()).unwrap();
        value["kdf"] = serde_json::json!({ "memory_cost": 1, "time_cost": 0, "parallelism": 0 });
        let settings = PluginSettings::from_json(&value.to_string()).unwrap();
        let engine = settings.build_engine().unwrap();

        let mut capsule = Vec::new();
        engine
            .protect("", &mut capsule, b"data", Some(b"Pin"), None)
            .unwrap();
        for _ in 0..4 {
            let mut data = Vec::new();
            engine
                .recover("", &mut data, &capsule, Some(b"Testolope"))
                .unwrap();
            assert_eq!(data, b"data");
        }
        let requirement = engine
            .auth_requirements(OperationKind::Recover, Some(b"Pin"))
            .unwrap();
        assert_eq!(requirement.retries, Retries::Remaining(3));
    }

    #[test]
    fn test_auth_without_verifier_rejected() {
        let json = r#"{ "uid": "x", "items": [ { "id": "Pin", "recover_auth": true } ] }"#;
        let err = PluginSettings::from_json(json).unwrap_err();
        assert_eq!(err.category(), "BadConfig");
    }

    #[test]
    fn test_duplicate_and_unknown_default_rejected() {
        let dup = r#"{ "uid": "x", "items": [ { "id": "A" }, { "id": "A" } ] }"#;
        assert!(PluginSettings::from_json(dup).is_err());

        let default = r#"{ "uid": "x", "default_item": "B", "items": [ { "id": "A" } ] }"#;
        assert!(PluginSettings::from_json(default).is_err());
    }

    #[test]
    fn test_invalid_item_id_rejected() {
        let json = r#"{ "uid": "x", "items": [ { "id": "" } ] }"#;
        assert_eq!(PluginSettings::from_json(json).unwrap_err().category(), "BadConfig");
    }

    #[test]
    fn test_bad_key_rejected() {
        let mut settings = authenticated_settings();
        settings.items[1].key = Some("not base64!".to_string());
        assert!(settings.build_engine().is_err());

        settings.items[1].key = Some(STANDARD.encode([1u8; 16]));
        assert!(settings.build_engine().is_err());
    }

    #[test]
    fn test_configured_key_is_stable() {
        let settings = authenticated_settings();
        let a = settings.build_engine().unwrap();
        let b = settings.build_engine().unwrap();

        let mut capsule = Vec::new();
        a.protect("", &mut capsule, b"shared", Some(b"Pin"), None).unwrap();

        let mut data = Vec::new();
        b.recover("", &mut data, &capsule, Some(b"Testolope")).unwrap();
        assert_eq!(data, b"shared");
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(authenticated_settings().to_json().unwrap().as_bytes())
            .unwrap();

        let settings = PluginSettings::from_file(file.path()).unwrap();
        assert_eq!(settings.items.len(), 2);

        let loaded = PluginSettings::from_optional_path(Some(file.path().into())).unwrap();
        assert_eq!(loaded.uid, "kync.test");
    }

    #[test]
    fn test_missing_path_uses_defaults() {
        let settings = PluginSettings::from_optional_path(None).unwrap();
        assert_eq!(settings.uid, DEFAULT_UID);
        assert!(PluginSettings::from_optional_path(Some(OsString::new())).is_ok());
        assert!(PluginSettings::from_file("/nonexistent/kync.json").is_err());
    }
}
