//! Process-wide plugin instance for FFI
//!
//! The exported functions all operate on one software plugin, built on first
//! use from the settings named by `KYNC_SETTINGS`.

use once_cell::sync::OnceCell;

use kync_common::Result;
use kync_engine::{PluginSettings, SoftwarePlugin};

static PLUGIN: OnceCell<SoftwarePlugin> = OnceCell::new();

/// Get or create the global plugin.
pub fn get_plugin() -> Result<&'static SoftwarePlugin> {
    PLUGIN.get_or_try_init(|| {
        let settings = PluginSettings::from_env()?;
        SoftwarePlugin::from_settings(&settings)
    })
}
