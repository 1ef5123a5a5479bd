//! KYNC plugin engine.
//!
//! This crate implements everything a KYNC plugin does independent of the
//! C ABI:
//! - Buffer contract: push sinks and output sizing
//! - Crypto item registry and config resolution
//! - Authentication policy with atomic retry accounting
//! - Capsule format and the seal/unseal engine
//! - The [`Plugin`] trait, the software reference plugin and a host-side
//!   [`PluginPool`]
//!
//! # Security Guarantees
//! - Nothing is written to a sink before an operation has fully succeeded
//! - Wrong factors and tampered capsules are indistinguishable when
//!   authentication is required
//! - Secrets, factors and keys never appear in log output

pub mod buffer;
pub mod capsule;
pub mod engine;
pub mod lifecycle;
pub mod plugin;
pub mod policy;
pub mod pool;
pub mod registry;
pub mod settings;

pub use buffer::{emit, BoundedSink, Operation, SegmentSink, Sink, SinkError, SizeBounds};
pub use engine::{ItemMaterial, SealEngine};
pub use lifecycle::{init_logging, ApiVersion};
pub use plugin::{Plugin, SoftwarePlugin};
pub use policy::{AuthRequirement, ItemPolicy, Retries};
pub use pool::PluginPool;
pub use registry::{decode_ids, CryptoItem, ItemRegistry};
pub use settings::{ItemSettings, PluginSettings};
