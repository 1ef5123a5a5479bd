//! Seal/unseal engine.
//!
//! Combines the item registry, the authentication policy and the sealing
//! transform into the protect and recover flows. Both flows fail closed:
//! nothing is written to the sink before authentication and sealing or
//! opening have fully succeeded.

use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::buffer::{emit, Sink};
use crate::capsule::{Capsule, CapsuleHeader};
use crate::policy::{AuthRequirement, PolicyEngine};
use crate::registry::{CryptoItem, ItemRegistry};
use kync_common::{ItemId, KyncError, OperationKind, Result, SensitiveBytes};
use kync_crypto::{aead, AuthVerifier, ItemKey, Salt, SEAL_OVERHEAD};

/// Key material backing one crypto item.
#[derive(Debug)]
pub struct ItemMaterial {
    key: ItemKey,
    verifier: Option<AuthVerifier>,
}

impl ItemMaterial {
    /// Material with an optional enrolled factor.
    pub fn new(key: ItemKey, verifier: Option<AuthVerifier>) -> Self {
        Self { key, verifier }
    }
}

/// The protect/recover state machine of a plugin.
///
/// The `context` passed to protect and recover only labels log records;
/// retry counters follow the item's key material.
pub struct SealEngine {
    registry: ItemRegistry,
    material: HashMap<ItemId, ItemMaterial>,
    policy: PolicyEngine,
}

impl SealEngine {
    /// Create an engine.
    ///
    /// # Preconditions
    /// - Every registered item has material
    /// - Every item whose policy uses authentication has a verifier
    ///
    /// # Errors
    /// - `BadConfig` if a precondition is violated
    pub fn new(registry: ItemRegistry, material: HashMap<ItemId, ItemMaterial>) -> Result<Self> {
        for item in registry.items() {
            let entry = material.get(item.id()).ok_or_else(|| {
                KyncError::BadConfig(format!("No key material for item '{}'", item.id()))
            })?;
            if item.policy().uses_auth() && entry.verifier.is_none() {
                return Err(KyncError::BadConfig(format!(
                    "Item '{}' requires authentication but has no verifier",
                    item.id()
                )));
            }
        }

        Ok(Self {
            registry,
            material,
            policy: PolicyEngine::new(),
        })
    }

    /// The item registry.
    pub fn registry(&self) -> &ItemRegistry {
        &self.registry
    }

    /// Authentication requirements for `kind` under `config`.
    ///
    /// # Errors
    /// - `BadConfig`/`UnknownItem` if the config does not resolve; never
    ///   defaults to "no authentication"
    pub fn auth_requirements(
        &self,
        kind: OperationKind,
        config: Option<&[u8]>,
    ) -> Result<AuthRequirement> {
        let item = self.registry.resolve(config)?;
        self.policy.requirements(item.id(), item.policy(), kind)
    }

    /// Seal `data` into a capsule written to `sink`.
    ///
    /// # Errors
    /// - `BadConfig`/`UnknownItem` if the config does not resolve
    /// - `AuthenticationRequired` if a factor is required but absent
    /// - `AuthenticationFailed` if the factor is rejected (spends a retry)
    /// - `LockedOut` if no retries remain
    /// - `SinkWriteFailed` if the sink rejects output
    pub fn protect(
        &self,
        context: &str,
        sink: &mut dyn Sink,
        data: &[u8],
        config: Option<&[u8]>,
        auth: Option<&[u8]>,
    ) -> Result<()> {
        let item = self.registry.resolve(config)?;
        let material = self.material_for(item)?;

        self.authenticate(context, item, material, OperationKind::Protect, auth, None)?;

        let salt = Salt::generate();
        let capsule_key = material.key.derive_capsule_key(&salt);
        let header = CapsuleHeader {
            item: item.id().clone(),
            salt,
            body_len: (data.len() + SEAL_OVERHEAD) as u64,
        }
        .encode()?;

        let body = aead::seal(capsule_key.as_bytes(), data, &header)?;

        emit(sink, &header)?;
        emit(sink, &body)?;

        info!(context, item = %item.id(), len = data.len(), "Protected secret");
        Ok(())
    }

    /// Open `capsule` and write the recovered data to `sink`.
    ///
    /// When authentication is required, a rejected factor and a capsule that
    /// fails its integrity check are reported identically as
    /// `AuthenticationFailed`, so the error never reveals which one was wrong.
    ///
    /// # Errors
    /// - `MalformedCapsule` if the capsule cannot be parsed or names an unknown item
    /// - `AuthenticationRequired`, `AuthenticationFailed`, `LockedOut` as for protect
    /// - `IntegrityCheckFailed` if the capsule does not verify and no
    ///   authentication is in play
    /// - `SinkWriteFailed` if the sink rejects output
    pub fn recover(
        &self,
        context: &str,
        sink: &mut dyn Sink,
        capsule: &[u8],
        auth: Option<&[u8]>,
    ) -> Result<()> {
        let capsule = Capsule::parse(capsule)?;
        let item = self.registry.get(&capsule.header().item).ok_or_else(|| {
            KyncError::MalformedCapsule(format!(
                "Capsule names unknown item '{}'",
                capsule.header().item
            ))
        })?;
        let material = self.material_for(item)?;

        let capsule_key = material.key.derive_capsule_key(&capsule.header().salt);
        let open = || -> Result<SensitiveBytes> {
            aead::open(capsule_key.as_bytes(), capsule.body(), capsule.header_bytes())
                .map(SensitiveBytes::new)
        };

        let plaintext = match self.authenticate(
            context,
            item,
            material,
            OperationKind::Recover,
            auth,
            Some(&open),
        )? {
            Some(plaintext) => plaintext,
            None => open().inspect_err(|_| {
                warn!(context, item = %item.id(), "Capsule failed integrity check");
            })?,
        };

        emit(sink, plaintext.as_bytes())?;

        info!(context, item = %item.id(), len = plaintext.len(), "Recovered secret");
        Ok(())
    }

    fn material_for(&self, item: &CryptoItem) -> Result<&ItemMaterial> {
        self.material.get(item.id()).ok_or_else(|| {
            KyncError::InternalError(format!("No key material for item '{}'", item.id()))
        })
    }

    /// Run the authentication step for `kind`.
    ///
    /// With `open` given and authentication required, the capsule is opened
    /// inside the reserved attempt and its outcome folded into the verdict;
    /// the plaintext is returned. Returns `None` when authentication is not
    /// required or `open` was not given.
    ///
    /// A locked-out item is reported as `LockedOut` whether or not a factor
    /// was supplied. A verifier error hands the reserved retry back.
    fn authenticate(
        &self,
        context: &str,
        item: &CryptoItem,
        material: &ItemMaterial,
        kind: OperationKind,
        auth: Option<&[u8]>,
        open: Option<&dyn Fn() -> Result<SensitiveBytes>>,
    ) -> Result<Option<SensitiveBytes>> {
        let policy = item.policy();
        if !policy.requires_auth(kind) {
            if auth.is_some() {
                debug!(context, item = %item.id(), %kind, "Authentication not required, factor ignored");
            }
            return Ok(None);
        }

        if self.policy.retries(item.id(), policy, kind)?.is_locked() {
            warn!(context, item = %item.id(), %kind, "Item is locked out");
            return Err(KyncError::LockedOut);
        }

        let factor = auth.ok_or_else(|| {
            debug!(context, item = %item.id(), %kind, "Authentication factor missing");
            KyncError::AuthenticationRequired
        })?;
        let verifier = material.verifier.as_ref().ok_or_else(|| {
            KyncError::InternalError(format!("Item '{}' has no verifier", item.id()))
        })?;

        let counter = self.policy.counter(item.id(), kind, policy.max_retries)?;
        let attempt = counter.claim().inspect_err(|_| {
            warn!(context, item = %item.id(), %kind, "Attempt rejected, item is locked out");
        })?;

        let verified = match verifier.verify(factor) {
            Ok(verified) => verified,
            Err(e) => {
                attempt.release();
                warn!(context, item = %item.id(), %kind, category = e.category(), "Verifier unusable");
                return Err(e);
            }
        };
        let opened = match open {
            Some(open) => Some(open()),
            None => None,
        };

        match (verified, opened) {
            (true, None) => {
                attempt.succeed();
                Ok(None)
            }
            (true, Some(Ok(plaintext))) => {
                attempt.succeed();
                Ok(Some(plaintext))
            }
            _ => {
                let retries_left = attempt.fail();
                warn!(
                    context,
                    item = %item.id(),
                    %kind,
                    retries_left = ?retries_left,
                    "Authentication failed"
                );
                Err(KyncError::AuthenticationFailed { retries_left })
            }
        }
    }
}
