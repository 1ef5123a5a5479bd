//! Authentication policy and retry accounting.
//!
//! Each crypto item decides independently for protect and recover whether
//! an authentication factor is mandatory and how many failed attempts it
//! tolerates. Retry counters are the only mutable shared state in a plugin;
//! they live here and are updated with atomic read-decrement-check steps.
//!
//! A counter belongs to the key material of an item and an operation kind.
//! The application context never takes part in the lookup, so switching
//! contexts cannot buy extra attempts against the same key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

use kync_common::{ItemId, KyncError, OperationKind, Result, UNLIMITED_INFO};

/// Remaining authentication attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retries {
    /// No limit.
    Unlimited,
    /// A finite count; zero means locked out.
    Remaining(u64),
}

impl Retries {
    /// Wire encoding (`u64::MAX` is the unlimited sentinel).
    pub fn to_wire(self) -> u64 {
        match self {
            Retries::Unlimited => UNLIMITED_INFO,
            Retries::Remaining(n) => n.min(UNLIMITED_INFO - 1),
        }
    }

    /// Decode the wire encoding.
    pub fn from_wire(value: u64) -> Self {
        match value {
            UNLIMITED_INFO => Retries::Unlimited,
            n => Retries::Remaining(n),
        }
    }

    /// Whether this state forbids any further attempt.
    pub fn is_locked(self) -> bool {
        self == Retries::Remaining(0)
    }

    fn as_option(self) -> Option<u64> {
        match self {
            Retries::Unlimited => None,
            Retries::Remaining(n) => Some(n),
        }
    }
}

/// Per-operation authentication rules of a crypto item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemPolicy {
    /// Whether protect needs a factor.
    pub protect_auth: bool,
    /// Whether recover needs a factor.
    pub recover_auth: bool,
    /// Failed attempts tolerated per operation kind before lockout.
    pub max_retries: Retries,
}

impl ItemPolicy {
    /// A policy that never asks for a factor.
    pub fn open() -> Self {
        Self {
            protect_auth: false,
            recover_auth: false,
            max_retries: Retries::Unlimited,
        }
    }

    /// Whether `kind` needs a factor.
    pub fn requires_auth(&self, kind: OperationKind) -> bool {
        match kind {
            OperationKind::Protect => self.protect_auth,
            OperationKind::Recover => self.recover_auth,
        }
    }

    /// Whether any operation needs a factor.
    pub fn uses_auth(&self) -> bool {
        self.protect_auth || self.recover_auth
    }
}

/// Answer to an authentication requirements query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthRequirement {
    /// Whether a factor is mandatory.
    pub required: bool,
    /// Attempts left before lockout.
    pub retries: Retries,
}

/// Atomic retry counter for one (item, operation) pair.
#[derive(Debug)]
pub struct RetryCounter {
    limit: Retries,
    remaining: AtomicU64,
}

impl RetryCounter {
    /// Create a counter starting at `limit`.
    pub fn new(limit: Retries) -> Self {
        Self {
            limit,
            remaining: AtomicU64::new(limit.to_wire()),
        }
    }

    /// Current state.
    pub fn remaining(&self) -> Retries {
        match self.limit {
            Retries::Unlimited => Retries::Unlimited,
            Retries::Remaining(_) => Retries::Remaining(self.remaining.load(Ordering::Acquire)),
        }
    }

    /// Reserve one attempt.
    ///
    /// The decrement happens here, before the factor is checked, so two
    /// concurrent attempts can never both spend the last retry. The returned
    /// guard either restores the counter on success or keeps the decrement.
    ///
    /// # Errors
    /// - `LockedOut` if no retries remain
    pub fn claim(self: &Arc<Self>) -> Result<AttemptGuard> {
        if self.limit != Retries::Unlimited {
            self.remaining
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .map_err(|_| KyncError::LockedOut)?;
        }
        Ok(AttemptGuard {
            counter: Arc::clone(self),
        })
    }
}

/// A reserved authentication attempt.
///
/// Dropping the guard without calling [`AttemptGuard::succeed`] leaves the
/// retry spent.
#[must_use = "an unsettled attempt counts as a failure"]
#[derive(Debug)]
pub struct AttemptGuard {
    counter: Arc<RetryCounter>,
}

impl AttemptGuard {
    /// The factor verified: reset the counter to its limit.
    pub fn succeed(self) {
        if let Retries::Remaining(limit) = self.counter.limit {
            self.counter.remaining.store(limit, Ordering::Release);
        }
    }

    /// The factor was rejected: keep the decrement and report what is left.
    pub fn fail(self) -> Option<u64> {
        self.counter.remaining().as_option()
    }

    /// No verdict was reached: hand the reserved retry back.
    pub fn release(self) {
        if let Retries::Remaining(limit) = self.counter.limit {
            let _ = self
                .counter
                .remaining
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    Some(n.saturating_add(1).min(limit))
                });
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CounterKey {
    item: ItemId,
    kind: OperationKind,
}

/// Owner of all retry counters of a plugin instance.
#[derive(Debug, Default)]
pub struct PolicyEngine {
    counters: RwLock<HashMap<CounterKey, Arc<RetryCounter>>>,
}

impl PolicyEngine {
    /// Create an engine with no counters yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// The counter of `item` for `kind`, if an attempt was ever made.
    pub fn find(&self, item: &ItemId, kind: OperationKind) -> Result<Option<Arc<RetryCounter>>> {
        let key = CounterKey {
            item: item.clone(),
            kind,
        };
        let counters = self
            .counters
            .read()
            .map_err(|_| KyncError::InternalError("Retry counters poisoned".to_string()))?;
        Ok(counters.get(&key).map(Arc::clone))
    }

    /// Get (or lazily create) the counter of `item` for `kind`.
    ///
    /// Locking out one item never affects another.
    pub fn counter(
        &self,
        item: &ItemId,
        kind: OperationKind,
        limit: Retries,
    ) -> Result<Arc<RetryCounter>> {
        if let Some(counter) = self.find(item, kind)? {
            return Ok(counter);
        }

        let key = CounterKey {
            item: item.clone(),
            kind,
        };

        let mut counters = self
            .counters
            .write()
            .map_err(|_| KyncError::InternalError("Retry counters poisoned".to_string()))?;
        let counter = counters.entry(key).or_insert_with(|| {
            debug!(item = %item, %kind, "Creating retry counter");
            Arc::new(RetryCounter::new(limit))
        });
        Ok(Arc::clone(counter))
    }

    /// Current retry state of `item` for `kind`; the policy bound until the
    /// first attempt.
    pub fn retries(&self, item: &ItemId, policy: &ItemPolicy, kind: OperationKind) -> Result<Retries> {
        Ok(self
            .find(item, kind)?
            .map_or(policy.max_retries, |counter| counter.remaining()))
    }

    /// Authentication requirements of `item` for `kind`.
    ///
    /// A query never creates a counter.
    pub fn requirements(
        &self,
        item: &ItemId,
        policy: &ItemPolicy,
        kind: OperationKind,
    ) -> Result<AuthRequirement> {
        Ok(AuthRequirement {
            required: policy.requires_auth(kind),
            retries: self.retries(item, policy, kind)?,
        })
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.counters.read().map(|counters| counters.len()).unwrap_or(0)
    }
}
