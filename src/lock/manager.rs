//! Lock Manager implementation
//!
//! Lock striping over a fixed array of parking_lot mutexes.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::error::{DriftError, Result};

/// Number of stripes (power of 2 so the hash can be masked)
const DEFAULT_STRIPE_COUNT: usize = 256;

/// Map a key onto one of `count` slots (`count` must be a power of 2)
pub(crate) fn stripe_index(key: &str, count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) & (count - 1)
}

/// Timeout-bounded per-key mutual exclusion
///
/// Keys hash onto stripes; two keys sharing a stripe serialize, which is
/// harmless since every critical section is short. An operation never holds
/// more than one stripe, except [`LockManager::drain`], which takes all of
/// them in ascending order.
pub struct LockManager {
    stripes: Box<[Mutex<()>]>,

    /// Timeout used by [`LockManager::lock`]
    default_timeout: Duration,
}

/// Proof that the caller holds a key's stripe; released on drop
#[must_use = "the lock is released as soon as the token is dropped"]
pub struct LockToken<'a> {
    _guard: MutexGuard<'a, ()>,
    stripe: usize,
}

impl LockToken<'_> {
    /// Stripe this token holds
    pub fn stripe(&self) -> usize {
        self.stripe
    }
}

/// Every stripe held at once; see [`LockManager::drain`]
pub struct DrainGuard<'a> {
    _guards: Vec<MutexGuard<'a, ()>>,
}

impl LockManager {
    /// Create a lock manager with the default number of stripes
    pub fn new(default_timeout: Duration) -> Self {
        Self::with_stripe_count(DEFAULT_STRIPE_COUNT, default_timeout)
    }

    /// Create a lock manager with `count` stripes (rounded up to a power of 2)
    pub fn with_stripe_count(count: usize, default_timeout: Duration) -> Self {
        let count = count.max(1).next_power_of_two();
        let stripes = (0..count).map(|_| Mutex::new(())).collect();

        Self {
            stripes,
            default_timeout,
        }
    }

    /// Acquire the lock covering `key`, waiting at most `timeout`
    pub fn acquire(&self, key: &str, timeout: Duration) -> Result<LockToken<'_>> {
        let stripe = stripe_index(key, self.stripes.len());

        match self.stripes[stripe].try_lock_for(timeout) {
            Some(guard) => Ok(LockToken {
                _guard: guard,
                stripe,
            }),
            None => {
                tracing::debug!(key, stripe, "lock acquisition timed out");
                Err(DriftError::LockTimeout {
                    key: key.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Acquire with the configured timeout
    pub fn lock(&self, key: &str) -> Result<LockToken<'_>> {
        self.acquire(key, self.default_timeout)
    }

    /// Release a token explicitly
    pub fn release(&self, token: LockToken<'_>) {
        drop(token);
    }

    /// Wait for every in-flight holder, then hold all stripes
    ///
    /// Used on shutdown. Stripes are taken in index order, so two drains
    /// cannot deadlock each other.
    pub fn drain(&self) -> DrainGuard<'_> {
        let guards = self.stripes.iter().map(|stripe| stripe.lock()).collect();
        DrainGuard { _guards: guards }
    }

    /// Whether the stripe covering `key` is currently held
    pub fn is_locked(&self, key: &str) -> bool {
        self.stripes[stripe_index(key, self.stripes.len())].is_locked()
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}
