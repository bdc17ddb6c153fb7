//! Lease acquisition and release against a key-value store
//!
//! # Acquire
//!
//! One attempt per second, `timeout + 1` attempts in total:
//!
//! 1. `set_if_absent(key, now + expires + 1)`. Success means the key was
//!    free and the lease is ours.
//! 2. Otherwise read the stored expiry. If it has passed, the holder is
//!    presumed dead: swap our value in with `get_and_set`. The swap wins
//!    only if the value it replaced is the one we just read; any other
//!    value means a concurrent contender swapped first.
//! 3. After winning, set a store TTL of `ceil(expires)` so the key is
//!    collected even if nobody ever polls it again.
//!
//! # Release
//!
//! The key is deleted only if we are still inside `expires`. Past that
//! point another contender may legitimately own the key. Release does not
//! compare values, so a lease taken over during a narrow window around the
//! expiry can still be deleted by its previous holder.

use super::{LeaseTerms, LockBackend};
use crate::error::{LockError, LockResult};
use crate::lease;
use crate::store::LeaseStore;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause between acquisition attempts
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Lease-based lock on a shared store
pub struct StoreLock {
    terms: LeaseTerms,
    store: Arc<dyn LeaseStore>,
    /// When the lease was obtained; `None` while not held
    start_time: Mutex<Option<Instant>>,
}

impl StoreLock {
    pub fn new(terms: LeaseTerms, store: Arc<dyn LeaseStore>) -> Self {
        Self {
            terms,
            store,
            start_time: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<dyn LeaseStore> {
        &self.store
    }

    /// Time since the lease was obtained, if it is held
    pub async fn held_for(&self) -> Option<Duration> {
        self.start_time.lock().await.map(|at| at.elapsed())
    }

    /// One pass of the acquisition protocol; `Ok(false)` means contended
    async fn try_acquire(&self) -> LockResult<bool> {
        let key = self.terms.key.as_str();
        let candidate = lease::expiry_after(self.terms.expires);

        if self.store.set_if_absent(key, &candidate).await? {
            self.mark_acquired().await?;
            return Ok(true);
        }

        let Some(current) = self.store.get(key).await? else {
            // Released between our two calls; next attempt will create it
            return Ok(false);
        };

        if !self.is_stale(&current) {
            return Ok(false);
        }

        let previous = self.store.get_and_set(key, &candidate).await?;
        if previous.as_deref() == Some(current.as_str()) {
            info!(key = %key, "Reclaimed expired lease");
            self.mark_acquired().await?;
            Ok(true)
        } else {
            debug!(key = %key, "Lost race for expired lease");
            Ok(false)
        }
    }

    fn is_stale(&self, value: &str) -> bool {
        match lease::parse_expiry(value) {
            Some(expiry) => expiry < lease::now_secs(),
            None => {
                warn!(key = %self.terms.key, value = %value, "Lease value is not a timestamp, treating as stale");
                true
            }
        }
    }

    /// Record the acquisition and set the store TTL
    ///
    /// If the TTL cannot be set, the error propagates with the lease value
    /// already written. Until someone releases it, the key then lapses only
    /// through value-based staleness.
    async fn mark_acquired(&self) -> LockResult<()> {
        *self.start_time.lock().await = Some(Instant::now());
        let ttl = lease::ttl_secs(self.terms.expires);
        if let Err(e) = self.store.expire(&self.terms.key, ttl).await {
            warn!(
                key = %self.terms.key,
                ttl_secs = ttl,
                error = %e,
                "Failed to set lease TTL; key has no store-side expiry"
            );
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl LockBackend for StoreLock {
    fn terms(&self) -> &LeaseTerms {
        &self.terms
    }

    async fn acquire_with(&self, cancel: Option<&CancellationToken>) -> LockResult<()> {
        let key = self.terms.key.as_str();
        let start = Instant::now();
        let mut attempts: u64 = 0;

        debug!(
            key = %key,
            timeout_secs = self.terms.timeout_secs,
            "Attempting to acquire lease"
        );

        loop {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                return Err(LockError::Cancelled {
                    key: key.to_string(),
                });
            }

            attempts += 1;
            if self.try_acquire().await? {
                info!(
                    key = %key,
                    attempts,
                    elapsed_ms = start.elapsed().as_millis(),
                    "Lease acquired"
                );
                return Ok(());
            }

            if attempts > self.terms.timeout_secs {
                warn!(key = %key, attempts, "Gave up waiting for lease");
                return Err(LockError::Timeout {
                    key: key.to_string(),
                    attempts,
                });
            }

            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            debug!(key = %key, attempts, "Lease acquisition cancelled");
                            return Err(LockError::Cancelled { key: key.to_string() });
                        }
                        _ = sleep(POLL_INTERVAL) => {}
                    }
                }
                None => sleep(POLL_INTERVAL).await,
            }
        }
    }

    async fn release(&self) -> LockResult<()> {
        let key = self.terms.key.as_str();
        let mut start_time = self.start_time.lock().await;

        let Some(acquired_at) = *start_time else {
            debug!(key = %key, "Release without a held lease");
            return Ok(());
        };

        let held = acquired_at.elapsed();
        if held < self.terms.expires {
            self.store.delete(key).await?;
            debug!(key = %key, held_ms = held.as_millis(), "Lease released");
        } else {
            warn!(
                key = %key,
                held_ms = held.as_millis(),
                expires_ms = self.terms.expires.as_millis(),
                "Lease outlived its expiry, leaving key to its current holder"
            );
        }
        *start_time = None;
        Ok(())
    }
}

impl fmt::Debug for StoreLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreLock")
            .field("terms", &self.terms)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
