//! Lock guards for scoped release
//!
//! A guard releases its lease when dropped, covering early returns, `?`
//! propagation and panics. Dropping cannot await, so the drop path hands the
//! release to the current Tokio runtime; call [`LockGuard::release`] to
//! release inline and observe store errors.

use crate::backend::LockBackend;
use crate::error::LockResult;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// A held lease
#[derive(Debug)]
pub struct LockGuard {
    /// Identifies this acquisition in logs
    id: Uuid,

    backend: Arc<dyn LockBackend>,

    acquired_at: Instant,

    /// Whether release has already been issued
    released: bool,
}

impl LockGuard {
    pub(crate) fn new(backend: Arc<dyn LockBackend>) -> Self {
        Self {
            id: Uuid::new_v4(),
            backend,
            acquired_at: Instant::now(),
            released: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &str {
        self.backend.key()
    }

    /// Time since acquisition
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Whether the lease is still inside its `expires` window
    pub fn is_valid(&self) -> bool {
        !self.released && self.held_for() < self.backend.terms().expires
    }

    /// Release the lease now
    pub async fn release(mut self) -> LockResult<()> {
        self.released = true;
        debug!(lock_id = %self.id, key = %self.key(), "Releasing lease");
        self.backend.release().await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let id = self.id;
        let backend = self.backend.clone();
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = backend.release().await {
                        warn!(lock_id = %id, key = %backend.key(), error = %e, "Failed to release dropped lease");
                    }
                });
            }
            Err(_) => {
                warn!(
                    lock_id = %id,
                    key = %backend.key(),
                    "Lease dropped outside a Tokio runtime; it will lapse at its store TTL"
                );
            }
        }
    }
}

impl fmt::Display for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lock[{}]", self.key())
    }
}
