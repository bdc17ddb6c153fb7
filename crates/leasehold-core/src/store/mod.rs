//! Key-value store clients
//!
//! The lease algorithm needs five single-key operations from its store, all
//! atomic per key: create-if-absent, read, swap-and-return-previous, set a
//! TTL, and delete. [`LeaseStore`] captures exactly that surface.
//!
//! - [`RedisStore`]: a multiplexed Redis connection shared across locks
//! - [`MemoryStore`]: a process-local store, useful for tests and for
//!   serializing tasks inside one process

pub mod memory;
pub mod redis_store;

#[cfg(test)]
pub(crate) mod testing;

use crate::error::LockResult;
use async_trait::async_trait;
use std::fmt;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// Single-key operations the lease algorithm runs against
///
/// Implementations must be safe to share between many locks in flight at
/// once, on the same key or on different keys.
#[async_trait]
pub trait LeaseStore: Send + Sync + fmt::Debug {
    /// Store `value` under `key` only if the key does not exist
    ///
    /// Returns `true` when the key was created.
    async fn set_if_absent(&self, key: &str, value: &str) -> LockResult<bool>;

    /// Read the current value of `key`
    async fn get(&self, key: &str) -> LockResult<Option<String>>;

    /// Replace the value of `key`, returning what was there before
    async fn get_and_set(&self, key: &str, value: &str) -> LockResult<Option<String>>;

    /// Let the store drop `key` after `ttl_secs` seconds
    async fn expire(&self, key: &str, ttl_secs: u64) -> LockResult<()>;

    /// Remove `key`; removing an absent key is not an error
    async fn delete(&self, key: &str) -> LockResult<()>;
}
