//! Leasehold Core Library
//!
//! Lease-based distributed locks over a shared key-value store:
//! - Lease acquisition with bounded polling and stale-lease reclamation
//! - Backends selected by name or connection scheme (open, redis, memory)
//! - Store clients cached per connection descriptor
//! - Scoped release through guards and [`Lock::run`]
//! - Settings from defaults, a TOML file and `LEASEHOLD_*` variables

pub mod backend;
pub mod config;
pub mod connection;
pub mod error;
pub mod lease;
pub mod lock;
pub mod store;

pub use backend::{BackendKind, LeaseTerms, LockBackend, OpenLock, StoreLock};
pub use config::LockSettings;
pub use connection::{ClientCache, ConnectionInfo};
pub use error::{LockError, LockResult};
pub use lease::LeaseStatus;
pub use lock::{Lock, LockGuard, LockOptions, Locker};
pub use store::{LeaseStore, MemoryStore, RedisStore};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::LockSettings;
    pub use crate::error::{LockError, LockResult};
    pub use crate::lock::{Lock, LockGuard, LockOptions, Locker};
}
