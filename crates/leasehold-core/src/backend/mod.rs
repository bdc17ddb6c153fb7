//! Lock backends
//!
//! A backend implements lease acquisition and release for one key. The set
//! of backends is closed: [`BackendKind`] maps backend names and descriptor
//! schemes to a constructor, and anything else is a configuration error.
//!
//! - [`OpenLock`]: always succeeds, touches nothing (locking disabled)
//! - [`StoreLock`]: the lease algorithm against a [`LeaseStore`]

pub mod open;
pub mod store_lock;

use crate::connection::ConnectionInfo;
use crate::error::{LockError, LockResult};
use crate::store::{LeaseStore, MemoryStore, RedisStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use open::OpenLock;
pub use store_lock::StoreLock;

/// Parameters fixed for the lifetime of one lock
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseTerms {
    /// Fully prefixed store key
    pub key: String,
    /// Age after which a lease is considered abandoned
    pub expires: Duration,
    /// Seconds to keep polling before giving up; 0 means a single attempt
    pub timeout_secs: u64,
}

impl LeaseTerms {
    pub fn new(key: impl Into<String>, expires: Duration, timeout_secs: u64) -> Self {
        Self {
            key: key.into(),
            expires,
            timeout_secs,
        }
    }
}

/// Capability every lock backend provides
#[async_trait]
pub trait LockBackend: Send + Sync + fmt::Debug {
    fn terms(&self) -> &LeaseTerms;

    /// Wait until the lease is obtained, or fail with [`LockError::Timeout`]
    async fn acquire(&self) -> LockResult<()> {
        self.acquire_with(None).await
    }

    /// Like [`acquire`](Self::acquire), but gives up with
    /// [`LockError::Cancelled`] once `cancel` fires
    async fn acquire_until_cancelled(&self, cancel: &CancellationToken) -> LockResult<()> {
        self.acquire_with(Some(cancel)).await
    }

    async fn acquire_with(&self, cancel: Option<&CancellationToken>) -> LockResult<()>;

    /// Give the lease back if it is still ours; otherwise do nothing
    async fn release(&self) -> LockResult<()>;

    fn key(&self) -> &str {
        &self.terms().key
    }

    fn expires(&self) -> Duration {
        self.terms().expires
    }

    fn timeout(&self) -> u64 {
        self.terms().timeout_secs
    }
}

/// Closed set of lock backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// No-op backend
    #[serde(alias = "OpenLock")]
    Open,
    /// Lease algorithm on Redis
    #[serde(alias = "RedisLock")]
    Redis,
    /// Lease algorithm on a process-local store
    #[serde(alias = "MemoryLock")]
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Redis => "redis",
            Self::Memory => "memory",
        }
    }

    /// Descriptor schemes this backend accepts
    pub fn url_schemes(&self) -> &'static [&'static str] {
        match self {
            Self::Open => &["open"],
            Self::Redis => &["redis", "rediss"],
            Self::Memory => &["memory"],
        }
    }

    /// Backend implied by a descriptor scheme
    pub fn from_scheme(scheme: &str) -> LockResult<Self> {
        [Self::Open, Self::Redis, Self::Memory]
            .into_iter()
            .find(|kind| kind.url_schemes().contains(&scheme))
            .ok_or_else(|| {
                LockError::config(format!(
                    "Unknown connection scheme '{}'. Supported: open, redis, rediss, memory",
                    scheme
                ))
            })
    }

    /// Fail unless `info` uses one of this backend's schemes
    pub fn check_scheme(&self, info: &ConnectionInfo) -> LockResult<()> {
        if self.url_schemes().contains(&info.scheme()) {
            Ok(())
        } else {
            Err(LockError::config(format!(
                "Backend '{}' cannot use a '{}://' connection (expected {})",
                self,
                info.scheme(),
                self.url_schemes().join(" or ")
            )))
        }
    }

    /// Whether locks of this kind talk to a store
    pub fn needs_store(&self) -> bool {
        !matches!(self, Self::Open)
    }

    /// Build a store client for this backend
    ///
    /// Prefer [`ClientCache::get_or_connect`](crate::connection::ClientCache::get_or_connect),
    /// which reuses clients across locks.
    pub async fn get_client(&self, info: &ConnectionInfo) -> LockResult<Option<Arc<dyn LeaseStore>>> {
        self.check_scheme(info)?;
        match self {
            Self::Open => Ok(None),
            Self::Redis => Ok(Some(Arc::new(RedisStore::connect(info).await?))),
            Self::Memory => Ok(Some(Arc::new(MemoryStore::new()))),
        }
    }

    /// Instantiate a backend for one lock
    pub fn build(
        &self,
        terms: LeaseTerms,
        client: Option<Arc<dyn LeaseStore>>,
    ) -> LockResult<Arc<dyn LockBackend>> {
        match (self, client) {
            (Self::Open, _) => Ok(Arc::new(OpenLock::new(terms))),
            (_, Some(store)) => Ok(Arc::new(StoreLock::new(terms, store))),
            (_, None) => Err(LockError::config(format!(
                "Backend '{}' requires a store client",
                self
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "open" | "OpenLock" => Ok(Self::Open),
            "redis" | "RedisLock" => Ok(Self::Redis),
            "memory" | "MemoryLock" => Ok(Self::Memory),
            other => Err(LockError::config(format!(
                "Unknown lock backend '{}'. Supported: open, redis, memory",
                other
            ))),
        }
    }
}
