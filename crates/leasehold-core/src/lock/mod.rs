//! Lock facade
//!
//! [`Locker`] turns settings into locks: it resolves the backend and
//! connection, namespaces the key, and reuses store clients through a
//! [`ClientCache`]. A [`Lock`] guards one critical section, either through a
//! [`LockGuard`] or with [`Lock::run`], which releases on every exit path.
//!
//! # Example
//!
//! ```ignore
//! use leasehold_core::{LockOptions, LockSettings, Locker};
//!
//! let locker = Locker::new(LockSettings::load()?)?;
//! let lock = locker.lock("nightly-report", LockOptions::default()).await?;
//!
//! lock.run(async {
//!     // Critical section
//! })
//! .await?;
//! ```

pub mod guard;

#[cfg(test)]
pub(crate) mod testing;

use crate::backend::{BackendKind, LeaseTerms, LockBackend};
use crate::config::{LockSettings, validate_expires};
use crate::connection::{ClientCache, ConnectionInfo};
use crate::error::LockResult;
use crate::lease::{self, LeaseStatus};
use futures_util::FutureExt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use guard::LockGuard;

/// Per-lock overrides; unset fields fall back to [`LockSettings`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LockOptions {
    pub expires: Option<Duration>,
    pub timeout: Option<u64>,
    pub backend: Option<BackendKind>,
    pub connection: Option<String>,
}

impl LockOptions {
    pub fn with_expires(mut self, expires: Duration) -> Self {
        self.expires = Some(expires);
        self
    }

    /// Seconds to wait for a contended lease
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout = Some(timeout_secs);
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }
}

/// Creates locks from shared settings
#[derive(Debug, Clone)]
pub struct Locker {
    settings: LockSettings,
    cache: ClientCache,
}

impl Locker {
    /// Create a locker with its own client cache
    pub fn new(settings: LockSettings) -> LockResult<Self> {
        Self::with_cache(settings, ClientCache::new())
    }

    /// Create a locker that shares `cache` with other lockers
    pub fn with_cache(settings: LockSettings, cache: ClientCache) -> LockResult<Self> {
        settings.validate()?;
        Ok(Self { settings, cache })
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    pub fn cache(&self) -> &ClientCache {
        &self.cache
    }

    /// Prefixed store key for `key`
    pub fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.settings.key_prefix, key)
    }

    /// Build a lock for `key`
    ///
    /// Connects to the store on first use of a descriptor. Unknown backends,
    /// unknown schemes and backend/scheme mismatches fail here, before any
    /// acquisition is attempted.
    pub async fn lock(&self, key: &str, options: LockOptions) -> LockResult<Lock> {
        let expires = match options.expires {
            Some(expires) => {
                validate_expires(expires.as_secs_f64())?;
                expires
            }
            None => self.settings.expires_duration()?,
        };
        let timeout = options.timeout.unwrap_or(self.settings.timeout);

        let (kind, info) = self.resolve(&options)?;
        info!(backend = %kind, "Using {} lock backend", kind);

        let client = self.cache.get_or_connect(kind, &info).await?;
        let terms = LeaseTerms::new(self.full_key(key), expires, timeout);
        Ok(Lock::from_backend(kind.build(terms, client)?))
    }

    /// Report what the store currently holds for `key`
    ///
    /// Backends without a store always report [`LeaseStatus::Available`].
    pub async fn inspect(&self, key: &str, options: &LockOptions) -> LockResult<LeaseStatus> {
        let (kind, info) = self.resolve(options)?;
        match self.cache.get_or_connect(kind, &info).await? {
            Some(store) => lease::inspect(store.as_ref(), &self.full_key(key)).await,
            None => Ok(LeaseStatus::Available),
        }
    }

    /// Backend and connection for `options`, falling back to the settings
    pub fn resolve(&self, options: &LockOptions) -> LockResult<(BackendKind, ConnectionInfo)> {
        let connection = options
            .connection
            .as_deref()
            .unwrap_or(&self.settings.connection);

        let info = ConnectionInfo::parse(connection)?;
        let kind = match options.backend.or(self.settings.backend) {
            Some(kind) => {
                kind.check_scheme(&info)?;
                kind
            }
            None => BackendKind::from_scheme(info.scheme())?,
        };
        Ok((kind, info))
    }
}

/// One named critical section
#[derive(Debug, Clone)]
pub struct Lock {
    backend: Arc<dyn LockBackend>,
}

impl Lock {
    /// Wrap an already built backend
    pub fn from_backend(backend: Arc<dyn LockBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn LockBackend> {
        &self.backend
    }

    /// Prefixed store key
    pub fn key(&self) -> &str {
        self.backend.key()
    }

    pub fn expires(&self) -> Duration {
        self.backend.expires()
    }

    pub fn timeout(&self) -> u64 {
        self.backend.timeout()
    }

    /// Acquire the lease, returning a guard that releases it
    pub async fn acquire(&self) -> LockResult<LockGuard> {
        self.backend.acquire().await?;
        Ok(LockGuard::new(self.backend.clone()))
    }

    /// Acquire the lease unless `cancel` fires first
    pub async fn acquire_until_cancelled(&self, cancel: &CancellationToken) -> LockResult<LockGuard> {
        self.backend.acquire_until_cancelled(cancel).await?;
        Ok(LockGuard::new(self.backend.clone()))
    }

    /// Run `body` while holding the lease
    ///
    /// The lease is released exactly once after `body` finishes, whether it
    /// returns or panics. A panic is resumed after the release. When `body`
    /// returns normally, a failed release is reported as the error.
    pub async fn run<F>(&self, body: F) -> LockResult<F::Output>
    where
        F: Future,
    {
        let guard = self.acquire().await?;
        let outcome = AssertUnwindSafe(body).catch_unwind().await;
        let released = guard.release().await;

        match outcome {
            Ok(value) => {
                released?;
                Ok(value)
            }
            Err(payload) => {
                if let Err(e) = released {
                    warn!(key = %self.key(), error = %e, "Failed to release lease after panic");
                }
                panic::resume_unwind(payload)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LockError;
    use crate::store::{LeaseStore, MemoryStore};
    use super::testing::ScriptedBackend;

    fn open_settings() -> LockSettings {
        LockSettings {
            connection: "open://".to_string(),
            ..LockSettings::default()
        }
    }

    #[tokio::test]
    async fn test_open_backend_is_selected_from_scheme() {
        let locker = Locker::new(open_settings()).unwrap();
        let lock = locker.lock("somekey", LockOptions::default()).await.unwrap();

        assert_eq!(lock.key(), "lock:somekey");
        assert!(format!("{:?}", lock.backend()).contains("OpenLock"));
    }

    #[tokio::test]
    async fn test_memory_backend_is_selected_from_scheme() {
        let settings = LockSettings {
            connection: "memory://".to_string(),
            ..LockSettings::default()
        };
        let locker = Locker::new(settings).unwrap();
        let lock = locker.lock("somekey", LockOptions::default()).await.unwrap();

        assert!(format!("{:?}", lock.backend()).contains("StoreLock"));
        assert_eq!(locker.cache().len().await, 1);
    }

    #[tokio::test]
    async fn test_settings_values_are_used() {
        let settings = LockSettings {
            connection: "open://".to_string(),
            expires: 999.0,
            timeout: 888,
            key_prefix: "cookies-are-us-".to_string(),
            ..LockSettings::default()
        };
        let locker = Locker::new(settings).unwrap();
        let lock = locker.lock("somekey", LockOptions::default()).await.unwrap();

        assert_eq!(lock.key(), "cookies-are-us-somekey");
        assert_eq!(lock.expires(), Duration::from_secs(999));
        assert_eq!(lock.timeout(), 888);
    }

    #[tokio::test]
    async fn test_explicit_options_win_over_settings() {
        let locker = Locker::new(open_settings()).unwrap();
        let options = LockOptions::default()
            .with_expires(Duration::from_secs(3))
            .with_timeout(0)
            .with_connection("memory://")
            .with_backend(BackendKind::Memory);
        let lock = locker.lock("jobs", options).await.unwrap();

        assert_eq!(lock.expires(), Duration::from_secs(3));
        assert_eq!(lock.timeout(), 0);
        assert!(format!("{:?}", lock.backend()).contains("StoreLock"));
    }

    #[tokio::test]
    async fn test_defaults_apply_without_settings() {
        let locker = Locker::new(open_settings()).unwrap();
        let lock = locker.lock("jobs", LockOptions::default()).await.unwrap();

        assert_eq!(lock.expires(), Duration::from_secs(10));
        assert_eq!(lock.timeout(), 60);
    }

    #[tokio::test]
    async fn test_configuration_errors_fail_at_construction() {
        let locker = Locker::new(open_settings()).unwrap();

        let err = locker
            .lock("jobs", LockOptions::default().with_connection("zk://host"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E600");

        let err = locker
            .lock("jobs", LockOptions::default().with_backend(BackendKind::Redis))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E600");

        let err = locker
            .lock("jobs", LockOptions::default().with_expires(Duration::ZERO))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E600");
    }

    #[tokio::test]
    async fn test_oversized_expires_fails_without_panicking() {
        let settings = LockSettings {
            connection: "open://".to_string(),
            expires: 1e20,
            ..LockSettings::default()
        };
        assert_eq!(Locker::new(settings).unwrap_err().code(), "E600");

        let locker = Locker::new(open_settings()).unwrap();
        let err = locker
            .lock("jobs", LockOptions::default().with_expires(Duration::MAX))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E600");
    }

    #[test]
    fn test_invalid_settings_rejected_by_locker() {
        let settings = LockSettings {
            connection: "carrier-pigeon://coop".to_string(),
            ..LockSettings::default()
        };
        assert!(Locker::new(settings).is_err());
    }

    #[tokio::test]
    async fn test_lockers_share_a_cache() {
        let cache = ClientCache::new();
        let settings = LockSettings {
            connection: "memory://".to_string(),
            timeout: 0,
            ..LockSettings::default()
        };
        let a = Locker::with_cache(settings.clone(), cache.clone()).unwrap();
        let b = Locker::with_cache(settings, cache.clone()).unwrap();

        let first = a.lock("report", LockOptions::default()).await.unwrap();
        let second = b.lock("report", LockOptions::default()).await.unwrap();

        let guard = first.acquire().await.unwrap();
        assert!(second.acquire().await.unwrap_err().is_timeout());
        guard.release().await.unwrap();
        second.acquire().await.unwrap().release().await.unwrap();
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_run_calls_acquire_then_release() {
        let backend = ScriptedBackend::new("lock:somekey");
        let lock = Lock::from_backend(backend.clone());

        let value = lock.run(async { 2 + 4 }).await.unwrap();

        assert_eq!(value, 6);
        assert_eq!(backend.method_calls(), vec!["acquire", "release"]);
    }

    #[tokio::test]
    async fn test_run_releases_when_body_fails() {
        let backend = ScriptedBackend::new("lock:somekey");
        let lock = Lock::from_backend(backend.clone());

        let result: LockResult<Result<(), String>> =
            lock.run(async { Err("boom".to_string()) }).await;

        assert_eq!(result.unwrap(), Err("boom".to_string()));
        assert_eq!(backend.method_calls(), vec!["acquire", "release"]);
    }

    #[tokio::test]
    async fn test_run_releases_when_body_panics() {
        let backend = ScriptedBackend::new("lock:somekey");
        let lock = Lock::from_backend(backend.clone());

        let outcome = AssertUnwindSafe(lock.run(async {
            if backend.method_calls().len() == 1 {
                panic!("critical section blew up");
            }
        }))
        .catch_unwind()
        .await;

        assert!(outcome.is_err());
        assert_eq!(backend.method_calls(), vec!["acquire", "release"]);
    }

    #[tokio::test]
    async fn test_run_skips_body_on_timeout() {
        let backend = ScriptedBackend::contended("lock:somekey");
        let lock = Lock::from_backend(backend.clone());
        let mut entered = false;

        let err = lock
            .run(async {
                entered = true;
            })
            .await
            .unwrap_err();

        assert!(matches!(err, LockError::Timeout { .. }));
        assert!(!entered);
        assert_eq!(backend.method_calls(), vec!["acquire"]);
    }

    #[tokio::test]
    async fn test_run_reports_release_failure() {
        let backend = ScriptedBackend::failing_release("lock:somekey");
        let lock = Lock::from_backend(backend.clone());

        let err = lock.run(async {}).await.unwrap_err();

        assert!(matches!(err, LockError::StoreUnavailable(_)));
        assert_eq!(backend.method_calls(), vec!["acquire", "release"]);
    }

    #[tokio::test]
    async fn test_guard_early_return_releases() {
        async fn critical(lock: &Lock) -> LockResult<()> {
            let _guard = lock.acquire().await?;
            Err(LockError::StoreUnavailable("early exit".to_string()))
        }

        let backend = ScriptedBackend::new("lock:somekey");
        let lock = Lock::from_backend(backend.clone());

        assert!(critical(&lock).await.is_err());
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(backend.method_calls(), vec!["acquire", "release"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_empty_store_acquire_then_release() {
        let cache = ClientCache::new();
        let store = Arc::new(MemoryStore::new());
        cache.insert("redis://", store.clone()).await.unwrap();
        let locker = Locker::with_cache(LockSettings::default(), cache).unwrap();

        let lock = locker.lock("scenario-a", LockOptions::default()).await.unwrap();
        let guard = lock.acquire().await.unwrap();
        assert!(store.get("lock:scenario-a").await.unwrap().is_some());

        guard.release().await.unwrap();
        assert!(store.get("lock:scenario-a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_inspect_reports_lease_state() {
        let cache = ClientCache::new();
        let store = Arc::new(MemoryStore::new());
        cache.insert("memory://", store.clone()).await.unwrap();
        let settings = LockSettings {
            connection: "memory://".to_string(),
            ..LockSettings::default()
        };
        let locker = Locker::with_cache(settings, cache).unwrap();
        let options = LockOptions::default();

        assert_eq!(
            locker.inspect("jobs", &options).await.unwrap(),
            LeaseStatus::Available
        );

        let lock = locker.lock("jobs", options.clone()).await.unwrap();
        let guard = lock.acquire().await.unwrap();
        assert!(matches!(
            locker.inspect("jobs", &options).await.unwrap(),
            LeaseStatus::Held { .. }
        ));
        guard.release().await.unwrap();

        let open = LockOptions::default()
            .with_connection("open://")
            .with_backend(BackendKind::Open);
        assert_eq!(
            locker.inspect("jobs", &open).await.unwrap(),
            LeaseStatus::Available
        );
    }

    #[tokio::test]
    async fn test_acquire_until_cancelled_returns_guard() {
        let locker = Locker::new(open_settings()).unwrap();
        let lock = locker.lock("jobs", LockOptions::default()).await.unwrap();
        let token = CancellationToken::new();

        let guard = lock.acquire_until_cancelled(&token).await.unwrap();
        assert_eq!(guard.key(), "lock:jobs");
        guard.release().await.unwrap();
    }
}
