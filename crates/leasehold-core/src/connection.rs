//! Connection descriptors and the shared client cache
//!
//! A connection descriptor has the shape
//! `scheme://[user[:password]@]host[:port][/db][?ignored]`. Parsing is
//! scheme-aware only in that unknown schemes are rejected; defaults for
//! missing fields are applied by the backend that consumes the descriptor.

use crate::backend::BackendKind;
use crate::error::{LockError, LockResult};
use crate::store::LeaseStore;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

/// Default store host
pub const DEFAULT_HOST: &str = "localhost";

/// Default store port
pub const DEFAULT_PORT: u16 = 6379;

/// Default database index
pub const DEFAULT_DB: i64 = 0;

/// Parsed connection descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    scheme: String,
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    /// Raw path segment; empty when the descriptor has no `/db` part
    db: String,
}

impl ConnectionInfo {
    /// Parse a connection descriptor
    ///
    /// Query strings are accepted and discarded. Credentials are kept in
    /// their percent-encoded form.
    pub fn parse(descriptor: &str) -> LockResult<Self> {
        let url = Url::parse(descriptor.trim()).map_err(|e| {
            LockError::config(format!("Malformed connection descriptor '{}': {}", descriptor, e))
        })?;

        let scheme = url.scheme().to_ascii_lowercase();
        // Rejects schemes no backend can serve
        BackendKind::from_scheme(&scheme)?;

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .map(str::to_string);
        let username = Some(url.username())
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        let password = url.password().map(str::to_string);
        let db = url.path().trim_start_matches('/').to_string();

        Ok(Self {
            scheme,
            host,
            port: url.port(),
            username,
            password,
            db,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Raw database segment (empty when absent)
    pub fn db(&self) -> &str {
        &self.db
    }

    /// Whether the connection must use TLS
    pub fn tls(&self) -> bool {
        self.scheme == "rediss"
    }

    pub fn host_or_default(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST)
    }

    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// Database index, defaulting to 0 when the segment is empty
    pub fn db_index(&self) -> LockResult<i64> {
        if self.db.is_empty() {
            return Ok(DEFAULT_DB);
        }
        self.db.parse().map_err(|_| {
            LockError::config(format!(
                "Database segment '{}' is not a numeric index",
                self.db
            ))
        })
    }

    /// Redis URL with every default filled in
    pub fn redis_url(&self) -> LockResult<String> {
        let scheme = if self.tls() { "rediss" } else { "redis" };
        let auth = match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!("{}:{}@", user, pass),
            (None, Some(pass)) => format!(":{}@", pass),
            (Some(user), None) => format!("{}@", user),
            (None, None) => String::new(),
        };
        Ok(format!(
            "{}://{}{}:{}/{}",
            scheme,
            auth,
            self.host_or_default(),
            self.port_or_default(),
            self.db_index()?
        ))
    }

    /// Key under which a client for this descriptor is cached
    ///
    /// Credentials are part of the key so two descriptors that differ only
    /// by password never share a connection.
    pub fn cache_key(&self) -> String {
        format!(
            "{}://{}:{}@{}:{}/{}",
            self.scheme,
            self.username.as_deref().unwrap_or_default(),
            self.password.as_deref().unwrap_or_default(),
            self.host.as_deref().unwrap_or_default(),
            self.port.map(|p| p.to_string()).unwrap_or_default(),
            self.db
        )
    }
}

impl fmt::Display for ConnectionInfo {
    /// Renders the descriptor with the password masked
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme)?;
        match (&self.username, &self.password) {
            (Some(user), Some(_)) => write!(f, "{}:***@", user)?,
            (None, Some(_)) => write!(f, ":***@")?,
            (Some(user), None) => write!(f, "{}@", user)?,
            (None, None) => {}
        }
        if let Some(host) = &self.host {
            write!(f, "{}", host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        if !self.db.is_empty() {
            write!(f, "/{}", self.db)?;
        }
        Ok(())
    }
}

/// Shared, lazily populated cache of store clients
///
/// One client is kept per distinct descriptor, so every lock created through
/// the same cache reuses the same connection. Cloning the cache shares the
/// underlying map.
#[derive(Clone, Default)]
pub struct ClientCache {
    clients: Arc<Mutex<HashMap<String, Arc<dyn LeaseStore>>>>,
}

impl ClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the cached client for `info`, connecting on first use
    ///
    /// Returns `None` for backends that need no store.
    pub async fn get_or_connect(
        &self,
        kind: BackendKind,
        info: &ConnectionInfo,
    ) -> LockResult<Option<Arc<dyn LeaseStore>>> {
        if !kind.needs_store() {
            return Ok(None);
        }

        let cache_key = info.cache_key();
        let mut clients = self.clients.lock().await;

        if let Some(client) = clients.get(&cache_key) {
            debug!(connection = %info, "Reusing cached store client");
            return Ok(Some(client.clone()));
        }

        let client = kind.get_client(info).await?;
        if let Some(client) = &client {
            clients.insert(cache_key, client.clone());
            info!(backend = %kind, connection = %info, "Store client initialized");
        }
        Ok(client)
    }

    /// Register a pre-built store under a descriptor
    pub async fn insert(&self, descriptor: &str, store: Arc<dyn LeaseStore>) -> LockResult<()> {
        let info = ConnectionInfo::parse(descriptor)?;
        self.clients.lock().await.insert(info.cache_key(), store);
        Ok(())
    }

    /// Number of cached clients
    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }

    /// Drop every cached client
    pub async fn clear(&self) {
        let mut clients = self.clients.lock().await;
        let count = clients.len();
        clients.clear();
        debug!(count, "Store clients dropped");
    }
}

impl fmt::Debug for ClientCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCache").finish_non_exhaustive()
    }
}
