//! Process-wide lock settings
//!
//! Settings come from three layers, lowest precedence first: library
//! defaults, an optional TOML file, and `LEASEHOLD_*` environment variables.
//! Per-lock [`LockOptions`](crate::lock::LockOptions) override all three.

use crate::backend::BackendKind;
use crate::connection::ConnectionInfo;
use crate::error::{LockError, LockResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default staleness threshold, in seconds
pub const DEFAULT_EXPIRES_SECS: f64 = 10.0;

/// Default acquisition timeout, in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default namespace for lock keys
pub const DEFAULT_KEY_PREFIX: &str = "lock:";

/// Default connection descriptor
pub const DEFAULT_CONNECTION: &str = "redis://";

/// Lock settings shared by every lock a [`Locker`](crate::lock::Locker) creates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// Backend to use; inferred from the connection scheme when unset
    pub backend: Option<BackendKind>,
    /// Connection descriptor, e.g. `redis://:secret@cache:6379/2`
    pub connection: String,
    /// Seconds after which a lease is considered abandoned
    pub expires: f64,
    /// Seconds to wait for a contended lease; 0 gives up immediately
    pub timeout: u64,
    /// Prefix prepended to every key
    pub key_prefix: String,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            backend: None,
            connection: DEFAULT_CONNECTION.to_string(),
            expires: DEFAULT_EXPIRES_SECS,
            timeout: DEFAULT_TIMEOUT_SECS,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl LockSettings {
    /// Settings directory: `$LEASEHOLD_CONFIG_DIR`, or the platform config dir
    pub fn config_dir() -> LockResult<PathBuf> {
        if let Ok(custom_dir) = env::var("LEASEHOLD_CONFIG_DIR") {
            return Ok(PathBuf::from(custom_dir));
        }
        dirs::config_dir()
            .map(|dir| dir.join("leasehold"))
            .ok_or_else(|| LockError::config("Could not determine config directory"))
    }

    /// Settings file path
    pub fn config_path() -> LockResult<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load the settings file if present, then apply the environment
    pub fn load() -> LockResult<Self> {
        let path = Self::config_path()?;
        let mut settings = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        settings.apply_env_from(|name| env::var(name).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a TOML file
    pub fn load_from(path: &Path) -> LockResult<Self> {
        let contents = fs::read_to_string(path)?;
        let settings: Self = toml::from_str(&contents).map_err(|e| {
            LockError::config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        settings.validate()?;
        debug!(path = %path.display(), "Loaded lock settings");
        Ok(settings)
    }

    pub fn from_toml_str(contents: &str) -> LockResult<Self> {
        let settings: Self = toml::from_str(contents)
            .map_err(|e| LockError::config(format!("Invalid settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> LockResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| LockError::config(format!("Failed to serialize settings: {}", e)))
    }

    /// Overlay values read through `lookup`
    ///
    /// Recognized names: `LEASEHOLD_BACKEND`, `LEASEHOLD_CONNECTION`,
    /// `LEASEHOLD_EXPIRES`, `LEASEHOLD_TIMEOUT`, `LEASEHOLD_KEY_PREFIX`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> LockResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup("LEASEHOLD_BACKEND") {
            self.backend = Some(backend.parse()?);
        }
        if let Some(connection) = lookup("LEASEHOLD_CONNECTION") {
            self.connection = connection;
        }
        if let Some(expires) = lookup("LEASEHOLD_EXPIRES") {
            self.expires = expires.trim().parse().map_err(|_| {
                LockError::config(format!("LEASEHOLD_EXPIRES is not a number: {}", expires))
            })?;
        }
        if let Some(timeout) = lookup("LEASEHOLD_TIMEOUT") {
            self.timeout = timeout.trim().parse().map_err(|_| {
                LockError::config(format!(
                    "LEASEHOLD_TIMEOUT is not a whole number of seconds: {}",
                    timeout
                ))
            })?;
        }
        if let Some(prefix) = lookup("LEASEHOLD_KEY_PREFIX") {
            self.key_prefix = prefix;
        }
        Ok(())
    }

    /// Check that the settings describe a usable lock
    pub fn validate(&self) -> LockResult<()> {
        validate_expires(self.expires)?;
        let info = ConnectionInfo::parse(&self.connection)?;
        if let Some(backend) = self.backend {
            backend.check_scheme(&info)?;
        }
        Ok(())
    }

    /// `expires` as a duration
    pub fn expires_duration(&self) -> LockResult<Duration> {
        validate_expires(self.expires)
    }
}

/// Largest accepted staleness threshold, in seconds
///
/// Keeps the store TTL inside what Redis `EXPIRE` and `Instant` arithmetic
/// accept.
pub const MAX_EXPIRES_SECS: f64 = u32::MAX as f64;

/// Check a staleness threshold and convert it to a duration
pub fn validate_expires(secs: f64) -> LockResult<Duration> {
    if !(secs.is_finite() && secs > 0.0) {
        return Err(LockError::config(format!(
            "expires must be a positive number of seconds, got {}",
            secs
        )));
    }
    if secs > MAX_EXPIRES_SECS {
        return Err(LockError::config(format!(
            "expires must be at most {} seconds, got {}",
            MAX_EXPIRES_SECS, secs
        )));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| LockError::config(format!("expires {} is not a valid duration: {}", secs, e)))
}
