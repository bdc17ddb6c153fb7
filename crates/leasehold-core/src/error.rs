//! Error types for Leasehold

use thiserror::Error;

/// Result type for lock operations
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Lock errors
///
/// `Timeout` and `Cancelled` mean the lease was contended and the caller gave
/// up; the store variants mean the store itself could not be reached or
/// rejected a command. Callers are expected to treat the two groups
/// differently.
#[derive(Error, Debug)]
pub enum LockError {
    // Configuration errors (E600-E699)
    #[error("Configuration error: {0}")]
    Configuration(String),

    // Lock errors (E300-E399)
    #[error("Lock timeout: key '{key}' is still held after {attempts} attempt(s)")]
    Timeout { key: String, attempts: u64 },

    #[error("Lock acquisition cancelled for key '{key}'")]
    Cancelled { key: String },

    // Store errors (E400-E499)
    #[error("Store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LockError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "E300",
            Self::Cancelled { .. } => "E301",
            Self::Store(_) => "E400",
            Self::StoreUnavailable(_) => "E401",
            Self::Configuration(_) => "E600",
            Self::Io(_) => "E9999",
        }
    }

    /// Whether the lease was contended (as opposed to a store or config fault)
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled { .. })
    }

    /// Get suggestion for resolving this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::Configuration(_) => Some("leasehold config show".to_string()),
            Self::Timeout { .. } => Some("leasehold inspect <KEY>".to_string()),
            Self::Store(_) | Self::StoreUnavailable(_) => {
                Some("Check that the store in 'connection' is reachable".to_string())
            }
            Self::Cancelled { .. } | Self::Io(_) => None,
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
