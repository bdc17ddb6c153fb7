//! Lease records
//!
//! A lease is stored as a single absolute expiry timestamp in fractional
//! Unix seconds. No owner identity is recorded, so any contender may reclaim
//! a lease whose timestamp has passed.

use crate::error::LockResult;
use crate::store::LeaseStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Current wall-clock time in fractional Unix seconds
pub fn now_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Lease value proposed by a contender acquiring now: `now + expires + 1s`
pub fn expiry_after(expires: Duration) -> String {
    format_expiry(now_secs() + expires.as_secs_f64() + 1.0)
}

pub fn format_expiry(secs: f64) -> String {
    format!("{:.6}", secs)
}

/// Parse a stored lease value
pub fn parse_expiry(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite())
}

/// Store-side TTL backing a lease: `ceil(expires)` seconds, at least one
pub fn ttl_secs(expires: Duration) -> u64 {
    (expires.as_secs_f64().ceil() as u64).max(1)
}

/// What a key currently holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LeaseStatus {
    /// No lease is stored
    Available,
    /// A lease is stored and has not expired
    Held { expires_at: DateTime<Utc> },
    /// A lease is stored but its expiry has passed
    Stale { expired_at: DateTime<Utc> },
    /// The stored value is not a timestamp; contenders treat it as stale
    Corrupted { raw: String },
}

impl LeaseStatus {
    /// Classify a raw store value
    pub fn from_value(value: Option<&str>) -> Self {
        let Some(raw) = value else {
            return Self::Available;
        };
        match parse_expiry(raw).and_then(to_datetime) {
            Some(at) if at > Utc::now() => Self::Held { expires_at: at },
            Some(at) => Self::Stale { expired_at: at },
            None => Self::Corrupted {
                raw: raw.to_string(),
            },
        }
    }

    /// Whether a contender could take this lease right now
    pub fn is_reclaimable(&self) -> bool {
        !matches!(self, Self::Held { .. })
    }
}

impl fmt::Display for LeaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Held { expires_at } => write!(f, "held until {}", expires_at.to_rfc3339()),
            Self::Stale { expired_at } => write!(f, "stale since {}", expired_at.to_rfc3339()),
            Self::Corrupted { raw } => write!(f, "corrupted value '{}'", raw),
        }
    }
}

/// Read the lease stored under a fully prefixed key
pub async fn inspect(store: &dyn LeaseStore, key: &str) -> LockResult<LeaseStatus> {
    let value = store.get(key).await?;
    Ok(LeaseStatus::from_value(value.as_deref()))
}

fn to_datetime(secs: f64) -> Option<DateTime<Utc>> {
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}
