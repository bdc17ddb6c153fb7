//! Process-local lease store

use super::LeaseStore;
use crate::error::LockResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now < at).unwrap_or(true)
    }
}

/// In-memory lease store
///
/// Every operation runs under one mutex, which gives the same per-key
/// atomicity a real store provides. TTLs are honoured lazily: an expired
/// entry is dropped the next time it is touched.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|e| e.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remaining TTL of `key`, if it has one
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }
}

fn live_entry<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    let now = Instant::now();
    if entries.get(key).is_some_and(|e| !e.is_live(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

#[async_trait]
impl LeaseStore for MemoryStore {
    async fn set_if_absent(&self, key: &str, value: &str) -> LockResult<bool> {
        let mut entries = self.entries.lock().await;
        if live_entry(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> LockResult<Option<String>> {
        let mut entries = self.entries.lock().await;
        Ok(live_entry(&mut entries, key).map(|e| e.value.clone()))
    }

    async fn get_and_set(&self, key: &str, value: &str) -> LockResult<Option<String>> {
        let mut entries = self.entries.lock().await;
        let previous = live_entry(&mut entries, key).map(|e| e.value.clone());
        // A plain SET clears any TTL, same as Redis GETSET
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(previous)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> LockResult<()> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = live_entry(&mut entries, key) {
            // A TTL past the end of the clock never expires
            entry.expires_at = Instant::now().checked_add(Duration::from_secs(ttl_secs));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> LockResult<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
