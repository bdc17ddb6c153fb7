//! Call-recording store for lease algorithm tests

use super::{LeaseStore, MemoryStore};
use crate::error::{LockError, LockResult};
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StoreCall {
    SetIfAbsent,
    Get,
    GetAndSet,
    Expire,
    Delete,
}

/// Wraps a [`MemoryStore`] and records every call made against it
///
/// `interloper` simulates a contender that swaps its own value in right
/// before our `get_and_set`, so the swap returns something other than what
/// we read. `fail_deletes` and `fail_expires` make `delete` or `expire`
/// report an unreachable store.
#[derive(Debug, Default)]
pub(crate) struct RecordingStore {
    pub(crate) inner: MemoryStore,
    calls: Mutex<Vec<StoreCall>>,
    interloper: Mutex<Option<String>>,
    fail_deletes: bool,
    fail_expires: bool,
}

impl RecordingStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_deletes() -> Self {
        Self {
            fail_deletes: true,
            ..Self::default()
        }
    }

    pub(crate) fn failing_expires() -> Self {
        Self {
            fail_expires: true,
            ..Self::default()
        }
    }

    pub(crate) async fn seed(&self, key: &str, value: &str) {
        self.inner.get_and_set(key, value).await.unwrap();
    }

    pub(crate) fn race_next_swap_with(&self, value: &str) {
        *self.interloper.lock().unwrap() = Some(value.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl LeaseStore for RecordingStore {
    async fn set_if_absent(&self, key: &str, value: &str) -> LockResult<bool> {
        self.record(StoreCall::SetIfAbsent);
        self.inner.set_if_absent(key, value).await
    }

    async fn get(&self, key: &str) -> LockResult<Option<String>> {
        self.record(StoreCall::Get);
        self.inner.get(key).await
    }

    async fn get_and_set(&self, key: &str, value: &str) -> LockResult<Option<String>> {
        self.record(StoreCall::GetAndSet);
        let interloper = self.interloper.lock().unwrap().take();
        if let Some(theirs) = interloper {
            self.inner.get_and_set(key, &theirs).await?;
        }
        self.inner.get_and_set(key, value).await
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> LockResult<()> {
        self.record(StoreCall::Expire);
        if self.fail_expires {
            return Err(LockError::StoreUnavailable("connection reset".to_string()));
        }
        self.inner.expire(key, ttl_secs).await
    }

    async fn delete(&self, key: &str) -> LockResult<()> {
        self.record(StoreCall::Delete);
        if self.fail_deletes {
            return Err(LockError::StoreUnavailable("connection refused".to_string()));
        }
        self.inner.delete(key).await
    }
}
