//! Backend double that records the calls a facade makes

use crate::backend::{LeaseTerms, LockBackend};
use crate::error::{LockError, LockResult};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub(crate) struct ScriptedBackend {
    terms: LeaseTerms,
    calls: Mutex<Vec<&'static str>>,
    contended: bool,
    failing_release: bool,
}

impl ScriptedBackend {
    pub(crate) fn new(key: &str) -> Arc<Self> {
        Arc::new(Self::build(key, false, false))
    }

    /// Every acquire times out
    pub(crate) fn contended(key: &str) -> Arc<Self> {
        Arc::new(Self::build(key, true, false))
    }

    /// Every release reports an unreachable store
    pub(crate) fn failing_release(key: &str) -> Arc<Self> {
        Arc::new(Self::build(key, false, true))
    }

    fn build(key: &str, contended: bool, failing_release: bool) -> Self {
        Self {
            terms: LeaseTerms::new(key, Duration::from_secs(10), 0),
            calls: Mutex::new(Vec::new()),
            contended,
            failing_release,
        }
    }

    pub(crate) fn method_calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LockBackend for ScriptedBackend {
    fn terms(&self) -> &LeaseTerms {
        &self.terms
    }

    async fn acquire_with(&self, _cancel: Option<&CancellationToken>) -> LockResult<()> {
        self.calls.lock().unwrap().push("acquire");
        if self.contended {
            return Err(LockError::Timeout {
                key: self.terms.key.clone(),
                attempts: 1,
            });
        }
        Ok(())
    }

    async fn release(&self) -> LockResult<()> {
        self.calls.lock().unwrap().push("release");
        if self.failing_release {
            return Err(LockError::StoreUnavailable("connection reset".to_string()));
        }
        Ok(())
    }
}
