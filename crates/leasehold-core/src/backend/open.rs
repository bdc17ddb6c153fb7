//! No-op backend

use super::{LeaseTerms, LockBackend};
use crate::error::LockResult;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Backend that grants every lock immediately
///
/// Used when locking is disabled, and for exercising code paths that take a
/// lock without a store behind them.
#[derive(Debug, Clone)]
pub struct OpenLock {
    terms: LeaseTerms,
}

impl OpenLock {
    pub fn new(terms: LeaseTerms) -> Self {
        Self { terms }
    }
}

#[async_trait]
impl LockBackend for OpenLock {
    fn terms(&self) -> &LeaseTerms {
        &self.terms
    }

    async fn acquire_with(&self, _cancel: Option<&CancellationToken>) -> LockResult<()> {
        Ok(())
    }

    async fn release(&self) -> LockResult<()> {
        Ok(())
    }
}
