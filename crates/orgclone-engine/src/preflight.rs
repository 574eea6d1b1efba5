//! Preflight simulation
//!
//! A preflight is a full run in [`Mode::Simulated`]: same inventory, same
//! plan, same rewrite and existence checks, but no mutating call leaves the
//! engine. The destination is wrapped in [`ReadOnlyDestination`] so that a
//! stray write surfaces as a failed step instead of a change.

use crate::client::{DestinationClient, ExistingResource, WlanApply};
use crate::error::{ApiError, EngineError};
use crate::ledger::Mode;
use crate::migration::{Migration, RunReport};
use async_trait::async_trait;
use orgclone_catalog::{DestId, ResourceKind};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::error;

/// Destination wrapper that only lets reads through
pub struct ReadOnlyDestination {
    inner: Arc<dyn DestinationClient>,
    blocked: AtomicUsize,
}

impl std::fmt::Debug for ReadOnlyDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadOnlyDestination")
            .field("blocked", &self.blocked_calls())
            .finish_non_exhaustive()
    }
}

impl ReadOnlyDestination {
    /// Wrap a destination
    #[must_use]
    pub fn new(inner: Arc<dyn DestinationClient>) -> Self {
        Self {
            inner,
            blocked: AtomicUsize::new(0),
        }
    }

    /// Mutating calls refused so far
    #[must_use]
    pub fn blocked_calls(&self) -> usize {
        self.blocked.load(Ordering::SeqCst)
    }

    fn refuse(&self, call: &str) -> ApiError {
        self.blocked.fetch_add(1, Ordering::SeqCst);
        error!(call, "mutating call attempted during preflight");
        ApiError::Permission(format!("{call} refused during preflight"))
    }
}

#[async_trait]
impl DestinationClient for ReadOnlyDestination {
    async fn create(&self, _kind: ResourceKind, _parent: Option<DestId>, _payload: Value) -> Result<DestId, ApiError> {
        Err(self.refuse("create"))
    }

    async fn put_settings(&self, _kind: ResourceKind, _parent: Option<DestId>, _payload: Value) -> Result<(), ApiError> {
        Err(self.refuse("put_settings"))
    }

    async fn list_existing(&self, kind: ResourceKind, parent: Option<DestId>) -> Result<Vec<ExistingResource>, ApiError> {
        self.inner.list_existing(kind, parent).await
    }

    async fn assign_template(&self, _site: &DestId, _kind: ResourceKind, _template: &DestId) -> Result<(), ApiError> {
        Err(self.refuse("assign_template"))
    }

    async fn apply_wlan_template(&self, _template: &DestId, _target: WlanApply) -> Result<(), ApiError> {
        Err(self.refuse("apply_wlan_template"))
    }

    async fn invite_admin(&self, _invitation: Value) -> Result<(), ApiError> {
        Err(self.refuse("invite_admin"))
    }

    async fn clone_org(&self, _source_org_id: &str) -> Result<bool, ApiError> {
        Err(self.refuse("clone_org"))
    }
}

impl Migration {
    /// Simulate the run: every step the real run would take, no writes.
    ///
    /// The returned plan and per-step statuses match what [`Migration::execute`]
    /// would produce against an unchanged, fault-free destination.
    pub async fn preflight(&self) -> Result<RunReport, EngineError> {
        self.run(Mode::Simulated).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockDestinationClient;

    #[tokio::test]
    async fn reads_pass_and_writes_are_refused() {
        let mut inner = MockDestinationClient::new();
        inner.expect_list_existing().times(1).returning(|_, _| Ok(Vec::new()));
        inner.expect_create().never();

        let readonly = ReadOnlyDestination::new(Arc::new(inner));
        assert!(readonly.list_existing(ResourceKind::RfTemplate, None).await.unwrap().is_empty());
        let err = readonly
            .create(ResourceKind::RfTemplate, None, Value::Null)
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(readonly.blocked_calls(), 1);
    }
}
