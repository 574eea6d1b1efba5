//! Destination listings by name
//!
//! Each (kind, parent) listing is fetched at most once per run unless a
//! refresh is forced by an "already exists" conflict. Concurrent steps
//! waiting on the same listing share one request.

use crate::client::{DestinationClient, ExistingResource};
use crate::error::ApiError;
use crate::retry::CallGuard;
use dashmap::DashMap;
use orgclone_catalog::{DestId, ResourceKind};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

type Listing = HashMap<String, ExistingResource>;
type Slot = Arc<OnceCell<Arc<Listing>>>;

/// Lazily loaded name index of destination resources
#[derive(Debug, Default)]
pub struct DestinationIndex {
    listings: DashMap<(ResourceKind, Option<DestId>), Slot>,
}

impl DestinationIndex {
    /// Empty index
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Listing for (kind, parent), loading it on first use
    pub async fn listing(
        &self,
        destination: &dyn DestinationClient,
        guard: &CallGuard,
        kind: ResourceKind,
        parent: Option<&DestId>,
    ) -> Result<Arc<Listing>, ApiError> {
        let slot = self
            .listings
            .entry((kind, parent.cloned()))
            .or_default()
            .value()
            .clone();
        slot.get_or_try_init(|| load(destination, guard, kind, parent))
            .await
            .cloned()
    }

    /// Existing resource named `name`, if any
    pub async fn find(
        &self,
        destination: &dyn DestinationClient,
        guard: &CallGuard,
        kind: ResourceKind,
        parent: Option<&DestId>,
        name: &str,
    ) -> Result<Option<ExistingResource>, ApiError> {
        let listing = self.listing(destination, guard, kind, parent).await?;
        Ok(listing.get(name).cloned())
    }

    /// Drop the cached listing and read it again
    pub async fn refresh(
        &self,
        destination: &dyn DestinationClient,
        guard: &CallGuard,
        kind: ResourceKind,
        parent: Option<&DestId>,
    ) -> Result<Arc<Listing>, ApiError> {
        self.listings.remove(&(kind, parent.cloned()));
        self.listing(destination, guard, kind, parent).await
    }
}

async fn load(
    destination: &dyn DestinationClient,
    guard: &CallGuard,
    kind: ResourceKind,
    parent: Option<&DestId>,
) -> Result<Arc<Listing>, ApiError> {
    let existing = guard
        .call(|| destination.list_existing(kind, parent.cloned()))
        .await
        .0?;
    let mut listing = Listing::with_capacity(existing.len());
    for resource in existing {
        listing.entry(resource.name.clone()).or_insert(resource);
    }
    Ok(Arc::new(listing))
}
