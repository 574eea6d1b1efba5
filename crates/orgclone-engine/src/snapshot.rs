//! Inventory snapshots
//!
//! A JSON document holding a source organization's payloads, and optionally
//! the destination's existing resources. [`SnapshotSource`] and
//! [`SnapshotDestination`] serve it through the client traits so a preflight
//! can run offline.

use crate::client::{DestinationClient, ExistingResource, SourceClient, WlanApply};
use crate::config::load_file;
use crate::error::{ApiError, ConfigError};
use async_trait::async_trait;
use orgclone_catalog::{DestId, ResourceKind, SourceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Payloads owned by one source site
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteSnapshot {
    /// Site-scoped collections by kind
    pub collections: BTreeMap<ResourceKind, Vec<Value>>,
    /// Site settings by kind
    pub settings: BTreeMap<ResourceKind, Value>,
}

/// Offline copy of a source organization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InventorySnapshot {
    /// Org-level collections, sites included under `site`
    pub org: BTreeMap<ResourceKind, Vec<Value>>,
    /// Org-level settings by kind
    pub org_settings: BTreeMap<ResourceKind, Value>,
    /// Per-site payloads keyed by source site id
    pub sites: BTreeMap<SourceId, SiteSnapshot>,
    /// Org-level resources already present in the destination
    pub destination: BTreeMap<ResourceKind, Vec<ExistingResource>>,
}

impl InventorySnapshot {
    /// Load from a `.json`, `.yaml` or `.toml` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_file(path.as_ref())
    }

    /// Add an org-level payload
    #[must_use]
    pub fn with_org(mut self, kind: ResourceKind, payload: Value) -> Self {
        self.org.entry(kind).or_default().push(payload);
        self
    }

    /// Set an org-level settings object
    #[must_use]
    pub fn with_org_settings(mut self, kind: ResourceKind, payload: Value) -> Self {
        self.org_settings.insert(kind, payload);
        self
    }

    /// Add a payload owned by `site`
    #[must_use]
    pub fn with_site(mut self, site: impl Into<SourceId>, kind: ResourceKind, payload: Value) -> Self {
        self.sites
            .entry(site.into())
            .or_default()
            .collections
            .entry(kind)
            .or_default()
            .push(payload);
        self
    }

    /// Set a settings object owned by `site`
    #[must_use]
    pub fn with_site_settings(mut self, site: impl Into<SourceId>, kind: ResourceKind, payload: Value) -> Self {
        self.sites.entry(site.into()).or_default().settings.insert(kind, payload);
        self
    }

    /// Record a resource already present in the destination
    #[must_use]
    pub fn with_existing(mut self, kind: ResourceKind, existing: ExistingResource) -> Self {
        self.destination.entry(kind).or_default().push(existing);
        self
    }

    fn collection(&self, kind: ResourceKind, parent: Option<&SourceId>) -> &[Value] {
        let listing = match parent {
            None => self.org.get(&kind),
            Some(site) => self.sites.get(site).and_then(|s| s.collections.get(&kind)),
        };
        listing.map_or(&[], Vec::as_slice)
    }
}

/// [`SourceClient`] over a snapshot
#[derive(Debug, Clone)]
pub struct SnapshotSource {
    snapshot: Arc<InventorySnapshot>,
}

impl SnapshotSource {
    /// Serve `snapshot` as the source organization
    #[must_use]
    pub fn new(snapshot: Arc<InventorySnapshot>) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl SourceClient for SnapshotSource {
    async fn list(&self, kind: ResourceKind, parent: Option<SourceId>) -> Result<Vec<Value>, ApiError> {
        Ok(self.snapshot.collection(kind, parent.as_ref()).to_vec())
    }

    async fn get(&self, kind: ResourceKind, id: &SourceId, parent: Option<SourceId>) -> Result<Value, ApiError> {
        self.snapshot
            .collection(kind, parent.as_ref())
            .iter()
            .find(|payload| payload.get("id").and_then(Value::as_str) == Some(id.as_str()))
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("{kind} '{id}'")))
    }

    async fn get_settings(&self, kind: ResourceKind, parent: Option<SourceId>) -> Result<Option<Value>, ApiError> {
        let settings = match &parent {
            None => self.snapshot.org_settings.get(&kind),
            Some(site) => self.snapshot.sites.get(site).and_then(|s| s.settings.get(&kind)),
        };
        Ok(settings.cloned())
    }
}

/// Read-only [`DestinationClient`] listing a snapshot's existing resources
#[derive(Debug, Clone)]
pub struct SnapshotDestination {
    snapshot: Arc<InventorySnapshot>,
}

impl SnapshotDestination {
    /// List `snapshot`'s existing resources as the destination
    #[must_use]
    pub fn new(snapshot: Arc<InventorySnapshot>) -> Self {
        Self { snapshot }
    }
}

fn read_only() -> ApiError {
    ApiError::Permission("snapshot destination is read-only".into())
}

#[async_trait]
impl DestinationClient for SnapshotDestination {
    async fn create(&self, _kind: ResourceKind, _parent: Option<DestId>, _payload: Value) -> Result<DestId, ApiError> {
        Err(read_only())
    }

    async fn put_settings(&self, _kind: ResourceKind, _parent: Option<DestId>, _payload: Value) -> Result<(), ApiError> {
        Err(read_only())
    }

    /// Org-level listings come from the snapshot. Listing under a site the
    /// destination does not have is `NotFound`.
    async fn list_existing(&self, kind: ResourceKind, parent: Option<DestId>) -> Result<Vec<ExistingResource>, ApiError> {
        match parent {
            None => Ok(self.snapshot.destination.get(&kind).cloned().unwrap_or_default()),
            Some(site) => {
                let known = self
                    .snapshot
                    .destination
                    .get(&ResourceKind::Site)
                    .is_some_and(|sites| sites.iter().any(|existing| existing.id == site));
                if known {
                    Ok(Vec::new())
                } else {
                    Err(ApiError::NotFound(format!("site '{site}'")))
                }
            }
        }
    }

    async fn assign_template(&self, _site: &DestId, _kind: ResourceKind, _template: &DestId) -> Result<(), ApiError> {
        Err(read_only())
    }

    async fn apply_wlan_template(&self, _template: &DestId, _target: WlanApply) -> Result<(), ApiError> {
        Err(read_only())
    }

    async fn invite_admin(&self, _invitation: Value) -> Result<(), ApiError> {
        Err(read_only())
    }
}
