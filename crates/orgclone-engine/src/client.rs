//! Source and destination API seams
//!
//! Request shaping, pagination and authentication live behind these traits.
//! The engine only sees payloads and typed [`ApiError`]s.

use crate::error::ApiError;
use async_trait::async_trait;
use orgclone_catalog::{DestId, ResourceKind, SourceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Read access to the source organization
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// List every instance of a collection kind, optionally under a site
    async fn list(&self, kind: ResourceKind, parent: Option<SourceId>) -> Result<Vec<Value>, ApiError>;

    /// Fetch one instance in full
    async fn get(&self, kind: ResourceKind, id: &SourceId, parent: Option<SourceId>) -> Result<Value, ApiError>;

    /// List the organization's sites
    async fn list_sites(&self) -> Result<Vec<Value>, ApiError> {
        self.list(ResourceKind::Site, None).await
    }

    /// Fetch a settings object; `None` when the owner has none
    async fn get_settings(&self, kind: ResourceKind, parent: Option<SourceId>) -> Result<Option<Value>, ApiError>;
}

/// A resource already present in the destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingResource {
    /// Destination id
    pub id: DestId,
    /// Value of the kind's name field
    pub name: String,
    /// Listed payload, when the backend returns one
    #[serde(default)]
    pub payload: Value,
}

/// Target of a WLAN template apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WlanApply {
    /// Every site of the destination organization
    Org,
    /// Exactly these destination sites (replaces the previous list)
    Sites(Vec<DestId>),
}

/// Write access to the destination organization
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DestinationClient: Send + Sync {
    /// Create one instance of a collection kind and return its id
    async fn create(&self, kind: ResourceKind, parent: Option<DestId>, payload: Value) -> Result<DestId, ApiError>;

    /// Write a settings object in place
    async fn put_settings(&self, kind: ResourceKind, parent: Option<DestId>, payload: Value) -> Result<(), ApiError>;

    /// List existing instances, for name-based idempotence
    async fn list_existing(&self, kind: ResourceKind, parent: Option<DestId>) -> Result<Vec<ExistingResource>, ApiError>;

    /// Bind a template to a site
    async fn assign_template(&self, site: &DestId, kind: ResourceKind, template: &DestId) -> Result<(), ApiError>;

    /// Apply a WLAN template org-wide or to a site list
    async fn apply_wlan_template(&self, template: &DestId, target: WlanApply) -> Result<(), ApiError>;

    /// Send an administrator invitation.
    ///
    /// An invitee who already has access or a pending invitation is an
    /// "already exists" conflict.
    async fn invite_admin(&self, invitation: Value) -> Result<(), ApiError>;

    /// Populate the destination with the backend's native whole-org clone.
    ///
    /// Returns `false` when the backend offers no native clone.
    async fn clone_org(&self, _source_org_id: &str) -> Result<bool, ApiError> {
        Ok(false)
    }
}
