//! Source inventory
//!
//! Collected once per run. Site-scoped kinds are listed only for the sites
//! selected for migration. Kinds whose listing is a summary are completed
//! lazily through [`Inventory::detail`], which caches each fetch.

use crate::client::SourceClient;
use crate::error::{ApiError, EngineError};
use crate::retry::CallGuard;
use dashmap::DashMap;
use indexmap::IndexMap;
use orgclone_catalog::{Cardinality, Catalog, KindDescriptor, ResourceInstance, ResourceKind, Scope, SourceId};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Every source instance taking part in a run
#[derive(Debug, Default)]
pub struct Inventory {
    instances: IndexMap<ResourceKind, Vec<Arc<ResourceInstance>>>,
    details: DashMap<(ResourceKind, SourceId), Arc<ResourceInstance>>,
}

impl Inventory {
    /// Create an empty inventory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an instance, keeping listing order per kind
    pub fn insert(&mut self, instance: ResourceInstance) {
        self.instances
            .entry(instance.kind)
            .or_default()
            .push(Arc::new(instance));
    }

    /// Instances of `kind` in listing order
    #[must_use]
    pub fn instances(&self, kind: ResourceKind) -> &[Arc<ResourceInstance>] {
        self.instances.get(&kind).map_or(&[], Vec::as_slice)
    }

    /// One instance, preferring a fetched full payload over the listing
    #[must_use]
    pub fn instance(&self, kind: ResourceKind, source_id: &SourceId) -> Option<Arc<ResourceInstance>> {
        if let Some(detail) = self.details.get(&(kind, source_id.clone())) {
            return Some(detail.value().clone());
        }
        self.instances(kind)
            .iter()
            .find(|instance| &instance.source_id == source_id)
            .cloned()
    }

    /// Total number of listed instances
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.values().map(Vec::len).sum()
    }

    /// No instance was collected
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collect the inventory for `kinds`, restricted to `sites` for site-scoped kinds.
    ///
    /// A selected site missing from the source is a configuration error; any
    /// listing failure (after retries) aborts the run.
    pub async fn collect(
        catalog: &Catalog,
        kinds: &[ResourceKind],
        sites: &[SourceId],
        source: &dyn SourceClient,
        guard: &CallGuard,
    ) -> Result<Self, EngineError> {
        let mut inventory = Self::new();

        let needs_sites = kinds.iter().any(|kind| {
            *kind == ResourceKind::Site || catalog.get(*kind).is_some_and(KindDescriptor::is_site_scoped)
        });
        if needs_sites {
            let descriptor = catalog.descriptor(ResourceKind::Site)?;
            let payloads = guard
                .call(|| source.list_sites())
                .await
                .0
                .map_err(|error| inventory_error(ResourceKind::Site, error))?;
            let listed = payloads
                .into_iter()
                .map(|payload| ResourceInstance::from_payload(descriptor, payload, None))
                .collect::<Result<Vec<_>, _>>()
                .map_err(EngineError::MalformedPayload)?;
            for site_id in sites {
                let site = listed
                    .iter()
                    .find(|site| &site.source_id == site_id)
                    .ok_or_else(|| {
                        EngineError::configuration(format!("source site '{site_id}' not found in source organization"))
                    })?;
                if kinds.contains(&ResourceKind::Site) {
                    inventory.insert(site.clone());
                }
            }
        }

        for &kind in kinds {
            if kind == ResourceKind::Site {
                continue;
            }
            let descriptor = catalog.descriptor(kind)?;
            match descriptor.scope {
                Scope::Org => {
                    for instance in fetch(descriptor, None, source, guard).await? {
                        inventory.insert(instance);
                    }
                }
                Scope::Site => {
                    for site_id in sites {
                        for instance in fetch(descriptor, Some(site_id.clone()), source, guard).await? {
                            inventory.insert(instance);
                        }
                    }
                }
            }
            debug!(kind = %kind, count = inventory.instances(kind).len(), "collected source instances");
        }

        info!(instances = inventory.len(), sites = sites.len(), "source inventory collected");
        Ok(inventory)
    }

    /// Full payload for an instance, fetching it once if the listing was a summary
    pub async fn detail(
        &self,
        descriptor: &KindDescriptor,
        listed: &Arc<ResourceInstance>,
        source: &dyn SourceClient,
        guard: &CallGuard,
    ) -> Result<Arc<ResourceInstance>, ApiError> {
        if !descriptor.summary_listing {
            return Ok(listed.clone());
        }
        let key = (listed.kind, listed.source_id.clone());
        if let Some(cached) = self.details.get(&key) {
            return Ok(cached.value().clone());
        }

        let parent = listed.parent.clone();
        let mut payload: Value = guard
            .call(|| source.get(listed.kind, &listed.source_id, parent.clone()))
            .await
            .0?;
        if let Some(object) = payload.as_object_mut() {
            object
                .entry("id")
                .or_insert_with(|| Value::String(listed.source_id.to_string()));
        }
        let mut full = ResourceInstance::from_payload(descriptor, payload, parent)
            .map_err(|e| ApiError::Validation(e.to_string()))?;
        full.source_id = listed.source_id.clone();

        let full = Arc::new(full);
        self.details.insert(key, full.clone());
        Ok(full)
    }
}

fn inventory_error(kind: ResourceKind, error: ApiError) -> EngineError {
    EngineError::Inventory { kind, error }
}

async fn fetch(
    descriptor: &KindDescriptor,
    parent: Option<SourceId>,
    source: &dyn SourceClient,
    guard: &CallGuard,
) -> Result<Vec<ResourceInstance>, EngineError> {
    let kind = descriptor.kind;
    match descriptor.cardinality {
        Cardinality::Collection => {
            let payloads = guard
                .call(|| source.list(kind, parent.clone()))
                .await
                .0
                .map_err(|error| inventory_error(kind, error))?;
            payloads
                .into_iter()
                .map(|payload| ResourceInstance::from_payload(descriptor, payload, parent.clone()))
                .collect::<Result<Vec<_>, _>>()
                .map_err(EngineError::MalformedPayload)
        }
        Cardinality::Singleton => {
            let settings = guard
                .call(|| source.get_settings(kind, parent.clone()))
                .await
                .0
                .map_err(|error| inventory_error(kind, error))?;
            settings
                .map(|payload| ResourceInstance::from_payload(descriptor, payload, parent))
                .transpose()
                .map(|instance| instance.into_iter().collect())
                .map_err(EngineError::MalformedPayload)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockSourceClient;
    use crate::retry::RetryConfig;
    use serde_json::json;
    use std::time::Duration;

    fn guard() -> CallGuard {
        let retry = RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            exponential_base: 2.0,
            jitter: false,
        };
        CallGuard::new(retry, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn site_scoped_kinds_are_listed_only_for_selected_sites() {
        let mut source = MockSourceClient::new();
        source.expect_list_sites().returning(|| {
            Ok(vec![
                json!({"id": "s1", "name": "HQ"}),
                json!({"id": "s2", "name": "Branch"}),
            ])
        });
        source
            .expect_get_settings()
            .withf(|kind, parent| *kind == ResourceKind::SiteSettings && parent.as_ref().is_some_and(|p| p.as_str() == "s1"))
            .times(1)
            .returning(|_, _| Ok(Some(json!({"vars": {"a": "1"}}))));

        let inventory = Inventory::collect(
            Catalog::standard(),
            &[ResourceKind::Site, ResourceKind::SiteSettings],
            &[SourceId::new("s1")],
            &source,
            &guard(),
        )
        .await
        .unwrap();

        assert_eq!(inventory.instances(ResourceKind::Site).len(), 1);
        assert_eq!(inventory.instances(ResourceKind::Site)[0].name, "HQ");
        assert_eq!(inventory.instances(ResourceKind::SiteSettings).len(), 1);
    }

    #[tokio::test]
    async fn unknown_site_is_a_configuration_error() {
        let mut source = MockSourceClient::new();
        source.expect_list_sites().returning(|| Ok(vec![json!({"id": "s1", "name": "HQ"})]));

        let err = Inventory::collect(
            Catalog::standard(),
            &[ResourceKind::Site],
            &[SourceId::new("missing")],
            &source,
            &guard(),
        )
        .await
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn listing_failure_aborts_after_retries() {
        let mut source = MockSourceClient::new();
        source
            .expect_list()
            .times(2)
            .returning(|_, _| Err(ApiError::Unavailable("maintenance".into())));

        let err = Inventory::collect(Catalog::standard(), &[ResourceKind::RfTemplate], &[], &source, &guard())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Inventory { kind: ResourceKind::RfTemplate, .. }));
    }

    #[tokio::test]
    async fn payload_without_identity_aborts_collection() {
        let mut source = MockSourceClient::new();
        source
            .expect_list()
            .returning(|_, _| Ok(vec![json!({"id": "rf1", "name": "dense"}), json!({"band_24": {}})]));

        let err = Inventory::collect(Catalog::standard(), &[ResourceKind::RfTemplate], &[], &source, &guard())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::MalformedPayload(orgclone_catalog::CatalogError::MalformedPayload {
                kind: ResourceKind::RfTemplate,
                ..
            })
        ));
        assert!(!err.is_configuration());
    }

    #[tokio::test]
    async fn summary_listings_are_fetched_once() {
        let catalog = Catalog::standard();
        let descriptor = catalog.get(ResourceKind::Sso).unwrap();
        let mut source = MockSourceClient::new();
        source
            .expect_get()
            .times(1)
            .returning(|_, _, _| Ok(json!({"name": "corp-idp", "idp_cert": "PEM", "default_role": "r1"})));

        let mut inventory = Inventory::new();
        inventory.insert(
            ResourceInstance::from_payload(descriptor, json!({"id": "sso1", "name": "corp-idp"}), None).unwrap(),
        );
        let listed = inventory.instances(ResourceKind::Sso)[0].clone();

        let first = inventory.detail(descriptor, &listed, &source, &guard()).await.unwrap();
        let second = inventory.detail(descriptor, &listed, &source, &guard()).await.unwrap();
        assert_eq!(first.source_id.as_str(), "sso1");
        assert_eq!(first.references.len(), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }
}
