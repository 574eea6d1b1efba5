//! Resource instances fetched from the source organization

use crate::descriptor::{KindDescriptor, ReferencePolicy};
use crate::error::CatalogError;
use crate::kind::ResourceKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier
            #[inline]
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a resource in the source organization
    SourceId
);

string_id!(
    /// Identifier of a resource in the destination organization
    DestId
);

/// Source id used for the org-level instance of a singleton kind
pub const ORG_SINGLETON_ID: &str = "org";

/// One foreign-key value found in a payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceReference {
    /// Field path the value was found at
    pub path: String,
    /// Referenced kind
    pub target: ResourceKind,
    /// Referenced source id
    pub source_id: SourceId,
    /// Treatment when unmapped
    pub policy: ReferencePolicy,
}

/// A fetched source resource. The payload is never mutated after fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceInstance {
    pub kind: ResourceKind,
    pub source_id: SourceId,
    pub name: String,
    pub payload: Arc<Value>,
    pub references: Vec<InstanceReference>,
    /// Owning source site, for site-scoped kinds
    pub parent: Option<SourceId>,
}

impl ResourceInstance {
    /// Build an instance from a fetched payload using the kind's descriptor.
    ///
    /// Singletons are keyed by their owner: the parent site id, or
    /// [`ORG_SINGLETON_ID`] for org-level settings. Collection members are
    /// keyed by `id`, falling back to the name field; a payload with neither
    /// is rejected as [`CatalogError::MalformedPayload`].
    pub fn from_payload(
        descriptor: &KindDescriptor,
        payload: Value,
        parent: Option<SourceId>,
    ) -> Result<Self, CatalogError> {
        let source_id = if descriptor.is_singleton() {
            parent
                .as_ref()
                .map_or_else(|| SourceId::new(ORG_SINGLETON_ID), Clone::clone)
        } else {
            let id = payload
                .get("id")
                .and_then(Value::as_str)
                .or_else(|| payload.get(descriptor.name_field.as_str()).and_then(Value::as_str))
                .filter(|id| !id.is_empty())
                .ok_or_else(|| CatalogError::MalformedPayload {
                    kind: descriptor.kind,
                    field: descriptor.name_field.clone(),
                })?;
            SourceId::new(id)
        };

        let name = payload
            .get(descriptor.name_field.as_str())
            .and_then(Value::as_str)
            .map_or_else(
                || {
                    if descriptor.is_singleton() {
                        descriptor.kind.as_str().to_string()
                    } else {
                        source_id.to_string()
                    }
                },
                str::to_string,
            );

        let references = descriptor
            .references
            .iter()
            .flat_map(|field| {
                field.path.collect(&payload).into_iter().map(move |id| InstanceReference {
                    path: field.path.to_string(),
                    target: field.target,
                    source_id: SourceId::new(id),
                    policy: field.policy,
                })
            })
            .collect();

        Ok(Self {
            kind: descriptor.kind,
            source_id,
            name,
            payload: Arc::new(payload),
            references,
            parent,
        })
    }

    /// Source ids this instance references for `target`
    pub fn referenced(&self, target: ResourceKind) -> impl Iterator<Item = &SourceId> {
        self.references
            .iter()
            .filter(move |r| r.target == target)
            .map(|r| &r.source_id)
    }

    /// Top-level string field of the payload
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Catalog;
    use serde_json::json;

    #[test]
    fn collects_references_from_descriptor() {
        let catalog = Catalog::standard();
        let descriptor = catalog.get(ResourceKind::NacRule).unwrap();
        let instance = ResourceInstance::from_payload(
            descriptor,
            json!({
                "id": "r1",
                "name": "corp",
                "matching": {"nactags": ["t1", "t2"]},
                "apply_tags": ["t3"]
            }),
            None,
        )
        .unwrap();
        assert_eq!(instance.source_id.as_str(), "r1");
        assert_eq!(instance.name, "corp");
        let ids: Vec<_> = instance.referenced(ResourceKind::NacTag).map(SourceId::as_str).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn singletons_are_keyed_by_owner() {
        let catalog = Catalog::standard();
        let settings = ResourceInstance::from_payload(
            catalog.get(ResourceKind::SiteSettings).unwrap(),
            json!({"id": "ignored", "vars": {}}),
            Some(SourceId::new("s1")),
        )
        .unwrap();
        assert_eq!(settings.source_id.as_str(), "s1");
        assert_eq!(settings.name, "site_settings");

        let nac = ResourceInstance::from_payload(
            catalog.get(ResourceKind::NacOrgSettings).unwrap(),
            json!({"mist_nac": {}}),
            None,
        )
        .unwrap();
        assert_eq!(nac.source_id.as_str(), ORG_SINGLETON_ID);
    }

    #[test]
    fn user_macs_are_named_by_mac() {
        let catalog = Catalog::standard();
        let mac = ResourceInstance::from_payload(
            catalog.get(ResourceKind::UserMac).unwrap(),
            json!({"id": "m1", "mac": "5c5b350e0001"}),
            None,
        )
        .unwrap();
        assert_eq!(mac.name, "5c5b350e0001");
    }

    #[test]
    fn members_without_id_or_name_are_rejected() {
        let catalog = Catalog::standard();
        let descriptor = catalog.get(ResourceKind::SiteWlan).unwrap();
        let err = ResourceInstance::from_payload(descriptor, json!({"vlan_id": 10}), Some(SourceId::new("s1")))
            .unwrap_err();
        assert_eq!(
            err,
            CatalogError::MalformedPayload {
                kind: ResourceKind::SiteWlan,
                field: "ssid".to_string()
            }
        );

        let named = ResourceInstance::from_payload(descriptor, json!({"ssid": "corp"}), Some(SourceId::new("s1")))
            .unwrap();
        assert_eq!(named.source_id.as_str(), "corp");
    }
}
