//! Reference rewriting
//!
//! One generic algorithm driven by [`KindDescriptor`] data. Applied in order:
//! 1. required references are checked; any unmapped one fails the rewrite
//! 2. bookkeeping and strip fields are removed silently, and a keep-only
//!    projection drops every other top-level key
//! 3. non-transferable fields are removed with a manual follow-up note
//! 4. deny-first lists are reordered
//! 5. references are replaced with destination ids (best-effort misses are dropped and noted)
//! 6. naming overrides are merged

use crate::error::RewriteError;
use crate::inventory::Inventory;
use crate::remap::RemapTable;
use orgclone_catalog::{
    DenyFirst, Edit, KindDescriptor, ReferencePolicy, ResourceInstance, SourceId, BOOKKEEPING_FIELDS,
};
use serde_json::{Map, Value};

/// A payload ready for the destination
#[derive(Debug, Clone, PartialEq)]
pub struct Rewritten {
    /// Body sent to the destination
    pub payload: Value,
    /// Manual follow-ups and dropped references
    pub notes: Vec<String>,
}

/// Rewrites source payloads against the run's remap table
#[derive(Debug, Clone, Copy)]
pub struct Rewriter<'a> {
    remap: &'a RemapTable,
    inventory: Option<&'a Inventory>,
}

impl<'a> Rewriter<'a> {
    /// Create a rewriter
    #[must_use]
    pub fn new(remap: &'a RemapTable) -> Self {
        Self { remap, inventory: None }
    }

    /// Resolve deny-first ordering through source instances
    #[must_use]
    pub fn with_inventory(mut self, inventory: &'a Inventory) -> Self {
        self.inventory = Some(inventory);
        self
    }

    /// Produce the destination payload for `instance`
    pub fn rewrite(
        &self,
        descriptor: &KindDescriptor,
        instance: &ResourceInstance,
        overrides: Option<&Map<String, Value>>,
    ) -> Result<Rewritten, RewriteError> {
        for field in &descriptor.references {
            if field.policy != ReferencePolicy::Required {
                continue;
            }
            for id in field.path.collect(&instance.payload) {
                let source_id = SourceId::new(id);
                if self.remap.lookup(field.target, &source_id).is_none() {
                    return Err(RewriteError::UnresolvedReference {
                        target: field.target,
                        source_id,
                        path: field.path.to_string(),
                    });
                }
            }
        }

        let mut payload = (*instance.payload).clone();
        let mut notes = Vec::new();

        if let Some(object) = payload.as_object_mut() {
            for field in BOOKKEEPING_FIELDS {
                object.remove(field);
            }
            if !descriptor.keep_only.is_empty() {
                object.retain(|key, _| descriptor.keep_only.iter().any(|kept| kept == key));
            }
        }
        for path in &descriptor.strip_fields {
            path.remove(&mut payload);
        }
        for field in &descriptor.non_transferable {
            if field.path.remove(&mut payload) {
                notes.push(format!("manual action: {} ('{}' not transferred)", field.action, field.path));
            }
        }

        if let Some(order) = &descriptor.deny_first {
            if let Some(Value::Array(entries)) = order.list.get_mut(&mut payload) {
                entries.sort_by_key(|entry| u8::from(!self.is_deny(order, entry)));
            }
        }

        for field in &descriptor.references {
            let remap = self.remap;
            field.path.edit(&mut payload, &mut |id: &str| {
                match remap.lookup(field.target, &SourceId::new(id)) {
                    Some(dest) => Edit::Replace(dest.to_string()),
                    None if field.policy == ReferencePolicy::BestEffort => {
                        notes.push(format!(
                            "dropped unmatched {} reference '{}' at '{}'",
                            field.target, id, field.path
                        ));
                        Edit::Remove
                    }
                    None => Edit::Keep,
                }
            });
        }

        if let (Some(overrides), Some(object)) = (overrides, payload.as_object_mut()) {
            for (key, value) in overrides {
                object.insert(key.clone(), value.clone());
            }
        }

        Ok(Rewritten { payload, notes })
    }

    fn is_deny(&self, order: &DenyFirst, entry: &Value) -> bool {
        let action = match entry.get(order.reference_key.as_str()).and_then(Value::as_str) {
            Some(id) => self
                .inventory
                .and_then(|inventory| inventory.instance(order.target, &SourceId::new(id)))
                .and_then(|policy| policy.field("action").map(str::to_string)),
            None => entry.get("action").and_then(Value::as_str).map(str::to_string),
        };
        matches!(action.as_deref(), Some("deny" | "block"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orgclone_catalog::{Catalog, ResourceKind};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn instance(kind: ResourceKind, payload: Value) -> ResourceInstance {
        ResourceInstance::from_payload(Catalog::standard().get(kind).unwrap(), payload, None).unwrap()
    }

    #[test]
    fn strips_bookkeeping_and_remaps_required_references() {
        let remap = RemapTable::new();
        remap
            .record_mapping(ResourceKind::ServicePolicy, "sp1".into(), "new-sp1".into())
            .unwrap();
        let descriptor = Catalog::standard().get(ResourceKind::WanEdgeTemplate).unwrap();
        let source = instance(
            ResourceKind::WanEdgeTemplate,
            json!({
                "id": "gw1",
                "org_id": "src-org",
                "created_time": 1,
                "modified_time": 2,
                "name": "branch-gw",
                "service_policies": [{"servicepolicy_id": "sp1", "path_preference": "WAN1"}]
            }),
        );

        let out = Rewriter::new(&remap).rewrite(descriptor, &source, None).unwrap();
        assert_eq!(
            out.payload,
            json!({
                "name": "branch-gw",
                "service_policies": [{"servicepolicy_id": "new-sp1", "path_preference": "WAN1"}]
            })
        );
        assert!(out.notes.is_empty());
    }

    #[test]
    fn missing_required_reference_names_kind_and_id() {
        let remap = RemapTable::new();
        let descriptor = Catalog::standard().get(ResourceKind::WanEdgeTemplate).unwrap();
        let source = instance(
            ResourceKind::WanEdgeTemplate,
            json!({"id": "gw1", "name": "g", "service_policies": [{"servicepolicy_id": "sp9"}]}),
        );
        let err = Rewriter::new(&remap).rewrite(descriptor, &source, None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unresolved reference to service_policy 'sp9' at 'service_policies[].servicepolicy_id'"
        );
    }

    #[test]
    fn best_effort_miss_is_dropped_and_noted() {
        let remap = RemapTable::new();
        remap
            .record_mapping(ResourceKind::SiteGroup, "g1".into(), "new-g1".into())
            .unwrap();
        let descriptor = Catalog::standard().get(ResourceKind::SiteGroupMembership).unwrap();
        let source = ResourceInstance::from_payload(
            descriptor,
            json!({"sitegroup_ids": ["g1", "g2"]}),
            Some("s1".into()),
        )
        .unwrap();
        let out = Rewriter::new(&remap).rewrite(descriptor, &source, None).unwrap();
        assert_eq!(out.payload, json!({"sitegroup_ids": ["new-g1"]}));
        assert_eq!(
            out.notes,
            vec!["dropped unmatched site_group reference 'g2' at 'sitegroup_ids[]'".to_string()]
        );
    }

    #[test]
    fn non_transferable_fields_are_stripped_with_manual_note() {
        let remap = RemapTable::new();
        let descriptor = Catalog::standard().get(ResourceKind::PskPortal).unwrap();
        let source = instance(
            ResourceKind::PskPortal,
            json!({"id": "p1", "name": "guests", "ui_url": "https://portal/abc", "ssid": "Guest"}),
        );
        let out = Rewriter::new(&remap).rewrite(descriptor, &source, None).unwrap();
        assert!(out.payload.get("ui_url").is_none());
        assert_eq!(out.notes.len(), 1);
        assert!(out.notes[0].contains("share the new portal url"));
    }

    #[test]
    fn deny_policies_are_ordered_first() {
        let catalog = Catalog::standard();
        let remap = RemapTable::new();
        let mut inventory = Inventory::new();
        for (id, action) in [("allow-web", "allow"), ("deny-p2p", "deny")] {
            remap
                .record_mapping(ResourceKind::ServicePolicy, id.into(), format!("new-{id}").into())
                .unwrap();
            inventory.insert(instance(
                ResourceKind::ServicePolicy,
                json!({"id": id, "name": id, "action": action}),
            ));
        }
        let descriptor = catalog.get(ResourceKind::WanEdgeTemplate).unwrap();
        let source = instance(
            ResourceKind::WanEdgeTemplate,
            json!({
                "id": "gw",
                "name": "gw",
                "service_policies": [
                    {"servicepolicy_id": "allow-web"},
                    {"name": "inline-block", "action": "block"},
                    {"servicepolicy_id": "deny-p2p"}
                ]
            }),
        );

        let out = Rewriter::new(&remap)
            .with_inventory(&inventory)
            .rewrite(descriptor, &source, None)
            .unwrap();
        assert_eq!(
            out.payload["service_policies"],
            json!([
                {"name": "inline-block", "action": "block"},
                {"servicepolicy_id": "new-deny-p2p"},
                {"servicepolicy_id": "new-allow-web"}
            ])
        );
    }

    #[test]
    fn site_overrides_are_merged() {
        let remap = RemapTable::new();
        let descriptor = Catalog::standard().get(ResourceKind::Site).unwrap();
        let source = instance(
            ResourceKind::Site,
            json!({"id": "s1", "name": "HQ", "address": "1 Main St", "rftemplate_id": "rf1", "timezone": "UTC"}),
        );
        let mut overrides = Map::new();
        overrides.insert("name".into(), json!("HQ-new"));
        let out = Rewriter::new(&remap)
            .rewrite(descriptor, &source, Some(&overrides))
            .unwrap();
        assert_eq!(
            out.payload,
            json!({"name": "HQ-new", "address": "1 Main St", "timezone": "UTC"})
        );
    }

    #[test]
    fn nac_settings_keep_only_the_nac_block() {
        let remap = RemapTable::new();
        remap.record_mapping(ResourceKind::Sso, "sso1".into(), "new-sso1".into()).unwrap();
        let descriptor = Catalog::standard().get(ResourceKind::NacOrgSettings).unwrap();
        let source = instance(
            ResourceKind::NacOrgSettings,
            json!({
                "id": "org-settings",
                "org_id": "src-org",
                "password_policy": {"enabled": true, "min_length": 12},
                "api_policy": {"no_reveal": true},
                "mist_nac": {"idps": [{"id": "sso1", "exclude_realms": []}]}
            }),
        );

        let rewritten = Rewriter::new(&remap).rewrite(descriptor, &source, None).unwrap();

        assert_eq!(
            rewritten.payload,
            json!({"mist_nac": {"idps": [{"id": "new-sso1", "exclude_realms": []}]}})
        );
        assert!(rewritten.notes.is_empty());
    }
}
