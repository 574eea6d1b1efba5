//! Kind descriptors and the catalog
//!
//! A [`KindDescriptor`] is pure data: what a kind depends on, which payload
//! fields point at other kinds, and which fields must never reach the
//! destination. The rewriter and planner are generic over it.

use crate::error::CatalogError;
use crate::field_path::FieldPath;
use crate::kind::{Cardinality, Phase, ResourceKind, Scope};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::Serialize;

/// Fields stripped from every payload without a note
pub const BOOKKEEPING_FIELDS: [&str; 5] = ["id", "org_id", "site_id", "created_time", "modified_time"];

/// How a missing reference target is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferencePolicy {
    /// The whole rewrite fails
    Required,
    /// The value is dropped and noted
    BestEffort,
}

/// A payload field holding the source id of another resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceField {
    /// Where the id lives
    pub path: FieldPath,
    /// Kind of the referenced resource
    pub target: ResourceKind,
    /// Treatment when the target has no mapping
    pub policy: ReferencePolicy,
}

/// A per-tenant field that cannot be carried over
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NonTransferable {
    /// Where the value lives
    pub path: FieldPath,
    /// Manual follow-up the operator has to perform
    pub action: String,
}

/// A list whose deny/block entries must precede allow entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DenyFirst {
    /// Path of the list (object keys only)
    pub list: FieldPath,
    /// Element key holding a reference to a policy object
    pub reference_key: String,
    /// Kind the reference points at; its `action` decides the order
    pub target: ResourceKind,
}

/// Static description of one resource kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindDescriptor {
    /// The described kind
    pub kind: ResourceKind,
    /// Org- or site-owned
    pub scope: Scope,
    /// Collection or settings singleton
    pub cardinality: Cardinality,
    /// Phase the kind belongs to
    pub phase: Phase,
    /// Kinds that must be migrated first
    pub depends_on: Vec<ResourceKind>,
    /// Foreign-key fields
    pub references: Vec<ReferenceField>,
    /// Fields removed silently, on top of [`BOOKKEEPING_FIELDS`]
    pub strip_fields: Vec<FieldPath>,
    /// Fields removed with a manual follow-up note
    pub non_transferable: Vec<NonTransferable>,
    /// Follow-ups that apply to every instance of the kind
    pub advisories: Vec<String>,
    /// Top-level payload keys written to the destination; empty keeps all
    pub keep_only: Vec<String>,
    /// Payload field carrying the human-readable name
    pub name_field: String,
    /// Listing returns summaries; each instance is fetched individually
    pub summary_listing: bool,
    /// Site payload field naming the template bound to the site
    pub assigned_by: Option<String>,
    /// Boolean field that must be true for the instance to be copied
    pub only_when: Option<FieldPath>,
    /// Field that must hold a non-empty value for the instance to be copied
    pub only_with: Option<FieldPath>,
    /// List reordered so deny entries come first
    pub deny_first: Option<DenyFirst>,
}

impl KindDescriptor {
    /// Create a descriptor with no dependencies or field rules
    #[must_use]
    pub fn new(kind: ResourceKind, scope: Scope, cardinality: Cardinality, phase: Phase) -> Self {
        Self {
            kind,
            scope,
            cardinality,
            phase,
            depends_on: Vec::new(),
            references: Vec::new(),
            strip_fields: Vec::new(),
            non_transferable: Vec::new(),
            advisories: Vec::new(),
            keep_only: Vec::new(),
            name_field: "name".to_string(),
            summary_listing: false,
            assigned_by: None,
            only_when: None,
            only_with: None,
            deny_first: None,
        }
    }

    /// Org-scoped collection in the core phase
    #[must_use]
    pub fn org_collection(kind: ResourceKind) -> Self {
        Self::new(kind, Scope::Org, Cardinality::Collection, Phase::Core)
    }

    /// Add dependencies
    #[must_use]
    pub fn depends_on(mut self, kinds: impl IntoIterator<Item = ResourceKind>) -> Self {
        for kind in kinds {
            if !self.depends_on.contains(&kind) {
                self.depends_on.push(kind);
            }
        }
        self
    }

    /// Declare a reference field
    #[must_use]
    pub fn reference(mut self, path: &str, target: ResourceKind, policy: ReferencePolicy) -> Self {
        self.references.push(ReferenceField {
            path: FieldPath::parse(path),
            target,
            policy,
        });
        self
    }

    /// Declare fields to strip silently
    #[must_use]
    pub fn strip<'a>(mut self, paths: impl IntoIterator<Item = &'a str>) -> Self {
        self.strip_fields.extend(paths.into_iter().map(FieldPath::parse));
        self
    }

    /// Declare a non-transferable field
    #[must_use]
    pub fn non_transferable(mut self, path: &str, action: &str) -> Self {
        self.non_transferable.push(NonTransferable {
            path: FieldPath::parse(path),
            action: action.to_string(),
        });
        self
    }

    /// Add a kind-level advisory
    #[must_use]
    pub fn advisory(mut self, text: &str) -> Self {
        self.advisories.push(text.to_string());
        self
    }

    /// Write only these top-level keys of the payload
    #[must_use]
    pub fn keep_only<'a>(mut self, keys: impl IntoIterator<Item = &'a str>) -> Self {
        self.keep_only.extend(keys.into_iter().map(str::to_string));
        self
    }

    /// Override the name field
    #[must_use]
    pub fn name_field(mut self, field: &str) -> Self {
        self.name_field = field.to_string();
        self
    }

    /// Mark the listing as summary-only
    #[must_use]
    pub fn summary_listing(mut self) -> Self {
        self.summary_listing = true;
        self
    }

    /// Template bound to a site through `field` of the site payload
    #[must_use]
    pub fn assigned_by(mut self, field: &str) -> Self {
        self.assigned_by = Some(field.to_string());
        self
    }

    /// Copy only when the boolean at `path` is true
    #[must_use]
    pub fn only_when(mut self, path: &str) -> Self {
        self.only_when = Some(FieldPath::parse(path));
        self
    }

    /// Order `list` deny-first, resolving referenced entries through `target`
    #[must_use]
    pub fn deny_first(mut self, list: &str, reference_key: &str, target: ResourceKind) -> Self {
        self.deny_first = Some(DenyFirst {
            list: FieldPath::parse(list),
            reference_key: reference_key.to_string(),
            target,
        });
        self
    }

    /// Copy only when `path` holds a non-empty value
    #[must_use]
    pub fn only_with(mut self, path: &str) -> Self {
        self.only_with = Some(FieldPath::parse(path));
        self
    }

    /// Why an instance payload is excluded from the copy, if it is
    #[must_use]
    pub fn exclusion(&self, payload: &serde_json::Value) -> Option<String> {
        use serde_json::Value;

        if let Some(path) = &self.only_when {
            if path.get(payload).and_then(Value::as_bool) != Some(true) {
                return Some(format!("{} is not enabled in the source", self.kind));
            }
        }
        if let Some(path) = &self.only_with {
            let present = match path.get(payload) {
                None | Some(Value::Null) => false,
                Some(Value::Object(map)) => !map.is_empty(),
                Some(Value::Array(items)) => !items.is_empty(),
                Some(Value::String(text)) => !text.is_empty(),
                Some(_) => true,
            };
            if !present {
                return Some(format!("source {} has no '{path}'", self.kind));
            }
        }
        None
    }

    /// Whether an instance payload passes the copy gates
    #[must_use]
    pub fn is_enabled(&self, payload: &serde_json::Value) -> bool {
        self.exclusion(payload).is_none()
    }

    /// Move to a phase
    #[must_use]
    pub fn in_phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    #[inline]
    #[must_use]
    pub fn is_singleton(&self) -> bool {
        self.cardinality == Cardinality::Singleton
    }

    #[inline]
    #[must_use]
    pub fn is_site_scoped(&self) -> bool {
        self.scope == Scope::Site
    }

    fn validate(&self) -> Result<(), CatalogError> {
        if self.depends_on.contains(&self.kind) {
            return Err(CatalogError::SelfDependency(self.kind));
        }
        for reference in &self.references {
            if reference.path.is_empty() {
                return Err(CatalogError::EmptyFieldPath(self.kind));
            }
            if !self.depends_on.contains(&reference.target) {
                return Err(CatalogError::InconsistentReference {
                    kind: self.kind,
                    target: reference.target,
                    path: reference.path.to_string(),
                });
            }
        }
        if let Some(order) = &self.deny_first {
            if !self.depends_on.contains(&order.target) {
                return Err(CatalogError::InconsistentReference {
                    kind: self.kind,
                    target: order.target,
                    path: order.list.to_string(),
                });
            }
        }
        let strip_paths = self.strip_fields.iter();
        let manual_paths = self.non_transferable.iter().map(|n| &n.path);
        let gate_paths = self.only_when.iter().chain(self.only_with.iter());
        let list_paths = self.deny_first.iter().map(|d| &d.list);
        if strip_paths
            .chain(manual_paths)
            .chain(gate_paths)
            .chain(list_paths)
            .any(FieldPath::is_empty)
        {
            return Err(CatalogError::EmptyFieldPath(self.kind));
        }
        if self.keep_only.iter().any(String::is_empty) {
            return Err(CatalogError::EmptyFieldPath(self.kind));
        }
        Ok(())
    }
}

/// Which optional phases take part in a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseSelection {
    /// Migrate access assurance objects
    pub nac: bool,
    /// Migrate endpoint identities (only together with `nac`)
    pub user_macs: bool,
}

impl PhaseSelection {
    /// Core phase only
    #[must_use]
    pub fn core() -> Self {
        Self::default()
    }

    /// Whether kinds of `phase` participate
    #[must_use]
    pub fn includes(&self, phase: Phase) -> bool {
        match phase {
            Phase::Core => true,
            Phase::Nac => self.nac,
            Phase::UserMacs => self.nac && self.user_macs,
            Phase::Invites => false,
        }
    }
}

/// Descriptors keyed by kind, in listing order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    descriptors: IndexMap<ResourceKind, KindDescriptor>,
}

static STANDARD: Lazy<Catalog> = Lazy::new(build_standard);

impl Catalog {
    /// Create an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in catalog of every supported kind
    #[must_use]
    pub fn standard() -> &'static Catalog {
        &STANDARD
    }

    /// Add or replace a descriptor
    pub fn insert(&mut self, descriptor: KindDescriptor) {
        self.descriptors.insert(descriptor.kind, descriptor);
    }

    /// Builder form of [`Catalog::insert`]
    #[must_use]
    pub fn with(mut self, descriptor: KindDescriptor) -> Self {
        self.insert(descriptor);
        self
    }

    #[must_use]
    pub fn get(&self, kind: ResourceKind) -> Option<&KindDescriptor> {
        self.descriptors.get(&kind)
    }

    /// Descriptor for `kind`, or [`CatalogError::Undescribed`]
    pub fn descriptor(&self, kind: ResourceKind) -> Result<&KindDescriptor, CatalogError> {
        self.get(kind).ok_or(CatalogError::Undescribed(kind))
    }

    /// Descriptors in listing order
    pub fn iter(&self) -> impl Iterator<Item = &KindDescriptor> {
        self.descriptors.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Kinds whose phase is selected, in listing order
    #[must_use]
    pub fn participating(&self, phases: PhaseSelection) -> Vec<ResourceKind> {
        self.iter()
            .filter(|d| phases.includes(d.phase))
            .map(|d| d.kind)
            .collect()
    }

    /// Check every descriptor's internal consistency
    pub fn validate(&self) -> Result<(), CatalogError> {
        self.iter().try_for_each(KindDescriptor::validate)
    }
}

const TEMPLATE_IDS: [&str; 5] = [
    "networktemplate_id",
    "gatewaytemplate_id",
    "rftemplate_id",
    "alarmtemplate_id",
    "sitetemplate_id",
];

fn build_standard() -> Catalog {
    use ReferencePolicy::{BestEffort, Required};
    use ResourceKind as K;

    let site_singleton = |kind| KindDescriptor::new(kind, Scope::Site, Cardinality::Singleton, Phase::Core);
    let nac_collection = |kind| KindDescriptor::org_collection(kind).in_phase(Phase::Nac);

    Catalog::new()
        .with(KindDescriptor::org_collection(K::SiteGroup))
        .with(KindDescriptor::org_collection(K::ServicePolicy))
        .with(KindDescriptor::org_collection(K::SwitchTemplate).assigned_by("networktemplate_id"))
        .with(KindDescriptor::org_collection(K::RfTemplate).assigned_by("rftemplate_id"))
        .with(KindDescriptor::org_collection(K::WlanTemplate).strip(["applies", "exceptions"]))
        .with(
            KindDescriptor::org_collection(K::WanEdgeTemplate)
                .depends_on([K::ServicePolicy])
                .assigned_by("gatewaytemplate_id")
                .deny_first("service_policies", "servicepolicy_id", K::ServicePolicy)
                .reference("service_policies[].servicepolicy_id", K::ServicePolicy, Required),
        )
        .with(KindDescriptor::org_collection(K::AlarmTemplate).assigned_by("alarmtemplate_id"))
        .with(
            KindDescriptor::org_collection(K::Site)
                .depends_on([
                    K::SiteGroup,
                    K::SwitchTemplate,
                    K::RfTemplate,
                    K::WlanTemplate,
                    K::WanEdgeTemplate,
                    K::AlarmTemplate,
                ])
                .strip(TEMPLATE_IDS)
                .strip(["sitegroup_ids"]),
        )
        .with(
            site_singleton(K::SiteSettings)
                .depends_on([K::Site])
                .strip(["for_site"])
                .strip(TEMPLATE_IDS),
        )
        .with(
            KindDescriptor::new(K::SiteWlan, Scope::Site, Cardinality::Collection, Phase::Core)
                .depends_on([K::Site])
                .name_field("ssid")
                .strip(["template_id", "for_site"])
                .non_transferable("portal_image", "re-upload the guest portal image"),
        )
        .with(
            KindDescriptor::new(K::SiteMap, Scope::Site, Cardinality::Collection, Phase::Core)
                .depends_on([K::Site])
                .non_transferable("url", "re-upload the floor plan image")
                .non_transferable("thumbnail_url", "re-upload the floor plan image"),
        )
        .with(
            site_singleton(K::SiteGroupMembership)
                .depends_on([K::Site, K::SiteGroup])
                .reference("sitegroup_ids[]", K::SiteGroup, BestEffort),
        )
        .with(nac_collection(K::SsoRole))
        .with(
            nac_collection(K::Sso)
                .depends_on([K::SsoRole])
                .summary_listing()
                .reference("default_role", K::SsoRole, BestEffort)
                .non_transferable("idp_sso_url", "re-enter the identity provider sign-in url")
                .non_transferable("idp_cert", "re-upload the identity provider certificate")
                .non_transferable("sp_metadata_url", "register the destination service provider metadata with the identity provider")
                .advisory("re-add allowable domains in the identity provider settings"),
        )
        .with(nac_collection(K::NacTag))
        .with(
            nac_collection(K::NacRule)
                .depends_on([K::NacTag])
                .reference("matching.nactags[]", K::NacTag, Required)
                .reference("not_matching.nactags[]", K::NacTag, Required)
                .reference("apply_tags[]", K::NacTag, Required),
        )
        .with(
            KindDescriptor::new(K::NacOrgSettings, Scope::Org, Cardinality::Singleton, Phase::Nac)
                .depends_on([K::Sso])
                .keep_only(["mist_nac"])
                .only_with("mist_nac")
                .reference("mist_nac.idps[].id", K::Sso, BestEffort)
                .advisory("review RADIUS shared secrets and identity provider credentials for the destination")
                .advisory("re-upload certificate revocation lists; CRL files are not transferred"),
        )
        .with(
            KindDescriptor::new(K::ScepSettings, Scope::Org, Cardinality::Singleton, Phase::Nac)
                .only_when("enabled")
                .advisory("the destination generates a new certificate authority; redistribute its certificate"),
        )
        .with(
            nac_collection(K::NacPortal)
                .depends_on([K::NacTag, K::Sso])
                .summary_listing()
                .reference("sso_id", K::Sso, Required)
                .reference("tag_ids[]", K::NacTag, BestEffort)
                .non_transferable("sp_metadata_url", "register the destination portal metadata with the identity provider")
                .advisory("re-upload portal branding images"),
        )
        .with(
            nac_collection(K::PskPortal)
                .depends_on([K::Sso])
                .reference("sso_id", K::Sso, BestEffort)
                .non_transferable("ui_url", "share the new portal url with users")
                .non_transferable("bg_image_url", "re-upload the portal background image")
                .non_transferable("thumbnail_url", "re-upload the portal thumbnail"),
        )
        .with(
            KindDescriptor::org_collection(K::UserMac)
                .in_phase(Phase::UserMacs)
                .depends_on([K::NacTag])
                .name_field("mac"),
        )
        .with(
            KindDescriptor::org_collection(K::SuperUser)
                .in_phase(Phase::Invites)
                .name_field("email")
                .advisory("the invitation expires after 24 hours"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn standard_catalog_is_consistent_and_complete() {
        let catalog = Catalog::standard();
        catalog.validate().unwrap();
        assert_eq!(catalog.len(), ResourceKind::ALL.len());
        for kind in ResourceKind::ALL {
            assert!(catalog.get(kind).is_some(), "{kind} missing");
        }
    }

    #[test]
    fn reference_without_dependency_is_rejected() {
        let catalog = Catalog::new().with(
            KindDescriptor::org_collection(ResourceKind::WanEdgeTemplate).reference(
                "service_policies[].servicepolicy_id",
                ResourceKind::ServicePolicy,
                ReferencePolicy::Required,
            ),
        );
        assert!(matches!(
            catalog.validate(),
            Err(CatalogError::InconsistentReference { target: ResourceKind::ServicePolicy, .. })
        ));
    }

    #[test]
    fn self_dependency_is_rejected() {
        let catalog = Catalog::new()
            .with(KindDescriptor::org_collection(ResourceKind::Site).depends_on([ResourceKind::Site]));
        assert_eq!(catalog.validate(), Err(CatalogError::SelfDependency(ResourceKind::Site)));
    }

    #[test]
    fn phase_selection_gates_optional_kinds() {
        let catalog = Catalog::standard();
        let core = catalog.participating(PhaseSelection::core());
        assert!(!core.contains(&ResourceKind::NacRule));
        assert!(!core.contains(&ResourceKind::UserMac));

        let macs_without_nac = PhaseSelection { nac: false, user_macs: true };
        assert!(!catalog.participating(macs_without_nac).contains(&ResourceKind::UserMac));

        let everything = catalog.participating(PhaseSelection { nac: true, user_macs: true });
        assert!(!everything.contains(&ResourceKind::SuperUser));
        assert_eq!(everything.len(), catalog.len() - 1);
    }

    #[test]
    fn nac_settings_need_a_nac_block() {
        let descriptor = Catalog::standard().get(ResourceKind::NacOrgSettings).unwrap();
        assert_eq!(descriptor.keep_only, vec!["mist_nac".to_string()]);
        assert_eq!(
            descriptor.exclusion(&json!({"password_policy": {"enabled": true}})).as_deref(),
            Some("source nac_org_settings has no 'mist_nac'")
        );
        assert_eq!(
            descriptor.exclusion(&json!({"mist_nac": {}})).as_deref(),
            Some("source nac_org_settings has no 'mist_nac'")
        );
        assert!(descriptor.is_enabled(&json!({"mist_nac": {"idps": []}})));
        assert_eq!(descriptor.advisories.len(), 2);
    }

    #[test]
    fn scep_is_gated_on_enabled() {
        let descriptor = Catalog::standard().get(ResourceKind::ScepSettings).unwrap();
        assert_eq!(
            descriptor.exclusion(&json!({"enabled": false})).as_deref(),
            Some("scep_settings is not enabled in the source")
        );
        assert!(descriptor.is_enabled(&json!({"enabled": true})));
    }
}
