//! Operator selection: which sites migrate and how templates get assigned
//!
//! Pure input. Loadable from TOML or YAML the same way as the engine config.

use crate::config::load_file;
use crate::error::{ConfigError, EngineError};
use orgclone_catalog::{DestId, ResourceKind, SourceId};
use serde_json::json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// One source site to migrate, with optional naming overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SitePlan {
    /// Site in the source organization
    pub source_site_id: SourceId,
    /// Name for the destination site
    #[serde(default)]
    pub new_site_name: Option<String>,
    /// Address for the destination site
    #[serde(default)]
    pub new_site_address: Option<String>,
    /// Country for the destination site, set together with the address
    #[serde(default)]
    pub country_code: Option<String>,
}

impl SitePlan {
    /// Migrate a site unchanged
    #[must_use]
    pub fn new(source_site_id: impl Into<SourceId>) -> Self {
        Self {
            source_site_id: source_site_id.into(),
            new_site_name: None,
            new_site_address: None,
            country_code: None,
        }
    }

    /// With a new name
    #[must_use]
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.new_site_name = Some(name.into());
        self
    }

    /// With a new address and country
    #[must_use]
    pub fn relocated(mut self, address: impl Into<String>, country_code: impl Into<String>) -> Self {
        self.new_site_address = Some(address.into());
        self.country_code = Some(country_code.into());
        self
    }

    /// Fields merged into the rewritten site payload
    #[must_use]
    pub fn overrides(&self) -> Map<String, Value> {
        let mut overrides = Map::new();
        if let Some(name) = &self.new_site_name {
            overrides.insert("name".into(), Value::String(name.clone()));
        }
        if let Some(address) = &self.new_site_address {
            overrides.insert("address".into(), Value::String(address.clone()));
        }
        if let Some(country) = &self.country_code {
            overrides.insert("country_code".into(), Value::String(country.clone()));
        }
        overrides
    }
}

/// Template selection for one kind: a destination template id, or `auto`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Selection {
    /// Match by the name of the template assigned in the source
    Auto,
    /// Use this destination template
    Explicit(DestId),
}

impl From<String> for Selection {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case("auto") {
            Self::Auto
        } else {
            Self::Explicit(DestId::new(value))
        }
    }
}

impl From<Selection> for String {
    fn from(selection: Selection) -> Self {
        match selection {
            Selection::Auto => "auto".to_string(),
            Selection::Explicit(id) => id.to_string(),
        }
    }
}

/// How templates are bound to destination sites
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStrategy {
    /// Explicit selection per site per kind
    PerSite,
    /// One selection per kind, applied to every site
    Uniform,
    /// One template per kind for every site; resolves exactly like `Uniform`
    SingleTemplate,
    /// Same-name lookup of each site's source template
    #[default]
    AutoMatch,
}

/// Strategy plus the selections it reads
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssignmentSelection {
    /// How selections are resolved per site
    pub strategy: AssignmentStrategy,
    /// Used by `Uniform` and `SingleTemplate`
    pub uniform: BTreeMap<ResourceKind, Selection>,
    /// Used by `PerSite`, keyed by source site id
    pub per_site: BTreeMap<SourceId, BTreeMap<ResourceKind, Selection>>,
}

impl AssignmentSelection {
    /// Auto-match every kind
    #[must_use]
    pub fn auto() -> Self {
        Self::default()
    }

    /// One selection per kind for every site
    #[must_use]
    pub fn uniform(selections: impl IntoIterator<Item = (ResourceKind, Selection)>) -> Self {
        Self {
            strategy: AssignmentStrategy::Uniform,
            uniform: selections.into_iter().collect(),
            per_site: BTreeMap::new(),
        }
    }

    /// Single-template entry point; same plan as [`AssignmentSelection::uniform`]
    #[must_use]
    pub fn single_template(selections: impl IntoIterator<Item = (ResourceKind, Selection)>) -> Self {
        Self {
            strategy: AssignmentStrategy::SingleTemplate,
            ..Self::uniform(selections)
        }
    }

    /// Explicit selections per site
    #[must_use]
    pub fn per_site(
        selections: impl IntoIterator<Item = (SourceId, BTreeMap<ResourceKind, Selection>)>,
    ) -> Self {
        Self {
            strategy: AssignmentStrategy::PerSite,
            uniform: BTreeMap::new(),
            per_site: selections.into_iter().collect(),
        }
    }

    /// Selections in effect for one site. Alarm templates are always auto-matched.
    #[must_use]
    pub fn for_site(&self, site: &SourceId, assignable: &[ResourceKind]) -> BTreeMap<ResourceKind, Selection> {
        let mut selections: BTreeMap<ResourceKind, Selection> = match self.strategy {
            AssignmentStrategy::PerSite => self.per_site.get(site).cloned().unwrap_or_default(),
            AssignmentStrategy::Uniform | AssignmentStrategy::SingleTemplate => self.uniform.clone(),
            AssignmentStrategy::AutoMatch => assignable.iter().map(|kind| (*kind, Selection::Auto)).collect(),
        };
        selections.retain(|kind, _| assignable.contains(kind));
        if assignable.contains(&ResourceKind::AlarmTemplate) {
            selections.insert(ResourceKind::AlarmTemplate, Selection::Auto);
        }
        selections
    }

    /// Reject selections that can never be applied
    pub fn validate(&self, sites: &[SitePlan]) -> Result<(), EngineError> {
        let in_run: HashSet<&SourceId> = sites.iter().map(|plan| &plan.source_site_id).collect();

        let check_kind = |kind: &ResourceKind| {
            if kind.is_assignable_template() {
                Ok(())
            } else {
                Err(EngineError::configuration(format!(
                    "{kind} is not a template kind and cannot be assigned"
                )))
            }
        };

        for kind in self.uniform.keys() {
            check_kind(kind)?;
        }
        for (site, selections) in &self.per_site {
            if !in_run.contains(site) {
                return Err(EngineError::configuration(format!(
                    "selection for site '{site}' which is not part of the run"
                )));
            }
            for kind in selections.keys() {
                check_kind(kind)?;
            }
        }
        Ok(())
    }
}

/// Hours before an administrator invitation expires
pub const INVITE_HOURS: u32 = 24;

/// An administrator invited into the destination with the super-user role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuperUser {
    /// Address the invitation goes to
    pub email: String,
    /// Given name, may be empty
    #[serde(default)]
    pub first_name: String,
    /// Family name, may be empty
    #[serde(default)]
    pub last_name: String,
}

impl SuperUser {
    /// Invite `email` with no name on record
    #[must_use]
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            first_name: String::new(),
            last_name: String::new(),
        }
    }

    /// With a first and last name
    #[must_use]
    pub fn named(mut self, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        self.first_name = first_name.into();
        self.last_name = last_name.into();
        self
    }

    /// Parse a comma-separated list of `email` or `email:first:last` entries
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, ConfigError> {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
                match parts.as_slice() {
                    [email] => Ok(Self::new(*email)),
                    [email, first, last] => Ok(Self::new(*email).named(*first, *last)),
                    _ => Err(ConfigError::Invalid(format!(
                        "super user '{entry}' is not 'email' or 'email:first:last'"
                    ))),
                }
            })
            .collect()
    }

    /// Invitation body: org-wide admin privileges, expiring after [`INVITE_HOURS`]
    #[must_use]
    pub fn invite_payload(&self) -> Value {
        json!({
            "email": self.email,
            "first_name": self.first_name,
            "last_name": self.last_name,
            "hours": INVITE_HOURS,
            "privileges": [{"scope": "org", "role": "admin"}],
        })
    }
}

/// Everything the operator chose for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunSelection {
    /// Sites to migrate
    pub sites: Vec<SitePlan>,
    /// How templates are bound to the new sites
    pub assignment: AssignmentSelection,
    /// Administrators invited once everything else has run; empty skips the pass
    pub super_users: Vec<SuperUser>,
}

impl RunSelection {
    /// Create a selection
    #[must_use]
    pub fn new(sites: Vec<SitePlan>, assignment: AssignmentSelection) -> Self {
        Self {
            sites,
            assignment,
            super_users: Vec::new(),
        }
    }

    /// Invite these administrators after the migration
    #[must_use]
    pub fn with_super_users(mut self, super_users: Vec<SuperUser>) -> Self {
        self.super_users = super_users;
        self
    }

    /// Invitee entry for `email`
    #[must_use]
    pub fn super_user(&self, email: &str) -> Option<&SuperUser> {
        self.super_users.iter().find(|user| user.email == email)
    }

    /// Load from a `.toml`, `.yaml` or `.yml` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_file(path.as_ref())
    }

    /// Source ids of the selected sites, in selection order
    #[must_use]
    pub fn site_ids(&self) -> Vec<SourceId> {
        self.sites.iter().map(|plan| plan.source_site_id.clone()).collect()
    }

    /// Plan for one selected site
    #[must_use]
    pub fn site_plan(&self, site: &SourceId) -> Option<&SitePlan> {
        self.sites.iter().find(|plan| &plan.source_site_id == site)
    }

    /// Duplicate site plans, malformed or repeated invitees and invalid
    /// assignment selections are configuration errors
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut seen = HashSet::new();
        for plan in &self.sites {
            if !seen.insert(&plan.source_site_id) {
                return Err(EngineError::configuration(format!(
                    "site '{}' is selected twice",
                    plan.source_site_id
                )));
            }
        }
        let mut invited = HashSet::new();
        for user in &self.super_users {
            let valid = user
                .email
                .split_once('@')
                .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty());
            if !valid {
                return Err(EngineError::configuration(format!(
                    "super user '{}' has no valid email address",
                    user.email
                )));
            }
            if !invited.insert(user.email.to_ascii_lowercase()) {
                return Err(EngineError::configuration(format!(
                    "super user '{}' is listed twice",
                    user.email
                )));
            }
        }
        self.assignment.validate(&self.sites)
    }
}
