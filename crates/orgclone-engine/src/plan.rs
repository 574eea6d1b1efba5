//! Migration plan
//!
//! The plan is data: ordered tiers of steps, each step naming the steps it
//! depends on. The executor, the assignment resolver and the preflight
//! simulator all consume the same plan.

use crate::assignment::AssignmentTarget;
use crate::inventory::Inventory;
use orgclone_catalog::{Catalog, CatalogError, DependencyGraph, ReferencePolicy, ResourceKind, SourceId};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// Which pass of a run a step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Create or copy a source resource
    Migrate,
    /// Bind templates to destination sites
    Assign,
    /// Invite administrators into the destination organization
    Invite,
}

/// Identity of a step within a run
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct StepKey {
    /// Pass the step runs in
    pub stage: Stage,
    /// Kind migrated, assigned or invited
    pub kind: ResourceKind,
    /// Source id of the migrated resource, the assignment subject, or the invitee's email
    pub source_id: SourceId,
}

impl StepKey {
    /// Key of the step that creates or copies a source resource
    #[must_use]
    pub fn migrate(kind: ResourceKind, source_id: impl Into<SourceId>) -> Self {
        Self {
            stage: Stage::Migrate,
            kind,
            source_id: source_id.into(),
        }
    }

    /// Key of the step that binds a template of `kind` for `subject`
    #[must_use]
    pub fn assign(kind: ResourceKind, subject: impl Into<SourceId>) -> Self {
        Self {
            stage: Stage::Assign,
            kind,
            source_id: subject.into(),
        }
    }

    /// Key of the step that invites `email` as a super user
    #[must_use]
    pub fn invite(email: &str) -> Self {
        Self {
            stage: Stage::Invite,
            kind: ResourceKind::SuperUser,
            source_id: SourceId::new(email),
        }
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            Stage::Migrate => write!(f, "{}:{}", self.kind, self.source_id),
            Stage::Assign => write!(f, "assign {}:{}", self.kind, self.source_id),
            Stage::Invite => write!(f, "invite {}", self.source_id),
        }
    }
}

/// What a step does to the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Create a collection member
    Create,
    /// Write a settings object in place
    Copy,
    /// Bind a template
    Assign,
    /// Send an administrator invitation
    Invite,
    /// Deliberately not written
    Skip,
}

impl Action {
    /// Lowercase label used in reports
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Copy => "copy",
            Action::Assign => "assign",
            Action::Invite => "invite",
            Action::Skip => "skip",
        }
    }
}

/// One node of the plan DAG
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationStep {
    /// Identity of the step
    pub key: StepKey,
    /// Display name of the resource or assignment
    pub name: String,
    /// What the step does to the destination
    pub action: Action,
    /// Steps that must succeed first
    pub depends_on: BTreeSet<StepKey>,
    /// Owning source site of a site-scoped resource
    pub parent: Option<SourceId>,
    /// Why a `Skip` step is excluded
    pub skip_reason: Option<String>,
    /// Binding performed by an `Assign` step
    pub assignment: Option<AssignmentTarget>,
}

/// Steps with no dependency among them
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tier {
    /// Position in the plan
    pub index: usize,
    /// Pass every step of the tier belongs to
    pub stage: Stage,
    /// Steps run concurrently
    pub steps: Vec<MigrationStep>,
}

/// Ordered tiers for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationPlan {
    /// Kind-level tiers the step tiers were derived from
    pub kind_tiers: Vec<Vec<ResourceKind>>,
    /// Step tiers in execution order
    pub tiers: Vec<Tier>,
}

impl MigrationPlan {
    /// Tiers of one stage, in order
    pub fn tiers_of(&self, stage: Stage) -> impl Iterator<Item = &Tier> {
        self.tiers.iter().filter(move |tier| tier.stage == stage)
    }

    /// Every step in tier order
    pub fn steps(&self) -> impl Iterator<Item = &MigrationStep> {
        self.tiers.iter().flat_map(|tier| tier.steps.iter())
    }

    /// Number of steps across every tier
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.tiers.iter().map(|tier| tier.steps.len()).sum()
    }

    /// Append the assignment steps as a final tier
    pub fn push_assignments(&mut self, steps: Vec<MigrationStep>) {
        self.push_tier(Stage::Assign, steps);
    }

    /// Append the invitation steps as a final tier
    pub fn push_invites(&mut self, steps: Vec<MigrationStep>) {
        self.push_tier(Stage::Invite, steps);
    }

    fn push_tier(&mut self, stage: Stage, steps: Vec<MigrationStep>) {
        if steps.is_empty() {
            return;
        }
        self.tiers.push(Tier {
            index: self.tiers.len(),
            stage,
            steps,
        });
    }

    /// Multi-line overview, one line per tier
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for tier in &self.tiers {
            let mut kinds: Vec<ResourceKind> = Vec::new();
            for step in &tier.steps {
                if !kinds.contains(&step.key.kind) {
                    kinds.push(step.key.kind);
                }
            }
            let kinds: Vec<&str> = kinds.iter().map(ResourceKind::as_str).collect();
            out.push_str(&format!(
                "tier {} ({:?}): {} step(s) [{}]\n",
                tier.index,
                tier.stage,
                tier.steps.len(),
                kinds.join(", ")
            ));
        }
        out
    }
}

/// Turns an inventory into migration tiers
#[derive(Debug, Clone, Copy)]
pub struct Planner<'a> {
    catalog: &'a Catalog,
}

impl<'a> Planner<'a> {
    /// Create a planner over `catalog`
    #[must_use]
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// One step per inventory instance, tiered by kind.
    ///
    /// Step dependencies are the parent site and every instance reached
    /// through a required reference that is itself part of the plan.
    /// Best-effort references only order kinds; their failure never cascades.
    pub fn plan(&self, graph: &DependencyGraph, inventory: &Inventory) -> Result<MigrationPlan, CatalogError> {
        let kind_tiers = graph.tiers();

        let planned: HashSet<StepKey> = graph
            .kinds()
            .iter()
            .flat_map(|kind| inventory.instances(*kind))
            .map(|instance| StepKey::migrate(instance.kind, instance.source_id.clone()))
            .collect();

        let mut tiers = Vec::new();
        for kinds in &kind_tiers {
            let mut steps = Vec::new();
            for kind in kinds {
                let descriptor = self.catalog.descriptor(*kind)?;
                for instance in inventory.instances(*kind) {
                    let mut depends_on = BTreeSet::new();
                    if let Some(parent) = &instance.parent {
                        depends_on.insert(StepKey::migrate(ResourceKind::Site, parent.clone()));
                    }
                    for reference in instance.references.iter().filter(|r| r.policy == ReferencePolicy::Required) {
                        depends_on.insert(StepKey::migrate(reference.target, reference.source_id.clone()));
                    }
                    depends_on.retain(|key| planned.contains(key));

                    let (action, skip_reason) = if let Some(reason) = descriptor.exclusion(&instance.payload) {
                        (Action::Skip, Some(reason))
                    } else if descriptor.is_singleton() {
                        (Action::Copy, None)
                    } else {
                        (Action::Create, None)
                    };

                    steps.push(MigrationStep {
                        key: StepKey::migrate(*kind, instance.source_id.clone()),
                        name: instance.name.clone(),
                        action,
                        depends_on,
                        parent: instance.parent.clone(),
                        skip_reason,
                        assignment: None,
                    });
                }
            }
            if !steps.is_empty() {
                tiers.push(Tier {
                    index: tiers.len(),
                    stage: Stage::Migrate,
                    steps,
                });
            }
        }

        Ok(MigrationPlan { kind_tiers, tiers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orgclone_catalog::{PhaseSelection, ResourceInstance};
    use serde_json::json;

    fn inventory(items: &[(ResourceKind, serde_json::Value, Option<&str>)]) -> Inventory {
        let mut inventory = Inventory::new();
        for (kind, payload, parent) in items {
            let descriptor = Catalog::standard().get(*kind).unwrap();
            inventory.insert(
                ResourceInstance::from_payload(descriptor, payload.clone(), parent.map(SourceId::from)).unwrap(),
            );
        }
        inventory
    }

    fn plan_for(inventory: &Inventory, phases: PhaseSelection) -> MigrationPlan {
        let catalog = Catalog::standard();
        let graph = DependencyGraph::build(catalog, &catalog.participating(phases)).unwrap();
        Planner::new(catalog).plan(&graph, inventory).unwrap()
    }

    #[test]
    fn steps_depend_on_referenced_and_parent_steps() {
        let inventory = inventory(&[
            (ResourceKind::ServicePolicy, json!({"id": "sp1", "name": "web"}), None),
            (
                ResourceKind::WanEdgeTemplate,
                json!({"id": "gw1", "name": "gw", "service_policies": [{"servicepolicy_id": "sp1"}]}),
                None,
            ),
            (ResourceKind::Site, json!({"id": "s1", "name": "HQ"}), None),
            (ResourceKind::SiteSettings, json!({"vars": {}}), Some("s1")),
        ]);
        let plan = plan_for(&inventory, PhaseSelection::core());

        let gw = plan
            .steps()
            .find(|s| s.key == StepKey::migrate(ResourceKind::WanEdgeTemplate, "gw1"))
            .unwrap();
        assert!(gw.depends_on.contains(&StepKey::migrate(ResourceKind::ServicePolicy, "sp1")));

        let settings = plan
            .steps()
            .find(|s| s.key.kind == ResourceKind::SiteSettings)
            .unwrap();
        assert_eq!(settings.action, Action::Copy);
        assert!(settings.depends_on.contains(&StepKey::migrate(ResourceKind::Site, "s1")));

        let tier_of = |key: &StepKey| {
            plan.tiers
                .iter()
                .position(|t| t.steps.iter().any(|s| &s.key == key))
                .unwrap()
        };
        for step in plan.steps() {
            for dep in &step.depends_on {
                assert!(tier_of(dep) < tier_of(&step.key), "{} before {}", dep, step.key);
            }
        }
    }

    #[test]
    fn references_outside_the_inventory_are_not_edges() {
        let inventory = inventory(&[(
            ResourceKind::WanEdgeTemplate,
            json!({"id": "gw1", "name": "gw", "service_policies": [{"servicepolicy_id": "gone"}]}),
            None,
        )]);
        let plan = plan_for(&inventory, PhaseSelection::core());
        assert_eq!(plan.tiers.len(), 1);
        assert!(plan.tiers[0].steps[0].depends_on.is_empty());
    }

    #[test]
    fn disabled_scep_is_a_skip_step() {
        let inventory = inventory(&[(ResourceKind::ScepSettings, json!({"enabled": false}), None)]);
        let plan = plan_for(&inventory, PhaseSelection { nac: true, user_macs: false });
        let step = plan.steps().next().unwrap();
        assert_eq!(step.action, Action::Skip);
        assert_eq!(step.skip_reason.as_deref(), Some("scep_settings is not enabled in the source"));
    }
}
