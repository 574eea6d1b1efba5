//! Tiered step execution
//!
//! Tiers run strictly in order. Steps of one tier run concurrently, bounded
//! by a semaphore sized from the configured concurrency. A step whose
//! dependency failed or was skipped as unresolved is itself skipped without
//! touching the destination; everything else in the run keeps going.

use crate::assignment::{failure, AssignmentResolver};
use crate::cancel::CancellationToken;
use crate::client::{DestinationClient, ExistingResource, SourceClient};
use crate::error::EngineError;
use crate::index::DestinationIndex;
use crate::inventory::Inventory;
use crate::ledger::{Mode, RunLedger, StepResult, StepStatus};
use crate::plan::{Action, MigrationPlan, MigrationStep, Stage, StepKey};
use crate::remap::RemapTable;
use crate::retry::CallGuard;
use crate::rewrite::{Rewriter, Rewritten};
use crate::selection::{RunSelection, SitePlan};
use futures::stream::{FuturesUnordered, StreamExt};
use orgclone_catalog::{Catalog, DestId, KindDescriptor, ReferencePolicy, ResourceInstance, ResourceKind, SourceId};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// State shared by every step of one run
pub struct RunContext {
    /// Kinds and their descriptors
    pub catalog: Arc<Catalog>,
    /// Operator selection
    pub selection: RunSelection,
    /// Source inventory collected for the run
    pub inventory: Inventory,
    /// Source to destination id mappings
    pub remap: RemapTable,
    /// Results recorded so far
    pub ledger: RunLedger,
    /// Cached destination listings
    pub index: DestinationIndex,
    /// Source organization
    pub source: Arc<dyn SourceClient>,
    /// Destination organization (read-only in preflight)
    pub destination: Arc<dyn DestinationClient>,
    /// Timeout and retry policy for every call
    pub guard: CallGuard,
    /// Stops dispatching new steps
    pub cancel: CancellationToken,
    /// Live or preflight
    pub mode: Mode,
    /// Steps in flight at once
    pub concurrency: usize,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("mode", &self.mode)
            .field("concurrency", &self.concurrency)
            .field("inventory", &self.inventory.len())
            .field("mapped", &self.remap.len())
            .finish_non_exhaustive()
    }
}

impl RunContext {
    /// Record the terminal result of `step`
    pub fn record(&self, step: &MigrationStep, status: StepStatus, dest_id: Option<DestId>, reason: impl Into<String>) {
        let mut result = StepResult::new(step.key.clone(), step.name.clone(), step.action, status, self.mode)
            .with_reason(reason);
        result.dest_id = dest_id;
        self.ledger.record(result);
    }

    /// First dependency of `step` whose status blocks it
    #[must_use]
    pub fn blocking_dependency(&self, step: &MigrationStep) -> Option<(StepKey, StepStatus)> {
        step.depends_on.iter().find_map(|dependency| {
            self.ledger
                .status(dependency)
                .filter(StepStatus::blocks_dependents)
                .map(|status| (dependency.clone(), status))
        })
    }
}

/// Runs a plan against a [`RunContext`]
#[derive(Debug)]
pub struct Executor<'a> {
    ctx: &'a RunContext,
    resolver: AssignmentResolver<'a>,
}

impl<'a> Executor<'a> {
    /// Create an executor
    #[must_use]
    pub fn new(ctx: &'a RunContext) -> Self {
        Self {
            ctx,
            resolver: AssignmentResolver::new(&ctx.catalog, &ctx.selection),
        }
    }

    /// Run every tier in order.
    ///
    /// Step failures are recorded, not returned; only a conflicting id
    /// mapping aborts the run, and only once the rest of its tier has
    /// finished and been recorded. On cancellation, remaining steps are left
    /// unrecorded.
    pub async fn run(&self, plan: &MigrationPlan) -> Result<(), EngineError> {
        let semaphore = Semaphore::new(self.ctx.concurrency.max(1));

        for tier in &plan.tiers {
            if self.ctx.cancel.is_cancelled() {
                info!(tier = tier.index, "run cancelled; remaining tiers not dispatched");
                break;
            }
            info!(
                tier = tier.index,
                stage = ?tier.stage,
                steps = tier.steps.len(),
                "dispatching tier"
            );

            let mut in_flight: FuturesUnordered<_> =
                tier.steps.iter().map(|step| self.dispatch(step, &semaphore)).collect();
            let mut fatal = None;
            while let Some(outcome) = in_flight.next().await {
                if let Err(e) = outcome {
                    fatal.get_or_insert(e);
                }
            }
            if let Some(e) = fatal {
                return Err(e);
            }
        }
        Ok(())
    }

    async fn dispatch(&self, step: &MigrationStep, semaphore: &Semaphore) -> Result<(), EngineError> {
        let Ok(_permit) = semaphore.acquire().await else {
            return Ok(());
        };
        if self.ctx.cancel.is_cancelled() {
            debug!(step = %step.key, "not dispatched after cancellation");
            return Ok(());
        }
        match step.key.stage {
            Stage::Migrate => self.migrate(step).await,
            Stage::Assign => self.resolver.execute(self.ctx, step).await,
            Stage::Invite => crate::invite::execute(self.ctx, step).await,
        }
    }

    async fn migrate(&self, step: &MigrationStep) -> Result<(), EngineError> {
        let ctx = self.ctx;
        let kind = step.key.kind;

        if step.action == Action::Skip {
            let reason = step.skip_reason.clone().unwrap_or_else(|| "excluded".to_string());
            ctx.record(step, StepStatus::Excluded, None, reason);
            return Ok(());
        }
        if let Some((dependency, status)) = ctx.blocking_dependency(step) {
            ctx.record(
                step,
                StepStatus::SkippedUnresolved,
                None,
                format!("dependency {dependency} is {}", status.as_str()),
            );
            return Ok(());
        }

        let descriptor = ctx.catalog.descriptor(kind)?;
        let Some(listed) = ctx.inventory.instance(kind, &step.key.source_id) else {
            ctx.record(step, StepStatus::Failed, None, "instance missing from source inventory");
            return Ok(());
        };
        let instance = match ctx
            .inventory
            .detail(descriptor, &listed, ctx.source.as_ref(), &ctx.guard)
            .await
        {
            Ok(instance) => instance,
            Err(e) => {
                ctx.record(step, StepStatus::Failed, None, format!("source fetch failed: {e}"));
                return Ok(());
            }
        };

        // Full payloads can reference more than the listing showed.
        for reference in &instance.references {
            if reference.policy != ReferencePolicy::Required {
                continue;
            }
            let dependency = StepKey::migrate(reference.target, reference.source_id.clone());
            if let Some(status) = ctx.ledger.status(&dependency).filter(StepStatus::blocks_dependents) {
                ctx.record(
                    step,
                    StepStatus::SkippedUnresolved,
                    None,
                    format!("dependency {dependency} is {}", status.as_str()),
                );
                return Ok(());
            }
        }

        let parent = match &instance.parent {
            None => None,
            Some(site) => match ctx.remap.lookup(ResourceKind::Site, site) {
                Some(dest) => Some(dest),
                None => {
                    ctx.record(
                        step,
                        StepStatus::SkippedUnresolved,
                        None,
                        format!("site '{site}' has no destination mapping"),
                    );
                    return Ok(());
                }
            },
        };

        let overrides = if kind == ResourceKind::Site {
            ctx.selection.site_plan(&instance.source_id).map(SitePlan::overrides)
        } else {
            None
        };
        let rewritten = match Rewriter::new(&ctx.remap)
            .with_inventory(&ctx.inventory)
            .rewrite(descriptor, &instance, overrides.as_ref())
        {
            Ok(rewritten) => rewritten,
            Err(e) => {
                ctx.record(step, StepStatus::SkippedUnresolved, None, e.to_string());
                return Ok(());
            }
        };

        if descriptor.is_singleton() {
            self.copy_settings(step, descriptor, parent, rewritten).await;
            Ok(())
        } else {
            self.create(step, descriptor, &instance, parent, rewritten).await
        }
    }

    async fn copy_settings(
        &self,
        step: &MigrationStep,
        descriptor: &KindDescriptor,
        parent: Option<DestId>,
        rewritten: Rewritten,
    ) {
        let ctx = self.ctx;
        let Rewritten { payload, notes } = rewritten;
        match ctx.mode {
            Mode::Simulated => {
                ctx.record(step, StepStatus::Succeeded, parent, compose("would copy settings", &notes, descriptor));
            }
            Mode::Mutating => {
                let (result, stats) = ctx
                    .guard
                    .call(|| ctx.destination.put_settings(descriptor.kind, parent.clone(), payload.clone()))
                    .await;
                match result {
                    Ok(()) => ctx.record(step, StepStatus::Succeeded, parent, compose("settings copied", &notes, descriptor)),
                    Err(e) => ctx.record(step, StepStatus::Failed, None, failure(&e, stats.attempts)),
                }
            }
        }
    }

    async fn create(
        &self,
        step: &MigrationStep,
        descriptor: &KindDescriptor,
        instance: &ResourceInstance,
        parent: Option<DestId>,
        rewritten: Rewritten,
    ) -> Result<(), EngineError> {
        let ctx = self.ctx;
        let kind = descriptor.kind;
        let name = rewritten
            .payload
            .get(descriptor.name_field.as_str())
            .and_then(|v| v.as_str())
            .unwrap_or(instance.name.as_str())
            .to_string();

        let existing = if parent.as_ref().is_some_and(is_preflight_id) {
            // the parent site would be created; nothing can exist under it yet
            Ok(None)
        } else {
            ctx.index
                .find(ctx.destination.as_ref(), &ctx.guard, kind, parent.as_ref(), &name)
                .await
        };
        match existing {
            Ok(Some(existing)) => return self.adopt(step, instance, &name, existing),
            Ok(None) => {}
            Err(e) => {
                ctx.record(step, StepStatus::Failed, None, format!("destination listing failed: {e}"));
                return Ok(());
            }
        }

        let Rewritten { payload, notes } = rewritten;
        match ctx.mode {
            Mode::Simulated => {
                let dest_id = preflight_id(kind, &instance.source_id);
                ctx.remap
                    .record_mapping(kind, instance.source_id.clone(), dest_id.clone())?;
                ctx.remap.record_name(kind, &name, dest_id.clone());
                ctx.record(step, StepStatus::Succeeded, Some(dest_id), compose("would create", &notes, descriptor));
            }
            Mode::Mutating => {
                let (result, stats) = ctx
                    .guard
                    .call(|| ctx.destination.create(kind, parent.clone(), payload.clone()))
                    .await;
                match result {
                    Ok(dest_id) => {
                        ctx.remap
                            .record_mapping(kind, instance.source_id.clone(), dest_id.clone())?;
                        ctx.remap.record_name(kind, &name, dest_id.clone());
                        ctx.record(step, StepStatus::Succeeded, Some(dest_id), compose("created", &notes, descriptor));
                    }
                    Err(e) if e.is_already_exists() => {
                        // Lost a race with another writer; the listing is stale.
                        match ctx
                            .index
                            .refresh(ctx.destination.as_ref(), &ctx.guard, kind, parent.as_ref())
                            .await
                        {
                            Ok(listing) => match listing.get(&name) {
                                Some(existing) => return self.adopt(step, instance, &name, existing.clone()),
                                None => ctx.record(
                                    step,
                                    StepStatus::Failed,
                                    None,
                                    format!("{e}; no resource named '{name}' on re-read"),
                                ),
                            },
                            Err(reread) => ctx.record(
                                step,
                                StepStatus::Failed,
                                None,
                                format!("{e}; re-read failed: {reread}"),
                            ),
                        }
                    }
                    Err(e) => ctx.record(step, StepStatus::Failed, None, failure(&e, stats.attempts)),
                }
            }
        }
        Ok(())
    }

    /// Map onto an equivalent destination resource instead of creating one
    fn adopt(
        &self,
        step: &MigrationStep,
        instance: &ResourceInstance,
        name: &str,
        existing: ExistingResource,
    ) -> Result<(), EngineError> {
        let ctx = self.ctx;
        ctx.remap
            .record_mapping(instance.kind, instance.source_id.clone(), existing.id.clone())?;
        ctx.remap.record_name(instance.kind, name, existing.id.clone());
        ctx.record(
            step,
            StepStatus::SkippedExists,
            Some(existing.id),
            format!("'{name}' already exists in destination"),
        );
        Ok(())
    }
}

/// Prefix of destination ids synthesized by a simulated run
pub const PREFLIGHT_ID_PREFIX: &str = "preflight:";

/// Id a simulated run records for a resource it would create
#[must_use]
pub fn preflight_id(kind: ResourceKind, source_id: &SourceId) -> DestId {
    DestId::new(format!("{PREFLIGHT_ID_PREFIX}{kind}:{source_id}"))
}

/// Whether `id` was synthesized by a simulated run
#[must_use]
pub fn is_preflight_id(id: &DestId) -> bool {
    id.as_str().starts_with(PREFLIGHT_ID_PREFIX)
}

/// Success reason: what happened, then manual follow-ups, then the kind's advisories
pub(crate) fn compose(lead: &str, notes: &[String], descriptor: &KindDescriptor) -> String {
    let mut parts = Vec::with_capacity(1 + notes.len() + descriptor.advisories.len());
    parts.push(lead.to_string());
    parts.extend(notes.iter().cloned());
    parts.extend(descriptor.advisories.iter().cloned());
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MockDestinationClient, MockSourceClient};
    use crate::error::ApiError;
    use crate::ledger::TracingSink;
    use crate::plan::Planner;
    use crate::retry::RetryConfig;
    use crate::selection::AssignmentSelection;
    use orgclone_catalog::DependencyGraph;
    use serde_json::json;
    use std::time::Duration;

    fn guard() -> CallGuard {
        CallGuard::new(
            RetryConfig {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                exponential_base: 2.0,
                jitter: false,
            },
            Duration::from_secs(5),
        )
    }

    fn context(inventory: Inventory, destination: MockDestinationClient, mode: Mode) -> RunContext {
        RunContext {
            catalog: Arc::new(Catalog::standard().clone()),
            selection: RunSelection::new(Vec::new(), AssignmentSelection::auto()),
            inventory,
            remap: RemapTable::new(),
            ledger: RunLedger::new(mode, Arc::new(TracingSink)),
            index: DestinationIndex::new(),
            source: Arc::new(MockSourceClient::new()),
            destination: Arc::new(destination),
            guard: guard(),
            cancel: CancellationToken::new(),
            mode,
            concurrency: 4,
        }
    }

    fn policies_and_gateway() -> Inventory {
        let catalog = Catalog::standard();
        let mut inventory = Inventory::new();
        for (kind, payload) in [
            (ResourceKind::ServicePolicy, json!({"id": "sp1", "name": "web"})),
            (
                ResourceKind::WanEdgeTemplate,
                json!({"id": "gw1", "name": "branch-gw", "service_policies": [{"servicepolicy_id": "sp1"}]}),
            ),
        ] {
            inventory.insert(ResourceInstance::from_payload(catalog.get(kind).unwrap(), payload, None).unwrap());
        }
        inventory
    }

    fn plan(ctx: &RunContext) -> MigrationPlan {
        let kinds = [ResourceKind::ServicePolicy, ResourceKind::WanEdgeTemplate];
        let graph = DependencyGraph::build(&ctx.catalog, &kinds).unwrap();
        Planner::new(&ctx.catalog).plan(&graph, &ctx.inventory).unwrap()
    }

    #[tokio::test]
    async fn failed_dependency_skips_dependents_without_calls() {
        let mut destination = MockDestinationClient::new();
        destination.expect_list_existing().returning(|_, _| Ok(Vec::new()));
        destination
            .expect_create()
            .times(1)
            .returning(|_, _, _| Err(ApiError::Validation("bad rule".into())));

        let ctx = context(policies_and_gateway(), destination, Mode::Mutating);
        Executor::new(&ctx).run(&plan(&ctx)).await.unwrap();

        let gateway = ctx
            .ledger
            .status(&StepKey::migrate(ResourceKind::WanEdgeTemplate, "gw1"));
        assert_eq!(gateway, Some(StepStatus::SkippedUnresolved));
        assert_eq!(
            ctx.ledger.status(&StepKey::migrate(ResourceKind::ServicePolicy, "sp1")),
            Some(StepStatus::Failed)
        );
    }

    #[tokio::test]
    async fn existing_name_is_adopted_not_created() {
        let mut destination = MockDestinationClient::new();
        destination.expect_list_existing().returning(|kind, _| {
            Ok(match kind {
                ResourceKind::ServicePolicy => vec![ExistingResource {
                    id: "dst-sp".into(),
                    name: "web".into(),
                    payload: json!({}),
                }],
                _ => Vec::new(),
            })
        });
        destination
            .expect_create()
            .withf(|kind, _, payload| *kind == ResourceKind::WanEdgeTemplate && payload["service_policies"][0]["servicepolicy_id"] == "dst-sp")
            .times(1)
            .returning(|_, _, _| Ok(DestId::new("dst-gw")));

        let ctx = context(policies_and_gateway(), destination, Mode::Mutating);
        Executor::new(&ctx).run(&plan(&ctx)).await.unwrap();

        assert_eq!(
            ctx.ledger.status(&StepKey::migrate(ResourceKind::ServicePolicy, "sp1")),
            Some(StepStatus::SkippedExists)
        );
        assert_eq!(
            ctx.remap.lookup(ResourceKind::WanEdgeTemplate, &"gw1".into()),
            Some(DestId::new("dst-gw"))
        );
    }

    #[tokio::test]
    async fn already_exists_conflict_rereads_the_listing() {
        let mut destination = MockDestinationClient::new();
        let mut listed = 0;
        destination.expect_list_existing().returning(move |kind, _| {
            if kind != ResourceKind::ServicePolicy {
                return Ok(Vec::new());
            }
            listed += 1;
            Ok(if listed == 1 {
                Vec::new()
            } else {
                vec![ExistingResource {
                    id: "raced".into(),
                    name: "web".into(),
                    payload: json!({}),
                }]
            })
        });
        destination.expect_create().returning(|kind, _, _| match kind {
            ResourceKind::ServicePolicy => Err(ApiError::already_exists("name taken")),
            _ => Ok(DestId::new("dst-gw")),
        });

        let ctx = context(policies_and_gateway(), destination, Mode::Mutating);
        Executor::new(&ctx).run(&plan(&ctx)).await.unwrap();

        assert_eq!(
            ctx.remap.lookup(ResourceKind::ServicePolicy, &"sp1".into()),
            Some(DestId::new("raced"))
        );
        assert_eq!(
            ctx.ledger.status(&StepKey::migrate(ResourceKind::WanEdgeTemplate, "gw1")),
            Some(StepStatus::Succeeded)
        );
    }

    #[tokio::test]
    async fn simulated_run_never_writes() {
        let mut destination = MockDestinationClient::new();
        destination.expect_list_existing().returning(|_, _| Ok(Vec::new()));
        destination.expect_create().never();

        let ctx = context(policies_and_gateway(), destination, Mode::Simulated);
        Executor::new(&ctx).run(&plan(&ctx)).await.unwrap();

        let results = ctx.ledger.results();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.simulated && r.status == StepStatus::Succeeded));
        assert_eq!(
            ctx.remap.lookup(ResourceKind::ServicePolicy, &"sp1".into()),
            Some(DestId::new("preflight:service_policy:sp1"))
        );
    }

    #[tokio::test]
    async fn children_of_would_be_sites_are_not_listed() {
        let catalog = Catalog::standard();
        let mut inventory = Inventory::new();
        inventory.insert(
            ResourceInstance::from_payload(catalog.get(ResourceKind::Site).unwrap(), json!({"id": "s1", "name": "HQ"}), None)
                .unwrap(),
        );
        inventory.insert(
            ResourceInstance::from_payload(
                catalog.get(ResourceKind::SiteWlan).unwrap(),
                json!({"id": "w1", "ssid": "corp"}),
                Some("s1".into()),
            )
            .unwrap(),
        );

        let mut destination = MockDestinationClient::new();
        destination
            .expect_list_existing()
            .withf(|_, parent| parent.is_some())
            .never();
        destination
            .expect_list_existing()
            .withf(|_, parent| parent.is_none())
            .returning(|_, _| Ok(Vec::new()));

        let ctx = context(inventory, destination, Mode::Simulated);
        let graph = DependencyGraph::build(&ctx.catalog, &[ResourceKind::Site, ResourceKind::SiteWlan]).unwrap();
        let plan = Planner::new(&ctx.catalog).plan(&graph, &ctx.inventory).unwrap();
        Executor::new(&ctx).run(&plan).await.unwrap();

        let wlan = ctx.ledger.status(&StepKey::migrate(ResourceKind::SiteWlan, "w1"));
        assert_eq!(wlan, Some(StepStatus::Succeeded));
        assert_eq!(
            ctx.remap.lookup(ResourceKind::SiteWlan, &"w1".into()),
            Some(DestId::new("preflight:site_wlan:w1"))
        );
    }

    #[tokio::test]
    async fn fatal_error_lets_the_tier_finish_and_stops_later_tiers() {
        let catalog = Catalog::standard();
        let mut inventory = policies_and_gateway();
        inventory.insert(
            ResourceInstance::from_payload(
                catalog.get(ResourceKind::ServicePolicy).unwrap(),
                json!({"id": "sp2", "name": "mail"}),
                None,
            )
            .unwrap(),
        );

        let mut destination = MockDestinationClient::new();
        destination.expect_list_existing().returning(|_, _| Ok(Vec::new()));
        destination
            .expect_create()
            .withf(|kind, _, _| *kind == ResourceKind::ServicePolicy)
            .times(2)
            .returning(|_, _, payload| Ok(DestId::new(format!("dst-{}", payload["name"].as_str().unwrap()))));
        destination
            .expect_create()
            .withf(|kind, _, _| *kind == ResourceKind::WanEdgeTemplate)
            .never();

        let ctx = context(inventory, destination, Mode::Mutating);
        ctx.remap
            .record_mapping(ResourceKind::ServicePolicy, "sp1".into(), "stale".into())
            .unwrap();
        let err = Executor::new(&ctx).run(&plan(&ctx)).await.unwrap_err();

        assert!(matches!(err, EngineError::DuplicateMapping { kind: ResourceKind::ServicePolicy, .. }));
        assert_eq!(
            ctx.ledger.status(&StepKey::migrate(ResourceKind::ServicePolicy, "sp2")),
            Some(StepStatus::Succeeded)
        );
        assert_eq!(ctx.ledger.status(&StepKey::migrate(ResourceKind::WanEdgeTemplate, "gw1")), None);
        assert!(!ctx.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_run_dispatches_nothing() {
        let mut destination = MockDestinationClient::new();
        destination.expect_list_existing().never();
        let ctx = context(policies_and_gateway(), destination, Mode::Mutating);
        ctx.cancel.cancel();
        Executor::new(&ctx).run(&plan(&ctx)).await.unwrap();
        assert!(ctx.ledger.results().is_empty());
        assert_eq!(ctx.ledger.summary(2).not_run, 2);
    }
}
