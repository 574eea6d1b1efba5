//! Template assignment
//!
//! Binds templates to destination sites once every resource has been
//! migrated. Selections are turned into `Assign` steps at plan time (so
//! invalid selections fail before any mutating call); the steps are
//! resolved against the destination when the executor reaches them.
//!
//! WLAN templates are applied per template rather than per site: an
//! org-wide source template gets one org-wide apply, a site-scoped one gets
//! a single apply listing every destination site it covers.

use crate::client::WlanApply;
use crate::error::{ApiError, EngineError};
use crate::executor::RunContext;
use crate::ledger::{Mode, StepStatus};
use crate::plan::{Action, MigrationStep, StepKey};
use crate::selection::{RunSelection, Selection};
use indexmap::IndexMap;
use orgclone_catalog::{Catalog, DestId, ResourceKind, SourceId};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

/// Where a source WLAN template applies
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WlanScope {
    /// Every site of the organization
    OrgWide,
    /// These source sites (restricted to the run)
    Sites(Vec<SourceId>),
}

/// Binding performed by one `Assign` step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentTarget {
    /// Bind one template kind on one site
    Site { site: SourceId, selection: Selection },
    /// Apply a migrated source WLAN template by name
    WlanAuto { template: SourceId, scope: WlanScope },
    /// Apply a chosen destination WLAN template
    WlanExplicit { template: DestId, sites: Vec<SourceId> },
}

/// Classify a source WLAN template. `None` when it applies to no site of the run.
#[must_use]
pub fn wlan_scope(payload: &Value, run_sites: &[SourceId]) -> Option<WlanScope> {
    let mut applied: Vec<&str> = Vec::new();
    match payload.get("applies") {
        Some(Value::Object(applies)) => {
            if applies
                .get("org_id")
                .and_then(Value::as_str)
                .is_some_and(|org| !org.is_empty())
            {
                return Some(WlanScope::OrgWide);
            }
            applied.extend(applies.get("site_id").and_then(Value::as_str));
            if let Some(Value::Array(ids)) = applies.get("site_ids") {
                applied.extend(ids.iter().filter_map(Value::as_str));
            }
        }
        Some(Value::Array(entries)) => {
            applied.extend(entries.iter().filter_map(|e| e.get("site_id").and_then(Value::as_str)));
        }
        _ => applied.extend(payload.get("site_id").and_then(Value::as_str)),
    }

    let sites: Vec<SourceId> = run_sites
        .iter()
        .filter(|site| applied.contains(&site.as_str()))
        .cloned()
        .collect();
    (!sites.is_empty()).then_some(WlanScope::Sites(sites))
}

fn is_org_wide(payload: &Value) -> bool {
    payload
        .pointer("/applies/org_id")
        .and_then(Value::as_str)
        .is_some_and(|org| !org.is_empty())
}

/// Plans and performs template assignment
#[derive(Debug, Clone, Copy)]
pub struct AssignmentResolver<'a> {
    catalog: &'a Catalog,
    selection: &'a RunSelection,
}

impl<'a> AssignmentResolver<'a> {
    /// Create a resolver over the run's catalog and selection
    #[must_use]
    pub fn new(catalog: &'a Catalog, selection: &'a RunSelection) -> Self {
        Self { catalog, selection }
    }

    /// Assign steps for every selected site, after validating the selection
    pub fn plan_steps(
        &self,
        inventory: &crate::inventory::Inventory,
        participating: &[ResourceKind],
    ) -> Result<Vec<MigrationStep>, EngineError> {
        self.selection.validate()?;
        if !participating.contains(&ResourceKind::Site) {
            return Ok(Vec::new());
        }
        let assignable: Vec<ResourceKind> = participating
            .iter()
            .copied()
            .filter(ResourceKind::is_assignable_template)
            .collect();

        let mut steps = Vec::new();
        let mut wlan_auto_sites: Vec<SourceId> = Vec::new();
        let mut wlan_explicit: IndexMap<DestId, Vec<SourceId>> = IndexMap::new();

        for plan in &self.selection.sites {
            let site_id = &plan.source_site_id;
            let Some(site) = inventory.instance(ResourceKind::Site, site_id) else {
                continue;
            };
            for (kind, selection) in self.selection.assignment.for_site(site_id, &assignable) {
                if kind == ResourceKind::WlanTemplate {
                    match selection {
                        Selection::Auto => wlan_auto_sites.push(site_id.clone()),
                        Selection::Explicit(template) => {
                            wlan_explicit.entry(template).or_default().push(site_id.clone());
                        }
                    }
                    continue;
                }

                let label = match &selection {
                    Selection::Explicit(template) => format!("'{template}'"),
                    Selection::Auto => {
                        let descriptor = self.catalog.descriptor(kind)?;
                        let assigned = descriptor
                            .assigned_by
                            .as_deref()
                            .and_then(|field| site.field(field))
                            .filter(|id| !id.is_empty());
                        let Some(template_id) = assigned else {
                            debug!(site = %site_id, kind = %kind, "no template assigned in source");
                            continue;
                        };
                        inventory
                            .instance(kind, &SourceId::new(template_id))
                            .map_or_else(|| format!("'{template_id}'"), |t| format!("'{}'", t.name))
                    }
                };

                steps.push(MigrationStep {
                    key: StepKey::assign(kind, site_id.clone()),
                    name: format!("{kind} {label} -> {}", site.name),
                    action: Action::Assign,
                    depends_on: BTreeSet::from([StepKey::migrate(ResourceKind::Site, site_id.clone())]),
                    parent: Some(site_id.clone()),
                    skip_reason: None,
                    assignment: Some(AssignmentTarget::Site {
                        site: site_id.clone(),
                        selection,
                    }),
                });
            }
        }

        if !wlan_auto_sites.is_empty() {
            for template in inventory.instances(ResourceKind::WlanTemplate) {
                let Some(scope) = wlan_scope(&template.payload, &wlan_auto_sites) else {
                    continue;
                };
                let depends_on = match &scope {
                    WlanScope::OrgWide => BTreeSet::new(),
                    WlanScope::Sites(sites) => site_steps(sites),
                };
                steps.push(MigrationStep {
                    key: StepKey::assign(ResourceKind::WlanTemplate, template.source_id.clone()),
                    name: format!("wlan_template '{}'", template.name),
                    action: Action::Assign,
                    depends_on,
                    parent: None,
                    skip_reason: None,
                    assignment: Some(AssignmentTarget::WlanAuto {
                        template: template.source_id.clone(),
                        scope,
                    }),
                });
            }
        }

        for (template, sites) in wlan_explicit {
            steps.push(MigrationStep {
                key: StepKey::assign(ResourceKind::WlanTemplate, template.as_str()),
                name: format!("wlan_template '{template}'"),
                action: Action::Assign,
                depends_on: site_steps(&sites),
                parent: None,
                skip_reason: None,
                assignment: Some(AssignmentTarget::WlanExplicit { template, sites }),
            });
        }

        Ok(steps)
    }

    /// Resolve and perform one `Assign` step, recording its result
    pub(crate) async fn execute(&self, ctx: &RunContext, step: &MigrationStep) -> Result<(), EngineError> {
        if let Some((dependency, status)) = ctx.blocking_dependency(step) {
            ctx.record(
                step,
                StepStatus::SkippedUnresolved,
                None,
                format!("dependency {dependency} is {}", status.as_str()),
            );
            return Ok(());
        }

        match &step.assignment {
            Some(AssignmentTarget::Site { site, selection }) => self.assign_site(ctx, step, site, selection).await,
            Some(AssignmentTarget::WlanAuto { template, scope }) => {
                self.apply_wlan_auto(ctx, step, template, scope).await
            }
            Some(AssignmentTarget::WlanExplicit { template, sites }) => {
                self.apply_wlan_explicit(ctx, step, template, sites).await
            }
            None => {
                ctx.record(step, StepStatus::Failed, None, "assign step has no target");
                Ok(())
            }
        }
    }

    async fn assign_site(
        &self,
        ctx: &RunContext,
        step: &MigrationStep,
        site: &SourceId,
        selection: &Selection,
    ) -> Result<(), EngineError> {
        let kind = step.key.kind;
        let Some(dest_site) = ctx.remap.lookup(ResourceKind::Site, site) else {
            ctx.record(
                step,
                StepStatus::SkippedUnresolved,
                None,
                format!("site '{site}' has no destination mapping"),
            );
            return Ok(());
        };

        let (template, label) = match selection {
            Selection::Explicit(template) => (template.clone(), format!("'{template}'")),
            Selection::Auto => match self.auto_match(ctx, kind, site).await? {
                Ok(found) => found,
                Err(reason) => {
                    ctx.record(step, StepStatus::SkippedUnresolved, None, reason);
                    return Ok(());
                }
            },
        };

        match ctx.mode {
            Mode::Simulated => {
                ctx.record(
                    step,
                    StepStatus::Succeeded,
                    Some(template),
                    format!("would assign {kind} {label}"),
                );
            }
            Mode::Mutating => {
                let (result, stats) = ctx
                    .guard
                    .call(|| ctx.destination.assign_template(&dest_site, kind, &template))
                    .await;
                match result {
                    Ok(()) => ctx.record(step, StepStatus::Succeeded, Some(template), format!("assigned {kind} {label}")),
                    Err(e) => ctx.record(step, StepStatus::Failed, None, failure(&e, stats.attempts)),
                }
            }
        }
        Ok(())
    }

    /// Destination template for the source site's current template of `kind`.
    ///
    /// The inner `Err` is the skip reason.
    async fn auto_match(
        &self,
        ctx: &RunContext,
        kind: ResourceKind,
        site: &SourceId,
    ) -> Result<Result<(DestId, String), String>, EngineError> {
        let descriptor = self.catalog.descriptor(kind)?;
        let assigned = ctx
            .inventory
            .instance(ResourceKind::Site, site)
            .and_then(|s| descriptor.assigned_by.as_deref().and_then(|f| s.field(f).map(str::to_string)));
        let Some(template_id) = assigned else {
            return Ok(Err(format!("no {kind} assigned to source site '{site}'")));
        };
        let Some(template) = ctx.inventory.instance(kind, &SourceId::new(template_id.as_str())) else {
            return Ok(Err(format!("source template '{template_id}' not found in source organization")));
        };
        Ok(self
            .lookup_by_name(ctx, kind, &template.name)
            .await
            .map(|id| (id, format!("'{}'", template.name))))
    }

    async fn lookup_by_name(&self, ctx: &RunContext, kind: ResourceKind, name: &str) -> Result<DestId, String> {
        if let Some(id) = ctx.remap.lookup_name(kind, name) {
            return Ok(id);
        }
        match ctx
            .index
            .find(ctx.destination.as_ref(), &ctx.guard, kind, None, name)
            .await
        {
            Ok(Some(existing)) => {
                ctx.remap.record_name(kind, name, existing.id.clone());
                Ok(existing.id)
            }
            Ok(None) => Err(format!("template '{name}' not found in destination")),
            Err(e) => Err(format!("template '{name}' not found in destination: listing failed: {e}")),
        }
    }

    async fn apply_wlan_auto(
        &self,
        ctx: &RunContext,
        step: &MigrationStep,
        template: &SourceId,
        scope: &WlanScope,
    ) -> Result<(), EngineError> {
        let Some(source) = ctx.inventory.instance(ResourceKind::WlanTemplate, template) else {
            ctx.record(
                step,
                StepStatus::SkippedUnresolved,
                None,
                format!("source template '{template}' not found in source organization"),
            );
            return Ok(());
        };
        let dest_template = match self.lookup_by_name(ctx, ResourceKind::WlanTemplate, &source.name).await {
            Ok(id) => id,
            Err(reason) => {
                ctx.record(step, StepStatus::SkippedUnresolved, None, reason);
                return Ok(());
            }
        };

        let (target, notes) = match scope {
            WlanScope::OrgWide => (WlanApply::Org, Vec::new()),
            WlanScope::Sites(sites) => match map_sites(ctx, sites) {
                Some(mapped) => mapped,
                None => {
                    ctx.record(step, StepStatus::SkippedUnresolved, None, "none of the template's sites were migrated");
                    return Ok(());
                }
            },
        };
        self.apply(ctx, step, &dest_template, target, notes).await;
        Ok(())
    }

    async fn apply_wlan_explicit(
        &self,
        ctx: &RunContext,
        step: &MigrationStep,
        template: &DestId,
        sites: &[SourceId],
    ) -> Result<(), EngineError> {
        let org_wide = match ctx
            .index
            .listing(ctx.destination.as_ref(), &ctx.guard, ResourceKind::WlanTemplate, None)
            .await
        {
            Ok(listing) => listing
                .values()
                .find(|existing| &existing.id == template)
                .is_some_and(|existing| is_org_wide(&existing.payload)),
            Err(e) => {
                ctx.record(step, StepStatus::Failed, None, format!("destination listing failed: {e}"));
                return Ok(());
            }
        };

        let (target, notes) = if org_wide {
            (WlanApply::Org, vec!["template is org-wide in the destination; applied at org level".to_string()])
        } else {
            match map_sites(ctx, sites) {
                Some(mapped) => mapped,
                None => {
                    ctx.record(step, StepStatus::SkippedUnresolved, None, "none of the selected sites were migrated");
                    return Ok(());
                }
            }
        };
        self.apply(ctx, step, template, target, notes).await;
        Ok(())
    }

    async fn apply(&self, ctx: &RunContext, step: &MigrationStep, template: &DestId, target: WlanApply, mut notes: Vec<String>) {
        let scope = match &target {
            WlanApply::Org => "org-wide".to_string(),
            WlanApply::Sites(sites) => format!("{} site(s)", sites.len()),
        };
        match ctx.mode {
            Mode::Simulated => {
                notes.insert(0, format!("would apply {scope}"));
                ctx.record(step, StepStatus::Succeeded, Some(template.clone()), notes.join("; "));
            }
            Mode::Mutating => {
                let (result, stats) = ctx
                    .guard
                    .call(|| ctx.destination.apply_wlan_template(template, target.clone()))
                    .await;
                match result {
                    Ok(()) => {
                        notes.insert(0, format!("applied {scope}"));
                        ctx.record(step, StepStatus::Succeeded, Some(template.clone()), notes.join("; "));
                    }
                    Err(e) => ctx.record(step, StepStatus::Failed, None, failure(&e, stats.attempts)),
                }
            }
        }
    }
}

fn site_steps(sites: &[SourceId]) -> BTreeSet<StepKey> {
    sites
        .iter()
        .map(|site| StepKey::migrate(ResourceKind::Site, site.clone()))
        .collect()
}

/// Destination ids of `sites`; unmapped sites are noted. `None` when nothing maps.
fn map_sites(ctx: &RunContext, sites: &[SourceId]) -> Option<(WlanApply, Vec<String>)> {
    let mut mapped = Vec::with_capacity(sites.len());
    let mut notes = Vec::new();
    for site in sites {
        match ctx.remap.lookup(ResourceKind::Site, site) {
            Some(dest) => mapped.push(dest),
            None => notes.push(format!("site '{site}' has no destination mapping")),
        }
    }
    (!mapped.is_empty()).then_some((WlanApply::Sites(mapped), notes))
}

pub(crate) fn failure(error: &ApiError, attempts: u32) -> String {
    if attempts > 1 {
        format!("{error} (after {attempts} attempts)")
    } else {
        error.to_string()
    }
}
