//! Migration runs
//!
//! A [`Migration`] owns everything one run needs: configuration, catalog,
//! operator selection and the two clients. Each call to
//! [`Migration::execute`] or [`Migration::preflight`] is an independent run
//! with its own remap table, ledger and destination index.

use crate::assignment::AssignmentResolver;
use crate::cancel::CancellationToken;
use crate::client::{DestinationClient, SourceClient};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::executor::{Executor, RunContext};
use crate::index::DestinationIndex;
use crate::inventory::Inventory;
use crate::invite::plan_invites;
use crate::ledger::{Mode, ReportSink, RunLedger, RunSummary, StepResult, StepStatus, TracingSink};
use crate::plan::{Action, MigrationPlan, Planner, StepKey};
use crate::preflight::ReadOnlyDestination;
use crate::remap::{RemapEntry, RemapTable};
use crate::retry::CallGuard;
use crate::selection::RunSelection;
use orgclone_catalog::{Catalog, DependencyGraph};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use ulid::Ulid;

/// Identifier of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RunId(Ulid);

impl RunId {
    /// Fresh, time-ordered id
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Id of the run
    pub run_id: RunId,
    /// Live or preflight
    pub mode: Mode,
    /// Plan the run executed
    pub plan: MigrationPlan,
    /// Results in recording order
    pub results: Vec<StepResult>,
    /// Counts per status
    pub summary: RunSummary,
    /// Final remap table, sorted
    pub mappings: Vec<RemapEntry>,
    /// The destination was seeded by a native clone
    pub native_clone: bool,
}

impl RunReport {
    /// Result recorded for a step
    #[must_use]
    pub fn result(&self, key: &StepKey) -> Option<&StepResult> {
        self.results.iter().find(|result| &result.step == key)
    }

    /// Results with the given status
    pub fn with_status(&self, status: StepStatus) -> impl Iterator<Item = &StepResult> {
        self.results.iter().filter(move |result| result.status == status)
    }

    /// Every planned step with its action and dependencies.
    ///
    /// Identical between a preflight and a live run of the same inputs.
    #[must_use]
    pub fn plan_shape(&self) -> BTreeSet<(StepKey, Action, BTreeSet<StepKey>)> {
        self.plan
            .steps()
            .map(|step| (step.key.clone(), step.action, step.depends_on.clone()))
            .collect()
    }

    /// Human-readable report, one line per result
    #[must_use]
    pub fn generate_text(&self) -> String {
        let s = &self.summary;
        let mut out = format!("run {} ({})\n", self.run_id, self.mode.as_str());
        if self.native_clone {
            out.push_str("destination seeded by native clone\n");
        }
        out.push_str(&format!(
            "planned {}: {} succeeded, {} failed, {} unresolved, {} existing, {} excluded, {} not run\n",
            s.planned, s.succeeded, s.failed, s.skipped_unresolved, s.skipped_exists, s.excluded, s.not_run
        ));
        for result in &self.results {
            out.push_str(&format!(
                "  {:<18} {} '{}'",
                result.status.as_str(),
                result.step,
                result.name
            ));
            if let Some(dest) = &result.dest_id {
                out.push_str(&format!(" -> {dest}"));
            }
            if !result.reason.is_empty() {
                out.push_str(&format!(": {}", result.reason));
            }
            out.push('\n');
        }
        out
    }
}

/// One configured migration between two organizations
pub struct Migration {
    config: EngineConfig,
    catalog: Arc<Catalog>,
    selection: RunSelection,
    source: Arc<dyn SourceClient>,
    destination: Arc<dyn DestinationClient>,
    sink: Arc<dyn ReportSink>,
    cancel: CancellationToken,
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("source_org_id", &self.config.source_org_id)
            .field("destination_org_id", &self.config.destination_org_id)
            .field("sites", &self.selection.sites.len())
            .finish_non_exhaustive()
    }
}

impl Migration {
    /// Create a migration over the standard catalog.
    ///
    /// Invalid configuration or selection is rejected here, before any call.
    pub fn new(
        config: EngineConfig,
        selection: RunSelection,
        source: Arc<dyn SourceClient>,
        destination: Arc<dyn DestinationClient>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        selection.validate()?;
        Ok(Self {
            config,
            catalog: Arc::new(Catalog::standard().clone()),
            selection,
            source,
            destination,
            sink: Arc::new(TracingSink),
            cancel: CancellationToken::new(),
        })
    }

    /// Use a different catalog
    #[must_use]
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    /// Report to `sink` instead of the log
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Token that cancels any run of this migration
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Validated engine configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Migrate for real
    pub async fn execute(&self) -> Result<RunReport, EngineError> {
        self.run(Mode::Mutating).await
    }

    pub(crate) async fn run(&self, mode: Mode) -> Result<RunReport, EngineError> {
        let run_id = RunId::new();
        info!(
            run = %run_id,
            mode = mode.as_str(),
            source = %self.config.source_org_id,
            destination = %self.config.destination_org_id,
            "starting run"
        );

        let kinds = self.catalog.participating(self.config.phases());
        let graph = DependencyGraph::build(&self.catalog, &kinds)?;
        self.selection.validate()?;

        let guard = CallGuard::from_config(&self.config);
        let destination: Arc<dyn DestinationClient> = match mode {
            Mode::Mutating => self.destination.clone(),
            Mode::Simulated => Arc::new(ReadOnlyDestination::new(self.destination.clone())),
        };

        let inventory = Inventory::collect(
            &self.catalog,
            graph.kinds(),
            &self.selection.site_ids(),
            self.source.as_ref(),
            &guard,
        )
        .await?;

        let mut plan = Planner::new(&self.catalog).plan(&graph, &inventory)?;
        let assignments = AssignmentResolver::new(&self.catalog, &self.selection).plan_steps(&inventory, graph.kinds())?;
        plan.push_assignments(assignments);
        plan.push_invites(plan_invites(&self.selection.super_users));
        self.sink.on_plan(&plan);

        let native_clone = self.native_clone(mode, destination.as_ref(), &guard).await;

        let ctx = RunContext {
            catalog: self.catalog.clone(),
            selection: self.selection.clone(),
            inventory,
            remap: RemapTable::new(),
            ledger: RunLedger::new(mode, self.sink.clone()),
            index: DestinationIndex::new(),
            source: self.source.clone(),
            destination,
            guard,
            cancel: self.cancel.clone(),
            mode,
            concurrency: self.config.concurrency,
        };
        Executor::new(&ctx).run(&plan).await?;

        let summary = ctx.ledger.summary(plan.step_count());
        ctx.ledger.sink().on_summary(&summary);
        Ok(RunReport {
            run_id,
            mode,
            results: ctx.ledger.results(),
            mappings: ctx.remap.entries(),
            plan,
            summary,
            native_clone,
        })
    }

    /// Seed the destination with the backend's own clone when both orgs
    /// live on one backend. Any failure falls back to per-resource copy.
    async fn native_clone(&self, mode: Mode, destination: &dyn DestinationClient, guard: &CallGuard) -> bool {
        if !self.config.prefer_native_clone || !self.config.shares_backend() {
            return false;
        }
        if mode == Mode::Simulated {
            info!("native clone available; simulated run checks per-resource steps only");
            return false;
        }

        let (result, _) = guard.call(|| destination.clone_org(&self.config.source_org_id)).await;
        match result {
            Ok(true) => {
                info!(source = %self.config.source_org_id, "destination seeded by native clone");
                true
            }
            Ok(false) => {
                info!("backend has no native clone; copying per resource");
                false
            }
            Err(e) => {
                warn!("native clone failed: {}. falling back to per-resource copy", e);
                false
            }
        }
    }
}
