//! Run ledger
//!
//! Append-only record of step results. Each step is recorded at most once;
//! a recorded result is never changed. Every result is forwarded to the
//! run's [`ReportSink`] and counted in `orgclone_steps_total`.

use crate::plan::{Action, MigrationPlan, StepKey};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use orgclone_catalog::DestId;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Terminal state of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Written, or found in the destination under a new id
    Succeeded,
    /// Attempted and rejected
    Failed,
    /// A reference or dependency could not be resolved; never attempted
    SkippedUnresolved,
    /// An equivalent resource already exists in the destination
    SkippedExists,
    /// Planned as a skip
    Excluded,
}

impl StepStatus {
    /// Lowercase label used in reports
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::SkippedUnresolved => "skipped_unresolved",
            StepStatus::SkippedExists => "skipped_exists",
            StepStatus::Excluded => "excluded",
        }
    }

    /// Dependents of a step in this state are skipped
    #[inline]
    #[must_use]
    pub fn blocks_dependents(&self) -> bool {
        matches!(self, StepStatus::Failed | StepStatus::SkippedUnresolved)
    }
}

/// Execution mode of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Writes to the destination
    Mutating,
    /// Reads only; writes are replaced by synthetic results
    Simulated,
}

impl Mode {
    /// Lowercase label used in reports
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Mutating => "mutating",
            Mode::Simulated => "simulated",
        }
    }
}

/// Outcome of one step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    /// Step the result belongs to
    pub step: StepKey,
    /// Display name of the step
    pub name: String,
    /// Planned action
    pub action: Action,
    /// Terminal status
    pub status: StepStatus,
    /// Destination id written or found
    pub dest_id: Option<DestId>,
    /// Human-readable explanation
    pub reason: String,
    /// When the result was recorded
    pub timestamp: DateTime<Utc>,
    /// Recorded during a preflight
    pub simulated: bool,
}

impl StepResult {
    /// Create a result stamped now
    #[must_use]
    pub fn new(step: StepKey, name: impl Into<String>, action: Action, status: StepStatus, mode: Mode) -> Self {
        Self {
            step,
            name: name.into(),
            action,
            status,
            dest_id: None,
            reason: String::new(),
            timestamp: Utc::now(),
            simulated: mode == Mode::Simulated,
        }
    }

    /// With the destination id
    #[must_use]
    pub fn with_dest(mut self, dest_id: DestId) -> Self {
        self.dest_id = Some(dest_id);
        self
    }

    /// With an explanation
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}

/// Count summary of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Steps in the plan
    pub planned: usize,
    /// Steps that succeeded
    pub succeeded: usize,
    /// Steps that failed
    pub failed: usize,
    /// Steps skipped on an unresolved dependency
    pub skipped_unresolved: usize,
    /// Steps skipped because the destination already had the resource
    pub skipped_exists: usize,
    /// Steps planned as skips
    pub excluded: usize,
    /// Planned steps never dispatched (cancellation)
    pub not_run: usize,
}

impl RunSummary {
    /// No step failed
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Steps with a recorded result
    #[must_use]
    pub fn recorded(&self) -> usize {
        self.succeeded + self.failed + self.skipped_unresolved + self.skipped_exists + self.excluded
    }
}

/// Receives the plan, every result as recorded, and the final summary
pub trait ReportSink: Send + Sync {
    /// Called once, before the first tier is dispatched
    fn on_plan(&self, _plan: &MigrationPlan) {}
    /// Called as each result is recorded
    fn on_result(&self, _result: &StepResult) {}
    /// Called once the run has finished
    fn on_summary(&self, _summary: &RunSummary) {}
}

/// Sink that logs through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn on_plan(&self, plan: &MigrationPlan) {
        info!(tiers = plan.tiers.len(), steps = plan.step_count(), "migration plan ready");
    }

    fn on_result(&self, result: &StepResult) {
        match result.status {
            StepStatus::Failed => warn!(step = %result.step, name = %result.name, reason = %result.reason, "step failed"),
            StepStatus::SkippedUnresolved => {
                warn!(step = %result.step, name = %result.name, reason = %result.reason, "step skipped");
            }
            _ => debug!(step = %result.step, status = result.status.as_str(), "step recorded"),
        }
    }

    fn on_summary(&self, summary: &RunSummary) {
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped_unresolved = summary.skipped_unresolved,
            skipped_exists = summary.skipped_exists,
            excluded = summary.excluded,
            not_run = summary.not_run,
            "run finished"
        );
    }
}

/// Append-only results of one run
pub struct RunLedger {
    mode: Mode,
    results: Mutex<Vec<StepResult>>,
    statuses: DashMap<StepKey, StepStatus>,
    sink: Arc<dyn ReportSink>,
}

impl std::fmt::Debug for RunLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLedger")
            .field("mode", &self.mode)
            .field("recorded", &self.statuses.len())
            .finish_non_exhaustive()
    }
}

impl RunLedger {
    /// Create an empty ledger
    #[must_use]
    pub fn new(mode: Mode, sink: Arc<dyn ReportSink>) -> Self {
        Self {
            mode,
            results: Mutex::new(Vec::new()),
            statuses: DashMap::new(),
            sink,
        }
    }

    /// Mode results are recorded in
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Record a result. Returns `false` (and drops it) if the step already has one.
    pub fn record(&self, result: StepResult) -> bool {
        match self.statuses.entry(result.step.clone()) {
            Entry::Occupied(_) => {
                warn!(step = %result.step, "step already recorded; result dropped");
                return false;
            }
            Entry::Vacant(slot) => {
                slot.insert(result.status);
            }
        }

        metrics::counter!(
            "orgclone_steps_total",
            "status" => result.status.as_str(),
            "mode" => self.mode.as_str()
        )
        .increment(1);

        self.sink.on_result(&result);
        self.results.lock().push(result);
        true
    }

    /// Status of a recorded step
    #[must_use]
    pub fn status(&self, key: &StepKey) -> Option<StepStatus> {
        self.statuses.get(key).map(|status| *status)
    }

    /// Snapshot of every result in recording order
    #[must_use]
    pub fn results(&self) -> Vec<StepResult> {
        self.results.lock().clone()
    }

    /// Counts over everything recorded so far
    #[must_use]
    pub fn summary(&self, planned: usize) -> RunSummary {
        let mut summary = RunSummary {
            planned,
            ..RunSummary::default()
        };
        for result in self.results.lock().iter() {
            match result.status {
                StepStatus::Succeeded => summary.succeeded += 1,
                StepStatus::Failed => summary.failed += 1,
                StepStatus::SkippedUnresolved => summary.skipped_unresolved += 1,
                StepStatus::SkippedExists => summary.skipped_exists += 1,
                StepStatus::Excluded => summary.excluded += 1,
            }
        }
        summary.not_run = planned.saturating_sub(summary.recorded());
        summary
    }

    pub(crate) fn sink(&self) -> &Arc<dyn ReportSink> {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orgclone_catalog::ResourceKind;

    fn result(id: &str, status: StepStatus) -> StepResult {
        StepResult::new(
            StepKey::migrate(ResourceKind::RfTemplate, id),
            id,
            Action::Create,
            status,
            Mode::Mutating,
        )
    }

    #[test]
    fn results_are_immutable_once_recorded() {
        let ledger = RunLedger::new(Mode::Mutating, Arc::new(TracingSink));
        assert!(ledger.record(result("a", StepStatus::Failed)));
        assert!(!ledger.record(result("a", StepStatus::Succeeded)));
        assert_eq!(
            ledger.status(&StepKey::migrate(ResourceKind::RfTemplate, "a")),
            Some(StepStatus::Failed)
        );
        assert_eq!(ledger.results().len(), 1);
    }

    #[test]
    fn summary_counts_unrecorded_steps_as_not_run() {
        let ledger = RunLedger::new(Mode::Simulated, Arc::new(TracingSink));
        ledger.record(result("a", StepStatus::Succeeded));
        ledger.record(result("b", StepStatus::SkippedExists));
        let summary = ledger.summary(3);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.skipped_exists, 1);
        assert_eq!(summary.not_run, 1);
        assert!(summary.is_success());
    }

    #[test]
    fn only_failures_and_unresolved_block_dependents() {
        assert!(StepStatus::Failed.blocks_dependents());
        assert!(StepStatus::SkippedUnresolved.blocks_dependents());
        assert!(!StepStatus::SkippedExists.blocks_dependents());
        assert!(!StepStatus::Excluded.blocks_dependents());
    }
}
