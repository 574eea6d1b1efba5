//! orgclone engine
//!
//! Moves an organization's configuration into another organization:
//! - collects the source inventory for the selected sites
//! - plans dependency-ordered tiers of steps from the catalog
//! - executes each tier concurrently, rewriting references through a
//!   run-scoped remap table
//! - binds templates to the new sites
//! - optionally invites administrators into the destination
//! - records one result per step in an append-only ledger
//!
//! A preflight runs the same plan without a single mutating call.
//!
//! # Example
//!
//! ```rust,ignore
//! use orgclone_engine::{EngineConfig, Migration, RunSelection, SitePlan, AssignmentSelection};
//!
//! # async fn example(source: Arc<dyn SourceClient>, destination: Arc<dyn DestinationClient>) -> Result<(), EngineError> {
//! let config = EngineConfig::new().with_orgs("src-org", "dst-org").with_concurrency(4);
//! let selection = RunSelection::new(vec![SitePlan::new("site-1").renamed("HQ")], AssignmentSelection::auto());
//! let migration = Migration::new(config, selection, source, destination)?;
//!
//! let preview = migration.preflight().await?;
//! println!("{}", preview.generate_text());
//!
//! let report = migration.execute().await?;
//! assert!(report.summary.is_success());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs, unreachable_pub)]

pub mod assignment;
pub mod cancel;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod index;
pub mod inventory;
pub mod invite;
pub mod ledger;
pub mod migration;
pub mod plan;
pub mod preflight;
pub mod remap;
pub mod retry;
pub mod rewrite;
pub mod selection;
pub mod snapshot;

pub use assignment::{wlan_scope, AssignmentResolver, AssignmentTarget, WlanScope};
pub use cancel::CancellationToken;
pub use client::{DestinationClient, ExistingResource, SourceClient, WlanApply};
pub use config::{load_file, EngineConfig, RetryPolicy};
pub use error::{ApiError, ConfigError, EngineError, RewriteError};
pub use executor::{is_preflight_id, preflight_id, Executor, RunContext, PREFLIGHT_ID_PREFIX};
pub use index::DestinationIndex;
pub use inventory::Inventory;
pub use invite::plan_invites;
pub use ledger::{Mode, ReportSink, RunLedger, RunSummary, StepResult, StepStatus, TracingSink};
pub use migration::{Migration, RunId, RunReport};
pub use plan::{Action, MigrationPlan, MigrationStep, Planner, Stage, StepKey, Tier};
pub use preflight::ReadOnlyDestination;
pub use remap::{RemapEntry, RemapTable};
pub use retry::{retry_async, CallGuard, RetryConfig, RetryStats};
pub use rewrite::{Rewriter, Rewritten};
pub use selection::{
    AssignmentSelection, AssignmentStrategy, RunSelection, Selection, SitePlan, SuperUser, INVITE_HOURS,
};
pub use snapshot::{InventorySnapshot, SiteSnapshot, SnapshotDestination, SnapshotSource};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
