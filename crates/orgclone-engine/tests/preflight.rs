//! Preflight runs mirror live runs without writing

use orgclone_catalog::ResourceKind;
use orgclone_engine::{Migration, Mode, StepKey, StepStatus};
use orgclone_test_utils::{campus_selection, campus_snapshot, fast_config, source, MemoryDestination};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

fn statuses(report: &orgclone_engine::RunReport) -> BTreeMap<StepKey, StepStatus> {
    report
        .results
        .iter()
        .map(|result| (result.step.clone(), result.status))
        .collect()
}

#[tokio::test]
async fn preflight_matches_the_live_run() {
    let snapshot = Arc::new(campus_snapshot());
    let destination = Arc::new(MemoryDestination::new().fail_permanently("allow-web"));
    let migration = Migration::new(fast_config(), campus_selection(), source(&snapshot), destination.clone()).unwrap();

    let preview = migration.preflight().await.unwrap();
    assert_eq!(preview.mode, Mode::Simulated);
    assert_eq!(destination.mutation_count(), 0);
    assert!(preview.results.iter().all(|result| result.simulated));

    let live = migration.execute().await.unwrap();
    assert_eq!(preview.plan_shape(), live.plan_shape());

    // The injected failure is a write-side fault, invisible to a preflight.
    let mut expected = statuses(&preview);
    for (key, status) in statuses(&live) {
        if status != expected[&key] {
            assert!(
                key == StepKey::migrate(ResourceKind::ServicePolicy, "sp-allow")
                    || key == StepKey::migrate(ResourceKind::WanEdgeTemplate, "gw1")
                    || key == StepKey::assign(ResourceKind::WanEdgeTemplate, "s1"),
                "{key} differs: preflight {:?}, live {status:?}",
                expected[&key]
            );
        }
        expected.remove(&key);
    }
    assert!(expected.is_empty());
}

#[tokio::test]
async fn preflight_reports_existing_resources() {
    let snapshot = Arc::new(campus_snapshot());
    let destination = Arc::new(MemoryDestination::new());
    let existing = destination.seed(ResourceKind::RfTemplate, None, json!({"name": "Campus-A"}));

    let preview = Migration::new(fast_config(), campus_selection(), source(&snapshot), destination.clone())
        .unwrap()
        .preflight()
        .await
        .unwrap();

    let rf = preview
        .result(&StepKey::migrate(ResourceKind::RfTemplate, "rf-a"))
        .unwrap();
    assert_eq!(rf.status, StepStatus::SkippedExists);
    assert_eq!(rf.dest_id.as_ref(), Some(&existing));

    let assign = preview
        .result(&StepKey::assign(ResourceKind::RfTemplate, "s1"))
        .unwrap();
    assert_eq!(assign.status, StepStatus::Succeeded);
    assert_eq!(assign.dest_id.as_ref(), Some(&existing));
    assert_eq!(destination.mutation_count(), 0);
}

#[tokio::test]
async fn preflight_of_fresh_destination_only_synthesizes_ids() {
    let snapshot = Arc::new(campus_snapshot());
    let destination = Arc::new(MemoryDestination::new());
    let preview = Migration::new(fast_config(), campus_selection(), source(&snapshot), destination)
        .unwrap()
        .preflight()
        .await
        .unwrap();

    assert!(preview.summary.is_success(), "{}", preview.generate_text());
    assert!(preview
        .mappings
        .iter()
        .all(|entry| entry.dest_id.as_str().starts_with("preflight:")));
    let site = preview.result(&StepKey::migrate(ResourceKind::Site, "s1")).unwrap();
    assert!(site.reason.starts_with("would create"));
}

#[tokio::test]
async fn site_scoped_steps_preflight_against_a_parent_checking_destination() {
    let snapshot = Arc::new(campus_snapshot());
    let destination = Arc::new(MemoryDestination::new());
    let migration = Migration::new(fast_config(), campus_selection(), source(&snapshot), destination.clone()).unwrap();

    let preview = migration.preflight().await.unwrap();
    assert_eq!(preview.summary.failed, 0, "{}", preview.generate_text());
    let wlan = preview.result(&StepKey::migrate(ResourceKind::SiteWlan, "w1")).unwrap();
    assert_eq!(wlan.status, StepStatus::Succeeded);
    assert_eq!(wlan.dest_id.as_ref().map(|id| id.as_str()), Some("preflight:site_wlan:w1"));
    assert_eq!(destination.mutation_count(), 0);

    let live = migration.execute().await.unwrap();
    assert_eq!(live.summary.failed, 0, "{}", live.generate_text());
    assert_eq!(statuses(&preview), statuses(&live));

    // Real site ids now exist, so the next preview lists under them.
    let rerun = migration.preflight().await.unwrap();
    assert_eq!(rerun.summary.failed, 0, "{}", rerun.generate_text());
    assert_eq!(
        rerun.result(&StepKey::migrate(ResourceKind::SiteWlan, "w1")).unwrap().status,
        StepStatus::SkippedExists
    );
    assert_eq!(
        rerun.result(&StepKey::migrate(ResourceKind::SiteMap, "m1")).unwrap().status,
        StepStatus::SkippedExists
    );
}
