//! Testing utilities for the orgclone workspace
//!
//! In-memory destination with fault injection, a campus fixture and a
//! collecting report sink.

#![allow(missing_docs)]

use async_trait::async_trait;
use orgclone_catalog::{Catalog, DestId, ResourceKind};
use orgclone_engine::{
    ApiError, AssignmentSelection, DestinationClient, EngineConfig, ExistingResource, InventorySnapshot,
    MigrationPlan, ReportSink, RetryPolicy, RunSelection, RunSummary, SitePlan, SnapshotSource, StepResult,
    WlanApply,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type Owner = (ResourceKind, Option<DestId>);

#[derive(Debug, Default)]
struct State {
    resources: BTreeMap<Owner, Vec<ExistingResource>>,
    settings: BTreeMap<Owner, Value>,
    assignments: BTreeMap<(DestId, ResourceKind), DestId>,
    wlan_applies: BTreeMap<DestId, WlanApply>,
    invites: Vec<Value>,
    create_attempts: HashMap<String, u32>,
}

impl State {
    /// Site-owned writes and listings need the site to exist
    fn check_owner(&self, parent: Option<&DestId>) -> Result<(), ApiError> {
        let Some(site) = parent else {
            return Ok(());
        };
        let known = self
            .resources
            .get(&(ResourceKind::Site, None))
            .is_some_and(|sites| sites.iter().any(|existing| &existing.id == site));
        if known {
            Ok(())
        } else {
            Err(ApiError::NotFound(format!("site '{site}'")))
        }
    }
}

#[derive(Debug)]
struct Jitter {
    max: Duration,
    rng: Mutex<StdRng>,
}

/// Destination organization held in memory
#[derive(Debug, Default)]
pub struct MemoryDestination {
    state: Mutex<State>,
    transient: Mutex<HashMap<String, u32>>,
    permanent: HashSet<String>,
    clone_source: Option<Arc<InventorySnapshot>>,
    delay: Option<Duration>,
    jitter: Option<Jitter>,
    next_id: AtomicU64,
    mutations: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn name_of(kind: ResourceKind, payload: &Value) -> String {
    let field = Catalog::standard()
        .get(kind)
        .map_or("name", |descriptor| descriptor.name_field.as_str());
    payload
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

impl MemoryDestination {
    /// Empty destination organization
    pub fn new() -> Self {
        Self::default()
    }

    /// Creating `name` fails with `unavailable` the first `times` attempts
    pub fn fail_transiently(self, name: &str, times: u32) -> Self {
        self.transient.lock().insert(name.to_string(), times);
        self
    }

    /// Creating `name` always fails validation
    pub fn fail_permanently(mut self, name: &str) -> Self {
        self.permanent.insert(name.to_string());
        self
    }

    /// Every mutating call sleeps this long
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every call, listings included, first sleeps a random time up to
    /// `max`, drawn from a generator seeded with `seed`
    pub fn with_jitter(mut self, max: Duration, seed: u64) -> Self {
        self.jitter = Some(Jitter {
            max,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        });
        self
    }

    /// Native clone copies the org-level collections of `snapshot`
    pub fn with_native_clone(mut self, snapshot: Arc<InventorySnapshot>) -> Self {
        self.clone_source = Some(snapshot);
        self
    }

    /// Add an existing resource and return its id
    pub fn seed(&self, kind: ResourceKind, parent: Option<DestId>, payload: Value) -> DestId {
        let id = self.allocate();
        let name = name_of(kind, &payload);
        self.state
            .lock()
            .resources
            .entry((kind, parent))
            .or_default()
            .push(ExistingResource {
                id: id.clone(),
                name,
                payload,
            });
        id
    }

    /// Resources of `kind` owned by `parent`
    pub fn resources(&self, kind: ResourceKind, parent: Option<&DestId>) -> Vec<ExistingResource> {
        self.state
            .lock()
            .resources
            .get(&(kind, parent.cloned()))
            .cloned()
            .unwrap_or_default()
    }

    /// Every resource of `kind` under any owner
    pub fn all(&self, kind: ResourceKind) -> Vec<ExistingResource> {
        self.state
            .lock()
            .resources
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .flat_map(|(_, resources)| resources.iter().cloned())
            .collect()
    }

    /// First resource of `kind` named `name`, under any owner
    pub fn find(&self, kind: ResourceKind, name: &str) -> Option<ExistingResource> {
        self.all(kind).into_iter().find(|resource| resource.name == name)
    }

    /// Last settings body written for `kind` under `parent`
    pub fn settings(&self, kind: ResourceKind, parent: Option<&DestId>) -> Option<Value> {
        self.state.lock().settings.get(&(kind, parent.cloned())).cloned()
    }

    /// Template of `kind` bound to `site`
    pub fn assignment(&self, site: &DestId, kind: ResourceKind) -> Option<DestId> {
        self.state.lock().assignments.get(&(site.clone(), kind)).cloned()
    }

    /// Last apply target of a WLAN template
    pub fn wlan_apply(&self, template: &DestId) -> Option<WlanApply> {
        self.state.lock().wlan_applies.get(template).cloned()
    }

    /// Invitation bodies received, in order
    pub fn invites(&self) -> Vec<Value> {
        self.state.lock().invites.clone()
    }

    /// Create attempts for `name`, failed ones included
    pub fn create_attempts(&self, name: &str) -> u32 {
        self.state.lock().create_attempts.get(name).copied().unwrap_or(0)
    }

    /// Mutating calls received, failed ones included
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent mutating calls seen
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn allocate(&self) -> DestId {
        DestId::new(format!("dst-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn pause(&self) {
        let Some(jitter) = &self.jitter else {
            return;
        };
        let wait = {
            let max = u64::try_from(jitter.max.as_micros()).unwrap_or(u64::MAX);
            Duration::from_micros(jitter.rng.lock().random_range(0..=max))
        };
        tokio::time::sleep(wait).await;
    }

    async fn enter(&self) -> InFlight<'_> {
        self.pause().await;
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        guard
    }
}

#[async_trait]
impl DestinationClient for MemoryDestination {
    async fn create(&self, kind: ResourceKind, parent: Option<DestId>, payload: Value) -> Result<DestId, ApiError> {
        let _in_flight = self.enter().await;
        self.state.lock().check_owner(parent.as_ref())?;
        let name = name_of(kind, &payload);
        *self.state.lock().create_attempts.entry(name.clone()).or_default() += 1;

        if self.permanent.contains(&name) {
            return Err(ApiError::Validation(format!("'{name}' rejected")));
        }
        if let Some(remaining) = self.transient.lock().get_mut(&name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ApiError::Unavailable("try again".into()));
            }
        }

        let id = self.allocate();
        let mut state = self.state.lock();
        let owned = state.resources.entry((kind, parent)).or_default();
        if owned.iter().any(|existing| existing.name == name) {
            return Err(ApiError::already_exists(format!("{kind} '{name}' already exists")));
        }
        owned.push(ExistingResource {
            id: id.clone(),
            name,
            payload,
        });
        Ok(id)
    }

    async fn put_settings(&self, kind: ResourceKind, parent: Option<DestId>, payload: Value) -> Result<(), ApiError> {
        let _in_flight = self.enter().await;
        let mut state = self.state.lock();
        state.check_owner(parent.as_ref())?;
        state.settings.insert((kind, parent), payload);
        Ok(())
    }

    async fn list_existing(&self, kind: ResourceKind, parent: Option<DestId>) -> Result<Vec<ExistingResource>, ApiError> {
        self.pause().await;
        self.state.lock().check_owner(parent.as_ref())?;
        Ok(self.resources(kind, parent.as_ref()))
    }

    async fn assign_template(&self, site: &DestId, kind: ResourceKind, template: &DestId) -> Result<(), ApiError> {
        let _in_flight = self.enter().await;
        let mut state = self.state.lock();
        let known = state
            .resources
            .get(&(kind, None))
            .is_some_and(|templates| templates.iter().any(|t| &t.id == template));
        if !known {
            return Err(ApiError::NotFound(format!("{kind} '{template}'")));
        }
        state.assignments.insert((site.clone(), kind), template.clone());
        Ok(())
    }

    async fn apply_wlan_template(&self, template: &DestId, target: WlanApply) -> Result<(), ApiError> {
        let _in_flight = self.enter().await;
        self.state.lock().wlan_applies.insert(template.clone(), target);
        Ok(())
    }

    async fn invite_admin(&self, invitation: Value) -> Result<(), ApiError> {
        let _in_flight = self.enter().await;
        let email = invitation.get("email").and_then(Value::as_str).unwrap_or_default();
        let mut state = self.state.lock();
        let invited = state.invites.iter().any(|sent| {
            sent.get("email")
                .and_then(Value::as_str)
                .is_some_and(|other| other.eq_ignore_ascii_case(email))
        });
        if invited {
            return Err(ApiError::already_exists(format!("'{email}' already invited")));
        }
        state.invites.push(invitation);
        Ok(())
    }

    async fn clone_org(&self, _source_org_id: &str) -> Result<bool, ApiError> {
        let Some(snapshot) = self.clone_source.clone() else {
            return Ok(false);
        };
        let _in_flight = self.enter().await;
        for (kind, payloads) in &snapshot.org {
            for payload in payloads {
                let mut copy = payload.clone();
                if let Some(object) = copy.as_object_mut() {
                    object.remove("id");
                }
                self.seed(*kind, None, copy);
            }
        }
        Ok(true)
    }
}

/// Sink that keeps everything it receives
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub plans: Mutex<Vec<MigrationPlan>>,
    pub results: Mutex<Vec<StepResult>>,
    pub summaries: Mutex<Vec<RunSummary>>,
}

impl ReportSink for CollectingSink {
    fn on_plan(&self, plan: &MigrationPlan) {
        self.plans.lock().push(plan.clone());
    }

    fn on_result(&self, result: &StepResult) {
        self.results.lock().push(result.clone());
    }

    fn on_summary(&self, summary: &RunSummary) {
        self.summaries.lock().push(*summary);
    }
}

/// Config with millisecond retry delays
pub fn fast_config() -> EngineConfig {
    EngineConfig::new()
        .with_orgs("src-org", "dst-org")
        .with_concurrency(4)
        .with_call_timeout(Duration::from_secs(5))
        .with_retry(RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter: false,
        })
}

/// Source client over a snapshot
pub fn source(snapshot: &Arc<InventorySnapshot>) -> Arc<SnapshotSource> {
    Arc::new(SnapshotSource::new(snapshot.clone()))
}

/// Sites `s1` and `s2` with auto-matched templates
pub fn campus_selection() -> RunSelection {
    RunSelection::new(
        vec![SitePlan::new("s1"), SitePlan::new("s2")],
        AssignmentSelection::auto(),
    )
}

/// Two-site campus: templates, policies, site-owned objects. Site `s3` exists
/// in the source but is not selected by [`campus_selection`].
pub fn campus_snapshot() -> InventorySnapshot {
    use ResourceKind as K;

    InventorySnapshot::default()
        .with_org(K::SiteGroup, json!({"id": "sg1", "name": "west"}))
        .with_org(K::ServicePolicy, json!({"id": "sp-allow", "name": "allow-web", "action": "allow"}))
        .with_org(K::ServicePolicy, json!({"id": "sp-deny", "name": "block-p2p", "action": "deny"}))
        .with_org(
            K::WanEdgeTemplate,
            json!({
                "id": "gw1",
                "name": "branch-gw",
                "org_id": "src-org",
                "service_policies": [
                    {"servicepolicy_id": "sp-allow"},
                    {"servicepolicy_id": "sp-deny"}
                ]
            }),
        )
        .with_org(K::SwitchTemplate, json!({"id": "sw1", "name": "access-switch"}))
        .with_org(K::RfTemplate, json!({"id": "rf-a", "name": "Campus-A", "band_24": {"power": 8}}))
        .with_org(K::RfTemplate, json!({"id": "rf-b", "name": "Campus-A-v2", "band_24": {"power": 10}}))
        .with_org(
            K::WlanTemplate,
            json!({"id": "wl-sites", "name": "corp-wlans", "applies": {"site_ids": ["s1", "s2", "s3"]}}),
        )
        .with_org(
            K::WlanTemplate,
            json!({"id": "wl-org", "name": "guest-wlans", "applies": {"org_id": "src-org"}}),
        )
        .with_org(K::AlarmTemplate, json!({"id": "al1", "name": "default-alarms"}))
        .with_org(
            K::Site,
            json!({
                "id": "s1",
                "name": "HQ",
                "org_id": "src-org",
                "rftemplate_id": "rf-a",
                "networktemplate_id": "sw1",
                "gatewaytemplate_id": "gw1",
                "alarmtemplate_id": "al1",
                "sitegroup_ids": ["sg1"]
            }),
        )
        .with_org(K::Site, json!({"id": "s2", "name": "Branch", "rftemplate_id": "rf-b"}))
        .with_org(K::Site, json!({"id": "s3", "name": "Lab"}))
        .with_site(
            "s1",
            K::SiteWlan,
            json!({"id": "w1", "ssid": "corp", "site_id": "s1", "portal_image": "https://img.example/portal.png"}),
        )
        .with_site(
            "s1",
            K::SiteMap,
            json!({"id": "m1", "name": "floor-1", "url": "https://img.example/f1.png", "thumbnail_url": "https://img.example/f1-t.png", "width": 800}),
        )
        .with_site_settings(
            "s1",
            K::SiteSettings,
            json!({"vars": {"vlan": 10}, "networktemplate_id": "sw1", "for_site": true}),
        )
        .with_site_settings("s1", K::SiteGroupMembership, json!({"sitegroup_ids": ["sg1", "sg-gone"]}))
        .with_site("s2", K::SiteWlan, json!({"id": "w2", "ssid": "branch"}))
        .with_site("s3", K::SiteWlan, json!({"id": "w3", "ssid": "lab"}))
}

/// Access assurance objects added to `snapshot`
pub fn with_nac(snapshot: InventorySnapshot) -> InventorySnapshot {
    use ResourceKind as K;

    snapshot
        .with_org(K::NacTag, json!({"id": "t1", "name": "employees"}))
        .with_org(
            K::NacRule,
            json!({"id": "r1", "name": "allow-employees", "matching": {"nactags": ["t1"]}, "apply_tags": ["t1"]}),
        )
        .with_org(K::SsoRole, json!({"id": "role1", "name": "admin"}))
        .with_org(
            K::Sso,
            json!({"id": "sso1", "name": "okta", "default_role": "role1", "idp_cert": "-----BEGIN CERTIFICATE-----"}),
        )
        .with_org(K::NacPortal, json!({"id": "np1", "name": "guest-portal", "sso_id": "sso1", "tag_ids": ["t1"]}))
        .with_org(K::UserMac, json!({"id": "um1", "mac": "5c5b35000001", "labels": ["printer"]}))
        .with_org_settings(K::ScepSettings, json!({"enabled": false}))
        .with_org_settings(
            K::NacOrgSettings,
            json!({
                "mist_nac": {"idps": [{"id": "sso1"}]},
                "password_policy": {"enabled": true, "min_length": 12},
                "org_id": "src-org"
            }),
        )
}
