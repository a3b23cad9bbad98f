//! End-to-end plan/apply scenarios against the simulated cloud

use fleetform_cloud::{
    ActionType, ApplyOptions, ApplyResult, ApplyStatus, CancellationToken, DriftDetector,
    DriftStatus, EngineError, Executor, FileStateStore, MemoryStateStore, Plan, Planner,
    ProviderError, ProviderRegistry, RetryConfig, StateStore, StepOutcome,
};
use fleetform_cloud_memory::{Fault, MemoryCloud, Operation, providers};
use fleetform_core::{ResourceAddress, SchemaRegistry, build_graph, parse_kdl_string};
use serde_json::json;
use std::time::Duration;

const NETWORK: &str = r#"
resource "network" "main" {
    name "prod-vpc"
    auto_create_subnetworks #false
}
"#;

const SUBNET: &str = r#"
resource "subnetwork" "app" {
    name "app"
    network (ref)"network.main.id"
    region "us-central1"
    ip_cidr_range "10.0.0.0/24"
}
"#;

const PEERING: &str = r#"
resource "service-networking-connection" "peering" {
    network (ref)"network.main.id"
    service "servicenetworking.googleapis.com"
    reserved_peering_ranges "google-managed-services"
}
"#;

const DATABASE: &str = r#"
resource "database-instance" "main" {
    name "prod-db"
    database_version "POSTGRES_15"
    region "us-central1"
    settings {
        tier "db-custom-2-7680"
        ip_configuration {
            ipv4_enabled #false
            private_network (ref)"network.main.self_link"
        }
    }
    depends-on "service-networking-connection.peering"
}
"#;

fn full() -> String {
    [NETWORK, SUBNET, PEERING, DATABASE].concat()
}

fn addr(s: &str) -> ResourceAddress {
    s.parse().unwrap()
}

struct Harness {
    registry: SchemaRegistry,
    cloud: MemoryCloud,
    providers: ProviderRegistry,
    store: MemoryStateStore,
}

impl Harness {
    fn new() -> Self {
        let registry = SchemaRegistry::builtin();
        let cloud = MemoryCloud::new();
        let providers = providers(&registry, &cloud);
        Self {
            registry,
            cloud,
            providers,
            store: MemoryStateStore::new(),
        }
    }

    fn options() -> ApplyOptions {
        ApplyOptions::default().with_retry(RetryConfig::immediate(3))
    }

    async fn plan(&self, src: &str) -> Plan {
        let graph = build_graph(parse_kdl_string(src).unwrap(), &self.registry).unwrap();
        let state = self.store.load().await.unwrap();
        Planner::new(&self.registry).plan(&graph, &state).unwrap()
    }

    async fn apply_with(&self, src: &str, options: ApplyOptions) -> ApplyResult {
        let plan = self.plan(src).await;
        Executor::new(&self.providers, &self.store)
            .with_options(options)
            .apply(&plan)
            .await
            .unwrap()
    }

    async fn apply(&self, src: &str) -> ApplyResult {
        self.apply_with(src, Self::options()).await
    }

    async fn id_of(&self, address: &str) -> String {
        self.store
            .snapshot()
            .await
            .get(&addr(address))
            .map(|r| r.id.clone())
            .unwrap()
    }
}

fn actions(plan: &Plan) -> Vec<(String, ActionType)> {
    plan.steps
        .iter()
        .map(|s| (s.address.to_string(), s.action))
        .collect()
}

#[tokio::test]
async fn test_network_peering_database_scenario() {
    let h = Harness::new();

    let plan = h.plan(&full()).await;
    assert_eq!(
        actions(&plan),
        vec![
            ("network.main".to_string(), ActionType::Create),
            ("subnetwork.app".to_string(), ActionType::Create),
            ("service-networking-connection.peering".to_string(), ActionType::Create),
            ("database-instance.main".to_string(), ActionType::Create),
        ]
    );

    let result = h.apply(&full()).await;
    assert_eq!(result.status, ApplyStatus::Success);

    let report = |a: &str| result.report(&addr(a)).unwrap().clone();
    let network = report("network.main");
    let subnet = report("subnetwork.app");
    let peering = report("service-networking-connection.peering");
    let database = report("database-instance.main");
    assert!(network.commit_seq < subnet.dispatch_seq);
    assert!(network.commit_seq < peering.dispatch_seq);
    assert!(peering.commit_seq < database.dispatch_seq);
    assert!(network.commit_seq < database.dispatch_seq);

    // the database received the network's computed self_link
    let db = h.cloud.get(&h.id_of("database-instance.main").await).await.unwrap();
    let net = h.cloud.get(&h.id_of("network.main").await).await.unwrap();
    assert_eq!(
        db.attributes["settings"]["ip_configuration"]["private_network"],
        net.attributes["self_link"]
    );

    let second = h.plan(&full()).await;
    assert!(!second.has_changes());
    assert_eq!(second.summary().no_change, 4);

    let without_db = [NETWORK, SUBNET, PEERING].concat();
    let third = h.plan(&without_db).await;
    assert_eq!(third.steps_by_type(ActionType::Destroy).len(), 1);
    assert_eq!(
        third.steps_by_type(ActionType::Destroy)[0].address,
        addr("database-instance.main")
    );
    assert_eq!(third.summary().no_change, 3);
}

#[tokio::test]
async fn test_apply_is_idempotent() {
    let h = Harness::new();
    h.apply(&full()).await;
    h.cloud.clear_calls();

    let result = h.apply(&full()).await;
    assert!(result.is_success());
    assert!(result.steps.iter().all(|s| s.action == ActionType::NoOp));
    assert!(h.cloud.calls().is_empty());
    assert_eq!(h.cloud.resources().await.len(), 4);
}

#[tokio::test]
async fn test_mutable_change_updates_in_place() {
    let h = Harness::new();
    let src = [NETWORK, SUBNET].concat();
    h.apply(&src).await;
    let id = h.id_of("subnetwork.app").await;

    let changed = src.replace("10.0.0.0/24", "10.0.0.0/20");
    let result = h.apply(&changed).await;
    assert!(result.is_success());
    assert_eq!(
        result.report(&addr("subnetwork.app")).unwrap().action,
        ActionType::Update
    );

    let state = h.store.snapshot().await;
    let record = state.get(&addr("subnetwork.app")).unwrap();
    assert_eq!(record.id, id);
    assert_eq!(record.version, 2);
    assert_eq!(record.attributes["ip_cidr_range"], json!("10.0.0.0/20"));
}

#[tokio::test]
async fn test_forces_replace_change_replaces() {
    let h = Harness::new();
    let src = [NETWORK, SUBNET].concat();
    h.apply(&src).await;
    let old_id = h.id_of("subnetwork.app").await;

    let changed = src.replace("us-central1", "europe-west1");
    let plan = h.plan(&changed).await;
    assert_eq!(
        plan.step(&addr("subnetwork.app")).unwrap().action,
        ActionType::Replace
    );

    let result = h.apply(&changed).await;
    assert!(result.is_success());
    let new_id = h.id_of("subnetwork.app").await;
    assert_ne!(new_id, old_id);
    assert!(h.cloud.get(&old_id).await.is_none());
    assert_eq!(
        h.store.snapshot().await.get(&addr("subnetwork.app")).unwrap().version,
        2
    );

    // destroy-first: the delete is issued before the create
    let calls = h.cloud.calls();
    let delete = calls
        .iter()
        .position(|c| c.operation == Operation::Delete)
        .unwrap();
    let create = calls
        .iter()
        .rposition(|c| c.operation == Operation::Create)
        .unwrap();
    assert!(delete < create);
}

#[tokio::test]
async fn test_replaced_network_outlives_its_subnetwork() {
    let h = Harness::new();
    let src = [NETWORK, SUBNET].concat();
    h.apply(&src).await;
    let old_network = h.id_of("network.main").await;
    h.cloud.clear_calls();

    let renamed = src.replace("prod-vpc", "prod-vpc-2");
    let result = h.apply(&renamed).await;
    assert!(result.is_success());
    assert_eq!(result.steps.len(), 4);

    // subnetwork goes before the network and comes back after it
    let calls: Vec<(Operation, String)> = h
        .cloud
        .calls()
        .into_iter()
        .map(|c| (c.operation, c.resource_type))
        .collect();
    assert_eq!(
        calls,
        vec![
            (Operation::Delete, "subnetwork".to_string()),
            (Operation::Delete, "network".to_string()),
            (Operation::Create, "network".to_string()),
            (Operation::Create, "subnetwork".to_string()),
        ]
    );

    let state = h.store.snapshot().await;
    let network = state.get(&addr("network.main")).unwrap();
    let subnet = state.get(&addr("subnetwork.app")).unwrap();
    assert_ne!(network.id, old_network);
    assert_eq!(subnet.attributes["network"].as_str(), Some(network.id.as_str()));
    assert_eq!(network.version, 2);
    assert_eq!(subnet.version, 2);
    assert!(!h.plan(&renamed).await.has_changes());
}

#[tokio::test]
async fn test_failed_subnetwork_teardown_keeps_network() {
    let h = Harness::new();
    let src = [NETWORK, SUBNET].concat();
    h.apply(&src).await;
    let old_network = h.id_of("network.main").await;
    h.cloud.inject(
        Fault::new(ProviderError::permanent("resource in use"))
            .on(Operation::Delete)
            .for_type("subnetwork"),
    );

    let result = h.apply(&src.replace("prod-vpc", "prod-vpc-2")).await;
    assert_eq!(result.status, ApplyStatus::Failure);
    assert!(result
        .steps
        .iter()
        .filter(|s| s.address == addr("network.main"))
        .all(|s| s.outcome == StepOutcome::Skipped));
    assert!(h.cloud.get(&old_network).await.is_some());
    assert!(h
        .cloud
        .calls_for(Operation::Delete)
        .iter()
        .all(|c| c.resource_type == "subnetwork"));
}

#[tokio::test]
async fn test_removed_mutable_attribute_is_unset() {
    let h = Harness::new();
    let with_mode = NETWORK.replace(
        "auto_create_subnetworks #false",
        "auto_create_subnetworks #false\n    routing_mode \"GLOBAL\"",
    );
    h.apply(&with_mode).await;
    let id = h.id_of("network.main").await;

    let plan = h.plan(NETWORK).await;
    assert_eq!(plan.step(&addr("network.main")).unwrap().action, ActionType::Update);

    assert!(h.apply(NETWORK).await.is_success());
    let live = h.cloud.get(&id).await.unwrap();
    assert!(!live.attributes.contains_key("routing_mode"));
    assert!(!h.plan(NETWORK).await.has_changes());
}

#[tokio::test]
async fn test_removed_forces_replace_attribute_replaces() {
    let h = Harness::new();
    let described = NETWORK.replace(
        "auto_create_subnetworks #false",
        "auto_create_subnetworks #false\n    description \"x\"",
    );
    h.apply(&described).await;
    let old_id = h.id_of("network.main").await;

    let plan = h.plan(NETWORK).await;
    assert_eq!(plan.step(&addr("network.main")).unwrap().action, ActionType::Replace);

    assert!(h.apply(NETWORK).await.is_success());
    let new_id = h.id_of("network.main").await;
    assert_ne!(new_id, old_id);
    assert!(h.cloud.get(&old_id).await.is_none());
    let live = h.cloud.get(&new_id).await.unwrap();
    assert!(!live.attributes.contains_key("description"));
    assert!(!h.plan(NETWORK).await.has_changes());
}

#[tokio::test]
async fn test_create_first_replacement() {
    let h = Harness::new();
    let src = r#"
resource "service-account" "app" {
    account_id "app"
}
resource "iam-member" "app" {
    project "prod"
    role "roles/viewer"
    member (ref)"service-account.app.email"
}
"#;
    h.apply(src).await;
    let old_id = h.id_of("iam-member.app").await;
    h.cloud.clear_calls();

    let result = h.apply(&src.replace("roles/viewer", "roles/editor")).await;
    assert!(result.is_success());

    let calls = h.cloud.calls();
    assert_eq!(calls[0].operation, Operation::Create);
    assert_eq!(calls[1].operation, Operation::Delete);
    assert_eq!(calls[1].id.as_deref(), Some(old_id.as_str()));
    assert_eq!(h.cloud.find("iam-member", "app").await.len(), 1);
}

#[tokio::test]
async fn test_failure_isolated_to_dependents() {
    let h = Harness::new();
    h.cloud.inject(
        Fault::new(ProviderError::permanent("quota exceeded"))
            .on(Operation::Create)
            .for_resource("service-networking-connection", "peering"),
    );

    let result = h.apply(&full()).await;
    assert_eq!(result.status, ApplyStatus::PartialFailure);
    let outcome = |a: &str| result.report(&addr(a)).unwrap().outcome;
    assert_eq!(outcome("network.main"), StepOutcome::Succeeded);
    assert_eq!(outcome("subnetwork.app"), StepOutcome::Succeeded);
    assert_eq!(outcome("service-networking-connection.peering"), StepOutcome::Failed);
    assert_eq!(outcome("database-instance.main"), StepOutcome::Skipped);
    assert_eq!(
        result
            .report(&addr("service-networking-connection.peering"))
            .unwrap()
            .attempts,
        1
    );

    // finished steps were committed
    let state = h.store.snapshot().await;
    assert_eq!(state.len(), 2);

    h.cloud.clear_faults();
    let plan = h.plan(&full()).await;
    assert_eq!(plan.summary().create, 2);
    assert_eq!(plan.summary().no_change, 2);
    assert!(h.apply(&full()).await.is_success());
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let h = Harness::new();
    h.cloud.inject(
        Fault::new(ProviderError::transient("rate limited"))
            .on(Operation::Create)
            .for_resource("network", "main")
            .times(2),
    );

    let result = h.apply(NETWORK).await;
    assert!(result.is_success());
    assert_eq!(result.report(&addr("network.main")).unwrap().attempts, 3);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let h = Harness::new();
    h.cloud.inject(
        Fault::new(ProviderError::transient("backend unavailable"))
            .on(Operation::Create)
            .for_type("network"),
    );

    let result = h.apply(&[NETWORK, SUBNET].concat()).await;
    assert_eq!(result.status, ApplyStatus::Failure);
    let network = result.report(&addr("network.main")).unwrap();
    assert_eq!(network.outcome, StepOutcome::Failed);
    assert_eq!(network.attempts, 3);
    assert!(network.error.as_deref().unwrap().contains("gave up after 3 attempts"));
    assert_eq!(
        result.report(&addr("subnetwork.app")).unwrap().outcome,
        StepOutcome::Skipped
    );
}

#[tokio::test]
async fn test_deletion_protection_blocks_destroy() {
    let h = Harness::new();
    let protected = DATABASE.replace(
        "depends-on",
        "deletion-protected #true\n    depends-on",
    );
    let src = [NETWORK, SUBNET, PEERING, protected.as_str()].concat();
    h.apply(&src).await;
    let db_id = h.id_of("database-instance.main").await;

    let without_db = [NETWORK, SUBNET, PEERING].concat();
    let plan = h.plan(&without_db).await;
    let step = plan.step(&addr("database-instance.main")).unwrap();
    assert_eq!(step.action, ActionType::Destroy);
    assert!(step.is_blocked());

    let result = h.apply(&without_db).await;
    let report = result.report(&addr("database-instance.main")).unwrap();
    assert_eq!(report.outcome, StepOutcome::Blocked);
    assert!(report.error.as_deref().unwrap().contains("deletion-protected"));
    assert!(h.cloud.get(&db_id).await.is_some());
    assert!(h.store.snapshot().await.contains(&addr("database-instance.main")));
}

#[tokio::test]
async fn test_removed_resources_destroyed_dependents_first() {
    let h = Harness::new();
    h.apply(&full()).await;

    let plan = h.plan("").await;
    assert_eq!(
        actions(&plan),
        vec![
            ("database-instance.main".to_string(), ActionType::Destroy),
            ("service-networking-connection.peering".to_string(), ActionType::Destroy),
            ("subnetwork.app".to_string(), ActionType::Destroy),
            ("network.main".to_string(), ActionType::Destroy),
        ]
    );

    let result = h.apply("").await;
    assert!(result.is_success());
    let seq = |a: &str| result.report(&addr(a)).unwrap().clone();
    assert!(seq("database-instance.main").commit_seq < seq("network.main").dispatch_seq);
    assert!(seq("subnetwork.app").commit_seq < seq("network.main").dispatch_seq);
    assert!(h.cloud.resources().await.is_empty());
    assert!(h.store.snapshot().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_parallelism_is_bounded() {
    let h = Harness::new();
    let src: String = (0..6)
        .map(|i| format!("resource \"network\" \"n{}\" {{\n    name \"n{}\"\n}}\n", i, i))
        .collect();
    h.cloud.set_latency(Duration::from_millis(20));

    let result = h
        .apply_with(&src, Harness::options().with_max_in_flight(2))
        .await;
    assert!(result.is_success());
    assert_eq!(h.cloud.peak_in_flight(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_finishes_dispatched_steps() {
    let h = Harness::new();
    h.cloud.set_latency(Duration::from_millis(100));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let options = Harness::options()
        .with_max_in_flight(1)
        .with_cancel(cancel);
    let result = h.apply_with(&full(), options).await;

    assert!(result.cancelled);
    let outcome = |a: &str| result.report(&addr(a)).unwrap().outcome;
    assert_eq!(outcome("network.main"), StepOutcome::Succeeded);
    assert_eq!(outcome("subnetwork.app"), StepOutcome::Succeeded);
    assert_eq!(outcome("service-networking-connection.peering"), StepOutcome::NotStarted);
    assert_eq!(outcome("database-instance.main"), StepOutcome::NotStarted);
    assert_eq!(h.store.snapshot().await.len(), 2);
    assert!(h.store.lock_info().await.unwrap().is_none());
}

#[tokio::test]
async fn test_apply_refuses_when_locked() {
    let dir = tempfile::tempdir().unwrap();
    let registry = SchemaRegistry::builtin();
    let providers = providers(&registry, &MemoryCloud::new());
    let holder = FileStateStore::new(dir.path());
    let session = holder.begin_session().await.unwrap();

    let store = FileStateStore::new(dir.path());
    let graph = build_graph(parse_kdl_string(NETWORK).unwrap(), &registry).unwrap();
    let plan = Planner::new(&registry)
        .plan(&graph, &store.load().await.unwrap())
        .unwrap();
    let err = Executor::new(&providers, &store)
        .apply(&plan)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LockHeld { .. }));

    holder.end_session(session).await.unwrap();
    let result = Executor::new(&providers, &store)
        .with_options(Harness::options())
        .apply(&plan)
        .await
        .unwrap();
    assert!(result.is_success());
    assert_eq!(store.load().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_drift_and_refresh() {
    let h = Harness::new();
    let src = [NETWORK, SUBNET].concat();
    h.apply(&src).await;

    let subnet_id = h.id_of("subnetwork.app").await;
    h.cloud
        .tamper(&subnet_id, "ip_cidr_range", json!("10.9.0.0/16"))
        .await
        .unwrap();

    let graph = build_graph(parse_kdl_string(&src).unwrap(), &h.registry).unwrap();
    let state = h.store.load().await.unwrap();
    let drift = DriftDetector::new(&h.registry, &h.providers)
        .with_retry(RetryConfig::immediate(1))
        .detect(&graph, &state)
        .await
        .unwrap();
    let entry = drift.entry(&addr("subnetwork.app")).unwrap();
    assert_eq!(entry.status, DriftStatus::Modified);
    assert!(entry.declared);
    assert_eq!(entry.changes[0].after, Some(json!("10.9.0.0/16")));
    assert_eq!(drift.in_sync, 1);

    // drift detection changes nothing
    assert_eq!(h.store.load().await.unwrap().serial, state.serial);

    // a refreshed plan repairs the drift with an update
    let planner = Planner::new(&h.registry);
    let plan = planner
        .plan_refreshed(&graph, &state, &h.providers, &RetryConfig::immediate(1))
        .await
        .unwrap();
    assert_eq!(
        plan.step(&addr("subnetwork.app")).unwrap().action,
        ActionType::Update
    );

    let network_id = h.id_of("network.main").await;
    h.cloud.remove(&network_id).await.unwrap();
    let drift = DriftDetector::new(&h.registry, &h.providers)
        .detect(&graph, &state)
        .await
        .unwrap();
    assert_eq!(
        drift.entry(&addr("network.main")).unwrap().status,
        DriftStatus::Deleted
    );

    let plan = planner
        .plan_refreshed(&graph, &state, &h.providers, &RetryConfig::immediate(1))
        .await
        .unwrap();
    assert_eq!(
        plan.step(&addr("network.main")).unwrap().action,
        ActionType::Create
    );
}
