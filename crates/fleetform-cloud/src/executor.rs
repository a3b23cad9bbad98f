//! Apply executor
//!
//! Runs plan steps on a bounded pool of tokio tasks. A step is dispatched
//! once every step it depends on has committed, and each result is written
//! to the state store as soon as it arrives.

use crate::action::{
    ActionType, ApplyResult, DesiredResource, Plan, PlanStep, ReplacePhase, StepOutcome,
    StepReport,
};
use crate::error::{EngineError, ProviderError, Result};
use crate::provider::{Attributes, ProviderRegistry, ResourceProvider, RetryConfig};
use crate::resolve::{Declared, Precedence, Resolver};
use crate::state::{Commit, GlobalState, LiveRecord, Session, StateStore};
use chrono::{DateTime, Utc};
use fleetform_core::{ReplaceStrategy, ResourceAddress};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;

/// Default number of steps running at once
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Upper bound on concurrently running steps
    pub max_in_flight: usize,
    pub retry: RetryConfig,
    /// Stops dispatching new steps when cancelled
    pub cancel: CancellationToken,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            retry: RetryConfig::default(),
            cancel: CancellationToken::new(),
        }
    }
}

impl ApplyOptions {
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

pub struct Executor<'a> {
    providers: &'a ProviderRegistry,
    store: &'a dyn StateStore,
    options: ApplyOptions,
}

/// Provider work for one step, run on its own task
enum Operation {
    Create {
        name: String,
        attributes: Attributes,
        /// Version of the record written on success
        version: u64,
    },
    Update {
        previous: LiveRecord,
        attributes: Attributes,
    },
    Replace {
        strategy: ReplaceStrategy,
        previous: LiveRecord,
        attributes: Attributes,
    },
    Destroy {
        previous: LiveRecord,
    },
    /// Destroy phase of a split replacement
    Retire {
        id: String,
        /// Drop the state record; false once a create-first successor
        /// has taken its place
        tombstone: bool,
    },
}

struct StepTask {
    address: ResourceAddress,
    operation: Operation,
    desired: DesiredResource,
    provider: Arc<dyn ResourceProvider>,
    retry: RetryConfig,
}

/// What a finished task asks the executor to record
struct StepOutput {
    index: usize,
    commit: Option<Commit>,
    error: Option<String>,
    attempts: u32,
}

/// How a step was handled at dispatch time
enum Dispatch {
    Spawn(StepTask),
    /// Finished without a provider call
    Done {
        commit: Option<Commit>,
        outcome: StepOutcome,
        error: Option<String>,
    },
}

/// Bookkeeping for one apply run
struct Run<'p> {
    plan: &'p Plan,
    reports: Vec<Option<StepReport>>,
    remaining: Vec<usize>,
    dependents: Vec<Vec<usize>>,
    ready: BinaryHeap<Reverse<usize>>,
    /// Logical clock shared by dispatch and commit events
    seq: u64,
    started: HashMap<usize, (u64, DateTime<Utc>)>,
    /// Versions of records dropped by a destroy phase, carried to the
    /// successor written by the create phase
    retired: HashMap<ResourceAddress, u64>,
}

impl<'p> Run<'p> {
    fn new(plan: &'p Plan) -> Self {
        let n = plan.steps.len();
        let mut dependents = vec![Vec::new(); n];
        let mut remaining = vec![0; n];
        for (i, step) in plan.steps.iter().enumerate() {
            for &d in &step.depends_on {
                dependents[d].push(i);
                remaining[i] += 1;
            }
        }
        let ready = remaining
            .iter()
            .enumerate()
            .filter(|(_, n)| **n == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        Self {
            plan,
            reports: vec![None; n],
            remaining,
            dependents,
            ready,
            seq: 0,
            started: HashMap::new(),
            retired: HashMap::new(),
        }
    }

    fn tick(&mut self) -> u64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    fn mark_dispatched(&mut self, index: usize) {
        let seq = self.tick();
        self.started.insert(index, (seq, Utc::now()));
    }

    fn finish(
        &mut self,
        index: usize,
        outcome: StepOutcome,
        attempts: u32,
        error: Option<String>,
        committed: Option<(u64, Option<u64>)>,
    ) {
        let plan = self.plan;
        let step = &plan.steps[index];
        let mut report =
            StepReport::new(step.address.clone(), step.action, outcome).with_phase(step.phase);
        report.attempts = attempts;
        report.error = error;
        if let Some((seq, at)) = self.started.get(&index) {
            report.dispatch_seq = Some(*seq);
            report.started_at = Some(*at);
            report.finished_at = Some(Utc::now());
        }
        if let Some((seq, version)) = committed {
            report.commit_seq = Some(seq);
            report.record_version = version;
        }
        self.reports[index] = Some(report);

        if outcome == StepOutcome::Succeeded {
            for j in self.dependents[index].clone() {
                self.remaining[j] -= 1;
                if self.remaining[j] == 0 && self.reports[j].is_none() {
                    self.ready.push(Reverse(j));
                }
            }
        } else {
            self.skip_dependents(index, outcome);
        }
    }

    fn skip_dependents(&mut self, index: usize, outcome: StepOutcome) {
        let plan = self.plan;
        let cause = &plan.steps[index].address;
        let mut stack = self.dependents[index].clone();
        let mut seen = HashSet::new();
        while let Some(j) = stack.pop() {
            if !seen.insert(j) || self.reports[j].is_some() {
                continue;
            }
            let step = &plan.steps[j];
            tracing::info!("{}: skipped ({} {})", step.address, cause, outcome);
            self.reports[j] = Some(
                StepReport::new(step.address.clone(), step.action, StepOutcome::Skipped)
                    .with_phase(step.phase)
                    .with_error(format!("dependency {} {}", cause, outcome)),
            );
            stack.extend(self.dependents[j].iter().copied());
        }
    }

    fn into_reports(self) -> Vec<StepReport> {
        let plan = self.plan;
        self.reports
            .into_iter()
            .enumerate()
            .map(|(i, report)| {
                report.unwrap_or_else(|| {
                    let step = &plan.steps[i];
                    StepReport::new(step.address.clone(), step.action, StepOutcome::NotStarted)
                        .with_phase(step.phase)
                })
            })
            .collect()
    }
}

impl<'a> Executor<'a> {
    pub fn new(providers: &'a ProviderRegistry, store: &'a dyn StateStore) -> Self {
        Self {
            providers,
            store,
            options: ApplyOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ApplyOptions) -> Self {
        self.options = options;
        self
    }

    /// Applies `plan` inside a state session.
    ///
    /// Step failures are reported in the result; an `Err` means the apply
    /// could not start (lock held, stale plan, missing provider).
    pub async fn apply(&self, plan: &Plan) -> Result<ApplyResult> {
        let start = Instant::now();
        for step in plan.steps.iter().filter(|s| s.has_changes()) {
            self.providers.get(&step.address.resource_type)?;
        }

        let session = self.store.begin_session().await?;
        if session.base_serial != plan.state_serial {
            let found = session.base_serial;
            self.store.end_session(session).await?;
            return Err(EngineError::StateConflict {
                expected: plan.state_serial,
                found,
            });
        }

        let outcome = self.run(plan, &session).await;
        let released = self.store.end_session(session).await;
        let (reports, cancelled) = outcome?;
        released?;

        let result =
            ApplyResult::from_reports(reports, cancelled, start.elapsed().as_millis() as u64);
        tracing::info!(
            "apply finished: {} ({} steps, {} ms)",
            result.status,
            result.steps.len(),
            result.duration_ms
        );
        Ok(result)
    }

    async fn run(&self, plan: &Plan, session: &Session) -> Result<(Vec<StepReport>, bool)> {
        let mut state = self.store.load().await?;
        let declared: Declared = plan
            .steps
            .iter()
            .filter_map(|s| s.desired.as_ref().map(|d| (s.address.clone(), &d.attributes)))
            .collect();

        let mut run = Run::new(plan);
        let mut tasks: JoinSet<StepOutput> = JoinSet::new();
        let mut task_index: HashMap<Id, usize> = HashMap::new();
        let max_in_flight = self.options.max_in_flight.max(1);
        let mut halted = false;

        loop {
            while !halted && !self.options.cancel.is_cancelled() && tasks.len() < max_in_flight {
                let Some(Reverse(index)) = run.ready.pop() else {
                    break;
                };
                let step = &plan.steps[index];
                run.mark_dispatched(index);

                match self.prepare(index, step, &state, &declared, &run.retired) {
                    Dispatch::Spawn(task) => {
                        match step.phase {
                            Some(phase) => tracing::info!(
                                "{}: {} {} started",
                                step.address,
                                step.action,
                                phase
                            ),
                            None => tracing::info!("{}: {} started", step.address, step.action),
                        }
                        let handle = tasks.spawn(task.run(index));
                        task_index.insert(handle.id(), index);
                    }
                    Dispatch::Done {
                        commit,
                        outcome,
                        error,
                    } => {
                        let output = StepOutput {
                            index,
                            commit,
                            error,
                            attempts: 0,
                        };
                        if !self
                            .record(&mut run, &mut state, session, output, outcome)
                            .await
                        {
                            halted = true;
                        }
                    }
                }
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                break;
            };
            let output = match joined {
                Ok((id, output)) => {
                    task_index.remove(&id);
                    output
                }
                Err(e) => {
                    let Some(index) = task_index.remove(&e.id()) else {
                        continue;
                    };
                    StepOutput {
                        index,
                        commit: None,
                        error: Some(format!("step task ended abnormally: {}", e)),
                        attempts: 0,
                    }
                }
            };
            let outcome = if output.error.is_some() {
                StepOutcome::Failed
            } else {
                StepOutcome::Succeeded
            };
            if !self
                .record(&mut run, &mut state, session, output, outcome)
                .await
            {
                halted = true;
            }
        }

        let cancelled = self.options.cancel.is_cancelled();
        if cancelled {
            tracing::warn!("apply cancelled; remaining steps were not started");
        }
        Ok((run.into_reports(), cancelled))
    }

    /// Commits a step's output and reports it; `false` when the state
    /// store rejected the commit and the apply must stop.
    async fn record(
        &self,
        run: &mut Run<'_>,
        state: &mut GlobalState,
        session: &Session,
        output: StepOutput,
        mut outcome: StepOutcome,
    ) -> bool {
        let plan = run.plan;
        let address = &plan.steps[output.index].address;
        let mut error = output.error;
        let mut committed = None;
        let mut accepted = true;

        if let Some(commit) = output.commit {
            let version = match &commit {
                Commit::Record(record) => Some(record.version),
                Commit::Tombstone => None,
            };
            match self.store.commit_step(session, address, commit.clone()).await {
                Ok(_) => {
                    match commit {
                        Commit::Record(record) => state.set(*record),
                        Commit::Tombstone => {
                            if let Some(previous) = state.remove(address)
                                && plan.steps[output.index].is_teardown()
                            {
                                run.retired.insert(address.clone(), previous.version);
                            }
                        }
                    }
                    committed = Some((run.tick(), version));
                }
                Err(e) => {
                    tracing::error!("{}: failed to commit state: {}", address, e);
                    outcome = StepOutcome::Failed;
                    error = Some(match error {
                        Some(prev) => format!("{}; state commit failed: {}", prev, e),
                        None => format!("state commit failed: {}", e),
                    });
                    accepted = false;
                }
            }
        }

        match outcome {
            StepOutcome::Succeeded => tracing::info!("{}: committed", address),
            _ => tracing::warn!(
                "{}: {}: {}",
                address,
                outcome,
                error.as_deref().unwrap_or("")
            ),
        }
        run.finish(output.index, outcome, output.attempts, error, committed);
        accepted
    }

    fn prepare(
        &self,
        index: usize,
        step: &PlanStep,
        state: &GlobalState,
        declared: &Declared<'_>,
        retired: &HashMap<ResourceAddress, u64>,
    ) -> Dispatch {
        let current = state.get(&step.address);
        let failed = |error: String| Dispatch::Done {
            commit: None,
            outcome: StepOutcome::Failed,
            error: Some(error),
        };

        if step.is_blocked()
            || (matches!(step.action, ActionType::Destroy | ActionType::Replace)
                && current.is_some_and(|r| r.flags.deletion_protected))
        {
            return Dispatch::Done {
                commit: None,
                outcome: StepOutcome::Blocked,
                error: Some(EngineError::DeletionProtected(step.address.clone()).to_string()),
            };
        }

        let desired = step.desired.clone().unwrap_or_default();
        if step.action == ActionType::NoOp {
            // flags or dependencies may still need recording
            let commit = current
                .filter(|r| r.flags != desired.flags || r.dependencies != desired.dependencies)
                .map(|r| {
                    let mut record = r.next_version(r.attributes.clone());
                    record.flags = desired.flags.clone();
                    record.dependencies = desired.dependencies.clone();
                    Commit::Record(Box::new(record))
                });
            return Dispatch::Done {
                commit,
                outcome: StepOutcome::Succeeded,
                error: None,
            };
        }

        let provider = match self.providers.get(&step.address.resource_type) {
            Ok(provider) => provider,
            Err(e) => return failed(e.to_string()),
        };

        let strategy = step.replace_strategy.unwrap_or_default();
        let operation = if step.is_teardown() {
            let Some(id) = step.current_id.clone() else {
                return failed(format!("{}: no resource to destroy", step.address));
            };
            Operation::Retire {
                id,
                tombstone: strategy == ReplaceStrategy::DestroyFirst,
            }
        } else if step.action == ActionType::Destroy {
            match current {
                Some(previous) => Operation::Destroy {
                    previous: previous.clone(),
                },
                None => {
                    tracing::debug!("{}: already absent from state", step.address);
                    return Dispatch::Done {
                        commit: None,
                        outcome: StepOutcome::Succeeded,
                        error: None,
                    };
                }
            }
        } else {
            let pending = HashSet::new();
            let resolver = Resolver {
                declared,
                live: &state.resources,
                pending: &pending,
                precedence: Precedence::Live,
            };
            let attributes = match resolver.resolve_all(&desired.attributes) {
                Ok(attributes) => attributes,
                Err(e) => return failed(e),
            };
            match (step.action, step.phase, current) {
                (ActionType::Create, _, _) => Operation::Create {
                    name: step.address.name.clone(),
                    attributes,
                    version: 1,
                },
                // the destroy phase already dropped the record
                (ActionType::Replace, Some(ReplacePhase::Create), None) => Operation::Create {
                    name: step.address.name.clone(),
                    attributes,
                    version: retired.get(&step.address).map_or(1, |v| v + 1),
                },
                (ActionType::Replace, Some(ReplacePhase::Create), Some(previous)) => {
                    Operation::Create {
                        name: step.address.name.clone(),
                        attributes,
                        version: previous.version + 1,
                    }
                }
                (ActionType::Update, _, Some(previous)) => Operation::Update {
                    previous: previous.clone(),
                    attributes,
                },
                (ActionType::Replace, None, Some(previous)) => Operation::Replace {
                    strategy,
                    previous: previous.clone(),
                    attributes,
                },
                (action, _, _) => {
                    return failed(format!(
                        "cannot {} {}: no state record (step {})",
                        action, step.address, index
                    ));
                }
            }
        };

        Dispatch::Spawn(StepTask {
            address: step.address.clone(),
            operation,
            desired,
            provider,
            retry: self.options.retry.clone(),
        })
    }
}

impl StepTask {
    async fn run(self, index: usize) -> StepOutput {
        let StepTask {
            address,
            operation,
            desired,
            provider,
            retry,
        } = self;
        let p = &provider;
        let mut attempts = 0;

        let (commit, error) = match operation {
            Operation::Create {
                name,
                attributes,
                version,
            } => {
                let (result, n) = retry
                    .run(&format!("create {}", address), || p.create(&name, &attributes))
                    .await;
                attempts += n;
                match result {
                    Ok(created) => {
                        let mut record = LiveRecord::new(&address, created.id, created.attributes)
                            .with_flags(desired.flags)
                            .with_dependencies(desired.dependencies);
                        record.version = version;
                        (Some(Commit::Record(Box::new(record))), None)
                    }
                    Err(e) => (None, Some(e.to_string())),
                }
            }

            Operation::Update {
                previous,
                attributes,
            } => {
                let id = previous.id.as_str();
                let (result, n) = retry
                    .run(&format!("update {}", address), || p.update(id, &attributes))
                    .await;
                attempts += n;
                match result {
                    Ok(live) => {
                        let mut record = previous.next_version(live);
                        record.flags = desired.flags;
                        record.dependencies = desired.dependencies;
                        (Some(Commit::Record(Box::new(record))), None)
                    }
                    Err(ProviderError::NotFound(_)) => (
                        None,
                        Some(format!(
                            "{} ({}) disappeared before it could be updated; run plan with --refresh",
                            address, id
                        )),
                    ),
                    Err(e) => (None, Some(e.to_string())),
                }
            }

            Operation::Replace {
                strategy,
                previous,
                attributes,
            } => {
                let successor = |created: crate::provider::Created| {
                    let mut record = LiveRecord::new(&address, created.id, created.attributes)
                        .with_flags(desired.flags.clone())
                        .with_dependencies(desired.dependencies.clone());
                    record.version = previous.version + 1;
                    record
                };
                let old_id = previous.id.as_str();
                let delete = || p.delete(old_id);
                let create = || p.create(&address.name, &attributes);

                match strategy {
                    ReplaceStrategy::DestroyFirst => {
                        let (deleted, n) =
                            retry.run(&format!("destroy {} for replacement", address), delete).await;
                        attempts += n;
                        match deleted {
                            Ok(()) | Err(ProviderError::NotFound(_)) => {
                                let (created, n) =
                                    retry.run(&format!("create {}", address), create).await;
                                attempts += n;
                                match created {
                                    Ok(created) => {
                                        (Some(Commit::Record(Box::new(successor(created)))), None)
                                    }
                                    // the old resource is gone either way
                                    Err(e) => (
                                        Some(Commit::Tombstone),
                                        Some(format!(
                                            "destroyed {} but creating its replacement failed: {}",
                                            old_id, e
                                        )),
                                    ),
                                }
                            }
                            Err(e) => (None, Some(e.to_string())),
                        }
                    }
                    ReplaceStrategy::CreateFirst => {
                        let (created, n) = retry.run(&format!("create {}", address), create).await;
                        attempts += n;
                        match created {
                            Ok(created) => {
                                let record = successor(created);
                                let (deleted, n) = retry
                                    .run(&format!("destroy previous {}", address), delete)
                                    .await;
                                attempts += n;
                                match deleted {
                                    Ok(()) | Err(ProviderError::NotFound(_)) => {
                                        (Some(Commit::Record(Box::new(record))), None)
                                    }
                                    Err(e) => (
                                        Some(Commit::Record(Box::new(record))),
                                        Some(format!(
                                            "replacement created but previous resource {} was not destroyed and is orphaned: {}",
                                            old_id, e
                                        )),
                                    ),
                                }
                            }
                            Err(e) => (None, Some(e.to_string())),
                        }
                    }
                }
            }

            Operation::Retire { id, tombstone } => {
                let (result, n) = retry
                    .run(&format!("destroy {} for replacement", address), || {
                        p.delete(&id)
                    })
                    .await;
                attempts += n;
                match result {
                    Ok(()) | Err(ProviderError::NotFound(_)) => {
                        (tombstone.then_some(Commit::Tombstone), None)
                    }
                    Err(e) if tombstone => (None, Some(e.to_string())),
                    Err(e) => (
                        None,
                        Some(format!(
                            "replacement created but previous resource {} was not destroyed and is orphaned: {}",
                            id, e
                        )),
                    ),
                }
            }

            Operation::Destroy { previous } => {
                let id = previous.id.as_str();
                let (result, n) = retry
                    .run(&format!("destroy {}", address), || p.delete(id))
                    .await;
                attempts += n;
                match result {
                    Ok(()) | Err(ProviderError::NotFound(_)) => (Some(Commit::Tombstone), None),
                    Err(e) => (None, Some(e.to_string())),
                }
            }
        };

        StepOutput {
            index,
            commit,
            error,
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderResult;
    use crate::planner::Planner;
    use crate::provider::Created;
    use crate::state::MemoryStateStore;
    use async_trait::async_trait;
    use fleetform_core::{SchemaRegistry, build_graph, parse_kdl_string};
    use serde_json::json;
    use std::sync::Mutex;

    /// Records calls; fails `create` for names listed in `fail_create`
    #[derive(Default)]
    struct FakeProvider {
        ty: String,
        fail_create: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        fn new(ty: &str) -> Self {
            Self {
                ty: ty.to_string(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ResourceProvider for FakeProvider {
        fn resource_type(&self) -> &str {
            &self.ty
        }

        async fn create(&self, name: &str, attributes: &Attributes) -> ProviderResult<Created> {
            self.calls.lock().unwrap().push(format!("create {}", name));
            if self.fail_create.iter().any(|n| n == name) {
                return Err(ProviderError::permanent("quota exceeded"));
            }
            let id = format!("{}/{}", self.ty, name);
            let mut attributes = attributes.clone();
            attributes.insert("id".to_string(), json!(id));
            Ok(Created { id, attributes })
        }

        async fn read(&self, id: &str) -> ProviderResult<Attributes> {
            Err(ProviderError::not_found(id))
        }

        async fn update(&self, id: &str, attributes: &Attributes) -> ProviderResult<Attributes> {
            self.calls.lock().unwrap().push(format!("update {}", id));
            let mut attributes = attributes.clone();
            attributes.insert("id".to_string(), json!(id));
            Ok(attributes)
        }

        async fn delete(&self, id: &str) -> ProviderResult<()> {
            self.calls.lock().unwrap().push(format!("delete {}", id));
            Ok(())
        }
    }

    const INFRA: &str = r#"
resource "network" "main" {
    name "prod"
}
resource "subnetwork" "app" {
    network (ref)"network.main.id"
    ip_cidr_range "10.0.0.0/24"
}
"#;

    fn options() -> ApplyOptions {
        ApplyOptions::default().with_retry(RetryConfig::immediate(1))
    }

    async fn plan_for(src: &str, store: &MemoryStateStore) -> Plan {
        let registry = SchemaRegistry::builtin();
        let graph = build_graph(parse_kdl_string(src).unwrap(), &registry).unwrap();
        Planner::new(&registry)
            .plan(&graph, &store.load().await.unwrap())
            .unwrap()
    }

    #[tokio::test]
    async fn test_apply_creates_and_resolves_references() {
        let providers = ProviderRegistry::new()
            .with(Arc::new(FakeProvider::new("network")))
            .with(Arc::new(FakeProvider::new("subnetwork")));
        let store = MemoryStateStore::new();
        let plan = plan_for(INFRA, &store).await;

        let result = Executor::new(&providers, &store)
            .with_options(options())
            .apply(&plan)
            .await
            .unwrap();

        assert!(result.is_success());
        let state = store.snapshot().await;
        let sub = state.get(&ResourceAddress::new("subnetwork", "app")).unwrap();
        assert_eq!(sub.attributes["network"], json!("network/main"));
        assert_eq!(sub.dependencies, vec![ResourceAddress::new("network", "main")]);

        let net = result.report(&ResourceAddress::new("network", "main")).unwrap();
        let sub = result.report(&ResourceAddress::new("subnetwork", "app")).unwrap();
        assert!(net.commit_seq.unwrap() < sub.dispatch_seq.unwrap());
        assert!(store.lock_info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failure_skips_dependents() {
        let mut network = FakeProvider::new("network");
        network.fail_create = vec!["main".to_string()];
        let providers = ProviderRegistry::new()
            .with(Arc::new(network))
            .with(Arc::new(FakeProvider::new("subnetwork")));
        let store = MemoryStateStore::new();
        let plan = plan_for(INFRA, &store).await;

        let result = Executor::new(&providers, &store)
            .with_options(options())
            .apply(&plan)
            .await
            .unwrap();

        assert_eq!(result.status, crate::action::ApplyStatus::Failure);
        let sub = result.report(&ResourceAddress::new("subnetwork", "app")).unwrap();
        assert_eq!(sub.outcome, StepOutcome::Skipped);
        assert!(store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_provider_fails_before_locking() {
        let providers = ProviderRegistry::new().with(Arc::new(FakeProvider::new("network")));
        let store = MemoryStateStore::new();
        let plan = plan_for(INFRA, &store).await;

        let err = Executor::new(&providers, &store)
            .apply(&plan)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ProviderNotFound(ref t) if t == "subnetwork"));
        assert!(store.lock_info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_apply_starts_nothing() {
        let providers = ProviderRegistry::new()
            .with(Arc::new(FakeProvider::new("network")))
            .with(Arc::new(FakeProvider::new("subnetwork")));
        let store = MemoryStateStore::new();
        let plan = plan_for(INFRA, &store).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = Executor::new(&providers, &store)
            .with_options(options().with_cancel(cancel))
            .apply(&plan)
            .await
            .unwrap();

        assert!(result.cancelled);
        assert!(result
            .steps
            .iter()
            .all(|s| s.outcome == StepOutcome::NotStarted));
    }

    #[tokio::test]
    async fn test_stale_plan_is_rejected() {
        let providers = ProviderRegistry::new()
            .with(Arc::new(FakeProvider::new("network")))
            .with(Arc::new(FakeProvider::new("subnetwork")));
        let store = MemoryStateStore::new();
        let plan = plan_for(INFRA, &store).await;

        let executor = Executor::new(&providers, &store).with_options(options());
        executor.apply(&plan).await.unwrap();
        let err = executor.apply(&plan).await.unwrap_err();
        assert!(matches!(err, EngineError::StateConflict { expected: 0, .. }));
    }
}
