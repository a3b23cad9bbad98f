//! Plan engine
//!
//! Diffs the declared graph against stored state and produces an ordered
//! [`Plan`]. Planning never touches a cloud unless a refresh is requested,
//! and a refresh only updates an in-memory copy of state.

use crate::action::{ActionType, AttributeChange, DesiredResource, Plan, PlanStep, ReplacePhase};
use crate::error::{EngineError, ProviderError, Result};
use crate::provider::{ProviderRegistry, RetryConfig};
use crate::resolve::{Declared, Precedence, Resolver};
use crate::state::{GlobalState, LiveRecord};
use fleetform_core::{
    ReplaceStrategy, ResourceAddress, ResourceGraph, ResourceNode, ResourceType, SchemaRegistry,
};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

pub struct Planner<'a> {
    registry: &'a SchemaRegistry,
}

impl<'a> Planner<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Computes the steps that move `state` to the declared `graph`
    pub fn plan(&self, graph: &ResourceGraph, state: &GlobalState) -> Result<Plan> {
        let order = graph.topological_order();
        let declared: Declared = graph
            .nodes()
            .iter()
            .map(|n| (n.address.clone(), &n.attributes))
            .collect();

        let mut steps: Vec<PlanStep> = Vec::with_capacity(order.len());
        // targets whose live attributes cannot be used for comparison
        let mut pending: HashSet<ResourceAddress> = HashSet::new();

        for node in order {
            let ty = self.registry.describe(&node.address.resource_type)?;
            let resolver = Resolver {
                declared: &declared,
                live: &state.resources,
                pending: &pending,
                precedence: Precedence::Declared,
            };
            let dependencies: Vec<ResourceAddress> =
                graph.dependencies(&node.address).into_iter().cloned().collect();
            let mut step = match state.get(&node.address) {
                None => create_step(node, ty, &resolver),
                Some(record) => change_step(node, ty, record, &dependencies, &resolver),
            };
            step.desired = Some(DesiredResource {
                attributes: node.attributes.clone(),
                flags: node.flags.clone(),
                dependencies,
            });

            if matches!(step.action, ActionType::Create | ActionType::Replace) {
                pending.insert(node.address.clone());
            }
            steps.push(step);
        }

        for record in destroy_order(graph, state) {
            let address = record.address();
            let mut step = PlanStep::new(address.clone(), ActionType::Destroy);
            step.current_id = Some(record.id.clone());
            let ty = self.registry.describe(&record.resource_type).ok();
            step.changes = record
                .attributes
                .iter()
                .filter(|(name, _)| !ty.is_some_and(|t| t.is_computed(name)))
                .map(|(name, value)| {
                    // types missing from the catalog are redacted entirely
                    let sensitive = ty.is_none_or(|t| t.is_sensitive(name));
                    AttributeChange::new(name, Some(value.clone()), None, sensitive)
                })
                .collect();
            if record.flags.deletion_protected {
                step.blocked = Some(format!("{} is deletion-protected", address));
            }
            steps.push(step);
        }

        let steps = sequence(steps, state);
        for step in &steps {
            tracing::debug!("planned {}", step);
        }
        let plan = Plan::new(steps, state.serial);
        tracing::info!("plan: {}", plan.summary());
        Ok(plan)
    }

    /// Reads every stored record through its provider into a copy of `state`.
    ///
    /// Resources reported missing are dropped from the copy, so a declared one
    /// is planned as a create.
    pub async fn refresh(
        &self,
        state: &GlobalState,
        providers: &ProviderRegistry,
        retry: &RetryConfig,
    ) -> Result<GlobalState> {
        let mut refreshed = state.clone();
        for record in state.records() {
            let address = record.address();
            let provider = providers.get(&record.resource_type)?;
            let what = format!("read {}", address);
            let id = record.id.as_str();
            let p = &provider;
            let (result, _) = retry.run(&what, move || p.read(id)).await;
            match result {
                Ok(attributes) => {
                    if let Some(r) = refreshed.resources.get_mut(&address.key()) {
                        r.attributes = attributes;
                    }
                }
                Err(ProviderError::NotFound(_)) => {
                    tracing::warn!("{} no longer exists in the cloud", address);
                    refreshed.resources.remove(&address.key());
                }
                Err(source) => return Err(EngineError::Provider { address, source }),
            }
        }
        Ok(refreshed)
    }

    /// Refresh followed by plan
    pub async fn plan_refreshed(
        &self,
        graph: &ResourceGraph,
        state: &GlobalState,
        providers: &ProviderRegistry,
        retry: &RetryConfig,
    ) -> Result<Plan> {
        let refreshed = self.refresh(state, providers, retry).await?;
        self.plan(graph, &refreshed)
    }
}

fn create_step(node: &ResourceNode, ty: &ResourceType, resolver: &Resolver<'_>) -> PlanStep {
    let mut step = PlanStep::new(node.address.clone(), ActionType::Create);
    step.changes = node
        .attributes
        .iter()
        .map(|(name, value)| {
            let change = AttributeChange::new(name, None, None, ty.is_sensitive(name));
            match resolver.resolve(value) {
                Some(v) if !v.is_null() => {
                    AttributeChange::new(name, None, Some(v), ty.is_sensitive(name))
                }
                Some(_) => change,
                None => change.unknown_after(),
            }
        })
        .collect();
    step
}

fn change_step(
    node: &ResourceNode,
    ty: &ResourceType,
    record: &LiveRecord,
    dependencies: &[ResourceAddress],
    resolver: &Resolver<'_>,
) -> PlanStep {
    let mut changes = Vec::new();
    for (name, value) in &node.attributes {
        if ty.is_computed(name) {
            continue;
        }
        let before = record.attributes.get(name).filter(|v| !v.is_null());
        let sensitive = ty.is_sensitive(name);
        let forces = ty.forces_replace(name);
        match resolver.resolve(value) {
            None => changes.push(
                AttributeChange::new(name, before.cloned(), None, sensitive)
                    .unknown_after()
                    .forcing_replace(forces),
            ),
            Some(desired) => {
                let desired = Some(desired).filter(|v| !v.is_null());
                if desired.as_ref() != before {
                    changes.push(
                        AttributeChange::new(name, before.cloned(), desired, sensitive)
                            .forcing_replace(forces),
                    );
                }
            }
        }
    }
    // stored values the declaration no longer sets
    for (name, value) in &record.attributes {
        if node.attributes.contains_key(name)
            || value.is_null()
            || ty.get(name).is_none_or(|attr| attr.is_computed())
        {
            continue;
        }
        changes.push(
            AttributeChange::new(name, Some(value.clone()), None, ty.is_sensitive(name))
                .forcing_replace(ty.forces_replace(name)),
        );
    }

    let action = if changes.iter().any(|c| c.forces_replace) {
        ActionType::Replace
    } else if !changes.is_empty() {
        ActionType::Update
    } else {
        ActionType::NoOp
    };

    let mut step = PlanStep::new(node.address.clone(), action);
    step.current_id = Some(record.id.clone());
    step.changes = changes;
    if action == ActionType::Replace {
        step.replace_strategy = Some(node.replace_strategy);
        if record.flags.deletion_protected || node.flags.deletion_protected {
            step.blocked = Some(format!(
                "{} is deletion-protected and replacing it would destroy it",
                node.address
            ));
        }
    }
    if action == ActionType::NoOp {
        step.metadata_only =
            record.flags != node.flags || record.dependencies.as_slice() != dependencies;
    }
    step
}

/// Wires step dependencies and orders the steps so each follows the ones
/// it depends on.
///
/// Creation follows declared dependencies; teardown follows the stored
/// ones, dependents first. A replacement linked through a stored
/// dependency to another teardown is split into a destroy phase and a
/// create phase so both orders can hold. Ties keep the incoming order.
fn sequence(steps: Vec<PlanStep>, state: &GlobalState) -> Vec<PlanStep> {
    let n = steps.len();
    let index: HashMap<ResourceAddress, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.address.clone(), i))
        .collect();
    let actions: Vec<ActionType> = steps.iter().map(|s| s.action).collect();
    let teardown: Vec<bool> = actions
        .iter()
        .map(|a| matches!(a, ActionType::Replace | ActionType::Destroy))
        .collect();

    // (dependent, dependency) pairs between existing resources
    let mut stored: Vec<(usize, usize)> = Vec::new();
    for record in state.records() {
        let Some(&d) = index.get(&record.address()) else {
            continue;
        };
        for dep in &record.dependencies {
            if let Some(&y) = index.get(dep)
                && y != d
            {
                stored.push((d, y));
            }
        }
    }
    let declared: Vec<Vec<usize>> = steps
        .iter()
        .map(|s| {
            s.desired
                .iter()
                .flat_map(|d| d.dependencies.iter())
                .filter_map(|a| index.get(a).copied())
                .collect()
        })
        .collect();

    let mut split = vec![false; n];
    for &(d, y) in &stored {
        if teardown[d] && teardown[y] {
            for i in [d, y] {
                split[i] |= actions[i] == ActionType::Replace;
            }
        }
    }

    // create-first cannot hold below a destroy-first split; declared steps
    // come in topological order so dependencies are settled first
    let mut steps = steps;
    let mut below_destroy_first = vec![false; n];
    for i in 0..n {
        let below = declared[i].iter().any(|&y| {
            below_destroy_first[y]
                || (split[y] && steps[y].replace_strategy == Some(ReplaceStrategy::DestroyFirst))
        });
        below_destroy_first[i] = below;
        if split[i]
            && below_destroy_first[i]
            && steps[i].replace_strategy == Some(ReplaceStrategy::CreateFirst)
        {
            tracing::warn!(
                "{}: replaced destroy-first, a dependency is destroyed before it is recreated",
                steps[i].address
            );
            steps[i].replace_strategy = Some(ReplaceStrategy::DestroyFirst);
        }
    }

    let mut drafts: Vec<PlanStep> = Vec::with_capacity(n);
    let mut teardown_at = vec![0; n];
    let mut create_at = vec![0; n];
    for (i, step) in steps.into_iter().enumerate() {
        if split[i] {
            let mut destroy = step.clone();
            destroy.phase = Some(ReplacePhase::Destroy);
            destroy.changes.clear();
            let mut create = step;
            create.phase = Some(ReplacePhase::Create);
            teardown_at[i] = drafts.len();
            drafts.push(destroy);
            create_at[i] = drafts.len();
            drafts.push(create);
        } else {
            teardown_at[i] = drafts.len();
            create_at[i] = drafts.len();
            drafts.push(step);
        }
    }

    // (before, after) pairs of draft indices
    let mut edges: Vec<(usize, usize)> = Vec::new();
    for i in 0..n {
        if split[i] {
            let (t, c) = (teardown_at[i], create_at[i]);
            match drafts[c].replace_strategy {
                Some(ReplaceStrategy::CreateFirst) => edges.push((c, t)),
                _ => edges.push((t, c)),
            }
        }
        for &y in &declared[i] {
            edges.push((create_at[y], create_at[i]));
        }
    }
    for &(d, y) in &stored {
        if teardown[d] && teardown[y] {
            edges.push((teardown_at[d], teardown_at[y]));
        } else if !teardown[d] && actions[y] == ActionType::Destroy {
            // a remaining resource lets go of a removed one first
            edges.push((create_at[d], teardown_at[y]));
        }
    }
    edges.sort_unstable();
    edges.dedup();

    let m = drafts.len();
    let mut blockers = vec![0usize; m];
    let mut unblocks: Vec<Vec<usize>> = vec![Vec::new(); m];
    for &(a, b) in &edges {
        blockers[b] += 1;
        unblocks[a].push(b);
    }
    let mut ready: BinaryHeap<Reverse<usize>> = blockers
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(i, _)| Reverse(i))
        .collect();
    let mut order = Vec::with_capacity(m);
    let mut placed = vec![false; m];
    while let Some(Reverse(a)) = ready.pop() {
        order.push(a);
        placed[a] = true;
        for &b in &unblocks[a] {
            blockers[b] -= 1;
            if blockers[b] == 0 {
                ready.push(Reverse(b));
            }
        }
    }
    if order.len() < m {
        tracing::warn!("stored dependencies contradict the declared ones; some steps cannot run");
        order.extend((0..m).filter(|&a| !placed[a]));
    }

    let mut position = vec![0; m];
    for (p, &a) in order.iter().enumerate() {
        position[a] = p;
    }
    let mut depends_on: Vec<Vec<usize>> = vec![Vec::new(); m];
    for &(a, b) in &edges {
        depends_on[b].push(position[a]);
    }

    let mut slots: Vec<Option<PlanStep>> = drafts.into_iter().map(Some).collect();
    let mut sequenced = Vec::with_capacity(m);
    for a in order {
        if let Some(mut step) = slots[a].take() {
            step.depends_on = std::mem::take(&mut depends_on[a]);
            step.depends_on.sort_unstable();
            sequenced.push(step);
        }
    }
    sequenced
}

/// Stored records with no declared node, dependents before dependencies;
/// ties follow state key order.
fn destroy_order<'s>(graph: &ResourceGraph, state: &'s GlobalState) -> Vec<&'s LiveRecord> {
    let removed: Vec<&LiveRecord> = state
        .records()
        .filter(|r| !graph.contains(&r.address()))
        .collect();
    let index: HashMap<ResourceAddress, usize> = removed
        .iter()
        .enumerate()
        .map(|(i, r)| (r.address(), i))
        .collect();

    // edge dependent -> dependency: the dependent is destroyed first
    let mut blockers = vec![0usize; removed.len()];
    let mut unblocks: Vec<Vec<usize>> = vec![Vec::new(); removed.len()];
    for (i, record) in removed.iter().enumerate() {
        for dep in &record.dependencies {
            if let Some(&j) = index.get(dep) {
                blockers[j] += 1;
                unblocks[i].push(j);
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = blockers
        .iter()
        .enumerate()
        .filter(|(_, n)| **n == 0)
        .map(|(i, _)| Reverse(i))
        .collect();
    let mut order = Vec::with_capacity(removed.len());
    let mut emitted = vec![false; removed.len()];
    while let Some(Reverse(i)) = ready.pop() {
        order.push(removed[i]);
        emitted[i] = true;
        for &j in &unblocks[i] {
            blockers[j] -= 1;
            if blockers[j] == 0 {
                ready.push(Reverse(j));
            }
        }
    }
    // stored dependencies can only loop if the state was edited by hand
    for (i, done) in emitted.iter().enumerate() {
        if !done {
            tracing::warn!("dependency loop among removed resources at {}", removed[i].address());
            order.push(removed[i]);
        }
    }
    order
}
