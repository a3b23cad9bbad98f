//! Plan and apply result types

use crate::provider::Attributes;
use chrono::{DateTime, Utc};
use fleetform_core::{ReplaceStrategy, ResourceAddress, ResourceFlags};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Placeholder shown instead of sensitive attribute values
pub const REDACTED: &str = "(sensitive)";

/// Type of action to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new resource
    Create,
    /// Change attributes in place
    Update,
    /// Destroy and re-create (a forces-replace attribute changed)
    Replace,
    /// Destroy a resource that is no longer declared
    Destroy,
    /// No changes needed
    NoOp,
}

impl ActionType {
    pub fn symbol(&self) -> &'static str {
        match self {
            ActionType::Create => "+",
            ActionType::Update => "~",
            ActionType::Replace => "-/+",
            ActionType::Destroy => "-",
            ActionType::NoOp => " ",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Replace => write!(f, "replace"),
            ActionType::Destroy => write!(f, "destroy"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// Half of a replacement that was split around its dependents: the old
/// resource goes in the `Destroy` phase, its successor in the `Create` phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacePhase {
    Destroy,
    Create,
}

impl std::fmt::Display for ReplacePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplacePhase::Destroy => write!(f, "destroy phase"),
            ReplacePhase::Create => write!(f, "create phase"),
        }
    }
}

/// One attribute's before/after values.
///
/// `None` means absent. Values that only exist once apply runs are flagged
/// with `known_after_apply`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    pub name: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
    /// Depends on an attribute that will only exist once apply runs
    #[serde(default)]
    pub known_after_apply: bool,
    #[serde(default)]
    pub forces_replace: bool,
    #[serde(default)]
    pub sensitive: bool,
}

impl AttributeChange {
    pub fn new(
        name: impl Into<String>,
        before: Option<Value>,
        after: Option<Value>,
        sensitive: bool,
    ) -> Self {
        let redact = |v: Option<Value>| {
            if sensitive {
                v.map(|_| Value::String(REDACTED.to_string()))
            } else {
                v
            }
        };
        Self {
            name: name.into(),
            before: redact(before),
            after: redact(after),
            known_after_apply: false,
            forces_replace: false,
            sensitive,
        }
    }

    pub fn unknown_after(mut self) -> Self {
        self.after = None;
        self.known_after_apply = true;
        self
    }

    pub fn forcing_replace(mut self, forces: bool) -> Self {
        self.forces_replace = forces;
        self
    }
}

impl std::fmt::Display for AttributeChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |v: &Option<Value>| match v {
            Some(v) => v.to_string(),
            None => "(none)".to_string(),
        };
        let after = if self.known_after_apply {
            "(known after apply)".to_string()
        } else {
            show(&self.after)
        };
        write!(f, "{}: {} -> {}", self.name, show(&self.before), after)?;
        if self.forces_replace {
            write!(f, " (forces replacement)")?;
        }
        Ok(())
    }
}

/// What the executor needs to carry out a desired-state step
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DesiredResource {
    /// Declared attributes (references unresolved)
    pub attributes: BTreeMap<String, fleetform_core::AttrValue>,
    pub flags: ResourceFlags,
    pub dependencies: Vec<ResourceAddress>,
}

/// A single step of a plan
#[derive(Debug, Clone, Serialize)]
pub struct PlanStep {
    pub address: ResourceAddress,
    pub action: ActionType,

    /// Attribute-level differences (empty for no-ops)
    pub changes: Vec<AttributeChange>,

    /// Indices of steps that must complete first
    pub depends_on: Vec<usize>,

    /// Provider ID of the existing resource, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_id: Option<String>,

    /// Set for replacements
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replace_strategy: Option<ReplaceStrategy>,

    /// Set when a replacement runs as two steps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<ReplacePhase>,

    /// Reason this step will not be carried out
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<String>,

    /// Only the stored metadata (flags, dependencies) differs
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub metadata_only: bool,

    #[serde(skip)]
    pub desired: Option<DesiredResource>,
}

impl PlanStep {
    pub fn new(address: ResourceAddress, action: ActionType) -> Self {
        Self {
            address,
            action,
            changes: Vec::new(),
            depends_on: Vec::new(),
            current_id: None,
            replace_strategy: None,
            phase: None,
            blocked: None,
            metadata_only: false,
            desired: None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.is_some()
    }

    /// The destroy phase of a split replacement
    pub fn is_teardown(&self) -> bool {
        self.phase == Some(ReplacePhase::Destroy)
    }

    /// Whether applying this step touches the cloud
    pub fn has_changes(&self) -> bool {
        self.action != ActionType::NoOp
    }
}

impl std::fmt::Display for PlanStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.action.symbol(), self.address, self.action)?;
        if let Some(strategy) = self.replace_strategy {
            write!(f, " [{}]", strategy)?;
        }
        if let Some(phase) = self.phase {
            write!(f, " {}", phase)?;
        }
        if let Some(reason) = &self.blocked {
            write!(f, " BLOCKED: {}", reason)?;
        }
        Ok(())
    }
}

/// Ordered list of steps that moves live state to the declared state
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,

    /// State serial the plan was computed against
    pub state_serial: u64,
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>, state_serial: u64) -> Self {
        Self {
            steps,
            state_serial,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), 0)
    }

    /// Whether the plan has any changes
    pub fn has_changes(&self) -> bool {
        self.steps.iter().any(PlanStep::has_changes)
    }

    pub fn step(&self, address: &ResourceAddress) -> Option<&PlanStep> {
        self.steps.iter().find(|s| &s.address == address)
    }

    /// Get steps by type
    pub fn steps_by_type(&self, action: ActionType) -> Vec<&PlanStep> {
        self.steps.iter().filter(|s| s.action == action).collect()
    }

    pub fn blocked(&self) -> Vec<&PlanStep> {
        self.steps.iter().filter(|s| s.is_blocked()).collect()
    }

    /// Summary of the plan; a split replacement counts once
    pub fn summary(&self) -> PlanSummary {
        let counted = || self.steps.iter().filter(|s| !s.is_teardown());
        let count = |action| {
            counted()
                .filter(|s| s.action == action && !s.is_blocked())
                .count()
        };
        PlanSummary {
            create: count(ActionType::Create),
            update: count(ActionType::Update),
            replace: count(ActionType::Replace),
            destroy: count(ActionType::Destroy),
            no_change: count(ActionType::NoOp),
            blocked: counted().filter(|s| s.is_blocked()).count(),
        }
    }
}

/// Summary of planned actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub destroy: usize,
    pub no_change: usize,
    pub blocked: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to destroy, {} unchanged",
            self.create, self.update, self.replace, self.destroy, self.no_change
        )?;
        if self.blocked > 0 {
            write!(f, ", {} blocked", self.blocked)?;
        }
        Ok(())
    }
}

/// How a step ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Failed,
    /// A dependency failed or was blocked
    Skipped,
    /// Refused because of deletion protection
    Blocked,
    /// Apply was cancelled before the step started
    NotStarted,
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepOutcome::Succeeded => write!(f, "succeeded"),
            StepOutcome::Failed => write!(f, "failed"),
            StepOutcome::Skipped => write!(f, "skipped"),
            StepOutcome::Blocked => write!(f, "blocked"),
            StepOutcome::NotStarted => write!(f, "not started"),
        }
    }
}

/// Per-step record of an apply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub address: ResourceAddress,
    pub action: ActionType,
    pub outcome: StepOutcome,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ReplacePhase>,

    /// Provider calls made, including retries
    pub attempts: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Order in which the step was started (0-based)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_seq: Option<u64>,

    /// Order in which the step's result was written to state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_seq: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Record version written by this step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_version: Option<u64>,
}

impl StepReport {
    pub fn new(address: ResourceAddress, action: ActionType, outcome: StepOutcome) -> Self {
        Self {
            address,
            action,
            outcome,
            phase: None,
            attempts: 0,
            error: None,
            dispatch_seq: None,
            commit_seq: None,
            started_at: None,
            finished_at: None,
            record_version: None,
        }
    }

    pub fn with_phase(mut self, phase: Option<ReplacePhase>) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_problem(&self) -> bool {
        !matches!(self.outcome, StepOutcome::Succeeded)
    }
}

/// Overall apply status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    Success,
    PartialFailure,
    Failure,
}

impl std::fmt::Display for ApplyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyStatus::Success => write!(f, "success"),
            ApplyStatus::PartialFailure => write!(f, "partial failure"),
            ApplyStatus::Failure => write!(f, "failure"),
        }
    }
}

/// Result of applying a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    pub status: ApplyStatus,

    /// One report per plan step, in plan order
    pub steps: Vec<StepReport>,

    /// Apply was interrupted by cancellation
    pub cancelled: bool,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl ApplyResult {
    pub fn from_reports(steps: Vec<StepReport>, cancelled: bool, duration_ms: u64) -> Self {
        let problems = steps.iter().any(StepReport::is_problem);
        let progressed = steps
            .iter()
            .any(|s| s.outcome == StepOutcome::Succeeded && s.action != ActionType::NoOp);
        let status = if !problems {
            ApplyStatus::Success
        } else if progressed {
            ApplyStatus::PartialFailure
        } else {
            ApplyStatus::Failure
        };
        Self {
            status,
            steps,
            cancelled,
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ApplyStatus::Success
    }

    pub fn report(&self, address: &ResourceAddress) -> Option<&StepReport> {
        self.steps.iter().find(|s| &s.address == address)
    }

    pub fn with_outcome(&self, outcome: StepOutcome) -> Vec<&StepReport> {
        self.steps.iter().filter(|s| s.outcome == outcome).collect()
    }

    pub fn failed(&self) -> Vec<&StepReport> {
        self.with_outcome(StepOutcome::Failed)
    }
}

/// Attributes with sensitive keys replaced by the placeholder
pub fn redact(attributes: &Attributes, is_sensitive: impl Fn(&str) -> bool) -> Attributes {
    attributes
        .iter()
        .map(|(k, v)| {
            if is_sensitive(k) {
                (k.clone(), Value::String(REDACTED.to_string()))
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(ty: &str, name: &str, action: ActionType) -> PlanStep {
        PlanStep::new(ResourceAddress::new(ty, name), action)
    }

    #[test]
    fn test_summary_counts_blocked_separately() {
        let mut blocked = step("database-instance", "main", ActionType::Destroy);
        blocked.blocked = Some("deletion-protected".to_string());
        let plan = Plan::new(
            vec![
                step("network", "main", ActionType::Create),
                step("subnetwork", "a", ActionType::Update),
                step("subnetwork", "b", ActionType::NoOp),
                blocked,
            ],
            3,
        );

        let summary = plan.summary();
        assert_eq!(summary.create, 1);
        assert_eq!(summary.update, 1);
        assert_eq!(summary.destroy, 0);
        assert_eq!(summary.blocked, 1);
        assert_eq!(
            summary.to_string(),
            "1 to create, 1 to update, 0 to replace, 0 to destroy, 1 unchanged, 1 blocked"
        );
        assert!(plan.has_changes());
    }

    #[test]
    fn test_noop_plan_has_no_changes() {
        let plan = Plan::new(vec![step("network", "main", ActionType::NoOp)], 1);
        assert!(!plan.has_changes());
        assert!(!Plan::empty().has_changes());
    }

    #[test]
    fn test_sensitive_change_is_redacted() {
        let change = AttributeChange::new("password", Some(json!("old")), Some(json!("new")), true);
        assert_eq!(change.before, Some(json!(REDACTED)));
        assert_eq!(change.after, Some(json!(REDACTED)));
        assert!(!change.to_string().contains("new"));
    }

    #[test]
    fn test_change_display() {
        let change = AttributeChange::new("region", Some(json!("us-east1")), Some(json!("eu-west1")), false)
            .forcing_replace(true);
        assert_eq!(
            change.to_string(),
            "region: \"us-east1\" -> \"eu-west1\" (forces replacement)"
        );

        let unknown = AttributeChange::new("network", None, None, false).unknown_after();
        assert_eq!(unknown.to_string(), "network: (none) -> (known after apply)");
    }

    #[test]
    fn test_apply_status() {
        let addr = |n: &str| ResourceAddress::new("network", n);
        let ok = StepReport::new(addr("a"), ActionType::Create, StepOutcome::Succeeded);
        let failed = StepReport::new(addr("b"), ActionType::Create, StepOutcome::Failed);
        let noop = StepReport::new(addr("c"), ActionType::NoOp, StepOutcome::Succeeded);

        assert_eq!(
            ApplyResult::from_reports(vec![ok.clone(), noop.clone()], false, 0).status,
            ApplyStatus::Success
        );
        assert_eq!(
            ApplyResult::from_reports(vec![ok, failed.clone()], false, 0).status,
            ApplyStatus::PartialFailure
        );
        assert_eq!(
            ApplyResult::from_reports(vec![noop, failed], false, 0).status,
            ApplyStatus::Failure
        );
    }

    #[test]
    fn test_redact() {
        let attrs: Attributes = [
            ("name".to_string(), json!("app")),
            ("password".to_string(), json!("hunter2")),
        ]
        .into_iter()
        .collect();
        let redacted = redact(&attrs, |k| k == "password");
        assert_eq!(redacted["name"], json!("app"));
        assert_eq!(redacted["password"], json!(REDACTED));
    }
}
