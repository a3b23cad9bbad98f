//! fleetform engine
//!
//! Plans and applies a validated [`ResourceGraph`](fleetform_core::ResourceGraph)
//! against cloud providers, keeping a durable record of what exists.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  fleetform CLI                   │
//! │            (plan / apply / drift)                │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                fleetform-cloud                   │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────────┐   │
//! │  │ Planner  │  │ Executor │  │ DriftDetector│   │
//! │  └────┬─────┘  └────┬─────┘  └──────┬───────┘   │
//! │       │             │               │           │
//! │  ┌────▼─────────────▼───┐  ┌────────▼────────┐  │
//! │  │      StateStore      │  │ ProviderRegistry │  │
//! │  └──────────────────────┘  └────────┬────────┘  │
//! └─────────────────────────────────────┼───────────┘
//!                                       │
//!                     ┌─────────────────▼─────────┐
//!                     │ trait ResourceProvider    │
//!                     │ (one per resource type)   │
//!                     └───────────────────────────┘
//! ```

pub mod action;
pub mod drift;
pub mod error;
pub mod executor;
pub mod planner;
pub mod provider;
mod resolve;
pub mod state;

// Re-exports
pub use action::{
    ActionType, ApplyResult, ApplyStatus, AttributeChange, Plan, PlanStep, PlanSummary,
    ReplacePhase, StepOutcome, StepReport,
};
pub use drift::{DriftDetector, DriftEntry, DriftReport, DriftStatus};
pub use error::{EngineError, ProviderError, ProviderResult, Result};
pub use executor::{ApplyOptions, DEFAULT_MAX_IN_FLIGHT, Executor};
pub use planner::Planner;
pub use provider::{Attributes, Created, ProviderRegistry, ResourceProvider, RetryConfig};
pub use state::{
    Commit, FileStateStore, GlobalState, LiveRecord, LockInfo, MemoryStateStore, Session,
    StateStore, UNREADABLE_LOCK_TOKEN,
};
pub use tokio_util::sync::CancellationToken;
