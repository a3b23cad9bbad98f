//! Local simulated cloud for fleetform
//!
//! Implements [`ResourceProvider`](fleetform_cloud::ResourceProvider) for every
//! catalog type against an in-process store, optionally persisted to
//! `.fleetform/cloud.json`. Useful for trying declarations locally and for
//! exercising the engine in tests.
//!
//! # Test hooks
//!
//! - [`Fault`]: injected transient or permanent errors
//! - [`MemoryCloud::set_latency`]: artificial delay per call
//! - [`MemoryCloud::tamper`] / [`MemoryCloud::remove`]: out-of-band changes
//! - [`MemoryCloud::calls`]: ordered call log
//!
//! # Example
//!
//! ```ignore
//! use fleetform_cloud_memory::{MemoryCloud, providers};
//! use fleetform_core::SchemaRegistry;
//!
//! let cloud = MemoryCloud::open(".fleetform/cloud.json").await?;
//! let providers = providers(&SchemaRegistry::builtin(), &cloud);
//! ```

pub mod cloud;
pub mod error;
pub mod provider;

pub use cloud::{Call, CloudResource, Fault, MemoryCloud, Operation};
pub use error::{MemoryCloudError, Result};
pub use provider::{MemoryProvider, providers};

/// Default location of the persisted simulated cloud, relative to the project
pub const CLOUD_FILE: &str = ".fleetform/cloud.json";
