//! Shared in-process cloud
//!
//! Holds every simulated resource, plus the test hooks (faults, latency,
//! call log) that the per-type providers consult.

use crate::error::{MemoryCloudError, Result};
use chrono::{DateTime, Utc};
use fleetform_cloud::{Attributes, ProviderError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Provider call kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Read => write!(f, "read"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// A resource living in the simulated cloud
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudResource {
    pub id: String,
    pub resource_type: String,
    pub name: String,
    pub attributes: Attributes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CloudData {
    next_id: u64,
    resources: BTreeMap<String, CloudResource>,
}

/// Injected provider failure
#[derive(Debug, Clone)]
pub struct Fault {
    operation: Option<Operation>,
    resource_type: Option<String>,
    name: Option<String>,
    error: ProviderError,
    /// `None` fails forever
    remaining: Option<u32>,
}

impl Fault {
    /// Fails every call until narrowed down
    pub fn new(error: ProviderError) -> Self {
        Self {
            operation: None,
            resource_type: None,
            name: None,
            error,
            remaining: None,
        }
    }

    pub fn on(mut self, operation: Operation) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Limits the fault to one resource (`type`, `name`)
    pub fn for_resource(mut self, resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self.name = Some(name.into());
        self
    }

    pub fn for_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    /// Fails the first `n` matching calls only
    pub fn times(mut self, n: u32) -> Self {
        self.remaining = Some(n);
        self
    }

    fn matches(&self, operation: Operation, resource_type: &str, name: &str) -> bool {
        self.operation.is_none_or(|op| op == operation)
            && self.resource_type.as_deref().is_none_or(|t| t == resource_type)
            && self.name.as_deref().is_none_or(|n| n == name)
            && self.remaining != Some(0)
    }
}

/// One recorded provider call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Call {
    /// Position in the global call order
    pub seq: usize,
    pub operation: Operation,
    pub resource_type: String,
    pub name: String,
    pub id: Option<String>,
    /// Whether the call returned an error
    pub failed: bool,
}

struct Inner {
    data: tokio::sync::Mutex<CloudData>,
    path: Option<PathBuf>,
    faults: Mutex<Vec<Fault>>,
    latency: Mutex<Duration>,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// The simulated cloud; cheap to clone, clones share state
#[derive(Clone)]
pub struct MemoryCloud {
    inner: Arc<Inner>,
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl MemoryCloud {
    /// Cloud that lives only as long as the process
    pub fn new() -> Self {
        Self::with_data(CloudData::default(), None)
    }

    /// Cloud persisted as JSON at `path`; loads existing content
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            serde_json::from_str(&content).map_err(|source| MemoryCloudError::CorruptStore {
                path: path.display().to_string(),
                source,
            })?
        } else {
            CloudData::default()
        };
        tracing::debug!(
            "Opened simulated cloud at {} ({} resources)",
            path.display(),
            data.resources.len()
        );
        Ok(Self::with_data(data, Some(path)))
    }

    fn with_data(data: CloudData, path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                data: tokio::sync::Mutex::new(data),
                path,
                faults: Mutex::new(Vec::new()),
                latency: Mutex::new(Duration::ZERO),
                calls: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Adds a fault; the first matching fault wins
    pub fn inject(&self, fault: Fault) {
        lock(&self.inner.faults).push(fault);
    }

    pub fn clear_faults(&self) {
        lock(&self.inner.faults).clear();
    }

    /// Delay added to every provider call
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.inner.latency) = latency;
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<Call> {
        lock(&self.inner.calls).clone()
    }

    pub fn calls_for(&self, operation: Operation) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.operation == operation)
            .collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.inner.calls).clear();
    }

    /// Highest number of calls observed running at once
    pub fn peak_in_flight(&self) -> usize {
        self.inner.peak_in_flight.load(Ordering::SeqCst)
    }

    pub async fn resources(&self) -> Vec<CloudResource> {
        self.inner.data.lock().await.resources.values().cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Option<CloudResource> {
        self.inner.data.lock().await.resources.get(id).cloned()
    }

    /// Live resources with this type and name (more than one after an
    /// orphaned create-first replacement)
    pub async fn find(&self, resource_type: &str, name: &str) -> Vec<CloudResource> {
        self.inner
            .data
            .lock()
            .await
            .resources
            .values()
            .filter(|r| r.resource_type == resource_type && r.name == name)
            .cloned()
            .collect()
    }

    /// Changes an attribute out of band, as a console user would
    pub async fn tamper(&self, id: &str, attribute: &str, value: Value) -> Result<()> {
        let mut data = self.inner.data.lock().await;
        let resource = data
            .resources
            .get_mut(id)
            .ok_or_else(|| MemoryCloudError::ResourceNotFound(id.to_string()))?;
        resource.attributes.insert(attribute.to_string(), value);
        resource.updated_at = Utc::now();
        self.persist(&data).await
    }

    /// Deletes a resource out of band
    pub async fn remove(&self, id: &str) -> Result<CloudResource> {
        let mut data = self.inner.data.lock().await;
        let resource = data
            .resources
            .remove(id)
            .ok_or_else(|| MemoryCloudError::ResourceNotFound(id.to_string()))?;
        self.persist(&data).await?;
        Ok(resource)
    }

    async fn persist(&self, data: &CloudData) -> Result<()> {
        let Some(path) = &self.inner.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_string_pretty(data)?).await?;
        Ok(())
    }

    /// Bookkeeping shared by every provider call: latency, fault
    /// injection, call log and concurrency tracking.
    pub(crate) async fn enter(
        &self,
        operation: Operation,
        resource_type: &str,
        name: &str,
        id: Option<&str>,
    ) -> CallGuard {
        let running = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak_in_flight.fetch_max(running, Ordering::SeqCst);

        let latency = *lock(&self.inner.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let fault = {
            let mut faults = lock(&self.inner.faults);
            faults
                .iter_mut()
                .find(|f| f.matches(operation, resource_type, name))
                .map(|f| {
                    if let Some(n) = f.remaining.as_mut() {
                        *n -= 1;
                    }
                    f.error.clone()
                })
        };

        let seq = {
            let mut calls = lock(&self.inner.calls);
            let seq = calls.len();
            calls.push(Call {
                seq,
                operation,
                resource_type: resource_type.to_string(),
                name: name.to_string(),
                id: id.map(str::to_string),
                failed: fault.is_some(),
            });
            seq
        };

        CallGuard {
            cloud: self.clone(),
            seq,
            fault,
        }
    }

    /// Resource name for an id, used to match faults on read/update/delete
    pub(crate) async fn name_of(&self, id: &str) -> String {
        self.get(id).await.map(|r| r.name).unwrap_or_default()
    }

    pub(crate) async fn insert(
        &self,
        resource_type: &str,
        name: &str,
        build: impl FnOnce(&str) -> Attributes,
    ) -> Result<CloudResource> {
        let mut data = self.inner.data.lock().await;
        data.next_id += 1;
        let id = format!("{}-{:05}", resource_type, data.next_id);
        let now = Utc::now();
        let resource = CloudResource {
            attributes: build(&id),
            id: id.clone(),
            resource_type: resource_type.to_string(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        data.resources.insert(id, resource.clone());
        self.persist(&data).await?;
        Ok(resource)
    }

    pub(crate) async fn modify(
        &self,
        id: &str,
        change: impl FnOnce(&mut Attributes),
    ) -> Result<CloudResource> {
        let mut data = self.inner.data.lock().await;
        let resource = data
            .resources
            .get_mut(id)
            .ok_or_else(|| MemoryCloudError::ResourceNotFound(id.to_string()))?;
        change(&mut resource.attributes);
        resource.updated_at = Utc::now();
        let resource = resource.clone();
        self.persist(&data).await?;
        Ok(resource)
    }
}

/// Marks a call finished when dropped
pub(crate) struct CallGuard {
    cloud: MemoryCloud,
    seq: usize,
    fault: Option<ProviderError>,
}

impl CallGuard {
    /// The injected error for this call, if any
    pub fn fault(&self) -> Option<ProviderError> {
        self.fault.clone()
    }

    /// Marks the logged call as failed
    pub fn failed(&self) {
        if let Some(call) = lock(&self.cloud.inner.calls).get_mut(self.seq) {
            call.failed = true;
        }
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.cloud.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
