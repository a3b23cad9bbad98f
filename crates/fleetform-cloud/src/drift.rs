//! Drift detection
//!
//! Compares what the state store recorded with what the providers report now.
//! Nothing is planned or applied.

use crate::action::AttributeChange;
use crate::error::{ProviderError, Result};
use crate::provider::{ProviderRegistry, RetryConfig};
use crate::state::{GlobalState, LiveRecord};
use fleetform_core::{ResourceAddress, ResourceGraph, SchemaRegistry};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftStatus {
    /// Attributes changed out of band
    Modified,
    /// The resource no longer exists
    Deleted,
    /// The provider could not be read
    Unreadable,
}

impl std::fmt::Display for DriftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriftStatus::Modified => write!(f, "modified"),
            DriftStatus::Deleted => write!(f, "deleted"),
            DriftStatus::Unreadable => write!(f, "unreadable"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftEntry {
    pub address: ResourceAddress,
    pub id: String,
    pub status: DriftStatus,
    /// `before` is the stored value, `after` the live one
    pub changes: Vec<AttributeChange>,
    /// Still present in the declaration file
    pub declared: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DriftReport {
    pub entries: Vec<DriftEntry>,
    /// Records read without finding drift
    pub in_sync: usize,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, address: &ResourceAddress) -> Option<&DriftEntry> {
        self.entries.iter().find(|e| &e.address == address)
    }
}

pub struct DriftDetector<'a> {
    registry: &'a SchemaRegistry,
    providers: &'a ProviderRegistry,
    retry: RetryConfig,
}

impl<'a> DriftDetector<'a> {
    pub fn new(registry: &'a SchemaRegistry, providers: &'a ProviderRegistry) -> Self {
        Self {
            registry,
            providers,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Reads every managed resource and reports the ones that differ
    pub async fn detect(&self, graph: &ResourceGraph, state: &GlobalState) -> Result<DriftReport> {
        let mut report = DriftReport::default();

        for record in state.records() {
            let address = record.address();
            let provider = self.providers.get(&record.resource_type)?;
            let id = record.id.as_str();
            let p = &provider;
            let (live, _) = self
                .retry
                .run(&format!("read {}", address), move || p.read(id))
                .await;

            let declared = graph.contains(&address);
            let (status, changes, error) = match live {
                Ok(live) => {
                    let changes = self.compare(record, &live);
                    if changes.is_empty() {
                        report.in_sync += 1;
                        continue;
                    }
                    (DriftStatus::Modified, changes, None)
                }
                Err(ProviderError::NotFound(_)) => (DriftStatus::Deleted, Vec::new(), None),
                Err(e) => (DriftStatus::Unreadable, Vec::new(), Some(e.to_string())),
            };

            tracing::info!("{}: drift detected ({})", address, status);
            report.entries.push(DriftEntry {
                address,
                id: record.id.clone(),
                status,
                changes,
                declared,
                error,
            });
        }
        Ok(report)
    }

    fn compare(&self, record: &LiveRecord, live: &crate::provider::Attributes) -> Vec<AttributeChange> {
        let ty = self.registry.describe(&record.resource_type).ok();
        let names: BTreeSet<&String> = record.attributes.keys().chain(live.keys()).collect();

        names
            .into_iter()
            .filter(|name| !ty.is_some_and(|t| t.is_computed(name)))
            .filter_map(|name| {
                let before = record.attributes.get(name).filter(|v| !v.is_null());
                let after = live.get(name).filter(|v| !v.is_null());
                if before == after {
                    return None;
                }
                let sensitive = ty.is_none_or(|t| t.is_sensitive(name));
                Some(AttributeChange::new(
                    name,
                    before.cloned(),
                    after.cloned(),
                    sensitive,
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderResult;
    use crate::provider::{Attributes, Created, ResourceProvider};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Serves fixed read results by id
    struct StaticProvider {
        ty: String,
        live: HashMap<String, Attributes>,
    }

    #[async_trait]
    impl ResourceProvider for StaticProvider {
        fn resource_type(&self) -> &str {
            &self.ty
        }

        async fn create(&self, _: &str, _: &Attributes) -> ProviderResult<Created> {
            Err(ProviderError::permanent("read-only"))
        }

        async fn read(&self, id: &str) -> ProviderResult<Attributes> {
            self.live
                .get(id)
                .cloned()
                .ok_or_else(|| ProviderError::not_found(id))
        }

        async fn update(&self, _: &str, _: &Attributes) -> ProviderResult<Attributes> {
            Err(ProviderError::permanent("read-only"))
        }

        async fn delete(&self, _: &str) -> ProviderResult<()> {
            Err(ProviderError::permanent("read-only"))
        }
    }

    fn attrs(value: serde_json::Value) -> Attributes {
        value
            .as_object()
            .map(|o| o.clone().into_iter().collect())
            .unwrap_or_default()
    }

    fn state() -> GlobalState {
        let mut state = GlobalState::new();
        state.set(LiveRecord::new(
            &ResourceAddress::new("database-user", "app"),
            "u-1",
            attrs(json!({"id": "u-1", "name": "app", "instance": "main", "password": "a"})),
        ));
        state.set(LiveRecord::new(
            &ResourceAddress::new("database-user", "ro"),
            "u-2",
            attrs(json!({"id": "u-2", "name": "ro", "instance": "main"})),
        ));
        state.set(LiveRecord::new(
            &ResourceAddress::new("database-user", "gone"),
            "u-3",
            attrs(json!({"id": "u-3", "name": "gone", "instance": "main"})),
        ));
        state
    }

    #[tokio::test]
    async fn test_detects_modified_and_deleted() {
        let registry = SchemaRegistry::builtin();
        let live: HashMap<String, Attributes> = [
            (
                "u-1".to_string(),
                attrs(json!({"id": "other", "name": "app", "instance": "main", "password": "b"})),
            ),
            (
                "u-2".to_string(),
                attrs(json!({"id": "u-2", "name": "ro", "instance": "main"})),
            ),
        ]
        .into_iter()
        .collect();
        let providers = ProviderRegistry::new().with(Arc::new(StaticProvider {
            ty: "database-user".to_string(),
            live,
        }));

        let report = DriftDetector::new(&registry, &providers)
            .with_retry(RetryConfig::immediate(1))
            .detect(&ResourceGraph::default(), &state())
            .await
            .unwrap();

        assert_eq!(report.in_sync, 1);
        assert_eq!(report.entries.len(), 2);

        let app = report
            .entry(&ResourceAddress::new("database-user", "app"))
            .unwrap();
        assert_eq!(app.status, DriftStatus::Modified);
        // computed `id` is ignored, the password change is redacted
        assert_eq!(app.changes.len(), 1);
        assert_eq!(app.changes[0].name, "password");
        assert!(!serde_json::to_string(&report).unwrap().contains("\"b\""));
        assert!(!app.declared);

        let gone = report
            .entry(&ResourceAddress::new("database-user", "gone"))
            .unwrap();
        assert_eq!(gone.status, DriftStatus::Deleted);
    }
}
