//! Simulated provider implementation

use crate::cloud::{MemoryCloud, Operation};
use async_trait::async_trait;
use fleetform_cloud::{
    Attributes, Created, ProviderError, ProviderRegistry, ProviderResult, ResourceProvider,
};
use fleetform_core::{AttributeSchema, ResourceType, SchemaRegistry, ValueKind};
use serde_json::{Value, json};
use std::sync::Arc;

/// Serves one resource type out of a [`MemoryCloud`]
pub struct MemoryProvider {
    cloud: MemoryCloud,
    schema: ResourceType,
}

impl MemoryProvider {
    pub fn new(cloud: MemoryCloud, schema: ResourceType) -> Self {
        Self { cloud, schema }
    }

    /// Output-only attributes a real cloud would assign on creation
    fn computed(&self, id: &str, name: &str, inputs: &Attributes) -> Attributes {
        let serial = id.rsplit('-').next().unwrap_or("0");
        let octet = serial.parse::<u64>().unwrap_or(0) % 250 + 2;
        let region = inputs
            .get("region")
            .or_else(|| inputs.get("location"))
            .and_then(Value::as_str)
            .unwrap_or("local1");

        self.schema
            .computed_attributes()
            .map(|attr| {
                let value = match attr.name.as_str() {
                    "id" => json!(id),
                    "self_link" => json!(format!(
                        "https://cloud.local/v1/{}/{}",
                        self.schema.name, name
                    )),
                    "email" => {
                        let account = inputs
                            .get("account_id")
                            .and_then(Value::as_str)
                            .unwrap_or(name);
                        json!(format!("{}@local.iam.example", account))
                    }
                    "unique_id" => json!(format!("1{:020}", octet)),
                    "etag" => json!(format!("BwX{}", serial)),
                    "address" | "host" | "private_ip_address" | "endpoint" => {
                        json!(format!("10.{}.0.{}", octet, 2))
                    }
                    "gateway_address" => json!(format!("10.{}.0.1", octet)),
                    "port" => json!(6379),
                    "connection_name" => json!(format!("local:{}:{}", region, name)),
                    "current_location_id" => json!(format!("{}-a", region)),
                    "master_version" => json!("1.29.4-local"),
                    "peering" => json!("servicenetworking-local"),
                    "master_auth" => json!({ "cluster_ca_certificate": "LS0tLS1CRUdJTi1MT0NBTA==" }),
                    _ => placeholder(attr, id),
                };
                (attr.name.clone(), value)
            })
            .collect()
    }

    fn reject_unknown(&self, attributes: &Attributes) -> ProviderResult<()> {
        for key in attributes.keys() {
            match self.schema.get(key) {
                None => {
                    return Err(ProviderError::permanent(format!(
                        "{} has no attribute '{}'",
                        self.schema.name, key
                    )));
                }
                Some(attr) if attr.is_computed() => {
                    return Err(ProviderError::permanent(format!(
                        "'{}' is output-only",
                        key
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

fn placeholder(attr: &AttributeSchema, id: &str) -> Value {
    match attr.kind {
        ValueKind::Scalar => json!(format!("{}-{}", attr.name, id)),
        ValueKind::List => json!([]),
        ValueKind::Map | ValueKind::NestedBlock => json!({}),
    }
}

#[async_trait]
impl ResourceProvider for MemoryProvider {
    fn resource_type(&self) -> &str {
        &self.schema.name
    }

    async fn create(&self, name: &str, attributes: &Attributes) -> ProviderResult<Created> {
        let call = self
            .cloud
            .enter(Operation::Create, &self.schema.name, name, None)
            .await;
        if let Some(e) = call.fault() {
            return Err(e);
        }
        if let Err(e) = self.reject_unknown(attributes) {
            call.failed();
            return Err(e);
        }

        let resource = self
            .cloud
            .insert(&self.schema.name, name, |id| {
                let mut live = attributes.clone();
                live.extend(self.computed(id, name, attributes));
                live
            })
            .await
            .map_err(|e| ProviderError::transient(e.to_string()))?;

        tracing::debug!("simulated create {} {} -> {}", self.schema.name, name, resource.id);
        Ok(Created {
            id: resource.id,
            attributes: resource.attributes,
        })
    }

    async fn read(&self, id: &str) -> ProviderResult<Attributes> {
        let name = self.cloud.name_of(id).await;
        let call = self
            .cloud
            .enter(Operation::Read, &self.schema.name, &name, Some(id))
            .await;
        if let Some(e) = call.fault() {
            return Err(e);
        }
        match self.cloud.get(id).await {
            Some(resource) if resource.resource_type == self.schema.name => Ok(resource.attributes),
            _ => {
                call.failed();
                Err(ProviderError::not_found(id))
            }
        }
    }

    async fn update(&self, id: &str, attributes: &Attributes) -> ProviderResult<Attributes> {
        let name = self.cloud.name_of(id).await;
        let call = self
            .cloud
            .enter(Operation::Update, &self.schema.name, &name, Some(id))
            .await;
        if let Some(e) = call.fault() {
            return Err(e);
        }
        if let Err(e) = self.reject_unknown(attributes) {
            call.failed();
            return Err(e);
        }
        let Some(current) = self.cloud.get(id).await else {
            call.failed();
            return Err(ProviderError::not_found(id));
        };
        // unchanged forces-replace values may be resent
        if let Some(attr) = attributes
            .iter()
            .find(|(k, v)| self.schema.forces_replace(k) && current.attributes.get(*k) != Some(*v))
            .map(|(k, _)| k)
        {
            call.failed();
            return Err(ProviderError::permanent(format!(
                "'{}' cannot be changed in place",
                attr
            )));
        }

        let schema = &self.schema;
        let updated = self
            .cloud
            .modify(id, |live| {
                // inputs are replaced wholesale, computed values survive
                live.retain(|k, _| schema.is_computed(k));
                live.extend(attributes.clone());
            })
            .await;
        match updated {
            Ok(resource) => Ok(resource.attributes),
            Err(_) => {
                call.failed();
                Err(ProviderError::not_found(id))
            }
        }
    }

    async fn delete(&self, id: &str) -> ProviderResult<()> {
        let name = self.cloud.name_of(id).await;
        let call = self
            .cloud
            .enter(Operation::Delete, &self.schema.name, &name, Some(id))
            .await;
        if let Some(e) = call.fault() {
            return Err(e);
        }
        match self.cloud.remove(id).await {
            Ok(_) => {
                tracing::debug!("simulated delete {} {}", self.schema.name, id);
                Ok(())
            }
            Err(_) => {
                call.failed();
                Err(ProviderError::not_found(id))
            }
        }
    }
}

/// One simulated provider per type in `registry`, all sharing `cloud`
pub fn providers(registry: &SchemaRegistry, cloud: &MemoryCloud) -> ProviderRegistry {
    let mut providers = ProviderRegistry::new();
    for name in registry.type_names() {
        if let Ok(ty) = registry.describe(name) {
            providers.register(Arc::new(MemoryProvider::new(cloud.clone(), ty.clone())));
        }
    }
    providers
}
