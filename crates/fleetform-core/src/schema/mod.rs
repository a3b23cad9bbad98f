//! Schema registry
//!
//! Describes every resource type the engine can manage: which attributes exist,
//! what shape their values take, and whether changing them can happen in place.

mod catalog;

pub use catalog::builtin_types;

use crate::error::{Result, ValidationError};
use crate::model::{AttrValue, Reference, ReplaceStrategy, ResourceAddress, ResourceDecl};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Shape of an attribute value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValueKind {
    Scalar,
    List,
    Map,
    NestedBlock,
}

impl ValueKind {
    fn accepts(&self, value: &AttrValue) -> bool {
        match value {
            // The referenced value's shape is only known at apply time
            AttrValue::Ref(_) => true,
            AttrValue::List(_) => *self == ValueKind::List,
            AttrValue::Block(_) => matches!(self, ValueKind::Map | ValueKind::NestedBlock),
            // A single scalar is accepted as a one-element list
            _ => matches!(self, ValueKind::Scalar | ValueKind::List),
        }
    }
}

/// Whether an attribute can change in place
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mutability {
    Mutable,
    ForcesReplace,
    /// Output-only; assigned by the provider after creation
    ComputedOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSchema {
    pub name: String,
    pub kind: ValueKind,
    pub mutability: Mutability,
    pub required: bool,
    /// Redacted in every report and log line
    pub sensitive: bool,
}

impl AttributeSchema {
    pub fn required(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            mutability: Mutability::Mutable,
            required: true,
            sensitive: false,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind)
        }
    }

    pub fn computed(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            mutability: Mutability::ComputedOnly,
            required: false,
            ..Self::required(name, kind)
        }
    }

    pub fn forces_replace(mut self) -> Self {
        self.mutability = Mutability::ForcesReplace;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn is_computed(&self) -> bool {
        self.mutability == Mutability::ComputedOnly
    }
}

/// Schema of one resource type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceType {
    pub name: String,
    /// Attributes in declaration order
    pub attributes: Vec<AttributeSchema>,
    /// Used when a declaration does not set `replace-strategy`
    pub replace_strategy: ReplaceStrategy,
}

impl ResourceType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            replace_strategy: ReplaceStrategy::default(),
        }
    }

    pub fn attribute(mut self, attribute: AttributeSchema) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_replace_strategy(mut self, strategy: ReplaceStrategy) -> Self {
        self.replace_strategy = strategy;
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn is_computed(&self, name: &str) -> bool {
        self.get(name).is_some_and(|a| a.is_computed())
    }

    pub fn is_sensitive(&self, name: &str) -> bool {
        self.get(name).is_some_and(|a| a.sensitive)
    }

    pub fn forces_replace(&self, name: &str) -> bool {
        self.get(name)
            .is_some_and(|a| a.mutability == Mutability::ForcesReplace)
    }

    pub fn computed_attributes(&self) -> impl Iterator<Item = &AttributeSchema> {
        self.attributes.iter().filter(|a| a.is_computed())
    }

    /// Validates one declaration against this schema
    pub fn validate(&self, decl: &ResourceDecl) -> Result<()> {
        let address = &decl.address;

        for (name, value) in &decl.attributes {
            let schema = self.get(name).ok_or_else(|| {
                ValidationError::schema(address, format!("unknown attribute '{}'", name))
            })?;

            if schema.is_computed() {
                return Err(ValidationError::schema(
                    address,
                    format!("attribute '{}' is computed by the provider and cannot be set", name),
                ));
            }

            if !schema.kind.accepts(value) {
                return Err(ValidationError::schema(
                    address,
                    format!(
                        "attribute '{}' expects a {:?} value, got {}",
                        name, schema.kind, value
                    ),
                ));
            }
        }

        if let Some(missing) = self
            .attributes
            .iter()
            .find(|a| a.required && !decl.attributes.contains_key(&a.name))
        {
            return Err(ValidationError::schema(
                address,
                format!("required attribute '{}' is missing", missing.name),
            ));
        }

        Ok(())
    }
}

/// Registry of resource types known to the engine
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    types: HashMap<String, Arc<ResourceType>>,
}

impl SchemaRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in catalog
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for ty in builtin_types() {
            registry.register(ty);
        }
        registry
    }

    /// Adds (or replaces) a resource type
    pub fn register(&mut self, ty: ResourceType) {
        tracing::debug!("registered resource type {}", ty.name);
        self.types.insert(ty.name.clone(), Arc::new(ty));
    }

    pub fn describe(&self, resource_type: &str) -> Result<&ResourceType> {
        self.types
            .get(resource_type)
            .map(|t| t.as_ref())
            .ok_or_else(|| ValidationError::UnknownResourceType(resource_type.to_string()))
    }

    pub fn contains(&self, resource_type: &str) -> bool {
        self.types.contains_key(resource_type)
    }

    /// Registered type names, sorted
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn validate(&self, decl: &ResourceDecl) -> Result<()> {
        self.describe(&decl.address.resource_type)?.validate(decl)
    }

    /// Checks that a reference names an attribute the target type has
    pub fn validate_reference(&self, from: &ResourceAddress, reference: &Reference) -> Result<()> {
        let target = self.describe(&reference.target.resource_type)?;
        if target.get(reference.root_attribute()).is_none() {
            return Err(ValidationError::schema(
                from,
                format!(
                    "reference {} names unknown attribute '{}' of {}",
                    reference,
                    reference.root_attribute(),
                    target.name
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network_type() -> ResourceType {
        ResourceType::new("network")
            .attribute(AttributeSchema::optional("routing_mode", ValueKind::Scalar))
            .attribute(AttributeSchema::optional("auto_create_subnetworks", ValueKind::Scalar).forces_replace())
            .attribute(AttributeSchema::computed("self_link", ValueKind::Scalar))
    }

    #[test]
    fn test_describe_unknown_type() {
        let registry = SchemaRegistry::new();
        let err = registry.describe("network").unwrap_err();
        assert!(matches!(err, ValidationError::UnknownResourceType(t) if t == "network"));
    }

    #[test]
    fn test_validate_unknown_attribute() {
        let ty = network_type();
        let decl = ResourceDecl::new("network", "main").with_attribute("mtu_bytes", 1460i64);
        let err = ty.validate(&decl).unwrap_err();
        assert!(err.to_string().contains("unknown attribute 'mtu_bytes'"));
    }

    #[test]
    fn test_validate_rejects_computed_attribute() {
        let ty = network_type();
        let decl = ResourceDecl::new("network", "main").with_attribute("self_link", "x");
        assert!(ty.validate(&decl).is_err());
    }

    #[test]
    fn test_validate_missing_required() {
        let ty = ResourceType::new("subnetwork")
            .attribute(AttributeSchema::required("ip_cidr_range", ValueKind::Scalar));
        let decl = ResourceDecl::new("subnetwork", "nodes");
        let err = ty.validate(&decl).unwrap_err();
        assert!(err.to_string().contains("ip_cidr_range"));
    }

    #[test]
    fn test_validate_value_kind() {
        let ty = ResourceType::new("router")
            .attribute(AttributeSchema::optional("bgp", ValueKind::NestedBlock));
        let decl = ResourceDecl::new("router", "r").with_attribute("bgp", "64514");
        assert!(ty.validate(&decl).is_err());

        let decl = ResourceDecl::new("router", "r").with_attribute(
            "bgp",
            AttrValue::Block([("asn".to_string(), AttrValue::Int(64514))].into_iter().collect()),
        );
        assert!(ty.validate(&decl).is_ok());
    }

    #[test]
    fn test_forces_replace_and_computed_flags() {
        let ty = network_type();
        assert!(ty.forces_replace("auto_create_subnetworks"));
        assert!(!ty.forces_replace("routing_mode"));
        assert!(ty.is_computed("self_link"));
        assert!(!ty.forces_replace("self_link"));
    }

    #[test]
    fn test_validate_reference_attribute() {
        let mut registry = SchemaRegistry::new();
        registry.register(network_type());
        let from = ResourceAddress::new("subnetwork", "nodes");

        let ok: Reference = "network.main.self_link".parse().unwrap();
        assert!(registry.validate_reference(&from, &ok).is_ok());

        let bad: Reference = "network.main.nonexistent".parse().unwrap();
        assert!(registry.validate_reference(&from, &bad).is_err());
    }

    #[test]
    fn test_builtin_catalog_is_consistent() {
        let registry = SchemaRegistry::builtin();
        for name in registry.type_names() {
            let ty = registry.describe(name).unwrap();
            assert!(ty.get("id").is_some_and(|a| a.is_computed()), "{} lacks computed id", name);
            assert!(!ty.attributes.iter().any(|a| a.required && a.is_computed()));
        }
        assert!(registry.describe("database-user").unwrap().is_sensitive("password"));
    }
}
