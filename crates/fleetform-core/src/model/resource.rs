//! Resource addresses, declarations and lifecycle flags

use crate::error::ValidationError;
use crate::model::AttrValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// `(type, name)` pair identifying a resource within one configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceAddress {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
}

impl ResourceAddress {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }

    /// Key used for persisted state (`type.name`)
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

impl FromStr for ResourceAddress {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((ty, name)) if !ty.is_empty() && !name.is_empty() && !name.contains('.') => {
                Ok(Self::new(ty, name))
            }
            _ => Err(ValidationError::InvalidDeclaration(format!(
                "'{}' is not a resource address (expected type.name)",
                s
            ))),
        }
    }
}

/// How a resource is replaced when a forces-replace attribute changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplaceStrategy {
    /// Delete the old resource before creating its successor.
    /// Required when the provider enforces unique names.
    #[default]
    DestroyFirst,
    /// Create the successor first, then delete the old resource.
    CreateFirst,
}

impl fmt::Display for ReplaceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplaceStrategy::DestroyFirst => write!(f, "destroy-first"),
            ReplaceStrategy::CreateFirst => write!(f, "create-first"),
        }
    }
}

impl FromStr for ReplaceStrategy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "destroy-first" | "destroy_first" => Ok(Self::DestroyFirst),
            "create-first" | "create_first" => Ok(Self::CreateFirst),
            other => Err(ValidationError::InvalidDeclaration(format!(
                "unknown replace-strategy '{}' (expected destroy-first or create-first)",
                other
            ))),
        }
    }
}

/// Per-resource lifecycle flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFlags {
    /// Refuse to destroy this resource
    #[serde(default)]
    pub deletion_protected: bool,

    /// Overrides the resource type's default replace strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_strategy: Option<ReplaceStrategy>,
}

/// One `resource` block as written in the declaration file
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDecl {
    pub address: ResourceAddress,

    /// Desired attribute values (literals or references)
    pub attributes: BTreeMap<String, AttrValue>,

    /// Explicit ordering edges (`depends-on`)
    pub depends_on: Vec<ResourceAddress>,

    pub flags: ResourceFlags,
}

impl ResourceDecl {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: ResourceAddress::new(resource_type, name),
            attributes: BTreeMap::new(),
            depends_on: Vec::new(),
            flags: ResourceFlags::default(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_dependency(mut self, target: ResourceAddress) -> Self {
        self.depends_on.push(target);
        self
    }

    pub fn with_deletion_protection(mut self) -> Self {
        self.flags.deletion_protected = true;
        self
    }

    pub fn with_replace_strategy(mut self, strategy: ReplaceStrategy) -> Self {
        self.flags.replace_strategy = Some(strategy);
        self
    }
}
