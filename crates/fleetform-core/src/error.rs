use crate::model::{Reference, ResourceAddress};
use thiserror::Error;

/// Errors raised while reading declarations or building the resource graph.
///
/// Every variant is fatal: nothing is planned or applied once one is returned.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("KDL parse error: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("failed to read declarations: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid declaration: {0}")]
    InvalidDeclaration(String),

    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),

    #[error("resource {0} is declared more than once")]
    DuplicateName(ResourceAddress),

    #[error("{from} references {reference}, which is not declared")]
    UnresolvedReference {
        from: ResourceAddress,
        reference: Reference,
    },

    #[error("{from} depends on {target}, which is not declared")]
    UnresolvedDependency {
        from: ResourceAddress,
        target: ResourceAddress,
    },

    #[error("dependency cycle detected: {}", format_cycle(.0))]
    Cycle(Vec<ResourceAddress>),

    #[error("{resource}: {message}")]
    SchemaViolation {
        resource: ResourceAddress,
        message: String,
    },
}

fn format_cycle(cycle: &[ResourceAddress]) -> String {
    cycle
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl ValidationError {
    pub fn schema(resource: &ResourceAddress, message: impl Into<String>) -> Self {
        Self::SchemaViolation {
            resource: resource.clone(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ValidationError>;
