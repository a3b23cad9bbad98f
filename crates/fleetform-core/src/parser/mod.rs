//! KDL parser
//!
//! Reads `resource` blocks from a declaration file, in declaration order.
//!
//! ```kdl
//! resource "subnetwork" "nodes" {
//!     network (ref)"network.main.self_link"
//!     ip_cidr_range "10.0.0.0/20"
//!     secondary_ip_range range_name="pods" ip_cidr_range="10.4.0.0/14"
//! }
//! ```

mod resource;

pub use resource::parse_resource;

use crate::error::{Result, ValidationError};
use crate::model::ResourceDecl;
use kdl::KdlDocument;
use std::fs;
use std::path::Path;

/// Parses a declaration file
pub fn parse_kdl_file<P: AsRef<Path>>(path: P) -> Result<Vec<ResourceDecl>> {
    let content = fs::read_to_string(path.as_ref())?;
    tracing::debug!("parsing declarations from {}", path.as_ref().display());
    parse_kdl_string(&content)
}

/// Parses declarations from a KDL string
pub fn parse_kdl_string(content: &str) -> Result<Vec<ResourceDecl>> {
    let doc: KdlDocument = content.parse()?;
    let mut decls = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "resource" => decls.push(parse_resource(node)?),
            other => {
                return Err(ValidationError::InvalidDeclaration(format!(
                    "unexpected top-level node '{}' (only resource blocks are allowed)",
                    other
                )));
            }
        }
    }

    Ok(decls)
}

#[cfg(test)]
mod tests;
