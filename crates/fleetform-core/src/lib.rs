//! fleetform core
//!
//! Everything needed to turn a KDL declaration file into a validated resource graph:
//!
//! - [`schema`]: resource types and attribute rules
//! - [`parser`]: `resource` blocks → [`ResourceDecl`]
//! - [`graph`]: references and `depends-on` → [`ResourceGraph`], with cycle detection
//!
//! ```ignore
//! use fleetform_core::{SchemaRegistry, build_graph, parse_kdl_file};
//!
//! let registry = SchemaRegistry::builtin();
//! let graph = build_graph(parse_kdl_file("infra.kdl")?, &registry)?;
//! for node in graph.topological_order() {
//!     println!("{}", node.address);
//! }
//! ```

pub mod error;
pub mod graph;
pub mod model;
pub mod parser;
pub mod schema;

pub use error::{Result, ValidationError};
pub use graph::{DependencyEdge, EdgeKind, GraphBuilder, ResourceGraph, ResourceNode, build_graph};
pub use model::{
    AttrValue, Reference, ReplaceStrategy, ResourceAddress, ResourceDecl, ResourceFlags,
    lookup_path,
};
pub use parser::{parse_kdl_file, parse_kdl_string};
pub use schema::{AttributeSchema, Mutability, ResourceType, SchemaRegistry, ValueKind};

/// Parses a declaration file and builds its graph in one step
pub fn load_graph(
    path: impl AsRef<std::path::Path>,
    registry: &SchemaRegistry,
) -> Result<ResourceGraph> {
    build_graph(parse_kdl_file(path)?, registry)
}
