pub mod apply;
pub mod drift;
pub mod graph;
pub mod plan;
pub mod state;
pub mod validate;
