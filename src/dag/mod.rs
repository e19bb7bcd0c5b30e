// src/dag/mod.rs

//! Dependency resolution.
//!
//! - [`graph`] holds the per-task container dependency graph.
//! - [`order`] resolves the order in which a task and its prerequisites run.

pub mod graph;
pub mod order;

pub use graph::ContainerDependencyGraph;
pub use order::resolve_execution_order;
