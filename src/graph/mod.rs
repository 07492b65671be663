// src/graph/mod.rs

//! Pure functions over the task DAG.
//!
//! - [`walk`] holds transitive closure, topological sort and grouping.
//! - [`multibimap`] is the ordered bidirectional multimap the grouping
//!   returns.

pub mod multibimap;
pub mod walk;

pub use multibimap::MultiBiMap;
pub use walk::{group_around, topo_sort, transitive, Classify};
