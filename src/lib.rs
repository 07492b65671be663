// src/lib.rs

//! cachedag: the execution core of an incremental build tool.
//!
//! Given a set of requested goals, the core resolves the transitive task
//! graph, coalesces it into groups around named tasks, evaluates every
//! group at most once per run, caches persistent results keyed by a
//! content hash of their inputs, and optionally runs independent groups
//! on a fixed-size worker pool.
//!
//! - [`model`] holds tasks, segment paths, results and value formats.
//! - [`graph`] holds the pure DAG walks.
//! - [`plan`] turns goals into an ordered group plan.
//! - [`cache`] resolves on-disk paths and reads/writes cache records.
//! - [`exec`] drives task bodies within one group.
//! - [`engine`] owns the drivers and collates [`engine::Results`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use cachedag::engine::Evaluator;
//! use cachedag::model::{value, Segments, TaskArena, TaskBuilder};
//!
//! let mut arena = TaskArena::new();
//! let hello = arena.add(
//!     TaskBuilder::new(|_ctx| Ok(value(42i32)))
//!         .named(Segments::parse("app.hello"))
//!         .json_format::<i32>()
//!         .side_hash(1)
//!         .build(),
//! );
//!
//! let evaluator = Evaluator::new("/workspace", "/workspace/out");
//! let results = evaluator.evaluate(Arc::new(arena), &[hello]).unwrap();
//! assert!(results.raw_values[0].is_success());
//! ```

pub mod cache;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod graph;
pub mod hash;
pub mod logging;
pub mod model;
pub mod plan;
pub mod profile;

pub use engine::{Evaluator, GroupTiming, Results};
pub use errors::{CachedagError, Result};
pub use model::{TaskArena, TaskBuilder, TaskId, TaskResult};
pub use plan::{Plan, Terminal};
