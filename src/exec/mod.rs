// src/exec/mod.rs

//! Group evaluation: the context handed to task bodies and the cached
//! group evaluator.

pub mod context;
pub mod group;

pub use context::{BuildProblemReporter, DestError, DestScope, SilentReporter, TaskContext, TestReporter};
pub use group::GroupEvaluated;
