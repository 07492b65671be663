// src/model/mod.rs

//! Core data model: tasks, segment paths, results, value formats.

pub mod result;
pub mod segments;
pub mod task;

pub use result::{
    value, value_as, BodyResult, JsonFormat, TaskFailure, TaskResult, TaskValue, ValueFormat,
};
pub use segments::{Segment, Segments};
pub use task::{NamedInfo, Task, TaskArena, TaskBody, TaskBuilder, TaskId};
