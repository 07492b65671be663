// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CachedagError {
    #[error("Cycle detected in task graph: {0}")]
    GraphCycle(String),

    #[error("Two named tasks resolve to the same path '{0}'")]
    DuplicateSegments(String),

    #[error("Requested goal is not part of the evaluated graph: {0}")]
    MissingGoal(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Internal invariant violated: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, CachedagError>;
