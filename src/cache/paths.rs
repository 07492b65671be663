// src/cache/paths.rs

//! On-disk layout for a labelled terminal.
//!
//! Every labelled terminal owns one directory under the output root:
//!
//! `<out>/<segments...>/`
//!
//! holding `dest/` (scratch for the task body), `meta.json` (the cached
//! record) and `log` (captured task output). External tasks root at the
//! external workspace instead.

use std::path::{Path, PathBuf};

use crate::model::Segments;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPaths {
    pub out: PathBuf,
    pub dest: PathBuf,
    pub meta: PathBuf,
    pub log: PathBuf,
}

impl TaskPaths {
    /// Resolve the directory set for a labelled terminal.
    ///
    /// `foreign_prefix` is prepended for cross-module references, so a
    /// consuming build keeps foreign outputs under a distinct subtree.
    pub fn resolve(
        out: &Path,
        external_out: &Path,
        foreign_prefix: Option<&Segments>,
        segments: &Segments,
        external: bool,
    ) -> TaskPaths {
        let effective = match foreign_prefix {
            Some(prefix) => segments.prefixed(prefix),
            None => segments.clone(),
        };

        let root = if external { external_out } else { out };
        let mut dir = root.to_path_buf();
        for part in effective.path_components() {
            dir.push(part);
        }

        TaskPaths {
            dest: dir.join("dest"),
            meta: dir.join("meta.json"),
            log: dir.join("log"),
            out: dir,
        }
    }
}
