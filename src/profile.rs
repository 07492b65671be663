// src/profile.rs

//! Run observability artifacts.
//!
//! Two files land under the output root:
//! - `cachedag-profile.json`: per-group timings, written after every run.
//! - `cachedag-par-profile.json`: a Chrome Trace Event stream, written
//!   while the parallel scheduler drains. Load it in a flame-chart
//!   viewer (`chrome://tracing`, Perfetto) to see worker occupancy.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::Context as _;
use serde::Serialize;

use crate::engine::GroupTiming;
use crate::errors::Result;

/// Per-group timing file name, relative to the output root.
pub const PROFILE_FILE: &str = "cachedag-profile.json";
/// Chrome trace file name, relative to the output root.
pub const PAR_PROFILE_FILE: &str = "cachedag-par-profile.json";
/// Evaluator debug log, relative to the output root.
pub const EVALUATOR_LOG: &str = "evaluator.log";
/// Parallel scheduler debug log, relative to the output root.
pub const TASKS_PAR_LOG: &str = "tasks-par.log";

#[derive(Serialize)]
struct ProfileEntry {
    label: Option<String>,
    millis: u64,
    cached: bool,
}

/// Persist group timings as pretty-printed JSON.
pub(crate) fn write_profile(path: &Path, timings: &[GroupTiming]) -> Result<()> {
    let entries: Vec<ProfileEntry> = timings
        .iter()
        .map(|t| ProfileEntry {
            label: t.terminal.label().map(|s| s.render()),
            millis: t.millis,
            cached: t.cached,
        })
        .collect();

    let json = crate::cache::meta::to_pretty_json(&entries)
        .with_context(|| format!("serializing profile for {:?}", path))?;
    std::fs::write(path, json.as_bytes())
        .with_context(|| format!("writing profile to {:?}", path))?;
    Ok(())
}

/// One complete-event entry in the Chrome Trace Event Format.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct TraceEvent {
    pub name: String,
    pub cat: String,
    pub ph: String,
    /// Microseconds since the run started.
    pub ts: u64,
    pub dur: u64,
    pub pid: u32,
    pub tid: i64,
    pub args: serde_json::Value,
}

impl TraceEvent {
    pub fn complete(name: String, ts: u64, dur: u64, tid: i64, cached: bool) -> Self {
        TraceEvent {
            name,
            cat: "job".to_string(),
            ph: "X".to_string(),
            ts,
            dur,
            pid: 1,
            tid,
            args: serde_json::Value::Array(vec![serde_json::Value::String(
                if cached { "cached" } else { "" }.to_string(),
            )]),
        }
    }
}

/// Streams trace events into a JSON array: opens with `[`, separates
/// with `,\n`, closes with `]` on `finish`.
pub(crate) struct ChromeTraceWriter {
    writer: BufWriter<File>,
    first: bool,
}

impl ChromeTraceWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("creating trace file at {:?}", path))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(b"[")
            .with_context(|| format!("writing trace header to {:?}", path))?;
        Ok(ChromeTraceWriter {
            writer,
            first: true,
        })
    }

    pub fn event(&mut self, event: &TraceEvent) -> Result<()> {
        if !self.first {
            self.writer.write_all(b",\n").context("writing trace separator")?;
        }
        self.first = false;
        let json = serde_json::to_string(event).context("serializing trace event")?;
        self.writer
            .write_all(json.as_bytes())
            .context("writing trace event")?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer.write_all(b"]").context("closing trace stream")?;
        self.writer.flush().context("flushing trace stream")?;
        Ok(())
    }
}
