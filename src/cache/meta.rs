// src/cache/meta.rs

//! The persisted per-terminal cache record.
//!
//! One `meta.json` per labelled terminal, pretty-printed with 4-space
//! indent so humans can inspect a build's state with a pager. Reads are
//! deliberately lenient: a corrupt or half-written record is a cache
//! miss, never a build failure.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecord {
    pub value: serde_json::Value,
    #[serde(rename = "valueHash")]
    pub value_hash: i32,
    #[serde(rename = "inputsHash")]
    pub inputs_hash: i32,
}

/// Serialize with 4-space indentation.
pub(crate) fn to_pretty_json<T: Serialize>(value: &T) -> anyhow::Result<String> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    Ok(String::from_utf8(out)?)
}

/// Read a record, treating every failure mode as a miss.
pub fn read_record(path: &Path) -> Option<CachedRecord> {
    let contents = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&contents) {
        Ok(record) => Some(record),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "unreadable cache record; treating as miss");
            None
        }
    }
}

/// Write a record atomically: to a sibling temp file, then rename over
/// the final path, so a crash mid-write never leaves a torn record.
pub fn write_record(path: &Path, record: &CachedRecord) -> Result<()> {
    let json = to_pretty_json(record)
        .with_context(|| format!("serializing cache record for {:?}", path))?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json.as_bytes())
        .with_context(|| format!("writing cache record to {:?}", tmp))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("moving cache record into place at {:?}", path))?;

    Ok(())
}

/// Drop any stale record; a missing file is fine.
pub fn remove_record(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed stale cache record"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            debug!(path = %path.display(), error = %err, "failed to remove cache record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");

        let record = CachedRecord {
            value: json!({"classes": 12}),
            value_hash: -77,
            inputs_hash: 12345,
        };
        write_record(&path, &record).unwrap();

        assert_eq!(read_record(&path), Some(record));
    }

    #[test]
    fn record_uses_camel_case_keys_and_four_space_indent() {
        let record = CachedRecord {
            value: json!(7),
            value_hash: 1,
            inputs_hash: 2,
        };
        let rendered = to_pretty_json(&record).unwrap();

        assert!(rendered.contains("\"valueHash\""));
        assert!(rendered.contains("\"inputsHash\""));
        assert!(rendered.contains("\n    \"value\""));
    }

    #[test]
    fn corrupt_records_read_as_miss() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert_eq!(read_record(&path), None);
    }

    #[test]
    fn missing_records_read_as_miss_and_remove_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");

        assert_eq!(read_record(&path), None);
        remove_record(&path);
    }
}
