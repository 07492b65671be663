// src/hash.rs

//! Stable 32-bit fingerprints over hash sequences and JSON values.
//!
//! Every fingerprint the evaluator persists must agree across processes
//! and across the sequential and parallel drivers, so all helpers here
//! hash a fully defined byte sequence: values are fed in order as
//! little-endian words, JSON is hashed in its compact rendering.

use blake3::Hasher;

/// Truncate a blake3 digest to the leading 32 bits.
fn finish_i32(hasher: Hasher) -> i32 {
    let digest = hasher.finalize();
    let bytes = digest.as_bytes();
    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Hash a sequence of 32-bit values, sensitive to both content and order.
pub fn ordered_hash<I>(values: I) -> i32
where
    I: IntoIterator<Item = i32>,
{
    let mut hasher = Hasher::new();
    for v in values {
        hasher.update(&v.to_le_bytes());
    }
    finish_i32(hasher)
}

/// Structural hash of a JSON value via its compact rendering.
///
/// `serde_json` renders maps in insertion order, so two values that
/// serialize identically hash identically.
pub fn json_hash(value: &serde_json::Value) -> i32 {
    let mut hasher = Hasher::new();
    hasher.update(value.to_string().as_bytes());
    finish_i32(hasher)
}

/// Hash an arbitrary string. Used for run-wide constants such as the
/// build-logic version fingerprint.
pub fn str_hash(s: &str) -> i32 {
    let mut hasher = Hasher::new();
    hasher.update(s.as_bytes());
    finish_i32(hasher)
}
