// SPDX-License-Identifier: Apache-2.0

//! The enriched record handed from the filter chain to the output manager.
//!
//! Records are plain JSON objects. `serde_json::Map` keeps its keys sorted,
//! which makes the serialized form canonical for event digests.

use serde_json::Value;

pub type Record = serde_json::Map<String, Value>;

/// Read a string field, if present and a string.
pub fn str_field<'a>(record: &'a Record, key: &str) -> Option<&'a str> {
    record.get(key).and_then(Value::as_str)
}
