// SPDX-License-Identifier: Apache-2.0

//! Digest and id helpers: MD5 folded to a signed 64-bit decimal for event
//! and message digests, and UUID derivation from a sink's id fields.

use serde_json::Value;
use uuid::Uuid;

use crate::record::Record;

/// MD5 of `bytes`, folded to the first 8 digest bytes read little-endian.
pub fn md5_folded(bytes: &[u8]) -> i64 {
    let digest = md5::compute(bytes);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.0[..8]);
    i64::from_le_bytes(head)
}

/// The folded digest rendered as a signed decimal string.
pub fn md5_signed_decimal(bytes: &[u8]) -> String {
    md5_folded(bytes).to_string()
}

/// Derive a record id for a sink. When the sink names id fields and the
/// record carries at least one of them, the id is a UUID built from the MD5
/// of the concatenated values, so the same logical event maps to the same
/// id on every host. Otherwise the id is random.
pub fn generate_uuid(record: &Record, id_fields: &[String]) -> String {
    let mut joined = String::new();
    for field in id_fields {
        if let Some(value) = record.get(field) {
            match value {
                Value::String(s) => joined.push_str(s),
                other => joined.push_str(&other.to_string()),
            }
        }
    }

    if joined.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        let digest = md5::compute(joined.as_bytes());
        Uuid::from_bytes(digest.0).to_string()
    }
}
