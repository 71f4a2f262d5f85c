//! Content fingerprints and batch deduplication
//!
//! A fingerprint is the SHA-256 of a record's canonical field listing. Scalar
//! fields contribute their plain text; nested arrays and objects are first
//! rendered as JSON with object keys sorted, so two records that differ only
//! in member order hash identically. Null and absent fields are equivalent.

use super::Record;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;

const FIELD_SEPARATOR: u8 = 0x1f;
const RECORD_SEPARATOR: u8 = 0x1e;

/// Deterministic content hash identifying duplicate records
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Computes the content fingerprint of a record
pub fn fingerprint(record: &Record) -> Fingerprint {
    let mut entries: Vec<(&String, &Value)> = record.fields().iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Sha256::new();
    for (key, value) in entries {
        if value.is_null() {
            continue;
        }
        hasher.update(key.as_bytes());
        hasher.update([FIELD_SEPARATOR]);
        hasher.update(scalar_text(value).as_bytes());
        hasher.update([RECORD_SEPARATOR]);
    }

    Fingerprint(hex::encode(hasher.finalize()))
}

/// Removes records whose fingerprint was already seen
///
/// The first occurrence of each fingerprint is kept in input order.
pub fn dedupe(records: Vec<Record>) -> Vec<Record> {
    let mut seen = HashSet::with_capacity(records.len());
    records
        .into_iter()
        .filter(|record| seen.insert(fingerprint(record)))
        .collect()
}

/// Renders a field value as the text used for hashing
fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => {
            let mut out = String::new();
            write_canonical(value, &mut out);
            out
        }
    }
}

/// Writes compact JSON with object keys sorted at every depth
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
