//! Records returned by successful fetches
//!
//! A [`Record`] is the opaque JSON object a fetch produced. Its identity for
//! deduplication is a content [`Fingerprint`], never object identity.

mod dedupe;

pub use dedupe::{dedupe, fingerprint, Fingerprint};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque payload returned by a successful fetch
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    /// Creates a record from a JSON object's members
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Wraps a JSON value, returning `None` unless it is an object
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns a field as text if it is a non-empty string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint(self)
    }
}

/// Deduplicated records belonging to one search term, in discovery order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub term: String,
    pub records: Vec<Record>,
}

impl Batch {
    pub fn new(term: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            term: term.into(),
            records,
        }
    }

    pub fn empty(term: impl Into<String>) -> Self {
        Self::new(term, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
