//! Record normalization
//!
//! A [`Normalizer`] turns one raw [`Record`] into a [`FlatRecord`] whose
//! values line up with a fixed column list, ready for a tabular sink.

mod product;

pub use product::{ProductNormalizer, PRODUCT_COLUMNS};

use crate::record::Record;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while flattening a record
#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("Record has no fields")]
    EmptyRecord,
}

/// One flattened row, aligned with its normalizer's column list
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlatRecord {
    pub values: Vec<Option<String>>,
}

impl FlatRecord {
    pub fn new(values: Vec<Option<String>>) -> Self {
        Self { values }
    }

    /// Looks up a value by column name
    pub fn get<'a>(&'a self, columns: &[String], column: &str) -> Option<&'a str> {
        columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
            .and_then(|v| v.as_deref())
    }

    /// Pairs values with column names as a JSON object; missing values become null
    pub fn to_json(&self, columns: &[String]) -> Value {
        let mut object = Map::new();
        for (i, column) in columns.iter().enumerate() {
            let value = match self.values.get(i) {
                Some(Some(text)) => Value::String(text.clone()),
                _ => Value::Null,
            };
            object.insert(column.clone(), value);
        }
        Value::Object(object)
    }
}

/// Flattens raw records into a fixed schema
pub trait Normalizer: Send + Sync {
    /// Column names, in output order
    fn columns(&self) -> &[String];

    /// Flattens one record belonging to `term`
    fn normalize(&self, term: &str, record: &Record) -> Result<FlatRecord, NormalizeError>;
}

/// Renders a JSON value as cell text
///
/// Strings are taken verbatim, other scalars use their JSON text, nested
/// values are serialized as compact JSON and null is an empty cell.
pub fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}
