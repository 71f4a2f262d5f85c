use super::{cell_text, FlatRecord, NormalizeError, Normalizer};
use crate::output::normalize_term;
use crate::record::Record;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Output schema for product records
pub const PRODUCT_COLUMNS: [&str; 23] = [
    "platform",
    "product_type",
    "title",
    "keywords_list",
    "asin",
    "link",
    "brand",
    "categories",
    "categories_flat",
    "description",
    "rating",
    "rating_breakdown",
    "ratings_total",
    "main_image",
    "images",
    "images_count",
    "feature_bullets",
    "top_reviews",
    "price",
    "specifications",
    "model_number",
    "parent_asin",
    "review",
];

/// Left-to-right mark that leaks into specification values
const LRM: char = '\u{200e}';

/// Flattens product payloads into [`PRODUCT_COLUMNS`]
///
/// Most columns are copied from the payload member of the same name. The
/// exceptions:
/// - `platform` and `product_type` come from configuration
/// - `price` is read from `buybox_winner.price.value`
/// - `top_reviews` has every `body_html` member removed
/// - `specifications` becomes a `name -> value` JSON object
#[derive(Debug, Clone)]
pub struct ProductNormalizer {
    columns: Vec<String>,
    platform: String,
    product_types: BTreeMap<String, String>,
}

impl ProductNormalizer {
    pub fn new(platform: impl Into<String>, product_types: BTreeMap<String, String>) -> Self {
        Self {
            columns: PRODUCT_COLUMNS.iter().map(|c| c.to_string()).collect(),
            platform: platform.into(),
            product_types,
        }
    }

    /// The `product_type` value for a term
    ///
    /// Uses the configured override, else the term lowercased with
    /// whitespace runs replaced by `_`.
    pub fn product_type(&self, term: &str) -> String {
        match self.product_types.get(term) {
            Some(kind) => kind.clone(),
            None => normalize_term(term, "_").to_lowercase(),
        }
    }

    fn column_value(&self, column: &str, term: &str, record: &Record) -> Option<String> {
        match column {
            "platform" => Some(self.platform.clone()),
            "product_type" => Some(self.product_type(term)),
            "price" => record
                .get("buybox_winner")
                .and_then(|b| b.pointer("/price/value"))
                .and_then(cell_text),
            "top_reviews" => record.get("top_reviews").and_then(clean_top_reviews),
            "specifications" => record.get("specifications").and_then(flatten_specifications),
            other => record.get(other).and_then(cell_text),
        }
    }
}

impl Normalizer for ProductNormalizer {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn normalize(&self, term: &str, record: &Record) -> Result<FlatRecord, NormalizeError> {
        if record.is_empty() {
            return Err(NormalizeError::EmptyRecord);
        }

        let values = self
            .columns
            .iter()
            .map(|column| self.column_value(column, term, record))
            .collect();
        Ok(FlatRecord::new(values))
    }
}

fn clean_top_reviews(reviews: &Value) -> Option<String> {
    let Value::Array(items) = reviews else {
        return cell_text(reviews);
    };

    let cleaned: Vec<Value> = items
        .iter()
        .map(|review| match review {
            Value::Object(fields) => {
                let mut fields = fields.clone();
                fields.remove("body_html");
                Value::Object(fields)
            }
            other => other.clone(),
        })
        .collect();
    Some(Value::Array(cleaned).to_string())
}

/// `[{name, value}, ...]` into `{"name": "value", ...}`
///
/// Anything other than a list of objects yields an empty cell.
fn flatten_specifications(specs: &Value) -> Option<String> {
    let items = specs.as_array()?;
    let mut flattened = Map::new();
    for item in items {
        let item = item.as_object()?;
        let name = item.get("name").and_then(Value::as_str).unwrap_or("").trim();
        let value = item
            .get("value")
            .and_then(Value::as_str)
            .unwrap_or("")
            .replace(LRM, "");
        flattened.insert(name.to_string(), Value::String(value.trim().to_string()));
    }
    Some(Value::Object(flattened).to_string())
}
