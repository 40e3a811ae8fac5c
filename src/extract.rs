use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::loader::json_kind;
use crate::{AppError, AppResult};

/// Names of the document fields projected into texts and labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractFields {
    pub text: String,
    pub label: String,
}

impl Default for ExtractFields {
    fn default() -> Self {
        Self {
            text: "content".to_string(),
            label: "title".to_string(),
        }
    }
}

/// Parallel texts and labels, in collection order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub texts: Vec<String>,
    pub labels: Vec<String>,
}

/// Project every document's text and label fields, preserving order.
#[tracing::instrument(name = "Extracting texts and labels", level = "debug", skip(collection))]
pub fn extract(collection: &[Value], fields: &ExtractFields) -> AppResult<Extracted> {
    let mut out = Extracted {
        texts: Vec::with_capacity(collection.len()),
        labels: Vec::with_capacity(collection.len()),
    };
    for (i, doc) in collection.iter().enumerate() {
        let Value::Object(map) = doc else {
            return Err(AppError::Schema(format!(
                "document {i} is {}, expected an object",
                json_kind(doc)
            )));
        };
        out.texts.push(string_field(map, i, &fields.text)?);
        out.labels.push(string_field(map, i, &fields.label)?);
    }
    Ok(out)
}

fn string_field(
    map: &serde_json::Map<String, Value>,
    index: usize,
    field: &str,
) -> AppResult<String> {
    match map.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(AppError::Schema(format!(
            "document {index}: field `{field}` is {}, expected a string",
            json_kind(other)
        ))),
        None => Err(AppError::Schema(format!(
            "document {index}: missing field `{field}`"
        ))),
    }
}
