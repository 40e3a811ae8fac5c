use std::io::ErrorKind;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::{AppError, AppResult};

/// Raw documents in file order. Shape is checked later by [`crate::extract`].
pub type DocumentCollection = Vec<Value>;

/// Read a JSON document collection, optionally nested under the top-level key `mask`.
#[tracing::instrument(name = "Loading documents", level = "info")]
pub async fn load<P: AsRef<Path> + std::fmt::Debug>(
    path: P,
    mask: Option<&str>,
) -> AppResult<DocumentCollection> {
    let path = path.as_ref();
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(AppError::NotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    let docs = parse_collection(&bytes, mask)?;
    debug!("Loaded {} documents from {:?}", docs.len(), path);
    Ok(docs)
}

/// Parse an in-memory JSON buffer the same way [`load`] parses a file.
pub fn parse_collection(bytes: &[u8], mask: Option<&str>) -> AppResult<DocumentCollection> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let root: Value = serde_json::from_slice(bytes)?;

    let selected = match mask {
        Some(key) => match root {
            Value::Object(mut map) => map.remove(key).ok_or_else(|| AppError::Key(key.into()))?,
            _ => return Err(AppError::Key(key.into())),
        },
        None => root,
    };

    match selected {
        Value::Array(items) => Ok(items),
        other => Err(AppError::Schema(format!(
            "expected an array of documents, found {}",
            json_kind(&other)
        ))),
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_array() {
        let docs = parse_collection(br#"[{"content": "a", "title": "t"}]"#, None).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["content"], "a");
    }

    #[test]
    fn selects_masked_key() {
        let raw = br#"{"meta": 1, "items": [{"content": "a"}, {"content": "b"}]}"#;
        let docs = parse_collection(raw, Some("items")).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1]["content"], "b");
    }

    #[test]
    fn missing_mask_is_key_error() {
        let err = parse_collection(br#"{"items": []}"#, Some("docs")).unwrap_err();
        assert!(matches!(err, AppError::Key(k) if k == "docs"));
    }

    #[test]
    fn mask_on_array_is_key_error() {
        let err = parse_collection(b"[]", Some("docs")).unwrap_err();
        assert!(matches!(err, AppError::Key(_)));
    }

    #[test]
    fn invalid_json_is_parse_error() {
        let err = parse_collection(b"[{\"content\": ", None).unwrap_err();
        assert!(matches!(err, AppError::Parse(_)));
    }

    #[test]
    fn object_without_mask_is_schema_error() {
        let err = parse_collection(br#"{"items": []}"#, None).unwrap_err();
        assert!(matches!(err, AppError::Schema(_)));
    }

    #[test]
    fn tolerates_byte_order_mark() {
        let docs = parse_collection(b"\xEF\xBB\xBF[]", None).unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let path = std::env::temp_dir().join("topic-atlas-definitely-missing.json");
        let err = load(&path, None).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(p) if p == path));
    }

    #[tokio::test]
    async fn loads_file_from_disk() {
        let path = std::env::temp_dir().join(format!("topic-atlas-load-{}.json", std::process::id()));
        tokio::fs::write(&path, br#"{"docs": [{"content": "x", "title": "y"}]}"#)
            .await
            .unwrap();
        let docs = load(&path, Some("docs")).await.unwrap();
        assert_eq!(docs.len(), 1);
        let _ = tokio::fs::remove_file(&path).await;
    }
}
