//! Typed document ids.
//!
//! A document id is an atomic JSON value or a tagged UUID. Ids are encoded
//! into the `key` column as a `(type tag, canonical text)` tuple and are
//! otherwise kept out of the shredded index containers.

use std::fmt;

use serde_json::{Map, Number, Value};
use uuid::Uuid;

use crate::error::{ApiError, ErrorCode, Result};
use crate::json::node_type_name;

/// Wrapper key for the extended-JSON UUID form, `{"$uuid": "..."}`.
pub const UUID_WRAPPER_FIELD: &str = "$uuid";

/// A document `_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocumentId {
    /// JSON null.
    Null,
    /// JSON boolean.
    Boolean(bool),
    /// JSON number, kept in its decimal form.
    Number(String),
    /// JSON string.
    String(String),
    /// 128-bit UUID, from the `{"$uuid": ...}` wrapper.
    Uuid(Uuid),
}

impl DocumentId {
    /// Stable tinyint tag stored as the first component of the `key` tuple.
    #[must_use]
    pub const fn type_tag(&self) -> i8 {
        match self {
            Self::Null => 0,
            Self::Boolean(_) => 1,
            Self::Number(_) => 2,
            Self::String(_) => 3,
            Self::Uuid(_) => 4,
        }
    }

    /// Parse an id from its JSON form.
    ///
    /// # Errors
    ///
    /// `SHRED_BAD_DOCID_TYPE` for arrays and for objects other than the
    /// `{"$uuid": ...}` wrapper.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::Null),
            Value::Bool(b) => Ok(Self::Boolean(*b)),
            Value::Number(n) => Ok(Self::Number(n.to_string())),
            Value::String(s) => Ok(Self::String(s.clone())),
            Value::Object(map) => match map.get(UUID_WRAPPER_FIELD) {
                Some(Value::String(s)) if map.len() == 1 => {
                    let uuid = Uuid::parse_str(s).map_err(|_| {
                        ApiError::with_detail(
                            ErrorCode::ShredBadDocIdType,
                            format!("invalid UUID value '{s}' in {UUID_WRAPPER_FIELD} wrapper"),
                        )
                    })?;
                    Ok(Self::Uuid(uuid))
                }
                _ => Err(bad_type(value)),
            },
            Value::Array(_) => Err(bad_type(value)),
        }
    }

    /// Generate a random (v4 UUID) id for a document inserted without one.
    #[must_use]
    pub fn random() -> Self {
        Self::Uuid(Uuid::new_v4())
    }

    /// The JSON form, as written back into `doc_json`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Boolean(b) => Value::Bool(*b),
            Self::Number(n) => match n.parse::<Number>() {
                Ok(number) => Value::Number(number),
                Err(_) => Value::String(n.clone()),
            },
            Self::String(s) => Value::String(s.clone()),
            Self::Uuid(uuid) => {
                let mut map = Map::new();
                map.insert(UUID_WRAPPER_FIELD.to_owned(), Value::String(uuid.to_string()));
                Value::Object(map)
            }
        }
    }

    /// Canonical text stored as the second component of the `key` tuple.
    #[must_use]
    pub fn as_db_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Number(n) => f.write_str(n),
            Self::String(s) => f.write_str(s),
            Self::Uuid(uuid) => write!(f, "{uuid}"),
        }
    }
}

fn bad_type(value: &Value) -> ApiError {
    ApiError::with_detail(
        ErrorCode::ShredBadDocIdType,
        format!(
            "Document Id must be a JSON String, Number, Boolean, NULL or UUID wrapper, instead got {}",
            node_type_name(value)
        ),
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn atomic_ids_round_trip() {
        for value in [json!("abc"), json!(25), json!(true), json!(null)] {
            let id = DocumentId::from_json(&value).unwrap();
            assert_eq!(id.to_json(), value);
        }
    }

    #[test]
    fn uuid_wrapper() {
        let raw = json!({"$uuid": "123e4567-e89b-12d3-a456-426614174000"});
        let id = DocumentId::from_json(&raw).unwrap();
        assert!(matches!(id, DocumentId::Uuid(_)));
        assert_eq!(id.type_tag(), 4);
        assert_eq!(id.to_json(), raw);
    }

    #[test]
    fn array_id_rejected() {
        let err = DocumentId::from_json(&json!([])).unwrap_err();
        assert_eq!(err.code, ErrorCode::ShredBadDocIdType);
        assert!(err.message.starts_with("Bad type for '_id' property"), "{}", err.message);
        assert!(err.message.contains("ARRAY"), "{}", err.message);
    }

    #[test]
    fn plain_object_id_rejected() {
        let err = DocumentId::from_json(&json!({"a": 1})).unwrap_err();
        assert_eq!(err.code, ErrorCode::ShredBadDocIdType);
    }

    #[test]
    fn type_tags_are_distinct() {
        let ids = [
            DocumentId::Null,
            DocumentId::Boolean(true),
            DocumentId::Number("1".into()),
            DocumentId::String("x".into()),
            DocumentId::random(),
        ];
        let mut tags: Vec<i8> = ids.iter().map(DocumentId::type_tag).collect();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), ids.len());
    }

    #[test]
    fn db_key_text() {
        assert_eq!(DocumentId::String("doc-1".into()).as_db_key(), "doc-1");
        assert_eq!(DocumentId::Number("2.5".into()).as_db_key(), "2.5");
        assert_eq!(DocumentId::Null.as_db_key(), "null");
    }
}
