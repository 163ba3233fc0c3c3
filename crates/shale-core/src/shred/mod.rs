//! Document shredding.
//!
//! Shredding decomposes a JSON document into the typed, per-path index
//! containers that become one row of the fixed column schema, while keeping
//! the canonical serialization as `doc_json`. The decomposition is
//! deterministic: reshredding `doc_json` reproduces the same shredded form.

mod document;
mod hasher;
mod limits;
#[cfg(test)]
mod proptest_tests;

pub use document::WritableShreddedDocument;
pub use hasher::content_hash;
pub use limits::DocumentLimits;

use serde_json::{Map, Value};

use crate::docid::DocumentId;
use crate::error::{ApiError, ErrorCode, Result};
use crate::json::node_type_name;
use crate::path::DotPath;
use crate::DOC_ID_FIELD;

/// Wrapper key for the extended-JSON timestamp form, `{"$date": millis}`.
pub const DATE_WRAPPER_FIELD: &str = "$date";

/// Reserved top-level field carrying the document's embedding.
pub const VECTOR_FIELD: &str = "$vector";

/// Compact serialization preserving object key order.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    // Serializing an in-memory tree cannot fail: keys are strings and there
    // is no I/O involved.
    serde_json::to_string(value).expect("serializing a JSON tree is infallible")
}

/// Build one `array_contains` entry for `element` of the array at `path`.
///
/// Entries have the form `path|type-tag|value`: the canonical text for
/// atomic values, the literal `null` token for nulls, and a content hash for
/// structured elements. The filter algebra builds identical entries when
/// rewriting `$in`/`$all` into membership predicates.
#[must_use]
pub fn array_contains_entry(path: &DotPath, element: &Value) -> String {
    let (tag, text) = match element {
        Value::Null => ('Z', "null".to_owned()),
        Value::Bool(b) => ('B', b.to_string()),
        Value::Number(n) => ('N', n.to_string()),
        Value::String(s) => ('S', s.clone()),
        Value::Array(_) => ('A', content_hash(element)),
        Value::Object(_) => ('O', content_hash(element)),
    };
    format!("{path}|{tag}|{text}")
}

/// Transforms documents into [`WritableShreddedDocument`]s.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use shale_core::shred::Shredder;
///
/// let doc = Shredder::default().shred(&json!({"_id": "a", "n": 1})).unwrap();
/// assert_eq!(doc.doc_json, r#"{"_id":"a","n":1}"#);
/// ```
#[derive(Debug, Default)]
pub struct Shredder {
    limits: DocumentLimits,
}

impl Shredder {
    /// Shredder enforcing the given limits.
    #[must_use]
    pub fn new(limits: DocumentLimits) -> Self {
        Self { limits }
    }

    /// Shred a document.
    ///
    /// A missing `_id` is assigned a random UUID. A fresh `tx_id` is drawn
    /// for the write that will carry the result.
    ///
    /// # Errors
    ///
    /// `SHRED_BAD_DOCUMENT_TYPE` when the value is not an object,
    /// `SHRED_BAD_DOCID_TYPE` for an array or object `_id`, and
    /// `SHRED_DOC_LIMIT_VIOLATION` when a configured limit is exceeded.
    pub fn shred(&self, document: &Value) -> Result<WritableShreddedDocument> {
        let fields = document.as_object().ok_or_else(|| {
            ApiError::with_detail(
                ErrorCode::ShredBadDocumentType,
                format!(
                    "Document to shred must be a JSON Object, instead got {}",
                    node_type_name(document)
                ),
            )
        })?;

        let id = match fields.get(DOC_ID_FIELD) {
            Some(value) => DocumentId::from_json(value)?,
            None => DocumentId::random(),
        };
        let doc_json = self.build_doc_json(&id, fields)?;
        let mut doc = WritableShreddedDocument::new(id, crate::txid::next_tx_id(), doc_json);

        self.check_property_count(fields.len(), "document root")?;
        for (key, value) in fields {
            if key == DOC_ID_FIELD {
                continue;
            }
            // The embedding is stored in its dedicated column and stays out
            // of the index containers; it remains part of `doc_json`.
            if key == VECTOR_FIELD {
                doc.query_vector_value = Some(parse_vector(value)?);
                continue;
            }
            self.traverse(&mut doc, DotPath::from_key(key.clone()), value)?;
        }
        Ok(doc)
    }

    /// Canonical text: compact, `_id` as the first field, the rest in input
    /// order.
    fn build_doc_json(&self, id: &DocumentId, fields: &Map<String, Value>) -> Result<String> {
        let mut ordered = Map::with_capacity(fields.len() + 1);
        ordered.insert(DOC_ID_FIELD.to_owned(), id.to_json());
        for (key, value) in fields {
            if key != DOC_ID_FIELD {
                ordered.insert(key.clone(), value.clone());
            }
        }
        let doc_json = canonical_json(&Value::Object(ordered));
        if doc_json.len() > self.limits.max_size {
            return Err(self.limit_violation(format!(
                "document size ({} bytes) exceeds maximum allowed ({} bytes)",
                doc_json.len(),
                self.limits.max_size
            )));
        }
        Ok(doc_json)
    }

    fn traverse(&self, doc: &mut WritableShreddedDocument, path: DotPath, value: &Value) -> Result<()> {
        if path.segments().len() > self.limits.max_depth {
            return Err(self.limit_violation(format!(
                "document depth exceeds maximum allowed ({})",
                self.limits.max_depth
            )));
        }
        let rendered_len = path.to_string().chars().count();
        if rendered_len > self.limits.max_path_length {
            return Err(self.limit_violation(format!(
                "field path length ({rendered_len}) exceeds maximum allowed ({})",
                self.limits.max_path_length
            )));
        }

        doc.doc_field_order.push(path.clone());
        doc.exist_keys.insert(path.clone());

        match value {
            Value::Object(fields) => {
                if let Some(millis) = as_date_wrapper(fields) {
                    doc.query_timestamp_values.insert(path, millis);
                    return Ok(());
                }
                self.check_property_count(fields.len(), "sub-document")?;
                doc.sub_doc_equals.insert(path.clone(), content_hash(value));
                for (key, child) in fields {
                    self.traverse(doc, path.child_key(key.clone()), child)?;
                }
            }
            Value::Array(elements) => {
                if elements.len() > self.limits.max_array_length {
                    return Err(self.limit_violation(format!(
                        "array length ({}) exceeds maximum allowed ({})",
                        elements.len(),
                        self.limits.max_array_length
                    )));
                }
                doc.array_size.insert(path.clone(), elements.len() as u32);
                doc.array_equals.insert(path.clone(), content_hash(value));
                for (index, element) in elements.iter().enumerate() {
                    doc.array_contains.insert(array_contains_entry(&path, element));
                    self.traverse(doc, path.child_index(index as u32), element)?;
                }
            }
            Value::Bool(b) => {
                doc.query_bool_values.insert(path, *b);
            }
            Value::Number(n) => {
                doc.query_number_values.insert(path, n.clone());
            }
            Value::String(s) => {
                if s.len() > self.limits.max_string_length {
                    return Err(self.limit_violation(format!(
                        "string value length ({}) exceeds maximum allowed ({})",
                        s.len(),
                        self.limits.max_string_length
                    )));
                }
                doc.query_text_values.insert(path, s.clone());
            }
            Value::Null => {
                doc.query_null_values.insert(path);
            }
        }
        Ok(())
    }

    fn check_property_count(&self, count: usize, what: &str) -> Result<()> {
        if count > self.limits.max_object_properties {
            return Err(self.limit_violation(format!(
                "{what} has too many properties ({count}), maximum allowed ({})",
                self.limits.max_object_properties
            )));
        }
        Ok(())
    }

    fn limit_violation(&self, detail: String) -> ApiError {
        ApiError::with_detail(ErrorCode::ShredDocLimitViolation, detail)
    }
}

fn parse_vector(value: &Value) -> Result<Vec<f32>> {
    value
        .as_array()
        .map(|elements| {
            elements.iter().map(|e| e.as_f64().map(|f| f as f32)).collect::<Option<Vec<f32>>>()
        })
        .unwrap_or_default()
        .filter(|components| !components.is_empty())
        .ok_or_else(|| {
            ApiError::with_detail(
                ErrorCode::ShredBadDocumentType,
                "$vector value needs to be a non-empty array of numbers",
            )
        })
}

/// `Some(millis)` when the object is exactly `{"$date": <integer>}`.
fn as_date_wrapper(fields: &Map<String, Value>) -> Option<i64> {
    if fields.len() != 1 {
        return None;
    }
    fields.get(DATE_WRAPPER_FIELD)?.as_i64()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn path(raw: &str) -> DotPath {
        DotPath::parse(raw).expect("valid path")
    }

    fn rendered(paths: &[DotPath]) -> Vec<String> {
        paths.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn shreds_simple_document() {
        let doc = Shredder::default()
            .shred(&json!({
                "_id": "abc",
                "name": "Bob",
                "values": [1, 2],
                "[extra.stuff]": true,
                "nullable": null
            }))
            .unwrap();

        assert_eq!(doc.id, crate::DocumentId::String("abc".into()));
        assert_eq!(
            rendered(&doc.doc_field_order),
            ["name", "values", "values.[0]", "values.[1]", "\\[extra\\.stuff]", "nullable"]
        );
        let as_set: std::collections::BTreeSet<_> = doc.doc_field_order.iter().cloned().collect();
        assert_eq!(doc.exist_keys, as_set);

        // One array of two elements.
        assert_eq!(doc.array_size.len(), 1);
        assert_eq!(doc.array_size.get(&path("values")), Some(&2));
        assert_eq!(doc.array_equals.len(), 1);
        assert_eq!(doc.array_contains.len(), 2);
        assert!(doc.array_contains.contains("values|N|1"));
        assert!(doc.array_contains.contains("values|N|2"));

        // No sub-documents.
        assert!(doc.sub_doc_equals.is_empty());

        // Atomic containers: 5 atomic fields, `_id` not included.
        assert_eq!(doc.atomic_field_count(), 5);
        assert_eq!(doc.query_bool_values.get(&path("\\[extra\\.stuff]")), Some(&true));
        assert_eq!(doc.query_text_values.get(&path("name")), Some(&"Bob".into()));
        assert_eq!(doc.query_number_values.get(&path("values.[0]")).map(ToString::to_string), Some("1".into()));
        assert_eq!(doc.query_number_values.get(&path("values.[1]")).map(ToString::to_string), Some("2".into()));
        assert!(doc.query_null_values.contains(&path("nullable")));
    }

    #[test]
    fn doc_json_is_canonical() {
        let doc = Shredder::default()
            .shred(&json!({"b": 2, "_id": 7, "a": {"y": 1, "x": 2}}))
            .unwrap();
        // Compact, `_id` hoisted first, other keys in input order.
        assert_eq!(doc.doc_json, r#"{"_id":7,"b":2,"a":{"y":1,"x":2}}"#);
    }

    #[test]
    fn missing_id_gets_random_uuid() {
        let doc = Shredder::default().shred(&json!({"a": 1})).unwrap();
        assert!(matches!(doc.id, crate::DocumentId::Uuid(_)));
        assert!(doc.doc_json.starts_with(r#"{"_id":{"$uuid":""#));
    }

    #[test]
    fn non_object_rejected() {
        let err = Shredder::default().shred(&json!([1, 2])).unwrap_err();
        assert_eq!(err.code, ErrorCode::ShredBadDocumentType);
        assert_eq!(
            err.message,
            "Bad document type to shred: Document to shred must be a JSON Object, instead got ARRAY"
        );
    }

    #[test]
    fn array_id_rejected() {
        let err = Shredder::default().shred(&json!({"_id": []})).unwrap_err();
        assert_eq!(err.code, ErrorCode::ShredBadDocIdType);
    }

    #[test]
    fn nested_structures() {
        let doc = Shredder::default()
            .shred(&json!({
                "_id": 1,
                "meta": {"author": "Ann", "tags": ["a", {"k": 1}]}
            }))
            .unwrap();

        assert!(doc.sub_doc_equals.contains_key(&path("meta")));
        assert!(doc.sub_doc_equals.contains_key(&path("meta.tags.1")));
        assert_eq!(doc.array_size.get(&path("meta.tags")), Some(&2));
        assert!(doc.array_contains.contains("meta.tags|S|a"));
        // Structured element: tagged content hash.
        let hash = content_hash(&json!({"k": 1}));
        assert!(doc.array_contains.contains(&format!("meta.tags|O|{hash}")));
        assert_eq!(doc.query_text_values.get(&path("meta.author")), Some(&"Ann".into()));
        assert_eq!(
            doc.query_number_values.get(&path("meta.tags.1.k")).map(ToString::to_string),
            Some("1".into())
        );
    }

    #[test]
    fn date_wrapper_becomes_timestamp() {
        let doc = Shredder::default()
            .shred(&json!({"_id": 1, "created": {"$date": 1672531200000i64}}))
            .unwrap();
        assert_eq!(doc.query_timestamp_values.get(&path("created")), Some(&1672531200000));
        // The wrapper is a leaf, not a sub-document.
        assert!(doc.sub_doc_equals.is_empty());
        assert_eq!(rendered(&doc.doc_field_order), ["created"]);
    }

    #[test]
    fn reshredding_doc_json_is_idempotent() {
        let first = Shredder::default()
            .shred(&json!({
                "_id": "r",
                "a": {"b": [1, {"c": null}]},
                "flag": false
            }))
            .unwrap();
        let reparsed: Value = serde_json::from_str(&first.doc_json).unwrap();
        let second = Shredder::default().shred(&reparsed).unwrap();

        assert_eq!(first.doc_json, second.doc_json);
        assert_eq!(first.doc_field_order, second.doc_field_order);
        assert_eq!(first.exist_keys, second.exist_keys);
        assert_eq!(first.sub_doc_equals, second.sub_doc_equals);
        assert_eq!(first.array_size, second.array_size);
        assert_eq!(first.array_equals, second.array_equals);
        assert_eq!(first.array_contains, second.array_contains);
        assert_eq!(first.query_bool_values, second.query_bool_values);
        assert_eq!(first.query_number_values, second.query_number_values);
        assert_eq!(first.query_text_values, second.query_text_values);
        assert_eq!(first.query_null_values, second.query_null_values);
    }

    #[test]
    fn depth_limit_enforced() {
        let shredder = Shredder::new(DocumentLimits { max_depth: 2, ..DocumentLimits::default() });
        let err = shredder.shred(&json!({"_id": 1, "a": {"b": {"c": 1}}})).unwrap_err();
        assert_eq!(err.code, ErrorCode::ShredDocLimitViolation);
        assert!(err.message.contains("depth"), "{}", err.message);
    }

    #[test]
    fn array_length_limit_enforced() {
        let shredder =
            Shredder::new(DocumentLimits { max_array_length: 2, ..DocumentLimits::default() });
        let err = shredder.shred(&json!({"_id": 1, "a": [1, 2, 3]})).unwrap_err();
        assert_eq!(err.code, ErrorCode::ShredDocLimitViolation);
        assert!(err.message.contains("array length"), "{}", err.message);
    }

    #[test]
    fn vector_field_feeds_vector_column_only() {
        let doc = Shredder::default()
            .shred(&json!({"_id": 1, "$vector": [0.25, 0.5], "name": "a"}))
            .unwrap();
        assert_eq!(doc.query_vector_value, Some(vec![0.25, 0.5]));
        // Not walked: no paths, no array containers.
        assert_eq!(rendered(&doc.doc_field_order), ["name"]);
        assert!(doc.array_size.is_empty());
        // Still part of the canonical document.
        assert!(doc.doc_json.contains("\"$vector\""));
    }

    #[test]
    fn malformed_vector_rejected() {
        let err = Shredder::default()
            .shred(&json!({"_id": 1, "$vector": ["x"]}))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ShredBadDocumentType);
    }

    #[test]
    fn tx_ids_are_monotonic() {
        let shredder = Shredder::default();
        let a = shredder.shred(&json!({"_id": 1})).unwrap();
        let b = shredder.shred(&json!({"_id": 1})).unwrap();
        assert!(b.next_tx_id > a.next_tx_id);
    }
}
