//! Small helpers over the JSON tree model.

use serde_json::Value;

/// Node type name used in error messages, e.g. `ARRAY` or `STRING`.
#[must_use]
pub const fn node_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "NULL",
        Value::Bool(_) => "BOOLEAN",
        Value::Number(_) => "NUMBER",
        Value::String(_) => "STRING",
        Value::Array(_) => "ARRAY",
        Value::Object(_) => "OBJECT",
    }
}

/// True for values that shred into a single `query_*` entry.
#[must_use]
pub const fn is_atomic(value: &Value) -> bool {
    matches!(value, Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_))
}
