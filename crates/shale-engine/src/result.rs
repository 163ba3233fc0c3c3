//! The uniform response envelope.
//!
//! Every command resolves to a [`CommandResult`] with any subset of
//! `{data, status, errors}`; the HTTP layer always answers 200 and clients
//! distinguish outcomes by the envelope alone.

use serde::Serialize;
use serde_json::{Map, Value};

use shale_core::ApiError;

/// Documents returned by a read.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ResponseData {
    /// Matched documents.
    pub docs: Vec<Value>,
    /// Opaque continuation token, present when a page filled.
    #[serde(rename = "nextPageState", skip_serializing_if = "Option::is_none")]
    pub next_page_state: Option<String>,
}

/// One error in the envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandError {
    /// Human-readable message.
    pub message: String,
    /// Stable error code; absent for envelope-level failures.
    #[serde(rename = "errorCode", skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Coarse failure class tag.
    #[serde(rename = "exceptionClass")]
    pub exception_class: String,
}

/// The response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct CommandResult {
    /// Read payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
    /// Operation status entries, e.g. `{"ok": 1}` or `{"insertedIds": [...]}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Map<String, Value>>,
    /// Errors, most significant first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<CommandError>>,
}

impl CommandResult {
    /// The plain success envelope, `status.ok = 1`.
    #[must_use]
    pub fn ok() -> Self {
        Self::with_status([("ok", Value::from(1))])
    }

    /// Envelope carrying only status entries.
    #[must_use]
    pub fn with_status<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        let status = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self { data: None, status: Some(status), errors: None }
    }

    /// Envelope carrying documents.
    #[must_use]
    pub fn with_docs(docs: Vec<Value>, next_page_state: Option<String>) -> Self {
        Self {
            data: Some(ResponseData { docs, next_page_state }),
            status: None,
            errors: None,
        }
    }

    /// Envelope carrying one error.
    #[must_use]
    pub fn from_error(error: CommandError) -> Self {
        Self::from_errors(vec![error])
    }

    /// Envelope carrying several errors.
    #[must_use]
    pub fn from_errors(errors: Vec<CommandError>) -> Self {
        Self { data: None, status: None, errors: Some(errors) }
    }

    /// Add (or extend) the status map.
    #[must_use]
    pub fn and_status<K: Into<String>>(
        mut self,
        entries: impl IntoIterator<Item = (K, Value)>,
    ) -> Self {
        let status = self.status.get_or_insert_with(Map::new);
        for (key, value) in entries {
            status.insert(key.into(), value);
        }
        self
    }
}

impl CommandError {
    /// Error carrying a stable code; `exceptionClass` is the generic API
    /// failure tag.
    #[must_use]
    pub fn api(error: &ApiError) -> Self {
        Self {
            message: error.message.clone(),
            error_code: Some(error.code.as_str().to_owned()),
            exception_class: "JsonApiException".to_owned(),
        }
    }

    /// Unknown command tag.
    #[must_use]
    pub fn no_such_command(tag: &str) -> Self {
        Self {
            message: format!("Could not resolve type id '{tag}'"),
            error_code: None,
            exception_class: "NoSuchCommandException".to_owned(),
        }
    }

    /// Request shape violation (missing/invalid field, empty body).
    #[must_use]
    pub fn constraint_violation(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_code: None,
            exception_class: "ConstraintViolationException".to_owned(),
        }
    }

    /// Unparseable request body.
    #[must_use]
    pub fn json_parse(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_code: None,
            exception_class: "JsonParseException".to_owned(),
        }
    }

    /// Missing or rejected auth token.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_code: None,
            exception_class: "UnauthorizedException".to_owned(),
        }
    }
}

impl From<ApiError> for CommandResult {
    fn from(error: ApiError) -> Self {
        Self::from_error(CommandError::api(&error))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use shale_core::ErrorCode;

    use super::*;

    #[test]
    fn ok_envelope_shape() {
        let rendered = serde_json::to_value(CommandResult::ok()).unwrap();
        assert_eq!(rendered, json!({"status": {"ok": 1}}));
    }

    #[test]
    fn error_envelope_shape() {
        let result: CommandResult =
            ApiError::new(ErrorCode::DocumentAlreadyExists).into();
        let rendered = serde_json::to_value(result).unwrap();
        assert_eq!(
            rendered,
            json!({"errors": [{
                "message": "Document already exists with the given _id",
                "errorCode": "DOCUMENT_ALREADY_EXISTS",
                "exceptionClass": "JsonApiException"
            }]})
        );
    }

    #[test]
    fn data_envelope_omits_absent_parts() {
        let rendered =
            serde_json::to_value(CommandResult::with_docs(vec![json!({"_id": 1})], None)).unwrap();
        assert_eq!(rendered, json!({"data": {"docs": [{"_id": 1}]}}));
    }

    #[test]
    fn unknown_command_message() {
        let error = CommandError::no_such_command("makeCoffee");
        assert_eq!(error.message, "Could not resolve type id 'makeCoffee'");
        assert_eq!(error.exception_class, "NoSuchCommandException");
        assert_eq!(error.error_code, None);
    }

    #[test]
    fn status_extension() {
        let result = CommandResult::ok().and_status([("deletedCount", json!(2))]);
        let rendered = serde_json::to_value(result).unwrap();
        assert_eq!(rendered, json!({"status": {"ok": 1, "deletedCount": 2}}));
    }
}
