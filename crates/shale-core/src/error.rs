//! Error taxonomy shared by every Shale crate.
//!
//! All failures that can reach a client are [`ApiError`] values carrying one
//! of the closed set of [`ErrorCode`]s. Codes are stable wire identifiers;
//! the default message of a code is a prefix of every message built from it,
//! so clients may match on either.

use thiserror::Error;

/// The closed set of error codes surfaced in response envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Document given to the shredder was not a JSON object.
    ShredBadDocumentType,
    /// `_id` had a type that cannot be used as a document id.
    ShredBadDocIdType,
    /// Document exceeded a configured size/depth/length limit.
    ShredDocLimitViolation,
    /// A filter value had a type no predicate supports.
    UnsupportedFilterDataType,
    /// A filter used an unknown `$` operator.
    UnsupportedFilterOperation,
    /// An update clause addressed a path that cannot be created or mutated.
    UnsupportedUpdateOperationPath,
    /// An update clause used an operator in an invalid way.
    UnsupportedUpdateOperation,
    /// Collection name invalid, or exists with conflicting settings.
    InvalidCollectionName,
    /// The target namespace (keyspace) does not exist.
    NamespaceDoesNotExist,
    /// The target collection does not exist.
    CollectionNotExist,
    /// Database-wide collection limit reached.
    TooManyCollections,
    /// Database-wide index budget would be exceeded.
    TooManyIndexes,
    /// CAS retry budget exhausted while competing writers kept winning.
    ConcurrentUpdateLimitExceeded,
    /// Insert found an existing document with the same `_id`.
    DocumentAlreadyExists,
    /// The request deadline was reached at a suspension point.
    RequestTimeout,
    /// The executor's inflight queue overflowed.
    ServerBusy,
    /// Unclassified failure from the store or a bug.
    InternalServerError,
}

impl ErrorCode {
    /// Stable wire identifier, as placed in the `errorCode` envelope field.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ShredBadDocumentType => "SHRED_BAD_DOCUMENT_TYPE",
            Self::ShredBadDocIdType => "SHRED_BAD_DOCID_TYPE",
            Self::ShredDocLimitViolation => "SHRED_DOC_LIMIT_VIOLATION",
            Self::UnsupportedFilterDataType => "UNSUPPORTED_FILTER_DATA_TYPE",
            Self::UnsupportedFilterOperation => "UNSUPPORTED_FILTER_OPERATION",
            Self::UnsupportedUpdateOperationPath => "UNSUPPORTED_UPDATE_OPERATION_PATH",
            Self::UnsupportedUpdateOperation => "UNSUPPORTED_UPDATE_OPERATION",
            Self::InvalidCollectionName => "INVALID_COLLECTION_NAME",
            Self::NamespaceDoesNotExist => "NAMESPACE_DOES_NOT_EXIST",
            Self::CollectionNotExist => "COLLECTION_NOT_EXIST",
            Self::TooManyCollections => "TOO_MANY_COLLECTIONS",
            Self::TooManyIndexes => "TOO_MANY_INDEXES",
            Self::ConcurrentUpdateLimitExceeded => "CONCURRENT_UPDATE_LIMIT_EXCEEDED",
            Self::DocumentAlreadyExists => "DOCUMENT_ALREADY_EXISTS",
            Self::RequestTimeout => "REQUEST_TIMEOUT",
            Self::ServerBusy => "SERVER_BUSY",
            Self::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Default human-readable message for this code.
    #[must_use]
    pub const fn default_message(&self) -> &'static str {
        match self {
            Self::ShredBadDocumentType => "Bad document type to shred",
            Self::ShredBadDocIdType => "Bad type for '_id' property",
            Self::ShredDocLimitViolation => "Document size limitation violated",
            Self::UnsupportedFilterDataType => "Unsupported filter data type",
            Self::UnsupportedFilterOperation => "Unsupported filter operator",
            Self::UnsupportedUpdateOperationPath => "Invalid update operation path",
            Self::UnsupportedUpdateOperation => "Unsupported update operation",
            Self::InvalidCollectionName => "Invalid collection name",
            Self::NamespaceDoesNotExist => "Unknown namespace",
            Self::CollectionNotExist => "Collection does not exist",
            Self::TooManyCollections => "Too many collections in database",
            Self::TooManyIndexes => "Too many indexes in database",
            Self::ConcurrentUpdateLimitExceeded => {
                "Unable to complete transaction due to concurrent changes"
            }
            Self::DocumentAlreadyExists => "Document already exists with the given _id",
            Self::RequestTimeout => "Request timed out",
            Self::ServerBusy => "Server is operating at capacity",
            Self::InternalServerError => "Server internal error",
        }
    }
}

/// An error surfaced to clients through the response envelope.
///
/// The message always starts with the code's default message; details are
/// appended after a colon via [`ApiError::with_detail`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ApiError {
    /// Stable error code.
    pub code: ErrorCode,
    /// Full message, `"<default>: <detail>"` or just the default.
    pub message: String,
}

impl ApiError {
    /// Create an error carrying the code's default message.
    #[must_use]
    pub fn new(code: ErrorCode) -> Self {
        Self { code, message: code.default_message().to_owned() }
    }

    /// Create an error with the default message extended by a detail.
    #[must_use]
    pub fn with_detail(code: ErrorCode, detail: impl AsRef<str>) -> Self {
        Self { code, message: format!("{}: {}", code.default_message(), detail.as_ref()) }
    }

    /// Create an error with an explicit full message.
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// A specialized `Result` for operations that can fail with an [`ApiError`].
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_message_is_prefix() {
        let err = ApiError::with_detail(
            ErrorCode::ShredBadDocumentType,
            "Document to shred must be a JSON Object, instead got ARRAY",
        );
        assert!(err.message.starts_with("Bad document type to shred"));
        assert_eq!(err.code.as_str(), "SHRED_BAD_DOCUMENT_TYPE");
    }

    #[test]
    fn plain_error_uses_default_message() {
        let err = ApiError::new(ErrorCode::DocumentAlreadyExists);
        assert_eq!(err.to_string(), "Document already exists with the given _id");
    }
}
