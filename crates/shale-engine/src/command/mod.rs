//! The command envelope and the typed command model.
//!
//! A request body is a JSON object with exactly one top-level key naming the
//! command; the value carries the parameters. Clause-valued fields (filter,
//! update, sort) stay as raw JSON here and are resolved against their
//! algebras when the command is turned into an operation.

pub mod clause;

use serde::Deserialize;
use serde_json::Value;

use crate::result::CommandError;
use crate::schema::SimilarityFunction;

/// Where a command executes: namespace plus, for document commands, the
/// collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandContext {
    /// Tenant discriminator from the auth layer, if any.
    pub tenant: Option<String>,
    /// Target namespace (keyspace).
    pub namespace: String,
    /// Target collection; `None` for namespace-level commands.
    pub collection: Option<String>,
}

impl CommandContext {
    /// Namespace-level context.
    #[must_use]
    pub fn for_namespace(namespace: impl Into<String>) -> Self {
        Self { tenant: None, namespace: namespace.into(), collection: None }
    }

    /// Collection-level context.
    #[must_use]
    pub fn for_collection(namespace: impl Into<String>, collection: impl Into<String>) -> Self {
        Self { tenant: None, namespace: namespace.into(), collection: Some(collection.into()) }
    }
}

/// `createCollection` parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCollectionCommand {
    /// Collection name.
    pub name: String,
    /// Optional collection settings.
    #[serde(default)]
    pub options: Option<CreateCollectionOptions>,
}

/// `createCollection` options.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct CreateCollectionOptions {
    /// Vector search settings; enables the vector column when present.
    #[serde(default)]
    pub vector: Option<VectorOptions>,
    /// Table comment.
    #[serde(default)]
    pub comment: Option<String>,
}

/// Vector search settings of a collection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VectorOptions {
    /// Vector dimension.
    pub size: u32,
    /// Similarity function; cosine when omitted.
    #[serde(default)]
    pub function: SimilarityFunction,
}

/// `deleteCollection` parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteCollectionCommand {
    /// Collection name.
    pub name: String,
}

/// `findCollections` parameters (none).
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FindCollectionsCommand {}

/// `insertOne` parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InsertOneCommand {
    /// The document to insert.
    pub document: Value,
}

/// `insertMany` parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InsertManyCommand {
    /// The documents to insert.
    pub documents: Vec<Value>,
    /// Insert options.
    #[serde(default)]
    pub options: InsertManyOptions,
}

/// `insertMany` options.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InsertManyOptions {
    /// Ordered inserts stop at the first failure; unordered attempt all.
    #[serde(default = "default_true")]
    pub ordered: bool,
}

impl Default for InsertManyOptions {
    fn default() -> Self {
        Self { ordered: true }
    }
}

fn default_true() -> bool {
    true
}

/// `findOne` parameters.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FindOneCommand {
    /// Filter clause.
    #[serde(default)]
    pub filter: Option<Value>,
    /// Sort clause.
    #[serde(default)]
    pub sort: Option<Value>,
}

/// `find` parameters.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FindCommand {
    /// Filter clause.
    #[serde(default)]
    pub filter: Option<Value>,
    /// Sort clause.
    #[serde(default)]
    pub sort: Option<Value>,
    /// Read options.
    #[serde(default)]
    pub options: FindOptions,
}

/// `find` options.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FindOptions {
    /// Maximum documents to return; clamped to the page cap.
    #[serde(default)]
    pub limit: Option<u32>,
    /// Continuation token from a previous page.
    #[serde(default, rename = "pagingState")]
    pub paging_state: Option<String>,
}

/// `updateOne`/`updateMany` options.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct UpdateOptions {
    /// Insert a new document when nothing matches.
    #[serde(default)]
    pub upsert: bool,
}

/// `updateOne` parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateOneCommand {
    /// Filter clause.
    #[serde(default)]
    pub filter: Option<Value>,
    /// Update clause.
    pub update: Value,
    /// Update options.
    #[serde(default)]
    pub options: UpdateOptions,
}

/// `updateMany` parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateManyCommand {
    /// Filter clause.
    #[serde(default)]
    pub filter: Option<Value>,
    /// Update clause.
    pub update: Value,
    /// Update options.
    #[serde(default)]
    pub options: UpdateOptions,
}

/// Which document state `findOneAndUpdate` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReturnDocument {
    /// The document as it was before the update.
    #[default]
    Before,
    /// The document after the update.
    After,
}

/// `findOneAndUpdate` options.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FindOneAndUpdateOptions {
    /// Which document state to return.
    #[serde(default, rename = "returnDocument")]
    pub return_document: ReturnDocument,
    /// Insert a new document when nothing matches.
    #[serde(default)]
    pub upsert: bool,
}

/// `findOneAndUpdate` parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FindOneAndUpdateCommand {
    /// Filter clause.
    #[serde(default)]
    pub filter: Option<Value>,
    /// Update clause.
    pub update: Value,
    /// Sort clause.
    #[serde(default)]
    pub sort: Option<Value>,
    /// Options.
    #[serde(default)]
    pub options: FindOneAndUpdateOptions,
}

/// `findOneAndDelete` parameters.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FindOneAndDeleteCommand {
    /// Filter clause.
    #[serde(default)]
    pub filter: Option<Value>,
    /// Sort clause.
    #[serde(default)]
    pub sort: Option<Value>,
}

/// `deleteOne` parameters.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct DeleteOneCommand {
    /// Filter clause.
    #[serde(default)]
    pub filter: Option<Value>,
}

/// `deleteMany` parameters.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct DeleteManyCommand {
    /// Filter clause.
    #[serde(default)]
    pub filter: Option<Value>,
}

/// `countDocuments` parameters.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct CountDocumentsCommand {
    /// Filter clause.
    #[serde(default)]
    pub filter: Option<Value>,
}

/// A resolved command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `createCollection`
    CreateCollection(CreateCollectionCommand),
    /// `deleteCollection`
    DeleteCollection(DeleteCollectionCommand),
    /// `findCollections`
    FindCollections(FindCollectionsCommand),
    /// `insertOne`
    InsertOne(InsertOneCommand),
    /// `insertMany`
    InsertMany(InsertManyCommand),
    /// `findOne`
    FindOne(FindOneCommand),
    /// `find`
    Find(FindCommand),
    /// `findOneAndUpdate`
    FindOneAndUpdate(FindOneAndUpdateCommand),
    /// `findOneAndDelete`
    FindOneAndDelete(FindOneAndDeleteCommand),
    /// `updateOne`
    UpdateOne(UpdateOneCommand),
    /// `updateMany`
    UpdateMany(UpdateManyCommand),
    /// `deleteOne`
    DeleteOne(DeleteOneCommand),
    /// `deleteMany`
    DeleteMany(DeleteManyCommand),
    /// `countDocuments`
    CountDocuments(CountDocumentsCommand),
}

impl Command {
    /// The wire tag of this command.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::CreateCollection(_) => "createCollection",
            Self::DeleteCollection(_) => "deleteCollection",
            Self::FindCollections(_) => "findCollections",
            Self::InsertOne(_) => "insertOne",
            Self::InsertMany(_) => "insertMany",
            Self::FindOne(_) => "findOne",
            Self::Find(_) => "find",
            Self::FindOneAndUpdate(_) => "findOneAndUpdate",
            Self::FindOneAndDelete(_) => "findOneAndDelete",
            Self::UpdateOne(_) => "updateOne",
            Self::UpdateMany(_) => "updateMany",
            Self::DeleteOne(_) => "deleteOne",
            Self::DeleteMany(_) => "deleteMany",
            Self::CountDocuments(_) => "countDocuments",
        }
    }

    /// True for commands addressing documents of one collection.
    #[must_use]
    pub const fn targets_collection(&self) -> bool {
        !matches!(
            self,
            Self::CreateCollection(_) | Self::DeleteCollection(_) | Self::FindCollections(_)
        )
    }
}

/// Parse a command envelope.
///
/// # Errors
///
/// A [`CommandError`] ready for the envelope: `NoSuchCommandException` for
/// unknown tags, `ConstraintViolationException` for shape violations.
pub fn parse_envelope(body: &Value) -> Result<Command, CommandError> {
    let entries = body.as_object().ok_or_else(|| {
        CommandError::constraint_violation("request body must be a JSON Object")
    })?;
    let mut fields = entries.iter();
    let (Some((tag, params)), None) = (fields.next(), fields.next()) else {
        return Err(CommandError::constraint_violation(
            "request body must contain exactly one command",
        ));
    };

    fn typed<T: serde::de::DeserializeOwned>(
        tag: &str,
        params: &Value,
    ) -> Result<T, CommandError> {
        serde_json::from_value(params.clone())
            .map_err(|err| CommandError::constraint_violation(format!("{tag}: {err}")))
    }

    match tag.as_str() {
        "createCollection" => Ok(Command::CreateCollection(typed(tag, params)?)),
        "deleteCollection" => Ok(Command::DeleteCollection(typed(tag, params)?)),
        "findCollections" => Ok(Command::FindCollections(typed(tag, params)?)),
        "insertOne" => Ok(Command::InsertOne(typed(tag, params)?)),
        "insertMany" => Ok(Command::InsertMany(typed(tag, params)?)),
        "findOne" => Ok(Command::FindOne(typed(tag, params)?)),
        "find" => Ok(Command::Find(typed(tag, params)?)),
        "findOneAndUpdate" => Ok(Command::FindOneAndUpdate(typed(tag, params)?)),
        "findOneAndDelete" => Ok(Command::FindOneAndDelete(typed(tag, params)?)),
        "updateOne" => Ok(Command::UpdateOne(typed(tag, params)?)),
        "updateMany" => Ok(Command::UpdateMany(typed(tag, params)?)),
        "deleteOne" => Ok(Command::DeleteOne(typed(tag, params)?)),
        "deleteMany" => Ok(Command::DeleteMany(typed(tag, params)?)),
        "countDocuments" => Ok(Command::CountDocuments(typed(tag, params)?)),
        unknown => Err(CommandError::no_such_command(unknown)),
    }
}

/// Longest accepted collection name.
const MAX_NAME_LENGTH: usize = 48;

/// Largest accepted vector dimension.
const MAX_VECTOR_SIZE: u32 = 4096;

/// Validate bean-style constraints on a parsed command.
///
/// # Errors
///
/// `ConstraintViolationException` errors naming the violated field.
pub fn validate(command: &Command, max_documents_per_insert: usize) -> Result<(), CommandError> {
    match command {
        Command::CreateCollection(create) => {
            validate_name(&create.name)?;
            if let Some(vector) = create.options.as_ref().and_then(|o| o.vector.as_ref()) {
                if vector.size == 0 || vector.size > MAX_VECTOR_SIZE {
                    return Err(CommandError::constraint_violation(format!(
                        "options.vector.size: must be between 1 and {MAX_VECTOR_SIZE}"
                    )));
                }
            }
            Ok(())
        }
        Command::DeleteCollection(delete) => validate_name(&delete.name),
        Command::InsertMany(insert) => {
            if insert.documents.is_empty() {
                return Err(CommandError::constraint_violation(
                    "documents: must not be empty",
                ));
            }
            if insert.documents.len() > max_documents_per_insert {
                return Err(CommandError::constraint_violation(format!(
                    "documents: amount of documents to insert is over the max limit ({max_documents_per_insert})"
                )));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Validate a collection name, from a command body or the request path.
pub fn validate_name(name: &str) -> Result<(), CommandError> {
    let mut chars = name.chars();
    let starts_alpha = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let valid = starts_alpha
        && name.len() <= MAX_NAME_LENGTH
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CommandError::constraint_violation(format!(
            "name: must match \"[a-zA-Z][a-zA-Z0-9_]*\" and be at most {MAX_NAME_LENGTH} characters, got '{name}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_create_collection() {
        let command = parse_envelope(&json!({
            "createCollection": {
                "name": "docs",
                "options": {"vector": {"size": 1536, "function": "cosine"}}
            }
        }))
        .unwrap();
        let Command::CreateCollection(create) = command else { panic!("wrong command") };
        assert_eq!(create.name, "docs");
        let vector = create.options.unwrap().vector.unwrap();
        assert_eq!(vector.size, 1536);
        assert_eq!(vector.function, SimilarityFunction::Cosine);
    }

    #[test]
    fn parses_round_trip_envelope() {
        // parse(serialize(C)) = C for a representative command.
        let body = json!({
            "updateOne": {
                "filter": {"_id": "x"},
                "update": {"$inc": {"n": 1}},
                "options": {"upsert": true}
            }
        });
        let command = parse_envelope(&body).unwrap();
        let Command::UpdateOne(update) = &command else { panic!("wrong command") };
        assert_eq!(update.filter, Some(json!({"_id": "x"})));
        assert!(update.options.upsert);
        assert_eq!(parse_envelope(&body).unwrap(), command);
    }

    #[test]
    fn unknown_tag_names_the_tag() {
        let err = parse_envelope(&json!({"makeCoffee": {}})).unwrap_err();
        assert_eq!(err.message, "Could not resolve type id 'makeCoffee'");
        assert_eq!(err.exception_class, "NoSuchCommandException");
    }

    #[test]
    fn multiple_commands_rejected() {
        let err =
            parse_envelope(&json!({"findOne": {}, "find": {}})).unwrap_err();
        assert_eq!(err.exception_class, "ConstraintViolationException");
    }

    #[test]
    fn missing_required_field_is_constraint_violation() {
        let err = parse_envelope(&json!({"insertOne": {}})).unwrap_err();
        assert_eq!(err.exception_class, "ConstraintViolationException");
        assert!(err.message.contains("insertOne"), "{}", err.message);
    }

    #[test]
    fn unknown_field_is_constraint_violation() {
        let err = parse_envelope(&json!({"findOne": {"bogus": 1}})).unwrap_err();
        assert_eq!(err.exception_class, "ConstraintViolationException");
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("docs_1").is_ok());
        for bad in ["", "1docs", "docs-1", "docs.1", &"x".repeat(49)] {
            assert!(validate_name(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn insert_many_bounds() {
        let command = parse_envelope(&json!({"insertMany": {"documents": []}})).unwrap();
        assert!(validate(&command, 20).is_err());

        let docs: Vec<_> = (0..21).map(|i| json!({"_id": i})).collect();
        let command =
            parse_envelope(&json!({"insertMany": {"documents": docs}})).unwrap();
        assert!(validate(&command, 20).is_err());
    }

    #[test]
    fn vector_size_bounds() {
        let command = parse_envelope(&json!({
            "createCollection": {"name": "c", "options": {"vector": {"size": 0}}}
        }))
        .unwrap();
        assert!(validate(&command, 20).is_err());
    }

    #[test]
    fn insert_many_defaults_to_ordered() {
        let command =
            parse_envelope(&json!({"insertMany": {"documents": [{"a": 1}]}})).unwrap();
        let Command::InsertMany(insert) = command else { panic!("wrong command") };
        assert!(insert.options.ordered);
    }
}
