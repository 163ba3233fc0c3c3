//! Operation executors.
//!
//! A resolved command becomes one [`Operation`]: a pure description of the
//! statements to run. Execution consumes an [`ExecutionContext`] and shapes
//! the store's answer into a [`CommandResult`].

mod collections;
mod delete;
mod insert;
mod read;
mod update;

pub use collections::{CreateCollectionOperation, DropCollectionOperation, FindCollectionsOperation};
pub use delete::DeleteOperation;
pub use insert::InsertOperation;
pub use read::{CountOperation, FindOperation};
pub use update::UpdateOperation;

use shale_core::{DocumentId, Result, WritableShreddedDocument};

use crate::config::EngineConfig;
use crate::executor::{CqlValue, QueryExecutor};
use crate::result::CommandResult;
use crate::schema::SchemaCache;

/// Shared services an operation executes against.
pub struct ExecutionContext<'a> {
    /// The store session, behind the inflight bound.
    pub executor: &'a QueryExecutor,
    /// Cached collection schema state.
    pub schema_cache: &'a SchemaCache,
    /// Engine configuration.
    pub config: &'a EngineConfig,
}

/// A resolved operation, ready to execute.
#[derive(Debug)]
pub enum Operation {
    /// `createCollection`
    CreateCollection(CreateCollectionOperation),
    /// `deleteCollection`
    DropCollection(DropCollectionOperation),
    /// `findCollections`
    FindCollections(FindCollectionsOperation),
    /// `insertOne` / `insertMany`
    Insert(InsertOperation),
    /// `find` / `findOne`
    Find(FindOperation),
    /// `countDocuments`
    Count(CountOperation),
    /// `updateOne` / `updateMany` / `findOneAndUpdate`
    Update(UpdateOperation),
    /// `deleteOne` / `deleteMany` / `findOneAndDelete`
    Delete(DeleteOperation),
}

impl Operation {
    /// Execute against the store and shape the result envelope.
    pub async fn execute(&self, ctx: &ExecutionContext<'_>) -> Result<CommandResult> {
        match self {
            Self::CreateCollection(op) => op.execute(ctx).await,
            Self::DropCollection(op) => op.execute(ctx).await,
            Self::FindCollections(op) => op.execute(ctx).await,
            Self::Insert(op) => op.execute(ctx).await,
            Self::Find(op) => op.execute(ctx).await,
            Self::Count(op) => op.execute(ctx).await,
            Self::Update(op) => op.execute(ctx).await,
            Self::Delete(op) => op.execute(ctx).await,
        }
    }
}

/// The `key` column encoding of a document id.
#[must_use]
pub fn key_tuple(id: &DocumentId) -> CqlValue {
    CqlValue::Tuple(vec![CqlValue::TinyInt(id.type_tag()), CqlValue::Text(id.as_db_key())])
}

/// The index columns written on every document write, in statement order
/// (after `key`, `tx_id` and `doc_json`).
pub(crate) const INDEX_WRITE_COLUMNS: &[&str] = &[
    "exist_keys",
    "array_size",
    "array_contains",
    "query_bool_values",
    "query_dbl_values",
    "query_text_values",
    "query_timestamp_values",
    "query_null_values",
];

/// Bind values for the index columns, in [`INDEX_WRITE_COLUMNS`] order.
pub(crate) fn index_write_params(doc: &WritableShreddedDocument) -> Vec<CqlValue> {
    vec![
        CqlValue::SetText(doc.exist_keys.iter().map(ToString::to_string).collect()),
        CqlValue::MapTextInt(
            doc.array_size.iter().map(|(path, size)| (path.to_string(), *size as i32)).collect(),
        ),
        CqlValue::SetText(doc.array_contains.iter().cloned().collect()),
        CqlValue::MapTextTinyInt(
            doc.query_bool_values
                .iter()
                .map(|(path, value)| (path.to_string(), i8::from(*value)))
                .collect(),
        ),
        CqlValue::MapTextDecimal(
            doc.query_number_values
                .iter()
                .map(|(path, value)| (path.to_string(), value.to_string()))
                .collect(),
        ),
        CqlValue::MapTextText(
            doc.query_text_values
                .iter()
                .map(|(path, value)| (path.to_string(), value.clone()))
                .collect(),
        ),
        CqlValue::MapTextTimestamp(
            doc.query_timestamp_values
                .iter()
                .map(|(path, value)| (path.to_string(), *value))
                .collect(),
        ),
        CqlValue::SetText(doc.query_null_values.iter().map(ToString::to_string).collect()),
    ]
}

/// Fully-quoted table reference.
pub(crate) fn table_ref(namespace: &str, collection: &str) -> String {
    format!("\"{namespace}\".\"{collection}\"")
}

/// Resolve the collection a document command targets, erroring when the
/// context has none.
pub(crate) fn required_collection(context: &crate::command::CommandContext) -> Result<&str> {
    context.collection.as_deref().ok_or_else(|| {
        shale_core::ApiError::with_detail(
            shale_core::ErrorCode::CollectionNotExist,
            "command requires a collection",
        )
    })
}
