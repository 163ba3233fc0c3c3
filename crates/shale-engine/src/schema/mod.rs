//! Collection schema: the fixed column shape, DDL builders, and the
//! table-shape matcher used to tell collections from arbitrary tables.

mod cache;

pub use cache::SchemaCache;

use std::fmt;

use serde::{Deserialize, Serialize};

use shale_core::{ApiError, ErrorCode, Result};

use crate::executor::{Statement, TableMetadata};

/// The vector column; present only on vector-enabled collections.
pub const VECTOR_COLUMN: &str = "query_vector_value";

/// The fixed non-vector columns of every collection table, with CQL types.
const BASE_COLUMNS: &[(&str, &str)] = &[
    ("key", "tuple<tinyint, text>"),
    ("tx_id", "timeuuid"),
    ("doc_json", "text"),
    ("exist_keys", "set<text>"),
    ("array_size", "map<text, int>"),
    ("array_contains", "set<text>"),
    ("query_bool_values", "map<text, tinyint>"),
    ("query_dbl_values", "map<text, decimal>"),
    ("query_text_values", "map<text, text>"),
    ("query_timestamp_values", "map<text, timestamp>"),
    ("query_null_values", "set<text>"),
];

/// Map columns are indexed over their entries; sets and the vector column
/// directly.
const ENTRY_INDEXED: &[&str] = &[
    "array_size",
    "query_bool_values",
    "query_dbl_values",
    "query_text_values",
    "query_timestamp_values",
];

/// Columns receiving a secondary index, in DDL issue order.
///
/// `DatabaseLimitsConfig::indexes_needed_per_collection` is derived from
/// this list so the capacity check always matches the DDL actually issued.
#[must_use]
pub fn index_columns(vector_enabled: bool) -> Vec<&'static str> {
    let mut columns = vec![
        "exist_keys",
        "array_size",
        "array_contains",
        "query_bool_values",
        "query_dbl_values",
        "query_text_values",
        "query_timestamp_values",
        "query_null_values",
    ];
    if vector_enabled {
        columns.push(VECTOR_COLUMN);
    }
    columns
}

/// Similarity function used by the ANN index of a vector-enabled collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityFunction {
    /// Cosine similarity (default).
    #[default]
    Cosine,
    /// Euclidean distance.
    Euclidean,
    /// Dot product.
    DotProduct,
}

impl SimilarityFunction {
    /// Parse the index-option spelling.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "cosine" => Ok(Self::Cosine),
            "euclidean" => Ok(Self::Euclidean),
            "dot_product" => Ok(Self::DotProduct),
            other => Err(ApiError::with_detail(
                ErrorCode::InvalidCollectionName,
                format!("unknown similarity function '{other}'"),
            )),
        }
    }

    /// The index-option spelling.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::DotProduct => "dot_product",
        }
    }
}

impl fmt::Display for SimilarityFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The settings a collection was created with.
///
/// Creating a collection that already exists succeeds only when the
/// requested settings equal the extracted ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSettings {
    /// Collection (table) name.
    pub name: String,
    /// Whether the table carries the vector column.
    pub vector_enabled: bool,
    /// Vector dimension; 0 when vector search is disabled.
    pub vector_size: u32,
    /// Similarity function of the ANN index.
    pub similarity_function: SimilarityFunction,
    /// Table comment.
    pub comment: Option<String>,
}

impl CollectionSettings {
    /// Settings for a plain collection.
    #[must_use]
    pub fn without_vector(name: impl Into<String>, comment: Option<String>) -> Self {
        Self {
            name: name.into(),
            vector_enabled: false,
            vector_size: 0,
            similarity_function: SimilarityFunction::default(),
            comment,
        }
    }

    /// Settings for a vector-enabled collection.
    #[must_use]
    pub fn with_vector(
        name: impl Into<String>,
        vector_size: u32,
        similarity_function: SimilarityFunction,
        comment: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            vector_enabled: true,
            vector_size,
            similarity_function,
            comment,
        }
    }

    /// Extract settings from table metadata.
    ///
    /// Only meaningful for tables accepted by [`is_collection_table`].
    #[must_use]
    pub fn from_table(table: &TableMetadata) -> Self {
        let vector = table.column(VECTOR_COLUMN);
        let vector_size = vector.map_or(0, |column| parse_vector_size(&column.type_name));
        let similarity_function = table
            .index_on(VECTOR_COLUMN)
            .and_then(|index| index.options.get("similarity_function"))
            .and_then(|name| SimilarityFunction::parse(name).ok())
            .unwrap_or_default();
        Self {
            name: table.name.clone(),
            vector_enabled: vector.is_some(),
            vector_size,
            similarity_function,
            comment: table.comment.clone(),
        }
    }
}

/// Dimension from a `vector<float, N>` type name; 0 when malformed.
fn parse_vector_size(type_name: &str) -> u32 {
    type_name
        .strip_prefix("vector<float,")
        .and_then(|rest| rest.strip_suffix('>'))
        .and_then(|n| n.trim().parse().ok())
        .unwrap_or(0)
}

/// The column metadata a collection table with these settings exposes.
///
/// Shared with the in-memory stub so its metadata is shaped exactly like a
/// real table's.
#[must_use]
pub fn collection_columns(settings: &CollectionSettings) -> Vec<crate::executor::ColumnMetadata> {
    let mut columns: Vec<crate::executor::ColumnMetadata> = BASE_COLUMNS
        .iter()
        .map(|(name, type_name)| crate::executor::ColumnMetadata {
            name: (*name).to_owned(),
            type_name: (*type_name).to_owned(),
        })
        .collect();
    if settings.vector_enabled {
        columns.push(crate::executor::ColumnMetadata {
            name: VECTOR_COLUMN.to_owned(),
            type_name: format!("vector<float, {}>", settings.vector_size),
        });
    }
    columns
}

/// True when the table has the column shape of a collection.
///
/// Used when counting collections against the database limit: foreign
/// tables in a shared keyspace must not count.
#[must_use]
pub fn is_collection_table(table: &TableMetadata) -> bool {
    BASE_COLUMNS.iter().all(|(name, type_name)| {
        table.column(name).is_some_and(|column| column.type_name == *type_name)
    })
}

/// `CREATE TABLE IF NOT EXISTS` for a collection.
#[must_use]
pub fn create_table_statement(namespace: &str, settings: &CollectionSettings) -> Statement {
    let mut columns: Vec<String> =
        BASE_COLUMNS.iter().map(|(name, type_name)| format!("{name} {type_name}")).collect();
    if settings.vector_enabled {
        columns.push(format!("{VECTOR_COLUMN} vector<float, {}>", settings.vector_size));
    }
    let mut cql = format!(
        "CREATE TABLE IF NOT EXISTS \"{namespace}\".\"{}\" ({}, PRIMARY KEY (key))",
        settings.name,
        columns.join(", "),
    );
    if let Some(comment) = &settings.comment {
        cql.push_str(&format!(" WITH comment = '{}'", comment.replace('\'', "''")));
    }
    Statement::new(cql, Vec::new())
}

/// The `CREATE CUSTOM INDEX` statements for a collection, in issue order.
///
/// Index names follow the `<table>_<column>` convention.
#[must_use]
pub fn create_index_statements(namespace: &str, settings: &CollectionSettings) -> Vec<Statement> {
    index_columns(settings.vector_enabled)
        .into_iter()
        .map(|column| {
            let table = &settings.name;
            let target = if ENTRY_INDEXED.contains(&column) {
                format!("entries({column})")
            } else {
                column.to_owned()
            };
            let mut cql = format!(
                "CREATE CUSTOM INDEX IF NOT EXISTS {table}_{column} ON \"{namespace}\".\"{table}\" ({target}) USING 'StorageAttachedIndex'",
            );
            if column == VECTOR_COLUMN {
                cql.push_str(&format!(
                    " WITH OPTIONS = {{ 'similarity_function': '{}' }}",
                    settings.similarity_function
                ));
            }
            Statement::new(cql, Vec::new())
        })
        .collect()
}

/// `DROP TABLE IF EXISTS` for a collection.
#[must_use]
pub fn drop_table_statement(namespace: &str, name: &str) -> Statement {
    Statement::new(format!("DROP TABLE IF EXISTS \"{namespace}\".\"{name}\""), Vec::new())
}
