//! The store execution seam.
//!
//! The engine never talks to a concrete driver; it builds parameterized
//! [`Statement`]s and hands them to a [`StoreExecutor`]. The production
//! implementation wraps a wide-column driver session; tests inject the
//! in-memory stub from [`crate::testing`].

mod session;

pub use session::{SessionCache, SessionFactory};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use uuid::Uuid;

use shale_core::{ApiError, ErrorCode, Result};

/// A typed statement parameter.
///
/// The variants mirror the column types of the collection schema.
#[derive(Debug, Clone, PartialEq)]
pub enum CqlValue {
    /// `text`
    Text(String),
    /// `tinyint`
    TinyInt(i8),
    /// `int`
    Int(i32),
    /// `bigint`
    BigInt(i64),
    /// `decimal`, kept in decimal text form
    Decimal(String),
    /// `boolean`
    Boolean(bool),
    /// `timestamp`, epoch milliseconds
    Timestamp(i64),
    /// `uuid` / `timeuuid`
    Uuid(Uuid),
    /// `tuple<...>`
    Tuple(Vec<CqlValue>),
    /// `vector<float, N>`
    Vector(Vec<f32>),
    /// `set<text>`
    SetText(Vec<String>),
    /// `map<text, tinyint>`
    MapTextTinyInt(Vec<(String, i8)>),
    /// `map<text, int>`
    MapTextInt(Vec<(String, i32)>),
    /// `map<text, decimal>`
    MapTextDecimal(Vec<(String, String)>),
    /// `map<text, text>`
    MapTextText(Vec<(String, String)>),
    /// `map<text, timestamp>`
    MapTextTimestamp(Vec<(String, i64)>),
    /// Absent value
    Null,
}

impl CqlValue {
    /// The text payload, if this is a `Text` value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The uuid payload, if this is a `Uuid` value.
    #[must_use]
    pub const fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    /// The count payload, if this is a `BigInt` value.
    #[must_use]
    pub const fn as_bigint(&self) -> Option<i64> {
        match self {
            Self::BigInt(n) => Some(*n),
            _ => None,
        }
    }
}

/// A parameterized statement: CQL text with `?` markers plus bound values.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// CQL text.
    pub cql: String,
    /// Bound parameters, in marker order.
    pub params: Vec<CqlValue>,
}

impl Statement {
    /// Build a statement.
    #[must_use]
    pub fn new(cql: impl Into<String>, params: Vec<CqlValue>) -> Self {
        Self { cql: cql.into(), params }
    }
}

/// Per-execution read options.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Server-side page size; `None` uses the store default.
    pub page_size: Option<usize>,
    /// Continuation token from a previous page.
    pub paging_state: Option<Vec<u8>>,
}

/// One row of a result page, keyed by column name.
#[derive(Debug, Clone, Default)]
pub struct Row {
    columns: BTreeMap<String, CqlValue>,
}

impl Row {
    /// Row from column/value pairs.
    #[must_use]
    pub fn from_columns(columns: impl IntoIterator<Item = (String, CqlValue)>) -> Self {
        Self { columns: columns.into_iter().collect() }
    }

    /// Raw column value.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&CqlValue> {
        self.columns.get(name)
    }

    /// Text column, or an internal error naming the column.
    pub fn text(&self, name: &str) -> Result<&str> {
        self.column(name).and_then(CqlValue::as_text).ok_or_else(|| missing_column(name))
    }

    /// Uuid column, or an internal error naming the column.
    pub fn uuid(&self, name: &str) -> Result<Uuid> {
        self.column(name).and_then(CqlValue::as_uuid).ok_or_else(|| missing_column(name))
    }

    /// Bigint column, or an internal error naming the column.
    pub fn bigint(&self, name: &str) -> Result<i64> {
        self.column(name).and_then(CqlValue::as_bigint).ok_or_else(|| missing_column(name))
    }
}

fn missing_column(name: &str) -> ApiError {
    ApiError::with_detail(ErrorCode::InternalServerError, format!("result row missing column '{name}'"))
}

/// An asynchronously fetched page of rows.
#[derive(Debug, Clone, Default)]
pub struct ResultPage {
    /// Rows in this page.
    pub rows: Vec<Row>,
    /// Continuation token when more rows remain.
    pub paging_state: Option<Vec<u8>>,
    /// Outcome of a conditional (CAS) statement; plain statements report
    /// `true`.
    pub was_applied: bool,
}

impl ResultPage {
    /// Empty applied page, the result of an unconditional write.
    #[must_use]
    pub fn applied() -> Self {
        Self { rows: Vec::new(), paging_state: None, was_applied: true }
    }

    /// Empty rejected page, the result of a failed CAS.
    #[must_use]
    pub fn not_applied() -> Self {
        Self { rows: Vec::new(), paging_state: None, was_applied: false }
    }

    /// Page of rows with an optional continuation.
    #[must_use]
    pub fn with_rows(rows: Vec<Row>, paging_state: Option<Vec<u8>>) -> Self {
        Self { rows, paging_state, was_applied: true }
    }
}

/// Column description from store metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    /// Column name.
    pub name: String,
    /// CQL type, e.g. `map<text, decimal>` or `vector<float, 1536>`.
    pub type_name: String,
}

/// Secondary index description from store metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMetadata {
    /// Index name, `<table>_<column>`.
    pub name: String,
    /// Indexed column.
    pub column: String,
    /// Index options, e.g. `similarity_function`.
    pub options: BTreeMap<String, String>,
}

/// Table description from store metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetadata {
    /// Table name.
    pub name: String,
    /// Columns, in schema order.
    pub columns: Vec<ColumnMetadata>,
    /// Secondary indexes.
    pub indexes: Vec<IndexMetadata>,
    /// Table comment, if any.
    pub comment: Option<String>,
}

impl TableMetadata {
    /// Look up a column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Look up the index on a column.
    #[must_use]
    pub fn index_on(&self, column: &str) -> Option<&IndexMetadata> {
        self.indexes.iter().find(|i| i.column == column)
    }
}

/// Keyspace description from store metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyspaceMetadata {
    /// Keyspace name.
    pub name: String,
    /// Tables in the keyspace.
    pub tables: Vec<TableMetadata>,
}

/// The store seam: runs parameterized statements, returns async pages.
///
/// Implementations are shared across requests and must be thread-safe. All
/// failures are mapped to the infrastructure error codes before they leave
/// the implementation.
#[async_trait]
pub trait StoreExecutor: Send + Sync {
    /// Execute a data statement.
    async fn execute(&self, statement: Statement, options: QueryOptions) -> Result<ResultPage>;

    /// Execute a DDL statement.
    async fn execute_schema_change(&self, statement: Statement) -> Result<ResultPage>;

    /// Snapshot of all keyspaces and their tables.
    async fn keyspaces(&self) -> Result<Vec<KeyspaceMetadata>>;
}

/// [`StoreExecutor`] front with a bounded inflight limit.
///
/// Statement execution first acquires an inflight permit, waiting up to the
/// configured bound; overflow surfaces `SERVER_BUSY` without touching the
/// store.
#[derive(Clone)]
pub struct QueryExecutor {
    store: Arc<dyn StoreExecutor>,
    inflight: Arc<Semaphore>,
    queue_wait: Duration,
}

impl QueryExecutor {
    /// Wrap a store with the given inflight bound and queue wait.
    #[must_use]
    pub fn new(store: Arc<dyn StoreExecutor>, max_inflight: usize, queue_wait: Duration) -> Self {
        Self { store, inflight: Arc::new(Semaphore::new(max_inflight)), queue_wait }
    }

    /// Execute a data statement under the inflight bound.
    pub async fn execute(&self, statement: Statement, options: QueryOptions) -> Result<ResultPage> {
        let _permit = self.acquire().await?;
        self.store.execute(statement, options).await
    }

    /// Execute a DDL statement under the inflight bound.
    pub async fn execute_schema_change(&self, statement: Statement) -> Result<ResultPage> {
        let _permit = self.acquire().await?;
        self.store.execute_schema_change(statement).await
    }

    /// Fetch store metadata.
    pub async fn keyspaces(&self) -> Result<Vec<KeyspaceMetadata>> {
        self.store.keyspaces().await
    }

    async fn acquire(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
        match tokio::time::timeout(self.queue_wait, self.inflight.acquire()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_closed)) => Err(ApiError::new(ErrorCode::InternalServerError)),
            Err(_elapsed) => Err(ApiError::new(ErrorCode::ServerBusy)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BlockingStore;

    #[async_trait]
    impl StoreExecutor for BlockingStore {
        async fn execute(&self, _: Statement, _: QueryOptions) -> Result<ResultPage> {
            // Park long enough to keep the permit held across the test.
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ResultPage::applied())
        }

        async fn execute_schema_change(&self, _: Statement) -> Result<ResultPage> {
            Ok(ResultPage::applied())
        }

        async fn keyspaces(&self) -> Result<Vec<KeyspaceMetadata>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn queue_overflow_is_server_busy() {
        let executor =
            QueryExecutor::new(Arc::new(BlockingStore), 1, Duration::from_millis(10));
        let busy = executor.clone();
        let hold = tokio::spawn(async move {
            let _ = busy.execute(Statement::new("SELECT", Vec::new()), QueryOptions::default()).await;
        });
        // Give the first statement time to take the only permit.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = executor
            .execute(Statement::new("SELECT", Vec::new()), QueryOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ServerBusy);
        hold.abort();
    }

    #[test]
    fn row_accessors() {
        let row = Row::from_columns([
            ("doc_json".to_owned(), CqlValue::Text("{}".to_owned())),
            ("count".to_owned(), CqlValue::BigInt(3)),
        ]);
        assert_eq!(row.text("doc_json").unwrap(), "{}");
        assert_eq!(row.bigint("count").unwrap(), 3);
        assert_eq!(row.uuid("tx_id").unwrap_err().code, ErrorCode::InternalServerError);
    }
}
