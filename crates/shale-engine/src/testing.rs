//! In-memory store stub.
//!
//! Implements [`StoreExecutor`] over process memory by interpreting the
//! statement shapes the operations build. This is the injection seam the
//! pipeline is tested through; it models the store contract the engine
//! relies on: CAS conditions, per-statement LIMIT, offset-style paging and
//! ANN ordering.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use shale_core::{ApiError, ErrorCode, Result};

use crate::executor::{
    CqlValue, IndexMetadata, KeyspaceMetadata, QueryOptions, ResultPage, Row, Statement,
    StoreExecutor, TableMetadata,
};
use crate::schema::{collection_columns, CollectionSettings, SimilarityFunction, VECTOR_COLUMN};

#[derive(Debug, Clone)]
struct StoredRow {
    columns: HashMap<String, CqlValue>,
}

impl StoredRow {
    fn tx_id(&self) -> Option<Uuid> {
        self.columns.get("tx_id").and_then(CqlValue::as_uuid)
    }
}

#[derive(Debug)]
struct TableState {
    settings: CollectionSettings,
    indexes: Vec<IndexMetadata>,
    rows: HashMap<String, StoredRow>,
}

#[derive(Debug, Default)]
struct StoreState {
    keyspaces: HashMap<String, HashMap<String, TableState>>,
}

/// An in-memory [`StoreExecutor`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty store with the given namespaces pre-created, as an `Arc`
    /// ready for a session factory.
    #[must_use]
    pub fn with_namespaces(namespaces: &[&str]) -> Arc<Self> {
        let store = Self::new();
        for namespace in namespaces {
            store.create_namespace(namespace);
        }
        Arc::new(store)
    }

    /// Create a namespace (keyspace).
    pub fn create_namespace(&self, name: &str) {
        self.state.lock().keyspaces.entry(name.to_owned()).or_default();
    }

    /// Number of rows in a table, for assertions.
    #[must_use]
    pub fn row_count(&self, namespace: &str, table: &str) -> usize {
        self.state
            .lock()
            .keyspaces
            .get(namespace)
            .and_then(|tables| tables.get(table))
            .map_or(0, |table| table.rows.len())
    }
}

#[async_trait]
impl StoreExecutor for InMemoryStore {
    async fn execute(&self, statement: Statement, options: QueryOptions) -> Result<ResultPage> {
        let mut state = self.state.lock();
        if statement.cql.starts_with("INSERT INTO ") {
            execute_insert(&mut state, &statement)
        } else if statement.cql.starts_with("SELECT ") {
            execute_select(&mut state, &statement, &options)
        } else if statement.cql.starts_with("UPDATE ") {
            execute_update(&mut state, &statement)
        } else if statement.cql.starts_with("DELETE FROM ") {
            execute_delete(&mut state, &statement)
        } else {
            Err(internal(format!("unsupported statement: {}", statement.cql)))
        }
    }

    async fn execute_schema_change(&self, statement: Statement) -> Result<ResultPage> {
        let mut state = self.state.lock();
        if statement.cql.starts_with("CREATE TABLE IF NOT EXISTS ") {
            execute_create_table(&mut state, &statement.cql)
        } else if statement.cql.starts_with("CREATE CUSTOM INDEX IF NOT EXISTS ") {
            execute_create_index(&mut state, &statement.cql)
        } else if statement.cql.starts_with("DROP TABLE IF EXISTS ") {
            execute_drop_table(&mut state, &statement.cql)
        } else {
            Err(internal(format!("unsupported DDL: {}", statement.cql)))
        }
    }

    async fn keyspaces(&self) -> Result<Vec<KeyspaceMetadata>> {
        let state = self.state.lock();
        let mut keyspaces: Vec<KeyspaceMetadata> = state
            .keyspaces
            .iter()
            .map(|(name, tables)| KeyspaceMetadata {
                name: name.clone(),
                tables: tables
                    .iter()
                    .map(|(table_name, table)| TableMetadata {
                        name: table_name.clone(),
                        columns: collection_columns(&table.settings),
                        indexes: table.indexes.clone(),
                        comment: table.settings.comment.clone(),
                    })
                    .collect(),
            })
            .collect();
        keyspaces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(keyspaces)
    }
}

fn internal(message: String) -> ApiError {
    ApiError::with_detail(ErrorCode::InternalServerError, message)
}

/// `"ks"."table"` → `(ks, table)`.
fn parse_table_ref(cql: &str) -> Result<(String, String)> {
    let mut parts = cql.split('"');
    let _ = parts.next();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(keyspace), Some(_dot), Some(table)) => {
            Ok((keyspace.to_owned(), table.to_owned()))
        }
        _ => Err(internal(format!("malformed table reference in: {cql}"))),
    }
}

fn execute_create_table(state: &mut StoreState, cql: &str) -> Result<ResultPage> {
    let (keyspace, table) = parse_table_ref(cql)?;
    let tables = state
        .keyspaces
        .get_mut(&keyspace)
        .ok_or_else(|| internal(format!("keyspace '{keyspace}' does not exist")))?;

    let vector_size = cql
        .split_once("vector<float, ")
        .and_then(|(_, rest)| rest.split_once('>'))
        .and_then(|(size, _)| size.trim().parse::<u32>().ok());
    let comment = cql
        .split_once(" WITH comment = '")
        .and_then(|(_, rest)| rest.rsplit_once('\''))
        .map(|(comment, _)| comment.replace("''", "'"));

    tables.entry(table.clone()).or_insert_with(|| {
        let settings = match vector_size {
            Some(size) => CollectionSettings::with_vector(
                table.clone(),
                size,
                SimilarityFunction::default(),
                comment,
            ),
            None => CollectionSettings::without_vector(table.clone(), comment),
        };
        TableState { settings, indexes: Vec::new(), rows: HashMap::new() }
    });
    Ok(ResultPage::applied())
}

fn execute_create_index(state: &mut StoreState, cql: &str) -> Result<ResultPage> {
    let (keyspace, table_name) = parse_table_ref(cql)?;
    let name = cql
        .strip_prefix("CREATE CUSTOM INDEX IF NOT EXISTS ")
        .and_then(|rest| rest.split_whitespace().next())
        .ok_or_else(|| internal(format!("malformed index DDL: {cql}")))?;
    let column = cql
        .split_once('(')
        .and_then(|(_, rest)| rest.split_once(')'))
        .map(|(target, _)| target.trim_start_matches("entries(").trim_end_matches(')'))
        .ok_or_else(|| internal(format!("malformed index target: {cql}")))?;
    let similarity = cql
        .split_once("'similarity_function': '")
        .and_then(|(_, rest)| rest.split_once('\''))
        .map(|(function, _)| function.to_owned());

    let table = state
        .keyspaces
        .get_mut(&keyspace)
        .and_then(|tables| tables.get_mut(&table_name))
        .ok_or_else(|| internal(format!("table '{table_name}' does not exist")))?;
    if table.indexes.iter().any(|index| index.name == name) {
        return Ok(ResultPage::applied());
    }
    let mut options = std::collections::BTreeMap::new();
    if let Some(similarity) = &similarity {
        options.insert("similarity_function".to_owned(), similarity.clone());
        if let Ok(function) = SimilarityFunction::parse(similarity) {
            table.settings.similarity_function = function;
        }
    }
    table.indexes.push(IndexMetadata {
        name: name.to_owned(),
        column: column.to_owned(),
        options,
    });
    Ok(ResultPage::applied())
}

fn execute_drop_table(state: &mut StoreState, cql: &str) -> Result<ResultPage> {
    let (keyspace, table) = parse_table_ref(cql)?;
    if let Some(tables) = state.keyspaces.get_mut(&keyspace) {
        tables.remove(&table);
    }
    Ok(ResultPage::applied())
}

/// Canonical map key for a `key` tuple.
fn key_text(value: &CqlValue) -> Result<String> {
    match value {
        CqlValue::Tuple(parts) => {
            let mut rendered = String::new();
            for part in parts {
                match part {
                    CqlValue::TinyInt(tag) => rendered.push_str(&format!("{tag}:")),
                    CqlValue::Text(text) => rendered.push_str(text),
                    other => return Err(internal(format!("unexpected key part: {other:?}"))),
                }
            }
            Ok(rendered)
        }
        other => Err(internal(format!("key must be a tuple, got {other:?}"))),
    }
}

fn table_mut<'a>(state: &'a mut StoreState, cql: &str) -> Result<&'a mut TableState> {
    let (keyspace, table) = parse_table_ref(cql)?;
    state
        .keyspaces
        .get_mut(&keyspace)
        .and_then(|tables| tables.get_mut(&table))
        .ok_or_else(|| {
            ApiError::with_detail(
                ErrorCode::CollectionNotExist,
                format!("collection '{table}' does not exist"),
            )
        })
}

fn execute_insert(state: &mut StoreState, statement: &Statement) -> Result<ResultPage> {
    let columns: Vec<&str> = statement
        .cql
        .split_once('(')
        .and_then(|(_, rest)| rest.split_once(')'))
        .map(|(list, _)| list.split(", ").collect())
        .ok_or_else(|| internal(format!("malformed insert: {}", statement.cql)))?;
    if columns.len() != statement.params.len() {
        return Err(internal("insert column/parameter arity mismatch".to_owned()));
    }

    let table = table_mut(state, &statement.cql)?;
    let row = StoredRow {
        columns: columns
            .iter()
            .map(|c| (*c).to_owned())
            .zip(statement.params.iter().cloned())
            .collect(),
    };
    let key = key_text(
        row.columns.get("key").ok_or_else(|| internal("insert missing key".to_owned()))?,
    )?;
    if table.rows.contains_key(&key) {
        return Ok(ResultPage::not_applied());
    }
    table.rows.insert(key, row);
    Ok(ResultPage::applied())
}

/// One parsed WHERE condition.
enum Condition {
    KeyEquals(String),
    KeyIn(Vec<String>),
    MapCompare { column: String, op: String, entry_key: String, value: CqlValue },
    SetContains { column: String, value: String },
}

impl Condition {
    fn matches(&self, key: &str, row: &StoredRow) -> bool {
        match self {
            Self::KeyEquals(expected) => key == expected,
            Self::KeyIn(expected) => expected.iter().any(|candidate| candidate == key),
            Self::MapCompare { column, op, entry_key, value } => row
                .columns
                .get(column)
                .and_then(|stored| map_lookup(stored, entry_key))
                .is_some_and(|stored| compare_cql(&stored, value, op)),
            Self::SetContains { column, value } => matches!(
                row.columns.get(column),
                Some(CqlValue::SetText(entries)) if entries.contains(value)
            ),
        }
    }
}

fn map_lookup(stored: &CqlValue, entry_key: &str) -> Option<CqlValue> {
    match stored {
        CqlValue::MapTextTinyInt(entries) => entries
            .iter()
            .find(|(k, _)| k == entry_key)
            .map(|(_, v)| CqlValue::TinyInt(*v)),
        CqlValue::MapTextInt(entries) => {
            entries.iter().find(|(k, _)| k == entry_key).map(|(_, v)| CqlValue::Int(*v))
        }
        CqlValue::MapTextDecimal(entries) => entries
            .iter()
            .find(|(k, _)| k == entry_key)
            .map(|(_, v)| CqlValue::Decimal(v.clone())),
        CqlValue::MapTextText(entries) => entries
            .iter()
            .find(|(k, _)| k == entry_key)
            .map(|(_, v)| CqlValue::Text(v.clone())),
        CqlValue::MapTextTimestamp(entries) => entries
            .iter()
            .find(|(k, _)| k == entry_key)
            .map(|(_, v)| CqlValue::Timestamp(*v)),
        _ => None,
    }
}

fn compare_cql(stored: &CqlValue, expected: &CqlValue, op: &str) -> bool {
    let ordering = match (stored, expected) {
        (CqlValue::Text(a), CqlValue::Text(b)) => a.partial_cmp(b),
        (CqlValue::TinyInt(a), CqlValue::TinyInt(b)) => a.partial_cmp(b),
        (CqlValue::Int(a), CqlValue::Int(b)) => a.partial_cmp(b),
        (CqlValue::Timestamp(a), CqlValue::Timestamp(b)) => a.partial_cmp(b),
        (CqlValue::Decimal(a), CqlValue::Decimal(b)) => {
            match (a.parse::<f64>(), b.parse::<f64>()) {
                (Ok(a), Ok(b)) => a.partial_cmp(&b),
                _ => None,
            }
        }
        _ => None,
    };
    let Some(ordering) = ordering else { return false };
    match op {
        "=" => ordering.is_eq(),
        "<" => ordering.is_lt(),
        "<=" => ordering.is_le(),
        ">" => ordering.is_gt(),
        ">=" => ordering.is_ge(),
        _ => false,
    }
}

/// Parse the WHERE clause, consuming parameters in marker order.
fn parse_conditions(
    cql: &str,
    params: &mut std::vec::IntoIter<CqlValue>,
) -> Result<Vec<Condition>> {
    let Some((_, after_where)) = cql.split_once(" WHERE ") else { return Ok(Vec::new()) };
    let where_text = after_where
        .split(" ORDER BY ")
        .next()
        .and_then(|text| text.split(" LIMIT ").next())
        .and_then(|text| text.split(" IF ").next())
        .unwrap_or_default();

    let mut conditions = Vec::new();
    for condition in where_text.split(" AND ") {
        let condition = condition.trim();
        if condition == "key = ?" {
            let key = params.next().ok_or_else(|| internal("missing key param".to_owned()))?;
            conditions.push(Condition::KeyEquals(key_text(&key)?));
        } else if condition.starts_with("key IN (") {
            let count = condition.matches('?').count();
            let mut keys = Vec::with_capacity(count);
            for _ in 0..count {
                let key =
                    params.next().ok_or_else(|| internal("missing key param".to_owned()))?;
                keys.push(key_text(&key)?);
            }
            conditions.push(Condition::KeyIn(keys));
        } else if let Some((column, rest)) = condition.split_once("[?] ") {
            let op = rest.trim_end_matches(" ?").to_owned();
            let entry_key = params
                .next()
                .and_then(|v| v.as_text().map(ToOwned::to_owned))
                .ok_or_else(|| internal("missing map key param".to_owned()))?;
            let value =
                params.next().ok_or_else(|| internal("missing map value param".to_owned()))?;
            conditions.push(Condition::MapCompare {
                column: column.to_owned(),
                op,
                entry_key,
                value,
            });
        } else if let Some((column, _)) = condition.split_once(" CONTAINS ?") {
            let value = params
                .next()
                .and_then(|v| v.as_text().map(ToOwned::to_owned))
                .ok_or_else(|| internal("missing contains param".to_owned()))?;
            conditions.push(Condition::SetContains { column: column.to_owned(), value });
        } else {
            return Err(internal(format!("unsupported condition: {condition}")));
        }
    }
    Ok(conditions)
}

fn execute_select(
    state: &mut StoreState,
    statement: &Statement,
    options: &QueryOptions,
) -> Result<ResultPage> {
    let counting = statement.cql.starts_with("SELECT COUNT(*)");
    let mut params = statement.params.clone().into_iter();
    let conditions = parse_conditions(&statement.cql, &mut params)?;
    let ann_vector = if statement.cql.contains(" ORDER BY query_vector_value ANN OF ?") {
        match params.next() {
            Some(CqlValue::Vector(vector)) => Some(vector),
            _ => return Err(internal("missing ANN vector param".to_owned())),
        }
    } else {
        None
    };
    let limit = if statement.cql.contains(" LIMIT ?") {
        match params.next() {
            Some(CqlValue::Int(limit)) => limit as usize,
            _ => return Err(internal("missing limit param".to_owned())),
        }
    } else {
        usize::MAX
    };

    let table = table_mut(state, &statement.cql)?;
    let mut matching: Vec<(&String, &StoredRow)> = table
        .rows
        .iter()
        .filter(|(key, row)| conditions.iter().all(|c| c.matches(key, row)))
        .collect();
    // Deterministic base order; ANN re-orders by similarity.
    matching.sort_by(|a, b| a.0.cmp(b.0));
    if let Some(query) = &ann_vector {
        matching.sort_by(|a, b| {
            let sa = similarity(a.1, query);
            let sb = similarity(b.1, query);
            sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    if counting {
        let count = matching.len().min(limit) as i64;
        let row = Row::from_columns([("count".to_owned(), CqlValue::BigInt(count))]);
        return Ok(ResultPage::with_rows(vec![row], None));
    }

    // Paging: the token is a row offset; LIMIT and page size both apply to
    // the window starting at the token.
    let offset = match options.paging_state.as_deref() {
        Some(bytes) => {
            let bytes: [u8; 8] =
                bytes.try_into().map_err(|_| internal("malformed paging state".to_owned()))?;
            u64::from_be_bytes(bytes) as usize
        }
        None => 0,
    };
    let window = matching.len().saturating_sub(offset);
    let emit_count = window.min(limit).min(options.page_size.unwrap_or(usize::MAX));
    let emit: Vec<Row> = matching
        .iter()
        .skip(offset)
        .take(emit_count)
        .map(|(_, row)| {
            Row::from_columns([
                (
                    "doc_json".to_owned(),
                    row.columns.get("doc_json").cloned().unwrap_or(CqlValue::Null),
                ),
                (
                    "tx_id".to_owned(),
                    row.columns.get("tx_id").cloned().unwrap_or(CqlValue::Null),
                ),
            ])
        })
        .collect();
    let next_offset = offset + emit.len();
    let paging_state = (!emit.is_empty() && next_offset < matching.len())
        .then(|| (next_offset as u64).to_be_bytes().to_vec());
    Ok(ResultPage::with_rows(emit, paging_state))
}

fn similarity(row: &StoredRow, query: &[f32]) -> f32 {
    match row.columns.get(VECTOR_COLUMN) {
        Some(CqlValue::Vector(stored)) => stored
            .iter()
            .zip(query)
            .map(|(a, b)| a * b)
            .sum(),
        _ => f32::MIN,
    }
}

fn execute_update(state: &mut StoreState, statement: &Statement) -> Result<ResultPage> {
    let assignments: Vec<&str> = statement
        .cql
        .split_once(" SET ")
        .and_then(|(_, rest)| rest.split_once(" WHERE "))
        .map(|(list, _)| list.split(", ").collect())
        .ok_or_else(|| internal(format!("malformed update: {}", statement.cql)))?;
    // Params: one per assignment, then key, then expected tx_id.
    if statement.params.len() != assignments.len() + 2 {
        return Err(internal("update parameter arity mismatch".to_owned()));
    }
    let key = key_text(&statement.params[assignments.len()])?;
    let expected_tx = statement.params[assignments.len() + 1]
        .as_uuid()
        .ok_or_else(|| internal("expected tx_id must be a uuid".to_owned()))?;

    let table = table_mut(state, &statement.cql)?;
    let Some(row) = table.rows.get_mut(&key) else { return Ok(ResultPage::not_applied()) };
    if row.tx_id() != Some(expected_tx) {
        return Ok(ResultPage::not_applied());
    }
    for (assignment, value) in assignments.iter().zip(statement.params.iter()) {
        let column = assignment.trim_end_matches(" = ?");
        row.columns.insert(column.to_owned(), value.clone());
    }
    Ok(ResultPage::applied())
}

fn execute_delete(state: &mut StoreState, statement: &Statement) -> Result<ResultPage> {
    if statement.params.len() != 2 {
        return Err(internal("delete parameter arity mismatch".to_owned()));
    }
    let key = key_text(&statement.params[0])?;
    let expected_tx = statement.params[1]
        .as_uuid()
        .ok_or_else(|| internal("expected tx_id must be a uuid".to_owned()))?;

    let table = table_mut(state, &statement.cql)?;
    let matches = table
        .rows
        .get(&key)
        .is_some_and(|row| row.tx_id() == Some(expected_tx));
    if !matches {
        return Ok(ResultPage::not_applied());
    }
    table.rows.remove(&key);
    Ok(ResultPage::applied())
}
