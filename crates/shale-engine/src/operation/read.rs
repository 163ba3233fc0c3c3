//! Read operations: `find`, `findOne` and `countDocuments`.

use std::cmp::Ordering;

use base64::Engine as _;
use serde_json::Value;
use uuid::Uuid;

use shale_core::{ApiError, ErrorCode, Result};

use crate::command::clause::SortExpression;
use crate::command::CommandContext;
use crate::executor::{CqlValue, QueryOptions, Statement};
use crate::filter::{matches_all, split_conditions, DbFilter};
use crate::result::CommandResult;

use super::{required_collection, table_ref, ExecutionContext};

/// Upper bound on documents pulled in for an in-memory sort.
const MAX_SORTED_READ: usize = 100;

/// Row scan bound when post-read predicates are in play; the statement's
/// LIMIT must not cut rows the post-read pass has not examined.
const POST_READ_SCAN_LIMIT: usize = 10_000;

/// A document read back from the store.
#[derive(Debug, Clone)]
pub(crate) struct ReadDocument {
    /// Materialized `doc_json`.
    pub document: Value,
    /// Concurrency token the document was read at.
    pub tx_id: Uuid,
}

/// Documents plus an opaque continuation.
#[derive(Debug, Default)]
pub(crate) struct ReadOutcome {
    pub docs: Vec<ReadDocument>,
    pub next_page_state: Option<String>,
}

/// `find` / `findOne`.
#[derive(Debug)]
pub struct FindOperation {
    /// Target context.
    pub context: CommandContext,
    /// Resolved predicates.
    pub filters: Vec<DbFilter>,
    /// Post-read field sort, if any.
    pub sort: Option<Vec<SortExpression>>,
    /// ANN query vector, if any.
    pub vector: Option<Vec<f32>>,
    /// Maximum documents to return.
    pub limit: usize,
    /// Continuation token from a previous page.
    pub paging_state: Option<String>,
    /// True for `findOne`: a single document, no continuation.
    pub single: bool,
}

impl FindOperation {
    /// Execute the read.
    pub async fn execute(&self, ctx: &ExecutionContext<'_>) -> Result<CommandResult> {
        let collection = required_collection(&self.context)?;
        if let Some(vector) = &self.vector {
            check_vector_enabled(ctx, &self.context, collection, vector.len()).await?;
        }

        let limit = self.limit.min(ctx.config.operations.max_documents_per_page).max(1);
        let outcome = if let Some(sort) = &self.sort {
            read_sorted(ctx, &self.context, collection, &self.filters, sort, limit).await?
        } else {
            read_documents(
                ctx,
                &self.context,
                collection,
                &self.filters,
                self.vector.as_deref(),
                limit,
                self.paging_state.clone(),
            )
            .await?
        };

        let docs: Vec<Value> = outcome.docs.into_iter().map(|doc| doc.document).collect();
        let next_page_state = if self.single { None } else { outcome.next_page_state };
        Ok(CommandResult::with_docs(docs, next_page_state))
    }
}

/// `countDocuments`.
#[derive(Debug)]
pub struct CountOperation {
    /// Target context.
    pub context: CommandContext,
    /// Resolved predicates.
    pub filters: Vec<DbFilter>,
}

impl CountOperation {
    /// Execute the count.
    pub async fn execute(&self, ctx: &ExecutionContext<'_>) -> Result<CommandResult> {
        let collection = required_collection(&self.context)?;
        let (conditions, post_read) = split_conditions(&self.filters);

        let count = if post_read {
            // Predicates without a pushdown form force a counting read.
            let mut count = 0_i64;
            let mut paging_state = None;
            loop {
                let outcome = read_documents(
                    ctx,
                    &self.context,
                    collection,
                    &self.filters,
                    None,
                    ctx.config.operations.max_documents_per_page,
                    paging_state,
                )
                .await?;
                count += outcome.docs.len() as i64;
                match outcome.next_page_state {
                    Some(state) => paging_state = Some(state),
                    None => break,
                }
            }
            count
        } else {
            let statement = build_count(&self.context, collection, conditions);
            let page = ctx.executor.execute(statement, QueryOptions::default()).await?;
            page.rows
                .first()
                .ok_or_else(|| ApiError::new(ErrorCode::InternalServerError))?
                .bigint("count")?
        };

        Ok(CommandResult::with_status([("count", Value::from(count))]))
    }
}

/// Read up to `limit` matching documents, resuming from a continuation.
pub(crate) async fn read_documents(
    ctx: &ExecutionContext<'_>,
    context: &CommandContext,
    collection: &str,
    filters: &[DbFilter],
    vector: Option<&[f32]>,
    limit: usize,
    paging_state: Option<String>,
) -> Result<ReadOutcome> {
    let (conditions, post_read) = split_conditions(filters);
    let page_cap = ctx.config.operations.max_documents_per_page;
    let scan_limit = if post_read { POST_READ_SCAN_LIMIT } else { limit };

    let mut docs = Vec::new();
    let mut state = decode_paging_state(paging_state.as_deref())?;
    loop {
        let statement = build_select(context, collection, conditions.clone(), vector, scan_limit);
        let options = QueryOptions { page_size: Some(page_cap), paging_state: state.clone() };
        let page = ctx.executor.execute(statement, options).await?;

        for row in &page.rows {
            let document: Value = serde_json::from_str(row.text("doc_json")?).map_err(|err| {
                ApiError::with_detail(
                    ErrorCode::InternalServerError,
                    format!("stored document is not valid JSON: {err}"),
                )
            })?;
            if post_read && !matches_all(filters, &document) {
                continue;
            }
            docs.push(ReadDocument { document, tx_id: row.uuid("tx_id")? });
            if docs.len() == limit {
                return Ok(ReadOutcome {
                    docs,
                    next_page_state: page.paging_state.as_deref().map(encode_paging_state),
                });
            }
        }
        match page.paging_state {
            Some(next) => state = Some(next),
            None => return Ok(ReadOutcome { docs, next_page_state: None }),
        }
    }
}

/// Read for an in-memory field sort: pull a bounded set, order, truncate.
async fn read_sorted(
    ctx: &ExecutionContext<'_>,
    context: &CommandContext,
    collection: &str,
    filters: &[DbFilter],
    sort: &[SortExpression],
    limit: usize,
) -> Result<ReadOutcome> {
    let mut outcome =
        read_documents(ctx, context, collection, filters, None, MAX_SORTED_READ, None).await?;
    outcome.docs.sort_by(|a, b| compare_documents(&a.document, &b.document, sort));
    outcome.docs.truncate(limit);
    outcome.next_page_state = None;
    Ok(outcome)
}

/// Sort-order comparison over materialized documents.
pub(crate) fn compare_documents(a: &Value, b: &Value, sort: &[SortExpression]) -> Ordering {
    for expression in sort {
        let left = expression.path.find_value(a);
        let right = expression.path.find_value(b);
        let ordering = compare_values(left, right);
        if ordering != Ordering::Equal {
            return if expression.ascending { ordering } else { ordering.reverse() };
        }
    }
    Ordering::Equal
}

/// Total order over optional JSON values: missing, then null, then by type
/// (number, string, boolean, array, object), then by value.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(Value::Bool(_)) => 4,
            Some(Value::Array(_)) => 5,
            Some(Value::Object(_)) => 6,
        }
    }
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (x, y) if rank(x) == rank(y) => {
            // Structured values order by canonical text.
            let x = x.map(shale_core::shred::canonical_json).unwrap_or_default();
            let y = y.map(shale_core::shred::canonical_json).unwrap_or_default();
            x.cmp(&y)
        }
        (x, y) => rank(x).cmp(&rank(y)),
    }
}

fn build_select(
    context: &CommandContext,
    collection: &str,
    conditions: Vec<(String, Vec<CqlValue>)>,
    vector: Option<&[f32]>,
    limit: usize,
) -> Statement {
    let mut cql = format!(
        "SELECT doc_json, tx_id FROM {}",
        table_ref(&context.namespace, collection)
    );
    let mut params = Vec::new();
    append_where(&mut cql, &mut params, conditions);
    if let Some(vector) = vector {
        cql.push_str(" ORDER BY query_vector_value ANN OF ?");
        params.push(CqlValue::Vector(vector.to_vec()));
    }
    cql.push_str(" LIMIT ?");
    params.push(CqlValue::Int(limit as i32));
    Statement::new(cql, params)
}

fn build_count(
    context: &CommandContext,
    collection: &str,
    conditions: Vec<(String, Vec<CqlValue>)>,
) -> Statement {
    let mut cql = format!(
        "SELECT COUNT(*) AS count FROM {}",
        table_ref(&context.namespace, collection)
    );
    let mut params = Vec::new();
    append_where(&mut cql, &mut params, conditions);
    Statement::new(cql, params)
}

pub(crate) fn append_where(
    cql: &mut String,
    params: &mut Vec<CqlValue>,
    conditions: Vec<(String, Vec<CqlValue>)>,
) {
    for (i, (condition, values)) in conditions.into_iter().enumerate() {
        cql.push_str(if i == 0 { " WHERE " } else { " AND " });
        cql.push_str(&condition);
        params.extend(values);
    }
}

async fn check_vector_enabled(
    ctx: &ExecutionContext<'_>,
    context: &CommandContext,
    collection: &str,
    dimension: usize,
) -> Result<()> {
    let settings = ctx
        .schema_cache
        .settings(ctx.executor, context.tenant.as_deref(), &context.namespace, collection)
        .await?
        .ok_or_else(|| {
            ApiError::with_detail(
                ErrorCode::CollectionNotExist,
                format!("collection '{collection}' does not exist"),
            )
        })?;
    if !settings.vector_enabled {
        return Err(ApiError::with_detail(
            ErrorCode::UnsupportedFilterOperation,
            format!("vector search is not enabled for collection '{collection}'"),
        ));
    }
    if settings.vector_size as usize != dimension {
        return Err(ApiError::with_detail(
            ErrorCode::UnsupportedFilterDataType,
            format!(
                "query vector dimension {dimension} does not match collection dimension {}",
                settings.vector_size
            ),
        ));
    }
    Ok(())
}

fn encode_paging_state(raw: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(raw)
}

fn decode_paging_state(token: Option<&str>) -> Result<Option<Vec<u8>>> {
    token
        .map(|token| {
            base64::engine::general_purpose::STANDARD.decode(token).map_err(|_| {
                ApiError::with_detail(
                    ErrorCode::UnsupportedFilterDataType,
                    "malformed paging state",
                )
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use shale_core::DotPath;

    use super::*;

    fn sort(specs: &[(&str, bool)]) -> Vec<SortExpression> {
        specs
            .iter()
            .map(|(path, ascending)| SortExpression {
                path: DotPath::parse(path).unwrap(),
                ascending: *ascending,
            })
            .collect()
    }

    #[test]
    fn select_statement_shape() {
        let context = CommandContext::for_collection("ns", "docs");
        let statement = build_select(
            &context,
            "docs",
            vec![("query_text_values[?] = ?".to_owned(), vec![
                CqlValue::Text("name".into()),
                CqlValue::Text("Bob".into()),
            ])],
            None,
            10,
        );
        assert_eq!(
            statement.cql,
            "SELECT doc_json, tx_id FROM \"ns\".\"docs\" WHERE query_text_values[?] = ? LIMIT ?"
        );
        assert_eq!(statement.params.len(), 3);
    }

    #[test]
    fn ann_select_appends_order_by() {
        let context = CommandContext::for_collection("ns", "docs");
        let statement = build_select(&context, "docs", Vec::new(), Some(&[0.1, 0.2]), 5);
        assert_eq!(
            statement.cql,
            "SELECT doc_json, tx_id FROM \"ns\".\"docs\" ORDER BY query_vector_value ANN OF ? LIMIT ?"
        );
    }

    #[test]
    fn count_statement_shape() {
        let context = CommandContext::for_collection("ns", "docs");
        let statement = build_count(&context, "docs", Vec::new());
        assert_eq!(statement.cql, "SELECT COUNT(*) AS count FROM \"ns\".\"docs\"");
    }

    #[test]
    fn document_comparison_orders_fields() {
        let a = json!({"age": 30, "name": "Ann"});
        let b = json!({"age": 25, "name": "Bob"});
        assert_eq!(compare_documents(&a, &b, &sort(&[("age", true)])), Ordering::Greater);
        assert_eq!(compare_documents(&a, &b, &sort(&[("age", false)])), Ordering::Less);
        assert_eq!(
            compare_documents(&a, &b, &sort(&[("missing", true), ("name", true)])),
            Ordering::Less
        );
    }

    #[test]
    fn missing_sorts_before_null_and_values() {
        let missing = json!({});
        let null = json!({"v": null});
        let number = json!({"v": 1});
        let order = sort(&[("v", true)]);
        assert_eq!(compare_documents(&missing, &null, &order), Ordering::Less);
        assert_eq!(compare_documents(&null, &number, &order), Ordering::Less);
    }

    #[test]
    fn paging_state_round_trips() {
        let encoded = encode_paging_state(b"cursor");
        let decoded = decode_paging_state(Some(&encoded)).unwrap();
        assert_eq!(decoded.as_deref(), Some(b"cursor".as_slice()));
        assert!(decode_paging_state(Some("@@@")).is_err());
    }
}
