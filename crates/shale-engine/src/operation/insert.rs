//! `insertOne` / `insertMany`.

use serde_json::Value;
use tracing::debug;

use shale_core::{ApiError, ErrorCode, Result, WritableShreddedDocument};

use crate::command::CommandContext;
use crate::executor::{CqlValue, QueryOptions, Statement};
use crate::result::{CommandError, CommandResult};

use super::{
    index_write_params, key_tuple, required_collection, table_ref, ExecutionContext,
    INDEX_WRITE_COLUMNS,
};

/// Insert of one or more pre-shredded documents.
#[derive(Debug)]
pub struct InsertOperation {
    /// Target context.
    pub context: CommandContext,
    /// Shredded documents, in request order.
    pub documents: Vec<WritableShreddedDocument>,
    /// Ordered inserts stop at the first failure.
    pub ordered: bool,
}

impl InsertOperation {
    /// Execute the inserts, one CAS statement per document.
    pub async fn execute(&self, ctx: &ExecutionContext<'_>) -> Result<CommandResult> {
        let collection = required_collection(&self.context)?;
        debug!(
            namespace = %self.context.namespace,
            collection,
            documents = self.documents.len(),
            "executing insert"
        );

        let mut inserted_ids = Vec::new();
        let mut errors = Vec::new();
        for document in &self.documents {
            let statement = build_insert(&self.context, collection, document);
            let outcome = ctx.executor.execute(statement, QueryOptions::default()).await;
            match outcome {
                Ok(page) if page.was_applied => {
                    inserted_ids.push(document.id.to_json());
                }
                Ok(_) => {
                    errors.push(CommandError::api(&ApiError::with_detail(
                        ErrorCode::DocumentAlreadyExists,
                        format!("insert failed for document with _id {}", document.id),
                    )));
                    if self.ordered {
                        break;
                    }
                }
                Err(err) => {
                    errors.push(CommandError::api(&err));
                    if self.ordered {
                        break;
                    }
                }
            }
        }

        let mut result =
            CommandResult::with_status([("insertedIds", Value::Array(inserted_ids))]);
        if !errors.is_empty() {
            result.errors = Some(errors);
        }
        Ok(result)
    }
}

/// `INSERT ... IF NOT EXISTS` for one shredded document.
pub(crate) fn build_insert(
    context: &CommandContext,
    collection: &str,
    document: &WritableShreddedDocument,
) -> Statement {
    let mut columns = vec!["key", "tx_id", "doc_json"];
    columns.extend_from_slice(INDEX_WRITE_COLUMNS);
    if document.query_vector_value.is_some() {
        columns.push(crate::schema::VECTOR_COLUMN);
    }
    let markers = vec!["?"; columns.len()].join(", ");
    let cql = format!(
        "INSERT INTO {} ({}) VALUES ({}) IF NOT EXISTS",
        table_ref(&context.namespace, collection),
        columns.join(", "),
        markers,
    );

    let mut params = vec![
        key_tuple(&document.id),
        CqlValue::Uuid(document.next_tx_id),
        CqlValue::Text(document.doc_json.clone()),
    ];
    params.extend(index_write_params(document));
    if let Some(vector) = &document.query_vector_value {
        params.push(CqlValue::Vector(vector.clone()));
    }
    Statement::new(cql, params)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use shale_core::Shredder;

    use super::*;

    #[test]
    fn insert_statement_shape() {
        let document = Shredder::default().shred(&json!({"_id": "a", "n": 1})).unwrap();
        let context = CommandContext::for_collection("ns", "docs");
        let statement = build_insert(&context, "docs", &document);

        assert!(statement.cql.starts_with("INSERT INTO \"ns\".\"docs\" (key, tx_id, doc_json"));
        assert!(statement.cql.ends_with("IF NOT EXISTS"));
        // key + tx_id + doc_json + eight index columns.
        assert_eq!(statement.params.len(), 11);
        assert_eq!(statement.params[2], CqlValue::Text(r#"{"_id":"a","n":1}"#.to_owned()));
    }

    #[test]
    fn vector_document_binds_vector_column() {
        let document =
            Shredder::default().shred(&json!({"_id": "a", "$vector": [0.5, 1.0]})).unwrap();
        let context = CommandContext::for_collection("ns", "docs");
        let statement = build_insert(&context, "docs", &document);
        assert!(statement.cql.contains("query_vector_value"));
        assert_eq!(statement.params.len(), 12);
        assert_eq!(statement.params[11], CqlValue::Vector(vec![0.5, 1.0]));
    }
}
