//! `deleteOne` / `deleteMany` / `findOneAndDelete`.

use serde_json::Value;
use tracing::debug;

use shale_core::{ApiError, DocumentId, ErrorCode, Result, DOC_ID_FIELD};

use crate::command::clause::SortExpression;
use crate::command::CommandContext;
use crate::executor::{CqlValue, QueryOptions, Statement};
use crate::filter::DbFilter;
use crate::result::CommandResult;

use super::read::{compare_documents, read_documents, ReadDocument};
use super::{key_tuple, required_collection, table_ref, ExecutionContext};

/// Delete of one or many documents matched by a filter.
#[derive(Debug)]
pub struct DeleteOperation {
    /// Target context.
    pub context: CommandContext,
    /// Resolved predicates selecting the documents.
    pub filters: Vec<DbFilter>,
    /// Delete every match up to the operation bound, not just the first.
    pub many: bool,
    /// Post-read selection order for the single-document forms.
    pub sort: Option<Vec<SortExpression>>,
    /// Return the deleted document (`findOneAndDelete`).
    pub return_document: bool,
}

impl DeleteOperation {
    /// Execute the delete: read-then-CAS-delete on `tx_id` per document.
    pub async fn execute(&self, ctx: &ExecutionContext<'_>) -> Result<CommandResult> {
        let collection = required_collection(&self.context)?;
        debug!(
            namespace = %self.context.namespace,
            collection,
            many = self.many,
            "executing delete"
        );

        let bound = if self.many { ctx.config.operations.max_documents_per_operation } else { 1 };
        let mut candidates = self.read_candidates(ctx, collection, bound + 1).await?;
        let more_data = self.many && candidates.len() > bound;
        candidates.truncate(bound);

        let retries = ctx.config.operations.max_retries.max(1);
        let mut deleted = 0_u64;
        let mut returned = None;
        for candidate in candidates {
            let mut current = candidate;
            let mut attempts = 0;
            let applied = loop {
                let statement = self.build_cas_delete(collection, &current)?;
                let page = ctx.executor.execute(statement, QueryOptions::default()).await?;
                if page.was_applied {
                    break true;
                }
                attempts += 1;
                if attempts >= retries {
                    return Err(ApiError::with_detail(
                        ErrorCode::ConcurrentUpdateLimitExceeded,
                        format!("failed to complete the delete within {retries} attempts"),
                    ));
                }
                // Lost the race: the document changed. Re-read it.
                match self.reread_by_id(ctx, collection, &current.document).await? {
                    Some(fresh) => current = fresh,
                    // Deleted concurrently; do not count it as ours.
                    None => break false,
                }
            };
            if applied {
                deleted += 1;
                if self.return_document && returned.is_none() {
                    returned = Some(current.document.clone());
                }
            }
        }

        let mut result = if self.return_document {
            CommandResult::with_docs(returned.into_iter().collect(), None)
        } else {
            CommandResult::default()
        };
        result = result.and_status([("deletedCount", Value::from(deleted))]);
        if more_data {
            result = result.and_status([("moreData", Value::Bool(true))]);
        }
        Ok(result)
    }

    async fn read_candidates(
        &self,
        ctx: &ExecutionContext<'_>,
        collection: &str,
        limit: usize,
    ) -> Result<Vec<ReadDocument>> {
        let mut outcome = match &self.sort {
            Some(_) => {
                read_documents(
                    ctx,
                    &self.context,
                    collection,
                    &self.filters,
                    None,
                    ctx.config.operations.max_documents_per_page,
                    None,
                )
                .await?
            }
            None => {
                read_documents(ctx, &self.context, collection, &self.filters, None, limit, None)
                    .await?
            }
        };
        if let Some(sort) = &self.sort {
            outcome.docs.sort_by(|a, b| compare_documents(&a.document, &b.document, sort));
        }
        outcome.docs.truncate(limit);
        Ok(outcome.docs)
    }

    fn build_cas_delete(&self, collection: &str, candidate: &ReadDocument) -> Result<Statement> {
        let id = candidate
            .document
            .get(DOC_ID_FIELD)
            .ok_or_else(|| ApiError::new(ErrorCode::InternalServerError))?;
        let id = DocumentId::from_json(id)?;
        Ok(Statement::new(
            format!(
                "DELETE FROM {} WHERE key = ? IF tx_id = ?",
                table_ref(&self.context.namespace, collection)
            ),
            vec![key_tuple(&id), CqlValue::Uuid(candidate.tx_id)],
        ))
    }

    async fn reread_by_id(
        &self,
        ctx: &ExecutionContext<'_>,
        collection: &str,
        document: &Value,
    ) -> Result<Option<ReadDocument>> {
        let Some(id) = document.get(DOC_ID_FIELD) else { return Ok(None) };
        let filters = vec![DbFilter::IdEquals(DocumentId::from_json(id)?)];
        let outcome =
            read_documents(ctx, &self.context, collection, &filters, None, 1, None).await?;
        Ok(outcome.docs.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn cas_delete_statement_shape() {
        let operation = DeleteOperation {
            context: CommandContext::for_collection("ns", "docs"),
            filters: Vec::new(),
            many: false,
            sort: None,
            return_document: false,
        };
        let tx_id = Uuid::nil();
        let candidate = ReadDocument { document: json!({"_id": "a"}), tx_id };
        let statement = operation.build_cas_delete("docs", &candidate).unwrap();
        assert_eq!(statement.cql, "DELETE FROM \"ns\".\"docs\" WHERE key = ? IF tx_id = ?");
        assert_eq!(statement.params[1], CqlValue::Uuid(tx_id));
    }
}
