//! `updateOne` / `updateMany` / `findOneAndUpdate`.
//!
//! Writes follow the optimistic protocol: read `doc_json` and the current
//! `tx_id`, apply the update algebra in memory, re-shred, then CAS the row
//! with `IF tx_id = <old>`. A lost race re-reads and retries up to the
//! configured budget.

use serde_json::Value;
use tracing::debug;

use shale_core::{ApiError, DocumentId, ErrorCode, Result, Shredder, WritableShreddedDocument};

use crate::command::clause::{SortExpression, UpdateClause};
use crate::command::{CommandContext, ReturnDocument};
use crate::executor::{CqlValue, QueryOptions, Statement};
use crate::filter::DbFilter;
use crate::result::CommandResult;

use super::read::read_documents;
use super::{
    index_write_params, key_tuple, required_collection, table_ref, ExecutionContext,
    INDEX_WRITE_COLUMNS,
};

/// Update of one or many documents matched by a filter.
#[derive(Debug)]
pub struct UpdateOperation {
    /// Target context.
    pub context: CommandContext,
    /// Resolved predicates selecting the documents.
    pub filters: Vec<DbFilter>,
    /// The update to apply.
    pub update: UpdateClause,
    /// Insert a new document when nothing matches.
    pub upsert: bool,
    /// Update every match up to the operation bound, not just the first.
    pub many: bool,
    /// Post-read selection order for the single-document forms.
    pub sort: Option<Vec<SortExpression>>,
    /// When set, return the document (`findOneAndUpdate`).
    pub return_document: Option<ReturnDocument>,
}

#[derive(Default)]
struct UpdateOutcome {
    matched: u64,
    modified: u64,
    upserted_id: Option<DocumentId>,
    returned: Option<Value>,
    more_data: bool,
}

impl UpdateOperation {
    /// Execute the update.
    pub async fn execute(&self, ctx: &ExecutionContext<'_>) -> Result<CommandResult> {
        let collection = required_collection(&self.context)?;
        debug!(
            namespace = %self.context.namespace,
            collection,
            many = self.many,
            upsert = self.upsert,
            "executing update"
        );

        let outcome = if self.many {
            self.update_many(ctx, collection).await?
        } else {
            self.update_one(ctx, collection).await?
        };
        let UpdateOutcome { matched, modified, upserted_id, returned, more_data } = outcome;

        let mut result = match (&self.return_document, returned) {
            (Some(_), Some(document)) => CommandResult::with_docs(vec![document], None),
            (Some(_), None) => CommandResult::with_docs(Vec::new(), None),
            (None, _) => CommandResult::default(),
        };
        result = result.and_status([
            ("matchedCount", Value::from(matched)),
            ("modifiedCount", Value::from(modified)),
        ]);
        if let Some(id) = upserted_id {
            result = result.and_status([("upsertedId", id.to_json())]);
        }
        if more_data {
            result = result.and_status([("moreData", Value::Bool(true))]);
        }
        Ok(result)
    }

    /// Single-document form: read one match (honoring sort), CAS, retry by
    /// re-reading on a lost race; upsert when nothing matches.
    async fn update_one(
        &self,
        ctx: &ExecutionContext<'_>,
        collection: &str,
    ) -> Result<UpdateOutcome> {
        let shredder = Shredder::new(ctx.config.document_limits.clone());
        let retries = ctx.config.operations.max_retries.max(1);
        for _ in 0..retries {
            let candidate = self.read_candidate(ctx, collection).await?;
            let Some(candidate) = candidate else {
                if !self.upsert {
                    return Ok(UpdateOutcome::default());
                }
                match self.try_upsert(ctx, collection, &shredder).await? {
                    Some(outcome) => return Ok(outcome),
                    // Lost the insert race; re-read and treat the winner as
                    // the document to update.
                    None => continue,
                }
            };

            match self.try_cas(ctx, collection, &shredder, &candidate).await? {
                Some(outcome) => return Ok(outcome),
                // CAS lost: a concurrent writer advanced tx_id. Re-read.
                None => continue,
            }
        }
        Err(retries_exhausted(retries))
    }

    /// Many-document form: read the batch up front, then CAS each document,
    /// re-reading an individual document on a lost race.
    async fn update_many(
        &self,
        ctx: &ExecutionContext<'_>,
        collection: &str,
    ) -> Result<UpdateOutcome> {
        let shredder = Shredder::new(ctx.config.document_limits.clone());
        let bound = ctx.config.operations.max_documents_per_operation;
        // One extra row tells us whether matches remain past the bound.
        let batch =
            read_documents(ctx, &self.context, collection, &self.filters, None, bound + 1, None)
                .await?;
        let more_data = batch.docs.len() > bound;

        let mut outcome = UpdateOutcome { more_data, ..UpdateOutcome::default() };
        if batch.docs.is_empty() && self.upsert {
            if let Some(upserted) = self.try_upsert(ctx, collection, &shredder).await? {
                return Ok(upserted);
            }
        }
        let retries = ctx.config.operations.max_retries.max(1);
        for candidate in batch.docs.into_iter().take(bound) {
            let mut current = candidate;
            let mut applied = false;
            for _ in 0..retries {
                if let Some(one) = self.try_cas(ctx, collection, &shredder, &current).await? {
                    outcome.matched += one.matched;
                    outcome.modified += one.modified;
                    applied = true;
                    break;
                }
                // Lost the race on this document: re-read it by id.
                match self.reread_by_id(ctx, collection, &current.document).await? {
                    Some(fresh) => current = fresh,
                    // Deleted concurrently; nothing left to update.
                    None => {
                        applied = true;
                        break;
                    }
                }
            }
            if !applied {
                return Err(retries_exhausted(retries));
            }
        }
        Ok(outcome)
    }

    /// Apply the update to one candidate and CAS it in. `None` on a lost
    /// race.
    async fn try_cas(
        &self,
        ctx: &ExecutionContext<'_>,
        collection: &str,
        shredder: &Shredder,
        candidate: &super::read::ReadDocument,
    ) -> Result<Option<UpdateOutcome>> {
        let mut document = candidate.document.clone();
        let modified = crate::update::apply_update(&self.update, &mut document, false)?;
        if !modified {
            return Ok(Some(UpdateOutcome {
                matched: 1,
                returned: self.returned_doc(&candidate.document, &document),
                ..UpdateOutcome::default()
            }));
        }
        let shredded = shredder.shred(&document)?;
        let statement = build_cas_update(&self.context, collection, &shredded, candidate.tx_id);
        let page = ctx.executor.execute(statement, QueryOptions::default()).await?;
        if page.was_applied {
            Ok(Some(UpdateOutcome {
                matched: 1,
                modified: 1,
                returned: self.returned_doc(&candidate.document, &document),
                ..UpdateOutcome::default()
            }))
        } else {
            Ok(None)
        }
    }

    async fn reread_by_id(
        &self,
        ctx: &ExecutionContext<'_>,
        collection: &str,
        document: &Value,
    ) -> Result<Option<super::read::ReadDocument>> {
        let Some(id) = document.get(shale_core::DOC_ID_FIELD) else { return Ok(None) };
        let filters = vec![DbFilter::IdEquals(DocumentId::from_json(id)?)];
        let outcome =
            read_documents(ctx, &self.context, collection, &filters, None, 1, None).await?;
        Ok(outcome.docs.into_iter().next())
    }

    async fn read_candidate(
        &self,
        ctx: &ExecutionContext<'_>,
        collection: &str,
    ) -> Result<Option<super::read::ReadDocument>> {
        let outcome = match &self.sort {
            // Sorted selection reads a bounded set and keeps the first.
            Some(sort) => {
                let mut outcome = read_documents(
                    ctx,
                    &self.context,
                    collection,
                    &self.filters,
                    None,
                    ctx.config.operations.max_documents_per_page,
                    None,
                )
                .await?;
                outcome
                    .docs
                    .sort_by(|a, b| super::read::compare_documents(&a.document, &b.document, sort));
                outcome
            }
            None => {
                read_documents(ctx, &self.context, collection, &self.filters, None, 1, None)
                    .await?
            }
        };
        Ok(outcome.docs.into_iter().next())
    }

    /// Build and insert the upsert document. `None` when the CAS insert
    /// lost to a concurrent creator.
    async fn try_upsert(
        &self,
        ctx: &ExecutionContext<'_>,
        collection: &str,
        shredder: &Shredder,
    ) -> Result<Option<UpdateOutcome>> {
        let mut document = Value::Object(serde_json::Map::new());
        if let Some(id) = self.filter_id() {
            if let Some(map) = document.as_object_mut() {
                map.insert(shale_core::DOC_ID_FIELD.to_owned(), id.to_json());
            }
        }
        crate::update::apply_update(&self.update, &mut document, true)?;
        let shredded = shredder.shred(&document)?;
        let statement = super::insert::build_insert(&self.context, collection, &shredded);
        let page = ctx.executor.execute(statement, QueryOptions::default()).await?;
        if !page.was_applied {
            return Ok(None);
        }
        // Re-parse the canonical form so the returned document carries the
        // generated `_id` first, exactly as stored.
        let stored: Value = serde_json::from_str(&shredded.doc_json)
            .map_err(|_| ApiError::new(ErrorCode::InternalServerError))?;
        Ok(Some(UpdateOutcome {
            upserted_id: Some(shredded.id.clone()),
            returned: match self.return_document {
                Some(ReturnDocument::After) => Some(stored),
                _ => None,
            },
            ..UpdateOutcome::default()
        }))
    }

    /// The `_id` pinned by the filter, if the filter pins one.
    fn filter_id(&self) -> Option<&DocumentId> {
        self.filters.iter().find_map(|filter| match filter {
            DbFilter::IdEquals(id) => Some(id),
            _ => None,
        })
    }

    fn returned_doc(&self, before: &Value, after: &Value) -> Option<Value> {
        match self.return_document {
            Some(ReturnDocument::Before) => Some(before.clone()),
            Some(ReturnDocument::After) => Some(after.clone()),
            None => None,
        }
    }
}

fn retries_exhausted(retries: usize) -> ApiError {
    ApiError::with_detail(
        ErrorCode::ConcurrentUpdateLimitExceeded,
        format!("failed to complete the write within {retries} attempts"),
    )
}

/// `UPDATE ... IF tx_id = ?` replacing the document and every index column.
pub(crate) fn build_cas_update(
    context: &CommandContext,
    collection: &str,
    document: &WritableShreddedDocument,
    expected_tx_id: uuid::Uuid,
) -> Statement {
    let mut assignments = vec!["tx_id = ?".to_owned(), "doc_json = ?".to_owned()];
    assignments.extend(INDEX_WRITE_COLUMNS.iter().map(|column| format!("{column} = ?")));
    if document.query_vector_value.is_some() {
        assignments.push(format!("{} = ?", crate::schema::VECTOR_COLUMN));
    }
    let cql = format!(
        "UPDATE {} SET {} WHERE key = ? IF tx_id = ?",
        table_ref(&context.namespace, collection),
        assignments.join(", "),
    );

    let mut params = vec![
        CqlValue::Uuid(document.next_tx_id),
        CqlValue::Text(document.doc_json.clone()),
    ];
    params.extend(index_write_params(document));
    if let Some(vector) = &document.query_vector_value {
        params.push(CqlValue::Vector(vector.clone()));
    }
    params.push(key_tuple(&document.id));
    params.push(CqlValue::Uuid(expected_tx_id));
    Statement::new(cql, params)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn cas_update_statement_shape() {
        let document = Shredder::default().shred(&json!({"_id": "a", "n": 2})).unwrap();
        let expected = shale_core::txid::next_tx_id();
        let context = CommandContext::for_collection("ns", "docs");
        let statement = build_cas_update(&context, "docs", &document, expected);

        assert!(statement.cql.starts_with("UPDATE \"ns\".\"docs\" SET tx_id = ?, doc_json = ?"));
        assert!(statement.cql.ends_with("WHERE key = ? IF tx_id = ?"));
        // tx_id + doc_json + eight index columns + key + expected tx_id.
        assert_eq!(statement.params.len(), 12);
        assert_eq!(statement.params[11], CqlValue::Uuid(expected));
    }
}
