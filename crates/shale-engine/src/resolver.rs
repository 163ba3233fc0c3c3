//! Command resolution: from a typed command to an [`Operation`].
//!
//! Resolution is a pure function of the command and its context: clauses
//! are parsed against their algebras, documents are shredded, and the
//! matching operation description is built. No I/O happens here.

use serde_json::Value;

use shale_core::{Result, Shredder, WritableShreddedDocument};

use crate::command::clause::{FilterClause, SortClause, SortExpression, UpdateClause};
use crate::command::{Command, CommandContext};
use crate::config::EngineConfig;
use crate::filter::{resolve_filter, DbFilter};
use crate::operation::{
    CountOperation, CreateCollectionOperation, DeleteOperation, DropCollectionOperation,
    FindCollectionsOperation, FindOperation, InsertOperation, Operation, UpdateOperation,
};
use crate::schema::CollectionSettings;

/// Resolve a command to its operation.
pub fn resolve_command(
    command: Command,
    context: CommandContext,
    config: &EngineConfig,
) -> Result<Operation> {
    let operation = match command {
        Command::CreateCollection(create) => {
            let options = create.options.unwrap_or_default();
            let settings = match options.vector {
                Some(vector) => CollectionSettings::with_vector(
                    create.name,
                    vector.size,
                    vector.function,
                    options.comment,
                ),
                None => CollectionSettings::without_vector(create.name, options.comment),
            };
            Operation::CreateCollection(CreateCollectionOperation { context, settings })
        }
        Command::DeleteCollection(delete) => {
            Operation::DropCollection(DropCollectionOperation { context, name: delete.name })
        }
        Command::FindCollections(_) => {
            Operation::FindCollections(FindCollectionsOperation { context })
        }
        Command::InsertOne(insert) => Operation::Insert(InsertOperation {
            context,
            documents: vec![shred(config, &insert.document)?],
            ordered: true,
        }),
        Command::InsertMany(insert) => {
            let documents = insert
                .documents
                .iter()
                .map(|document| shred(config, document))
                .collect::<Result<Vec<_>>>()?;
            Operation::Insert(InsertOperation {
                context,
                documents,
                ordered: insert.options.ordered,
            })
        }
        Command::FindOne(find) => {
            let (sort, vector) = sort_parts(&find.sort)?;
            Operation::Find(FindOperation {
                context,
                filters: filters(&find.filter)?,
                sort,
                vector,
                limit: 1,
                paging_state: None,
                single: true,
            })
        }
        Command::Find(find) => {
            let (sort, vector) = sort_parts(&find.sort)?;
            let limit = find
                .options
                .limit
                .map_or(config.operations.max_documents_per_page, |limit| limit as usize);
            Operation::Find(FindOperation {
                context,
                filters: filters(&find.filter)?,
                sort,
                vector,
                limit,
                paging_state: find.options.paging_state,
                single: false,
            })
        }
        Command::CountDocuments(count) => {
            Operation::Count(CountOperation { context, filters: filters(&count.filter)? })
        }
        Command::UpdateOne(update) => Operation::Update(UpdateOperation {
            context,
            filters: filters(&update.filter)?,
            update: UpdateClause::from_json(&update.update)?,
            upsert: update.options.upsert,
            many: false,
            sort: None,
            return_document: None,
        }),
        Command::UpdateMany(update) => Operation::Update(UpdateOperation {
            context,
            filters: filters(&update.filter)?,
            update: UpdateClause::from_json(&update.update)?,
            upsert: update.options.upsert,
            many: true,
            sort: None,
            return_document: None,
        }),
        Command::FindOneAndUpdate(update) => {
            let (sort, _) = sort_parts(&update.sort)?;
            Operation::Update(UpdateOperation {
                context,
                filters: filters(&update.filter)?,
                update: UpdateClause::from_json(&update.update)?,
                upsert: update.options.upsert,
                many: false,
                sort,
                return_document: Some(update.options.return_document),
            })
        }
        Command::DeleteOne(delete) => Operation::Delete(DeleteOperation {
            context,
            filters: filters(&delete.filter)?,
            many: false,
            sort: None,
            return_document: false,
        }),
        Command::DeleteMany(delete) => Operation::Delete(DeleteOperation {
            context,
            filters: filters(&delete.filter)?,
            many: true,
            sort: None,
            return_document: false,
        }),
        Command::FindOneAndDelete(delete) => {
            let (sort, _) = sort_parts(&delete.sort)?;
            Operation::Delete(DeleteOperation {
                context,
                filters: filters(&delete.filter)?,
                many: false,
                sort,
                return_document: true,
            })
        }
    };
    Ok(operation)
}

fn shred(config: &EngineConfig, document: &Value) -> Result<WritableShreddedDocument> {
    Shredder::new(config.document_limits.clone()).shred(document)
}

fn filters(clause: &Option<Value>) -> Result<Vec<DbFilter>> {
    match clause {
        Some(value) => resolve_filter(&FilterClause::from_json(value)?),
        None => Ok(Vec::new()),
    }
}

type SortParts = (Option<Vec<SortExpression>>, Option<Vec<f32>>);

fn sort_parts(clause: &Option<Value>) -> Result<SortParts> {
    match clause {
        Some(value) => match SortClause::from_json(value)? {
            SortClause::Fields(fields) => Ok((Some(fields), None)),
            SortClause::Vector(vector) => Ok((None, Some(vector))),
        },
        None => Ok((None, None)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::command::parse_envelope;

    use super::*;

    fn resolve(body: Value) -> Result<Operation> {
        let command = parse_envelope(&body).unwrap();
        resolve_command(
            command,
            CommandContext::for_collection("ns", "docs"),
            &EngineConfig::default(),
        )
    }

    #[test]
    fn insert_one_is_shredded_at_resolution() {
        let operation = resolve(json!({"insertOne": {"document": {"_id": "a", "n": 1}}})).unwrap();
        let Operation::Insert(insert) = operation else { panic!("wrong operation") };
        assert_eq!(insert.documents.len(), 1);
        assert_eq!(insert.documents[0].doc_json, r#"{"_id":"a","n":1}"#);
        assert!(insert.ordered);
    }

    #[test]
    fn find_limit_defaults_to_page_cap() {
        let operation = resolve(json!({"find": {}})).unwrap();
        let Operation::Find(find) = operation else { panic!("wrong operation") };
        assert_eq!(find.limit, 20);
        assert!(!find.single);
    }

    #[test]
    fn find_one_with_vector_sort() {
        let operation =
            resolve(json!({"findOne": {"sort": {"$vector": [0.1, 0.2]}}})).unwrap();
        let Operation::Find(find) = operation else { panic!("wrong operation") };
        assert_eq!(find.vector, Some(vec![0.1, 0.2]));
        assert!(find.sort.is_none());
    }

    #[test]
    fn bad_filter_surfaces_resolution_error() {
        let err = resolve(json!({"findOne": {"filter": {"a": {"$regex": "x"}}}})).unwrap_err();
        assert_eq!(err.code, shale_core::ErrorCode::UnsupportedFilterOperation);
    }

    #[test]
    fn find_one_and_update_keeps_return_document() {
        let operation = resolve(json!({
            "findOneAndUpdate": {
                "filter": {"_id": "a"},
                "update": {"$set": {"x": 1}},
                "options": {"returnDocument": "after"}
            }
        }))
        .unwrap();
        let Operation::Update(update) = operation else { panic!("wrong operation") };
        assert_eq!(update.return_document, Some(crate::command::ReturnDocument::After));
        assert!(!update.many);
    }
}
