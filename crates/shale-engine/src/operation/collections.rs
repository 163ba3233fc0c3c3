//! Schema operations: `createCollection`, `deleteCollection`,
//! `findCollections`.

use serde_json::Value;
use tracing::info;

use shale_core::{ApiError, ErrorCode, Result};

use crate::command::CommandContext;
use crate::executor::KeyspaceMetadata;
use crate::result::CommandResult;
use crate::schema::{
    create_index_statements, create_table_statement, drop_table_statement, is_collection_table,
    CollectionSettings,
};

use super::ExecutionContext;

/// `createCollection`: validate capacity, create the table and its indexes.
#[derive(Debug)]
pub struct CreateCollectionOperation {
    /// Target context.
    pub context: CommandContext,
    /// Requested settings.
    pub settings: CollectionSettings,
}

impl CreateCollectionOperation {
    /// Execute the creation.
    ///
    /// Re-creating an existing collection with equal settings succeeds
    /// idempotently; conflicting settings fail with
    /// `INVALID_COLLECTION_NAME`.
    pub async fn execute(&self, ctx: &ExecutionContext<'_>) -> Result<CommandResult> {
        info!(
            namespace = %self.context.namespace,
            collection = %self.settings.name,
            vector = self.settings.vector_enabled,
            "creating collection"
        );
        let keyspaces = ctx.executor.keyspaces().await?;
        let keyspace = keyspaces
            .iter()
            .find(|keyspace| keyspace.name == self.context.namespace)
            .ok_or_else(|| {
                ApiError::with_detail(
                    ErrorCode::NamespaceDoesNotExist,
                    format!(
                        "Unknown namespace '{}', you must create it first",
                        self.context.namespace
                    ),
                )
            })?;

        if let Some(table) =
            keyspace.tables.iter().find(|table| table.name == self.settings.name)
        {
            // Existing table: settings must match exactly, then re-creation
            // is an idempotent success.
            let existing = CollectionSettings::from_table(table);
            if existing != self.settings {
                return Err(ApiError::with_detail(
                    ErrorCode::InvalidCollectionName,
                    format!(
                        "provided collection ('{}') already exists with different 'vector' options",
                        self.settings.name
                    ),
                ));
            }
        } else {
            self.check_capacity(ctx, &keyspaces)?;
        }

        let delay = ctx.config.operations.ddl_delay;
        let create = create_table_statement(&self.context.namespace, &self.settings);
        ctx.executor.execute_schema_change(create).await?;
        for statement in create_index_statements(&self.context.namespace, &self.settings) {
            // Give the cluster time to settle between DDL statements.
            tokio::time::sleep(delay).await;
            ctx.executor.execute_schema_change(statement).await?;
        }
        ctx.schema_cache.invalidate(
            self.context.tenant.as_deref(),
            &self.context.namespace,
            &self.settings.name,
        );
        Ok(CommandResult::ok())
    }

    /// Enforce the database-wide collection and index budgets.
    fn check_capacity(
        &self,
        ctx: &ExecutionContext<'_>,
        keyspaces: &[KeyspaceMetadata],
    ) -> Result<()> {
        let limits = &ctx.config.database_limits;
        let all_tables: Vec<_> =
            keyspaces.iter().flat_map(|keyspace| keyspace.tables.iter()).collect();

        let collection_count =
            all_tables.iter().filter(|table| is_collection_table(table)).count();
        if collection_count >= limits.max_collections {
            return Err(ApiError::with_detail(
                ErrorCode::TooManyCollections,
                format!(
                    "number of collections in database cannot exceed {}, already have {}",
                    limits.max_collections, collection_count
                ),
            ));
        }

        let indexes_used: usize = all_tables.iter().map(|table| table.indexes.len()).sum();
        let indexes_needed =
            crate::schema::index_columns(self.settings.vector_enabled).len();
        if indexes_used + indexes_needed > limits.indexes_available_per_database {
            return Err(ApiError::with_detail(
                ErrorCode::TooManyIndexes,
                format!(
                    "cannot create a new collection; need {indexes_needed} indexes to create the collection; \
                     {indexes_used} indexes already created in database, maximum {}",
                    limits.indexes_available_per_database
                ),
            ));
        }
        Ok(())
    }
}

/// `deleteCollection`: drop the backing table. Idempotent.
#[derive(Debug)]
pub struct DropCollectionOperation {
    /// Target context.
    pub context: CommandContext,
    /// Collection name.
    pub name: String,
}

impl DropCollectionOperation {
    /// Execute the drop. Dropping a missing collection succeeds.
    pub async fn execute(&self, ctx: &ExecutionContext<'_>) -> Result<CommandResult> {
        info!(namespace = %self.context.namespace, collection = %self.name, "dropping collection");
        let statement = drop_table_statement(&self.context.namespace, &self.name);
        ctx.executor.execute_schema_change(statement).await?;
        ctx.schema_cache.invalidate(
            self.context.tenant.as_deref(),
            &self.context.namespace,
            &self.name,
        );
        Ok(CommandResult::ok())
    }
}

/// `findCollections`: list collection-shaped tables of the namespace.
#[derive(Debug)]
pub struct FindCollectionsOperation {
    /// Target context.
    pub context: CommandContext,
}

impl FindCollectionsOperation {
    /// Execute the listing.
    pub async fn execute(&self, ctx: &ExecutionContext<'_>) -> Result<CommandResult> {
        let keyspaces = ctx.executor.keyspaces().await?;
        let keyspace = keyspaces
            .iter()
            .find(|keyspace| keyspace.name == self.context.namespace)
            .ok_or_else(|| {
                ApiError::with_detail(
                    ErrorCode::NamespaceDoesNotExist,
                    format!(
                        "Unknown namespace '{}', you must create it first",
                        self.context.namespace
                    ),
                )
            })?;

        let collections: Vec<Value> = keyspace
            .tables
            .iter()
            .filter(|table| is_collection_table(table))
            .map(|table| Value::String(table.name.clone()))
            .collect();
        Ok(CommandResult::with_status([("collections", Value::Array(collections))]))
    }
}
