//! The command pipeline.
//!
//! One entry point, [`CommandProcessor::process`], takes a request body and
//! a context and always produces a [`CommandResult`]: deserialize the
//! envelope, validate, resolve to an operation, execute, and fold every
//! failure into the envelope. The whole pipeline runs under the request
//! deadline.

use serde_json::Value;
use tracing::{debug, warn};

use shale_core::{ApiError, ErrorCode};

use crate::command::{parse_envelope, validate, validate_name, CommandContext};
use crate::config::EngineConfig;
use crate::executor::{SessionCache, SessionFactory};
use crate::operation::ExecutionContext;
use crate::resolver::resolve_command;
use crate::result::{CommandError, CommandResult};
use crate::schema::SchemaCache;

/// Shared, process-wide command pipeline.
///
/// Holds the global caches; construct once at startup with the store
/// session factory (tests inject the in-memory stub here) and share across
/// requests.
pub struct CommandProcessor {
    config: EngineConfig,
    schema_cache: SchemaCache,
    sessions: SessionCache,
}

impl CommandProcessor {
    /// Build the pipeline with its session factory.
    #[must_use]
    pub fn new(config: EngineConfig, factory: SessionFactory) -> Self {
        let schema_cache = SchemaCache::new(config.schema_cache.clone());
        let sessions =
            SessionCache::new(config.session_cache.clone(), &config.operations, factory);
        Self { config, schema_cache, sessions }
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Process one command envelope.
    ///
    /// Never fails: every error becomes an envelope with `errors`. The
    /// request deadline covers the entire pipeline; reaching it yields
    /// `REQUEST_TIMEOUT`.
    pub async fn process(&self, context: CommandContext, body: &Value) -> CommandResult {
        let deadline = self.config.operations.request_timeout;
        match tokio::time::timeout(deadline, self.process_inner(context, body)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("request deadline reached");
                ApiError::new(ErrorCode::RequestTimeout).into()
            }
        }
    }

    async fn process_inner(&self, mut context: CommandContext, body: &Value) -> CommandResult {
        if context.namespace.is_empty() {
            // Requests without a namespace fall back to the configured one.
            context.namespace.clone_from(&self.config.operations.keyspace);
        }
        let command = match parse_envelope(body) {
            Ok(command) => command,
            Err(error) => return CommandResult::from_error(error),
        };
        debug!(
            command = command.tag(),
            namespace = %context.namespace,
            collection = context.collection.as_deref().unwrap_or_default(),
            "processing command"
        );

        if let Err(error) = validate(&command, self.config.operations.max_documents_per_insert) {
            return CommandResult::from_error(error);
        }
        if command.targets_collection() && context.collection.is_none() {
            return CommandResult::from_error(CommandError::constraint_violation(format!(
                "{}: command requires a collection in the request path",
                command.tag()
            )));
        }
        if let Some(collection) = &context.collection {
            if let Err(error) = validate_name(collection) {
                return CommandResult::from_error(error);
            }
        }

        let executor = match self.sessions.get(context.tenant.as_deref()) {
            Ok(executor) => executor,
            Err(error) => return error.into(),
        };
        let operation = match resolve_command(command, context, &self.config) {
            Ok(operation) => operation,
            Err(error) => return error.into(),
        };
        let execution = ExecutionContext {
            executor: &executor,
            schema_cache: &self.schema_cache,
            config: &self.config,
        };
        match operation.execute(&execution).await {
            Ok(result) => result,
            Err(error) => {
                debug!(code = error.code.as_str(), "command failed");
                error.into()
            }
        }
    }
}
