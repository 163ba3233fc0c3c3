//! HTTP surface for the Shale document API.
//!
//! Two endpoints, both POST, both always answering 200 with a
//! [`CommandResult`] envelope:
//!
//! ```text
//! POST /v1/{namespace}              namespace commands (createCollection, ...)
//! POST /v1/{namespace}/{collection} document commands (findOne, insertOne, ...)
//! ```
//!
//! Requests authenticate with the `X-Cassandra-Token` header; the envelope
//! carries every failure, including auth and parse problems.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::debug;

use shale_engine::command::CommandContext;
use shale_engine::result::{CommandError, CommandResult};
use shale_engine::CommandProcessor;

/// The auth token header.
pub const TOKEN_HEADER: &str = "X-Cassandra-Token";

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    /// The command pipeline.
    pub processor: Arc<CommandProcessor>,
}

/// Build the API router.
#[must_use]
pub fn build_router(processor: Arc<CommandProcessor>) -> Router {
    Router::new()
        .route("/v1/:namespace", post(namespace_command))
        .route("/v1/:namespace/:collection", post(collection_command))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { processor })
}

async fn namespace_command(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Json<CommandResult> {
    dispatch(&state, CommandContext::for_namespace(namespace), &headers, &body).await
}

async fn collection_command(
    State(state): State<AppState>,
    Path((namespace, collection)): Path<(String, String)>,
    headers: HeaderMap,
    body: String,
) -> Json<CommandResult> {
    dispatch(&state, CommandContext::for_collection(namespace, collection), &headers, &body)
        .await
}

/// Check the token, parse the body, run the pipeline. All failures land in
/// the envelope; the HTTP status is always 200.
async fn dispatch(
    state: &AppState,
    mut context: CommandContext,
    headers: &HeaderMap,
    body: &str,
) -> Json<CommandResult> {
    let token = headers.get(TOKEN_HEADER).and_then(|value| value.to_str().ok());
    let Some(token) = token.filter(|token| !token.is_empty()) else {
        return Json(CommandResult::from_error(CommandError::unauthorized(format!(
            "Role unauthorized for operation: Missing token, expecting one in the {TOKEN_HEADER} header"
        ))));
    };
    context.tenant = tenant_of(token);

    if body.trim().is_empty() {
        return Json(CommandResult::from_error(CommandError::constraint_violation(
            "request body must not be empty",
        )));
    }
    let envelope: serde_json::Value = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(err) => {
            debug!(error = %err, "rejecting unparseable request body");
            return Json(CommandResult::from_error(CommandError::json_parse(format!(
                "unable to parse request body as JSON: {err}"
            ))));
        }
    };

    Json(state.processor.process(context, &envelope).await)
}

/// Tenant discriminator carried in the token, when the deployment uses
/// `tenant/credential` tokens.
fn tenant_of(token: &str) -> Option<String> {
    token.split_once('/').map(|(tenant, _)| tenant.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_extraction() {
        assert_eq!(tenant_of("acme/secret"), Some("acme".to_owned()));
        assert_eq!(tenant_of("plain-token"), None);
    }
}
