//! Function definition and execution routes.

use super::{authenticate_project, ApiState};
use crate::apps::FunctionDefinition;
use crate::error::PlatformError;
use crate::executor::{FunctionExecutionResult, FunctionInput};
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize)]
pub struct ExecuteRequest {
    pub linked_account_owner_id: String,
    #[serde(default)]
    pub function_input: FunctionInput,
}

/// GET /v1/functions/:name/definition
pub async fn definition(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<FunctionDefinition>, PlatformError> {
    authenticate_project(&state, &headers)?;
    state
        .registry
        .get_function(&name)
        .map(Json)
        .ok_or_else(|| PlatformError::FunctionNotFound(format!("Function '{}' not found", name)))
}

/// POST /v1/functions/:name/execute
///
/// Downstream failures come back as HTTP 200 with `success = false`;
/// only platform-side failures produce an error status.
pub async fn execute(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<FunctionExecutionResult>, PlatformError> {
    let project = authenticate_project(&state, &headers)?;

    if !state
        .quota
        .check_and_consume(project.id, state.config.execute_quota_per_minute)
    {
        return Err(PlatformError::RateLimitExceeded(format!(
            "Project exceeded {} executions per minute",
            state.config.execute_quota_per_minute
        )));
    }

    let result = state
        .executor
        .execute(
            project.id,
            &name,
            &request.linked_account_owner_id,
            request.function_input,
        )
        .await?;
    Ok(Json(result))
}
