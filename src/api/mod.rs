//! HTTP API surface.
//!
//! One router over shared state. Project-scoped routes authenticate with the
//! `X-API-KEY` header; the OAuth2 callback is the only unauthenticated route
//! (the provider calls it, carrying the signed linking state instead).

pub mod app_configurations;
pub mod functions;
pub mod linked_accounts;

use crate::apps::{AppConfigurationRegistry, AppRegistry, Project, ProjectRegistry};
use crate::config::AciConfig;
use crate::error::PlatformError;
use crate::executor::Executor;
use crate::oauth::StateSigner;
use crate::quota::ExecutionQuota;
use crate::storage::LinkedAccountStore;
use axum::{
    extract::State,
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Shared application state.
#[derive(Clone)]
pub struct ApiState {
    pub config: Arc<AciConfig>,
    pub registry: Arc<AppRegistry>,
    pub projects: Arc<ProjectRegistry>,
    pub app_configurations: Arc<AppConfigurationRegistry>,
    pub linked_accounts: Arc<LinkedAccountStore>,
    pub state_signer: Arc<StateSigner>,
    pub executor: Arc<Executor>,
    pub quota: Arc<ExecutionQuota>,
}

/// Build the full API router.
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/apps", get(list_apps))
        .route(
            "/v1/app-configurations",
            post(app_configurations::create).get(app_configurations::list),
        )
        .route(
            "/v1/app-configurations/:app_name",
            get(app_configurations::get_one).delete(app_configurations::delete_one),
        )
        .route(
            "/v1/linked-accounts/oauth2/authorize",
            get(linked_accounts::oauth2_authorize),
        )
        .route(
            "/v1/linked-accounts/oauth2/callback",
            get(linked_accounts::oauth2_callback),
        )
        .route(
            "/v1/linked-accounts",
            post(linked_accounts::create)
                .get(linked_accounts::list)
                .delete(linked_accounts::delete_one),
        )
        .route("/v1/functions/:name/definition", get(functions::definition))
        .route("/v1/functions/:name/execute", post(functions::execute))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// Resolve the calling project from the `X-API-KEY` header.
pub fn authenticate_project(
    state: &ApiState,
    headers: &HeaderMap,
) -> Result<Project, PlatformError> {
    let api_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            PlatformError::AuthenticationError("Missing X-API-KEY header".to_string())
        })?;

    state
        .projects
        .authenticate(api_key)
        .ok_or_else(|| PlatformError::AuthenticationError("Invalid API key".to_string()))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// GET /v1/apps — registered App names.
async fn list_apps(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<String>>, PlatformError> {
    authenticate_project(&state, &headers)?;
    Ok(Json(state.registry.list_app_names()))
}
