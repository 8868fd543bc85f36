//! AppConfiguration CRUD.

use super::{authenticate_project, ApiState};
use crate::apps::{AppConfiguration, SecurityScheme};
use crate::error::PlatformError;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize)]
pub struct CreateAppConfiguration {
    pub app_name: String,
    pub security_scheme: SecurityScheme,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub all_functions_enabled: bool,
    #[serde(default)]
    pub enabled_functions: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// POST /v1/app-configurations — opt the project into an App.
pub async fn create(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(request): Json<CreateAppConfiguration>,
) -> Result<Json<AppConfiguration>, PlatformError> {
    let project = authenticate_project(&state, &headers)?;

    let app = state.registry.get_app(&request.app_name).ok_or_else(|| {
        PlatformError::AppNotFound(format!("App '{}' not found", request.app_name))
    })?;
    if !app.security_schemes.supports(request.security_scheme) {
        return Err(PlatformError::InvalidRequest(format!(
            "App '{}' does not support security scheme '{}'",
            app.name, request.security_scheme
        )));
    }

    let config = AppConfiguration {
        project_id: project.id,
        app_name: request.app_name,
        security_scheme: request.security_scheme,
        enabled: request.enabled,
        all_functions_enabled: request.all_functions_enabled,
        enabled_functions: request.enabled_functions,
    };
    tracing::info!(
        project = %project.id,
        app = %config.app_name,
        scheme = %config.security_scheme,
        "App configuration upserted"
    );
    state.app_configurations.upsert(config.clone());
    Ok(Json(config))
}

/// GET /v1/app-configurations — all configurations in the project.
pub async fn list(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<AppConfiguration>>, PlatformError> {
    let project = authenticate_project(&state, &headers)?;
    Ok(Json(state.app_configurations.list_for_project(project.id)))
}

/// GET /v1/app-configurations/:app_name
pub async fn get_one(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(app_name): Path<String>,
) -> Result<Json<AppConfiguration>, PlatformError> {
    let project = authenticate_project(&state, &headers)?;
    state
        .app_configurations
        .get(project.id, &app_name)
        .map(Json)
        .ok_or_else(|| {
            PlatformError::AppConfigurationNotFound(format!(
                "App '{}' is not configured for this project",
                app_name
            ))
        })
}

/// DELETE /v1/app-configurations/:app_name
pub async fn delete_one(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(app_name): Path<String>,
) -> Result<StatusCode, PlatformError> {
    let project = authenticate_project(&state, &headers)?;
    if state.app_configurations.delete(project.id, &app_name) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(PlatformError::AppConfigurationNotFound(format!(
            "App '{}' is not configured for this project",
            app_name
        )))
    }
}
