//! LinkedAccount routes: the OAuth2 linking flow plus direct CRUD.

use super::{authenticate_project, ApiState};
use crate::apps::{App, SecurityScheme, SecuritySchemeConfig};
use crate::error::PlatformError;
use crate::oauth::{
    parse_oauth2_security_credentials, providers::rewrite_oauth2_authorization_url,
    replace_state_param, LinkingState, OAuth2CallbackParams, OAuth2Client,
};
use crate::security::{credentials_absent, SecurityCredentials};
use crate::storage::PublicLinkedAccount;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct AuthorizeParams {
    pub app_name: String,
    pub linked_account_owner_id: String,
    #[serde(default)]
    pub after_oauth2_link_redirect_url: Option<String>,
}

#[derive(Serialize)]
pub struct AuthorizeResponse {
    pub url: String,
}

/// GET /v1/linked-accounts/oauth2/authorize
///
/// Starts the linking handshake: builds the provider authorization URL with
/// PKCE, swaps the library state for the signed linking token and returns the
/// URL for the caller to send its end user to.
pub async fn oauth2_authorize(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(params): Query<AuthorizeParams>,
) -> Result<Json<AuthorizeResponse>, PlatformError> {
    let project = authenticate_project(&state, &headers)?;
    let app = lookup_app(&state, &params.app_name)?;
    require_scheme_configured(&state, project.id, &app, SecurityScheme::OAuth2)?;
    let oauth2_config = oauth2_scheme(&app)?;

    let redirect_uri = state.config.oauth2_callback_uri();
    let client = OAuth2Client::new(
        &app.name,
        oauth2_config,
        Duration::from_secs(state.config.http_timeout_seconds),
    )?;
    let request = client.build_authorization_url(&redirect_uri).await?;

    let linking_state = LinkingState {
        app_name: app.name.clone(),
        project_id: project.id,
        linked_account_owner_id: params.linked_account_owner_id,
        redirect_uri,
        code_verifier: request.code_verifier,
        nonce: Some(request.nonce),
        after_oauth2_link_redirect_url: params.after_oauth2_link_redirect_url,
    };
    let token = state.state_signer.sign(&linking_state)?;

    let url = replace_state_param(&request.url, &token)?;
    let url = rewrite_oauth2_authorization_url(&app.name, &url);

    tracing::info!(
        app = %app.name,
        project = %project.id,
        owner = %linking_state.linked_account_owner_id,
        "OAuth2 linking started"
    );
    Ok(Json(AuthorizeResponse { url }))
}

/// GET /v1/linked-accounts/oauth2/callback
///
/// Unauthenticated: the provider redirects the end user's browser here. All
/// trust comes from the signed state token.
pub async fn oauth2_callback(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<OAuth2CallbackParams>,
) -> Result<Response, PlatformError> {
    let token = params.state.as_deref().ok_or_else(|| {
        PlatformError::AuthenticationError("Callback is missing the 'state' parameter".to_string())
    })?;
    let linking_state = state.state_signer.verify(token)?;

    let app = lookup_app(&state, &linking_state.app_name)?;
    // The state token proves the linking was started, not that it is still
    // authorized: the configuration may have been deleted, disabled or
    // re-schemed since, so it is checked again before any token changes hands.
    require_scheme_configured(
        &state,
        linking_state.project_id,
        &app,
        SecurityScheme::OAuth2,
    )?;
    let oauth2_config = oauth2_scheme(&app)?;
    let client = OAuth2Client::new(
        &app.name,
        oauth2_config,
        Duration::from_secs(state.config.http_timeout_seconds),
    )?;

    let response = client
        .exchange_code_without_session(
            &params,
            &linking_state.redirect_uri,
            &linking_state.code_verifier,
            linking_state.nonce.as_deref(),
        )
        .await?;
    let credentials = parse_oauth2_security_credentials(
        &app.name,
        &response,
        chrono::Utc::now().timestamp(),
    )?;

    let account = state
        .linked_accounts
        .upsert(
            linking_state.project_id,
            &app.name,
            &linking_state.linked_account_owner_id,
            SecurityScheme::OAuth2,
            &SecurityCredentials::OAuth2(credentials).to_value(),
        )
        .map_err(PlatformError::from)?;

    tracing::info!(
        app = %app.name,
        project = %linking_state.project_id,
        owner = %linking_state.linked_account_owner_id,
        "OAuth2 account linked"
    );

    match linking_state.after_oauth2_link_redirect_url {
        Some(url) => Ok(Redirect::to(&url).into_response()),
        None => Ok(Json(account.public()).into_response()),
    }
}

#[derive(Deserialize)]
pub struct CreateLinkedAccount {
    pub app_name: String,
    pub linked_account_owner_id: String,
    pub security_scheme: SecurityScheme,
    #[serde(default)]
    pub security_credentials: serde_json::Value,
}

/// POST /v1/linked-accounts — direct linking for non-OAuth2 schemes.
pub async fn create(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(request): Json<CreateLinkedAccount>,
) -> Result<Json<PublicLinkedAccount>, PlatformError> {
    let project = authenticate_project(&state, &headers)?;
    let app = lookup_app(&state, &request.app_name)?;
    require_scheme_configured(&state, project.id, &app, request.security_scheme)?;

    if request.security_scheme == SecurityScheme::OAuth2 {
        return Err(PlatformError::InvalidRequest(
            "OAuth2 accounts are linked through /v1/linked-accounts/oauth2/authorize".to_string(),
        ));
    }

    // A non-empty blob must parse under the declared scheme; an empty one is
    // allowed only when the App carries default credentials to fall back on.
    if !credentials_absent(&request.security_credentials) {
        SecurityCredentials::from_value(request.security_scheme, &request.security_credentials)?;
    } else if request.security_scheme != SecurityScheme::NoAuth
        && app.default_credentials(request.security_scheme).is_none()
    {
        return Err(PlatformError::NoImplementationFound(format!(
            "No credentials supplied and app '{}' has no defaults for scheme '{}'",
            app.name, request.security_scheme
        )));
    }

    let account = state
        .linked_accounts
        .upsert(
            project.id,
            &app.name,
            &request.linked_account_owner_id,
            request.security_scheme,
            &request.security_credentials,
        )
        .map_err(PlatformError::from)?;

    tracing::info!(
        app = %app.name,
        project = %project.id,
        owner = %account.linked_account_owner_id,
        scheme = %account.security_scheme,
        "Account linked"
    );
    Ok(Json(account.public()))
}

#[derive(Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub app_name: Option<String>,
}

/// GET /v1/linked-accounts[?app_name]
pub async fn list(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<PublicLinkedAccount>>, PlatformError> {
    let project = authenticate_project(&state, &headers)?;
    let accounts = state
        .linked_accounts
        .list_by_project(project.id, params.app_name.as_deref())
        .map_err(PlatformError::from)?;
    Ok(Json(accounts))
}

#[derive(Deserialize)]
pub struct DeleteParams {
    pub app_name: String,
    pub linked_account_owner_id: String,
}

/// DELETE /v1/linked-accounts?app_name&linked_account_owner_id
pub async fn delete_one(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(params): Query<DeleteParams>,
) -> Result<StatusCode, PlatformError> {
    let project = authenticate_project(&state, &headers)?;
    let deleted = state
        .linked_accounts
        .delete(project.id, &params.app_name, &params.linked_account_owner_id)
        .map_err(PlatformError::from)?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(PlatformError::LinkedAccountNotFound(format!(
            "No linked account for app '{}' owner '{}'",
            params.app_name, params.linked_account_owner_id
        )))
    }
}

fn lookup_app(state: &ApiState, app_name: &str) -> Result<App, PlatformError> {
    state
        .registry
        .get_app(app_name)
        .ok_or_else(|| PlatformError::AppNotFound(format!("App '{}' not found", app_name)))
}

/// The project must have an enabled AppConfiguration for the App, and its
/// configured scheme must match the one being linked.
fn require_scheme_configured(
    state: &ApiState,
    project_id: Uuid,
    app: &App,
    scheme: SecurityScheme,
) -> Result<(), PlatformError> {
    let config = state
        .app_configurations
        .get(project_id, &app.name)
        .ok_or_else(|| {
            PlatformError::AppConfigurationNotFound(format!(
                "App '{}' is not configured for this project",
                app.name
            ))
        })?;
    if !config.enabled {
        return Err(PlatformError::AppConfigurationDisabled(format!(
            "App configuration for '{}' is disabled",
            app.name
        )));
    }
    if config.security_scheme != scheme {
        return Err(PlatformError::InvalidRequest(format!(
            "App '{}' is configured for scheme '{}', not '{}'",
            app.name, config.security_scheme, scheme
        )));
    }
    Ok(())
}

fn oauth2_scheme(app: &App) -> Result<crate::apps::OAuth2SchemeConfig, PlatformError> {
    match app.security_schemes.get(SecurityScheme::OAuth2) {
        Some(SecuritySchemeConfig::OAuth2(config)) => Ok(config),
        _ => Err(PlatformError::NoImplementationFound(format!(
            "App '{}' has no OAuth2 scheme",
            app.name
        ))),
    }
}
