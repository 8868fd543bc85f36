//! Platform error taxonomy.
//!
//! Every platform-originated failure carries a stable machine-checkable kind
//! plus a human-readable message. Downstream (provider-side) failures are not
//! errors at this level — the executor folds them into a `success = false`
//! result instead (see [`crate::executor`]).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::fmt;

/// All platform-originated error kinds.
///
/// The string returned by [`PlatformError::kind`] is part of the API contract
/// and must never change for an existing variant.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformError {
    /// The named App does not exist.
    AppNotFound(String),
    /// The named Function does not exist.
    FunctionNotFound(String),
    /// No AppConfiguration exists for (project, app).
    AppConfigurationNotFound(String),
    /// The AppConfiguration exists but is disabled.
    AppConfigurationDisabled(String),
    /// The Function is excluded by the AppConfiguration's allow list.
    FunctionNotEnabled(String),
    /// No LinkedAccount exists for (project, app, owner id).
    LinkedAccountNotFound(String),
    /// The LinkedAccount exists but is disabled.
    LinkedAccountDisabled(String),
    /// No usable credentials or no handler for the requested security scheme.
    NoImplementationFound(String),
    /// State verification or caller authentication failed.
    AuthenticationError(String),
    /// The OAuth2 provider rejected a token exchange or refresh.
    OAuth2Error(String),
    /// Per-project execution quota exhausted.
    RateLimitExceeded(String),
    /// The request is malformed (missing/invalid parameters).
    InvalidRequest(String),
    /// Unexpected internal failure.
    Internal(String),
}

impl PlatformError {
    /// Stable machine-checkable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PlatformError::AppNotFound(_) => "app_not_found",
            PlatformError::FunctionNotFound(_) => "function_not_found",
            PlatformError::AppConfigurationNotFound(_) => "app_configuration_not_found",
            PlatformError::AppConfigurationDisabled(_) => "app_configuration_disabled",
            PlatformError::FunctionNotEnabled(_) => "function_not_enabled",
            PlatformError::LinkedAccountNotFound(_) => "linked_account_not_found",
            PlatformError::LinkedAccountDisabled(_) => "linked_account_disabled",
            PlatformError::NoImplementationFound(_) => "no_implementation_found",
            PlatformError::AuthenticationError(_) => "authentication_error",
            PlatformError::OAuth2Error(_) => "oauth2_error",
            PlatformError::RateLimitExceeded(_) => "rate_limit_exceeded",
            PlatformError::InvalidRequest(_) => "invalid_request",
            PlatformError::Internal(_) => "internal_error",
        }
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        match self {
            PlatformError::AppNotFound(msg)
            | PlatformError::FunctionNotFound(msg)
            | PlatformError::AppConfigurationNotFound(msg)
            | PlatformError::AppConfigurationDisabled(msg)
            | PlatformError::FunctionNotEnabled(msg)
            | PlatformError::LinkedAccountNotFound(msg)
            | PlatformError::LinkedAccountDisabled(msg)
            | PlatformError::NoImplementationFound(msg)
            | PlatformError::AuthenticationError(msg)
            | PlatformError::OAuth2Error(msg)
            | PlatformError::RateLimitExceeded(msg)
            | PlatformError::InvalidRequest(msg)
            | PlatformError::Internal(msg) => msg,
        }
    }

    /// HTTP status this error maps to at the API surface.
    pub fn status(&self) -> StatusCode {
        match self {
            PlatformError::AppNotFound(_)
            | PlatformError::FunctionNotFound(_)
            | PlatformError::AppConfigurationNotFound(_)
            | PlatformError::LinkedAccountNotFound(_) => StatusCode::NOT_FOUND,
            PlatformError::AppConfigurationDisabled(_)
            | PlatformError::FunctionNotEnabled(_)
            | PlatformError::LinkedAccountDisabled(_) => StatusCode::FORBIDDEN,
            PlatformError::NoImplementationFound(_) => StatusCode::NOT_IMPLEMENTED,
            PlatformError::AuthenticationError(_) | PlatformError::OAuth2Error(_) => {
                StatusCode::UNAUTHORIZED
            }
            PlatformError::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            PlatformError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            PlatformError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.message())
    }
}

impl std::error::Error for PlatformError {}

impl From<anyhow::Error> for PlatformError {
    fn from(e: anyhow::Error) -> Self {
        PlatformError::Internal(format!("{:#}", e))
    }
}

/// JSON error body: `{"error": {"kind": ..., "message": ...}}`.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    kind: &'static str,
    message: String,
}

impl IntoResponse for PlatformError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: ErrorDetail {
                kind: self.kind(),
                message: self.message().to_string(),
            },
        });
        (self.status(), body).into_response()
    }
}
