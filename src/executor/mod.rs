//! Function execution.
//!
//! Dispatch of one Function call on behalf of one LinkedAccount: permission
//! checks (configuration enabled, function allowed, account enabled),
//! credential resolution, persistence of refreshed tokens, request assembly
//! and the outbound call itself.
//!
//! Platform-side failures (missing records, disabled flags, refresh failures)
//! surface as `Err(PlatformError)`. Downstream failures — the target server
//! rejecting or timing out — are not platform errors: they come back as
//! `Ok` with `success = false` so callers can distinguish "you did something
//! wrong" from "the provider did".

use crate::apps::{AppConfigurationRegistry, AppRegistry, FunctionDefinition};
use crate::error::PlatformError;
use crate::security::{inject_credentials, resolve};
use crate::storage::LinkedAccountStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Caller-supplied function arguments, split by wire location.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct FunctionInput {
    #[serde(default)]
    pub path: HashMap<String, String>,
    #[serde(default)]
    pub query: HashMap<String, String>,
    #[serde(default)]
    pub header: HashMap<String, String>,
    #[serde(default)]
    pub cookie: HashMap<String, String>,
    #[serde(default)]
    pub body: serde_json::Map<String, serde_json::Value>,
}

/// Outcome of one function execution.
#[derive(Clone, Debug, Serialize)]
pub struct FunctionExecutionResult {
    pub success: bool,
    /// Response payload on success; `null` on failure.
    pub data: serde_json::Value,
    /// Failure description when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FunctionExecutionResult {
    fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            success: false,
            data: serde_json::Value::Null,
            error: Some(error),
        }
    }
}

/// Executes Functions against their target servers.
pub struct Executor {
    registry: Arc<AppRegistry>,
    app_configurations: Arc<AppConfigurationRegistry>,
    linked_accounts: Arc<LinkedAccountStore>,
    http_timeout: Duration,
}

impl Executor {
    pub fn new(
        registry: Arc<AppRegistry>,
        app_configurations: Arc<AppConfigurationRegistry>,
        linked_accounts: Arc<LinkedAccountStore>,
        http_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            app_configurations,
            linked_accounts,
            http_timeout,
        }
    }

    /// Execute `function_name` for `linked_account_owner_id` in `project_id`.
    pub async fn execute(
        &self,
        project_id: Uuid,
        function_name: &str,
        linked_account_owner_id: &str,
        input: FunctionInput,
    ) -> Result<FunctionExecutionResult, PlatformError> {
        let function = self.registry.get_function(function_name).ok_or_else(|| {
            PlatformError::FunctionNotFound(format!("Function '{}' not found", function_name))
        })?;
        let app = self.registry.get_app(&function.app_name).ok_or_else(|| {
            PlatformError::AppNotFound(format!("App '{}' not found", function.app_name))
        })?;

        let config = self
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
        if !config.function_allowed(&function.name) {
            return Err(PlatformError::FunctionNotEnabled(format!(
                "Function '{}' is not enabled for this project",
                function.name
            )));
        }

        let account = self
            .linked_accounts
            .get(project_id, &app.name, linked_account_owner_id)
            .map_err(PlatformError::from)?
            .ok_or_else(|| {
                PlatformError::LinkedAccountNotFound(format!(
                    "No linked account for app '{}' owner '{}'",
                    app.name, linked_account_owner_id
                ))
            })?;
        if !account.enabled {
            return Err(PlatformError::LinkedAccountDisabled(format!(
                "Linked account for app '{}' owner '{}' is disabled",
                app.name, linked_account_owner_id
            )));
        }

        let resolved = resolve(&app, &account, self.http_timeout).await?;

        // Persist refreshed tokens before the outbound call; if the call fails
        // the new token must not be lost.
        if resolved.was_refreshed && !resolved.used_app_default {
            self.linked_accounts
                .update_credentials(
                    project_id,
                    &app.name,
                    linked_account_owner_id,
                    &resolved.credentials.to_value(),
                )
                .map_err(PlatformError::from)?;
        }

        let url = build_url(&function, &input.path)?;
        let mut headers = input.header.clone();
        let mut query = input.query.clone();
        let mut body = input.body.clone();
        let mut cookies = input.cookie.clone();
        inject_credentials(
            &resolved.scheme,
            &resolved.credentials,
            &mut headers,
            &mut query,
            &mut body,
            &mut cookies,
        )?;

        tracing::info!(
            function = %function.name,
            app = %app.name,
            project = %project_id,
            "Executing function"
        );
        Ok(self
            .send(&function, &url, headers, query, body, cookies)
            .await)
    }

    /// Perform the outbound call. Every failure from here on is a downstream
    /// failure and maps to `success = false`.
    async fn send(
        &self,
        function: &FunctionDefinition,
        url: &str,
        headers: HashMap<String, String>,
        query: HashMap<String, String>,
        body: serde_json::Map<String, serde_json::Value>,
        cookies: HashMap<String, String>,
    ) -> FunctionExecutionResult {
        let client = match reqwest::Client::builder().timeout(self.http_timeout).build() {
            Ok(client) => client,
            Err(e) => return FunctionExecutionResult::failed(format!("HTTP client error: {}", e)),
        };

        let method = match reqwest::Method::from_bytes(function.protocol.method.as_bytes()) {
            Ok(method) => method,
            Err(_) => {
                return FunctionExecutionResult::failed(format!(
                    "Invalid HTTP method '{}'",
                    function.protocol.method
                ))
            }
        };

        let mut request = client.request(method, url).query(&query);
        for (name, value) in &headers {
            request = request.header(name, value);
        }
        if !cookies.is_empty() {
            let mut pairs: Vec<String> =
                cookies.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            pairs.sort();
            request = request.header("Cookie", pairs.join("; "));
        }
        if !body.is_empty() {
            request = request.json(&body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(function = %function.name, error = %e, "Downstream request failed");
                return FunctionExecutionResult::failed(format!("Request failed: {}", e));
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                return FunctionExecutionResult::failed(format!(
                    "Failed to read response body: {}",
                    e
                ))
            }
        };

        if !status.is_success() {
            tracing::warn!(
                function = %function.name,
                status = %status,
                "Downstream server rejected the call"
            );
            return FunctionExecutionResult::failed(format!(
                "Downstream server returned {}: {}",
                status, text
            ));
        }

        // Non-JSON success bodies are passed through as a string
        let data = serde_json::from_str(&text)
            .unwrap_or_else(|_| serde_json::Value::String(text));
        FunctionExecutionResult::ok(data)
    }
}

/// Build the target URL from the function's REST metadata and path arguments.
///
/// Every `{param}` placeholder in the path template must have a value;
/// a missing one is the caller's error.
fn build_url(
    function: &FunctionDefinition,
    path_params: &HashMap<String, String>,
) -> Result<String, PlatformError> {
    let mut path = function.protocol.path.clone();
    for (name, value) in path_params {
        path = path.replace(&format!("{{{}}}", name), &urlencoding::encode(value));
    }

    if let (Some(start), Some(end)) = (path.find('{'), path.find('}')) {
        if start < end {
            return Err(PlatformError::InvalidRequest(format!(
                "Missing path parameter '{}' for function '{}'",
                &path[start + 1..end],
                function.name
            )));
        }
    }

    Ok(format!("{}{}", function.protocol.server_url, path))
}
