//! App, Function and AppConfiguration model.
//!
//! An App is a third-party integration definition: which security schemes it
//! supports, where each scheme's credential goes on the wire, and optional
//! platform-owned default credentials. A Function is one callable REST
//! operation exposed by an App. An AppConfiguration is a project's opt-in to
//! an App.

mod registry;

pub use registry::{AppConfigurationRegistry, AppRegistry, ProjectRegistry};

use crate::error::PlatformError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Authentication mechanism an App (and its LinkedAccounts) uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityScheme {
    #[serde(rename = "no_auth")]
    NoAuth,
    #[serde(rename = "api_key")]
    ApiKey,
    #[serde(rename = "oauth2")]
    OAuth2,
    #[serde(rename = "http_basic")]
    HttpBasic,
    #[serde(rename = "http_bearer")]
    HttpBearer,
}

impl SecurityScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityScheme::NoAuth => "no_auth",
            SecurityScheme::ApiKey => "api_key",
            SecurityScheme::OAuth2 => "oauth2",
            SecurityScheme::HttpBasic => "http_basic",
            SecurityScheme::HttpBearer => "http_bearer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "no_auth" => Some(SecurityScheme::NoAuth),
            "api_key" => Some(SecurityScheme::ApiKey),
            "oauth2" => Some(SecurityScheme::OAuth2),
            "http_basic" => Some(SecurityScheme::HttpBasic),
            "http_bearer" => Some(SecurityScheme::HttpBearer),
            _ => None,
        }
    }
}

impl std::fmt::Display for SecurityScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a credential is placed on an outbound request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpLocation {
    Header,
    Query,
    Body,
    Cookie,
}

/// API-key scheme: which request location and parameter name carry the key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiKeySchemeConfig {
    pub location: HttpLocation,
    pub name: String,
    /// Optional prefix prepended to the secret (e.g. `"Token "`).
    #[serde(default)]
    pub prefix: Option<String>,
}

/// OAuth2 scheme: provider endpoints and client credentials.
///
/// Either `server_metadata_url` (an OIDC discovery document, from which the
/// endpoints are resolved at first use) or the three explicit URLs must be
/// present. Missing both is a configuration error caught at App-definition
/// time; the adapter surfaces it when a client is built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OAuth2SchemeConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub authorize_url: Option<String>,
    #[serde(default)]
    pub access_token_url: Option<String>,
    #[serde(default)]
    pub refresh_token_url: Option<String>,
    #[serde(default)]
    pub server_metadata_url: Option<String>,
    #[serde(default)]
    pub token_endpoint_auth_method: Option<String>,
    /// Header that carries the access token on outbound calls. Almost always
    /// `Authorization`, but some providers use a non-standard one.
    #[serde(default = "default_authorization_header")]
    pub header: String,
    #[serde(default = "default_bearer_prefix")]
    pub prefix: String,
}

/// Bearer-token scheme. The header is almost always `Authorization` but some
/// providers use a non-standard one, so it stays configurable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HttpBearerSchemeConfig {
    #[serde(default = "default_authorization_header")]
    pub header: String,
    #[serde(default = "default_bearer_prefix")]
    pub prefix: String,
}

fn default_authorization_header() -> String {
    "Authorization".to_string()
}

fn default_bearer_prefix() -> String {
    "Bearer".to_string()
}

impl Default for HttpBearerSchemeConfig {
    fn default() -> Self {
        Self {
            header: default_authorization_header(),
            prefix: default_bearer_prefix(),
        }
    }
}

/// Marker configs for schemes that carry no settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NoAuthSchemeConfig {}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpBasicSchemeConfig {}

/// The security schemes an App supports, one optional config per scheme.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SecuritySchemes {
    #[serde(default)]
    pub no_auth: Option<NoAuthSchemeConfig>,
    #[serde(default)]
    pub api_key: Option<ApiKeySchemeConfig>,
    #[serde(default)]
    pub oauth2: Option<OAuth2SchemeConfig>,
    #[serde(default)]
    pub http_basic: Option<HttpBasicSchemeConfig>,
    #[serde(default)]
    pub http_bearer: Option<HttpBearerSchemeConfig>,
}

/// A scheme definition resolved for one outbound call.
///
/// Always taken from the App (the LinkedAccount only stores secret material,
/// never where the secret goes on the wire).
#[derive(Clone, Debug, PartialEq)]
pub enum SecuritySchemeConfig {
    NoAuth,
    ApiKey(ApiKeySchemeConfig),
    OAuth2(OAuth2SchemeConfig),
    HttpBasic,
    HttpBearer(HttpBearerSchemeConfig),
}

impl SecuritySchemes {
    /// Whether the App declares support for `scheme`.
    pub fn supports(&self, scheme: SecurityScheme) -> bool {
        match scheme {
            SecurityScheme::NoAuth => self.no_auth.is_some(),
            SecurityScheme::ApiKey => self.api_key.is_some(),
            SecurityScheme::OAuth2 => self.oauth2.is_some(),
            SecurityScheme::HttpBasic => self.http_basic.is_some(),
            SecurityScheme::HttpBearer => self.http_bearer.is_some(),
        }
    }

    /// The declared config for `scheme`, if supported.
    pub fn get(&self, scheme: SecurityScheme) -> Option<SecuritySchemeConfig> {
        match scheme {
            SecurityScheme::NoAuth => self.no_auth.as_ref().map(|_| SecuritySchemeConfig::NoAuth),
            SecurityScheme::ApiKey => self
                .api_key
                .as_ref()
                .map(|c| SecuritySchemeConfig::ApiKey(c.clone())),
            SecurityScheme::OAuth2 => self
                .oauth2
                .as_ref()
                .map(|c| SecuritySchemeConfig::OAuth2(c.clone())),
            SecurityScheme::HttpBasic => self
                .http_basic
                .as_ref()
                .map(|_| SecuritySchemeConfig::HttpBasic),
            SecurityScheme::HttpBearer => self
                .http_bearer
                .as_ref()
                .map(|c| SecuritySchemeConfig::HttpBearer(c.clone())),
        }
    }

    fn supported(&self) -> Vec<SecurityScheme> {
        let mut schemes = Vec::new();
        for scheme in [
            SecurityScheme::NoAuth,
            SecurityScheme::ApiKey,
            SecurityScheme::OAuth2,
            SecurityScheme::HttpBasic,
            SecurityScheme::HttpBearer,
        ] {
            if self.supports(scheme) {
                schemes.push(scheme);
            }
        }
        schemes
    }
}

/// A third-party integration definition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct App {
    /// Unique immutable identifier, e.g. `GOOGLE_CALENDAR`.
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub security_schemes: SecuritySchemes,
    /// Platform-owned fallback credentials, keyed by scheme. Used only when a
    /// LinkedAccount has no credentials of its own.
    #[serde(default)]
    pub default_security_credentials_by_scheme: HashMap<SecurityScheme, serde_json::Value>,
}

impl App {
    /// Schemes this App supports.
    pub fn supported_schemes(&self) -> Vec<SecurityScheme> {
        self.security_schemes.supported()
    }

    /// Default credentials for `scheme`, if the platform owns any.
    pub fn default_credentials(&self, scheme: SecurityScheme) -> Option<&serde_json::Value> {
        self.default_security_credentials_by_scheme.get(&scheme)
    }

    /// Every scheme with default credentials must also be a supported scheme.
    pub fn validate(&self) -> Result<(), PlatformError> {
        for scheme in self.default_security_credentials_by_scheme.keys() {
            if !self.security_schemes.supports(*scheme) {
                return Err(PlatformError::InvalidRequest(format!(
                    "App '{}' has default credentials for unsupported scheme '{}'",
                    self.name, scheme
                )));
            }
        }
        Ok(())
    }
}

/// REST wire metadata for a Function.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RestMetadata {
    /// HTTP method, uppercase (`GET`, `POST`, ...).
    pub method: String,
    /// Base URL of the target server, no trailing slash.
    pub server_url: String,
    /// Path template with `{param}` placeholders.
    pub path: String,
}

/// One callable operation exposed by an App.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Unique name, conventionally `APP_NAME__FUNCTION_NAME`.
    pub name: String,
    pub app_name: String,
    #[serde(default)]
    pub description: String,
    pub protocol: RestMetadata,
}

/// A project's opt-in, per-App settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfiguration {
    pub project_id: Uuid,
    pub app_name: String,
    /// The scheme this project uses for the App. LinkedAccounts must match.
    pub security_scheme: SecurityScheme,
    pub enabled: bool,
    pub all_functions_enabled: bool,
    #[serde(default)]
    pub enabled_functions: Vec<String>,
}

impl AppConfiguration {
    /// Whether `function_name` may be executed under this configuration.
    pub fn function_allowed(&self, function_name: &str) -> bool {
        self.all_functions_enabled || self.enabled_functions.iter().any(|f| f == function_name)
    }
}

/// A client project. Authenticated by its API key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub api_key: String,
}
