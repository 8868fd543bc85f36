//! Security credentials: typed secret material and the operations on it.
//!
//! A LinkedAccount (and an App's default credential set) stores an opaque
//! JSON blob; the scheme on the account says how to read it. This module owns
//! the typed view of those blobs plus the resolution engine and the request
//! injector.

pub mod injection;
pub mod resolver;

pub use injection::inject_credentials;
pub use resolver::{resolve, ResolvedSecurityCredentials};

use crate::apps::SecurityScheme;
use crate::error::PlatformError;
use serde::{Deserialize, Serialize};

/// API-key secret material.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyCredentials {
    pub secret_key: String,
}

/// OAuth2 token set.
///
/// `expires_at` is absolute epoch seconds, always computed locally from the
/// provider's `expires_in` at exchange/refresh time. `None` means the token
/// never expires.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OAuth2Credentials {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl OAuth2Credentials {
    /// Strict comparison, no leeway: expired iff `expires_at <= now`.
    pub fn is_expired(&self, now: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now,
            None => false,
        }
    }
}

/// Typed credential material, one variant per resolvable scheme.
#[derive(Clone, Debug, PartialEq)]
pub enum SecurityCredentials {
    ApiKey(ApiKeyCredentials),
    OAuth2(OAuth2Credentials),
    NoAuth,
}

impl SecurityCredentials {
    /// Parse an opaque credential blob under the account's scheme.
    pub fn from_value(
        scheme: SecurityScheme,
        value: &serde_json::Value,
    ) -> Result<Self, PlatformError> {
        match scheme {
            SecurityScheme::ApiKey => {
                let creds: ApiKeyCredentials =
                    serde_json::from_value(value.clone()).map_err(|e| {
                        PlatformError::Internal(format!("Malformed api_key credentials: {}", e))
                    })?;
                Ok(SecurityCredentials::ApiKey(creds))
            }
            SecurityScheme::OAuth2 => {
                let creds: OAuth2Credentials =
                    serde_json::from_value(value.clone()).map_err(|e| {
                        PlatformError::Internal(format!("Malformed oauth2 credentials: {}", e))
                    })?;
                Ok(SecurityCredentials::OAuth2(creds))
            }
            SecurityScheme::NoAuth => Ok(SecurityCredentials::NoAuth),
            other => Err(PlatformError::NoImplementationFound(format!(
                "Credentials for scheme '{}' are not supported",
                other
            ))),
        }
    }

    /// Serialize back to the opaque blob form stored on a LinkedAccount.
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            SecurityCredentials::ApiKey(creds) => {
                serde_json::to_value(creds).unwrap_or(serde_json::Value::Null)
            }
            SecurityCredentials::OAuth2(creds) => {
                serde_json::to_value(creds).unwrap_or(serde_json::Value::Null)
            }
            SecurityCredentials::NoAuth => serde_json::json!({}),
        }
    }
}

/// Whether a stored credential blob counts as absent.
///
/// An empty object is treated identically to null/missing: it is not a valid
/// empty credential, it is "no credential at all" for precedence purposes.
pub fn credentials_absent(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
