//! Credential injection.
//!
//! Pure placement of resolved credential material onto an outbound request.
//! Exactly one location is ever written per call; nothing is read back and no
//! IO happens here, which keeps the placement rules trivially testable.

use crate::apps::{HttpLocation, SecuritySchemeConfig};
use crate::error::PlatformError;
use crate::security::SecurityCredentials;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::collections::HashMap;

/// Place `credentials` onto the request parts according to `scheme`.
///
/// API keys land wherever the scheme says (header, query, body or cookie),
/// with the scheme's optional prefix prepended. OAuth2 and bearer tokens go
/// into the configured header as `"{prefix} {token}"`. Basic credentials are
/// base64-encoded into `Authorization`. NO_AUTH writes nothing.
pub fn inject_credentials(
    scheme: &SecuritySchemeConfig,
    credentials: &SecurityCredentials,
    headers: &mut HashMap<String, String>,
    query: &mut HashMap<String, String>,
    body: &mut serde_json::Map<String, serde_json::Value>,
    cookies: &mut HashMap<String, String>,
) -> Result<(), PlatformError> {
    match (scheme, credentials) {
        (SecuritySchemeConfig::NoAuth, SecurityCredentials::NoAuth) => Ok(()),

        (SecuritySchemeConfig::ApiKey(config), SecurityCredentials::ApiKey(creds)) => {
            let value = match &config.prefix {
                Some(prefix) => format!("{}{}", prefix, creds.secret_key),
                None => creds.secret_key.clone(),
            };
            match config.location {
                HttpLocation::Header => {
                    headers.insert(config.name.clone(), value);
                }
                HttpLocation::Query => {
                    query.insert(config.name.clone(), value);
                }
                HttpLocation::Body => {
                    body.insert(config.name.clone(), serde_json::Value::String(value));
                }
                HttpLocation::Cookie => {
                    cookies.insert(config.name.clone(), value);
                }
            }
            Ok(())
        }

        (SecuritySchemeConfig::OAuth2(config), SecurityCredentials::OAuth2(creds)) => {
            headers.insert(
                config.header.clone(),
                format!("{} {}", config.prefix, creds.access_token),
            );
            Ok(())
        }

        (SecuritySchemeConfig::HttpBearer(config), SecurityCredentials::OAuth2(creds)) => {
            headers.insert(
                config.header.clone(),
                format!("{} {}", config.prefix, creds.access_token),
            );
            Ok(())
        }

        (SecuritySchemeConfig::HttpBasic, SecurityCredentials::ApiKey(creds)) => {
            // The stored secret is "user:password"; encoded whole per RFC 7617.
            headers.insert(
                "Authorization".to_string(),
                format!("Basic {}", BASE64.encode(&creds.secret_key)),
            );
            Ok(())
        }

        // Never format the credentials themselves; they are secret material
        (SecuritySchemeConfig::NoAuth, _) => Err(mismatch("no_auth")),
        (SecuritySchemeConfig::ApiKey(_), _) => Err(mismatch("api_key")),
        (SecuritySchemeConfig::OAuth2(_), _) => Err(mismatch("oauth2")),
        (SecuritySchemeConfig::HttpBasic, _) => Err(mismatch("http_basic")),
        (SecuritySchemeConfig::HttpBearer(_), _) => Err(mismatch("http_bearer")),
    }
}

fn mismatch(scheme: &str) -> PlatformError {
    PlatformError::Internal(format!(
        "Scheme '{}' cannot carry the resolved credential type",
        scheme
    ))
}
