//! Credential resolution.
//!
//! Given an App and a LinkedAccount, produce the credential material an
//! outbound call must carry. The scheme definition (where the secret goes on
//! the wire) always comes from the App; the secret itself comes from the
//! LinkedAccount when it has one, else from the App's platform-owned default.
//! Expired OAuth2 tokens are refreshed here; the caller is responsible for
//! persisting the refreshed set before using it.

use crate::apps::{App, SecurityScheme, SecuritySchemeConfig};
use crate::error::PlatformError;
use crate::oauth::{parse_oauth2_security_credentials, OAuth2Client};
use crate::security::{credentials_absent, OAuth2Credentials, SecurityCredentials};
use crate::storage::LinkedAccount;
use std::time::Duration;

/// The outcome of credential resolution for one outbound call.
#[derive(Clone, Debug)]
pub struct ResolvedSecurityCredentials {
    /// Scheme definition, always taken from the App.
    pub scheme: SecuritySchemeConfig,
    pub credentials: SecurityCredentials,
    /// True when the App's default credentials were used because the
    /// LinkedAccount stored none of its own.
    pub used_app_default: bool,
    /// True when an expired OAuth2 token was refreshed; the caller must
    /// persist `credentials` back onto the LinkedAccount.
    pub was_refreshed: bool,
}

/// Resolve credentials for `linked_account` against `app`.
///
/// `http_timeout` bounds the token-refresh call when one is needed.
pub async fn resolve(
    app: &App,
    linked_account: &LinkedAccount,
    http_timeout: Duration,
) -> Result<ResolvedSecurityCredentials, PlatformError> {
    let scheme = linked_account.security_scheme;
    let scheme_config = app.security_schemes.get(scheme).ok_or_else(|| {
        PlatformError::NoImplementationFound(format!(
            "App '{}' does not support security scheme '{}'",
            app.name, scheme
        ))
    })?;

    // NO_AUTH carries no secret material, so there is nothing to pick between
    // the account and the App default; it never counts as a default.
    if scheme == SecurityScheme::NoAuth {
        return Ok(ResolvedSecurityCredentials {
            scheme: scheme_config,
            credentials: SecurityCredentials::NoAuth,
            used_app_default: false,
            was_refreshed: false,
        });
    }

    // Account credentials win; the App default only covers an empty blob.
    let (raw, used_app_default) = if !credentials_absent(&linked_account.security_credentials) {
        (&linked_account.security_credentials, false)
    } else if let Some(default) = app.default_credentials(scheme) {
        tracing::debug!(
            app = %app.name,
            owner = %linked_account.linked_account_owner_id,
            "Using app default credentials"
        );
        (default, true)
    } else {
        return Err(PlatformError::NoImplementationFound(format!(
            "No credentials available for app '{}' owner '{}'",
            app.name, linked_account.linked_account_owner_id
        )));
    };

    let credentials = SecurityCredentials::from_value(scheme, raw)?;

    match credentials {
        SecurityCredentials::OAuth2(oauth2) => {
            let now = chrono::Utc::now().timestamp();
            if !oauth2.is_expired(now) {
                return Ok(ResolvedSecurityCredentials {
                    scheme: scheme_config,
                    credentials: SecurityCredentials::OAuth2(oauth2),
                    used_app_default,
                    was_refreshed: false,
                });
            }

            let Some(refresh_token) = oauth2.refresh_token.clone() else {
                // Nothing to refresh with; send the stale token and let the
                // provider decide.
                tracing::warn!(
                    app = %app.name,
                    owner = %linked_account.linked_account_owner_id,
                    "Access token expired and no refresh token is stored; using it as-is"
                );
                return Ok(ResolvedSecurityCredentials {
                    scheme: scheme_config,
                    credentials: SecurityCredentials::OAuth2(oauth2),
                    used_app_default,
                    was_refreshed: false,
                });
            };

            let SecuritySchemeConfig::OAuth2(oauth2_config) = &scheme_config else {
                return Err(PlatformError::Internal(format!(
                    "App '{}' scheme config does not match oauth2 credentials",
                    app.name
                )));
            };

            tracing::info!(
                app = %app.name,
                owner = %linked_account.linked_account_owner_id,
                "Refreshing expired access token"
            );
            let client = OAuth2Client::new(&app.name, oauth2_config.clone(), http_timeout)?;
            let response = client.refresh(&refresh_token).await?;
            let mut refreshed =
                parse_oauth2_security_credentials(&app.name, &response, chrono::Utc::now().timestamp())?;
            // Providers that rotate refresh tokens return a new one; those
            // that do not expect the old one to keep working.
            if refreshed.refresh_token.is_none() {
                refreshed.refresh_token = Some(refresh_token);
            }

            Ok(ResolvedSecurityCredentials {
                scheme: scheme_config,
                credentials: SecurityCredentials::OAuth2(refreshed),
                used_app_default,
                was_refreshed: true,
            })
        }
        other => Ok(ResolvedSecurityCredentials {
            scheme: scheme_config,
            credentials: other,
            used_app_default,
            was_refreshed: false,
        }),
    }
}

/// Typed view of the resolved OAuth2 credentials, for callers that need the
/// token fields after resolution.
impl ResolvedSecurityCredentials {
    pub fn oauth2(&self) -> Option<&OAuth2Credentials> {
        match &self.credentials {
            SecurityCredentials::OAuth2(creds) => Some(creds),
            _ => None,
        }
    }
}
