//! OAuth2 client adapter.
//!
//! Translates an App's OAuth2 scheme config into the authorization-code +
//! PKCE handshake: build an authorization URL, exchange a code for tokens
//! without any server-side session, refresh a token. Clients are built fresh
//! per request from explicit config — there is no shared client registry, so
//! per-app secrets never leak into long-lived state.

use crate::apps::OAuth2SchemeConfig;
use crate::error::PlatformError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

/// PKCE code verifier length in bytes before base64url encoding.
const PKCE_VERIFIER_BYTES: usize = 32;

/// Generate a PKCE code verifier (random 32 bytes, base64url, no padding).
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; PKCE_VERIFIER_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Derive the S256 code challenge: `BASE64URL(SHA256(verifier))`.
pub fn code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

fn random_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Everything needed to start a PKCE flow without a browser session.
#[derive(Clone, Debug)]
pub struct AuthorizationRequest {
    pub url: String,
    /// The library-generated `state` query value; the linking flow replaces
    /// it with a signed token before handing the URL out.
    pub state: String,
    pub code_verifier: String,
    pub nonce: String,
}

/// Query parameters an OAuth2 provider sends to the callback endpoint.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct OAuth2CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Resolved provider endpoints.
struct Endpoints {
    authorize_url: String,
    token_url: String,
    refresh_url: String,
}

/// OIDC discovery document, reduced to the fields the adapter needs.
#[derive(Deserialize)]
struct DiscoveryDocument {
    authorization_endpoint: String,
    token_endpoint: String,
}

/// Standard OAuth2 error body from a token endpoint.
#[derive(Deserialize)]
struct TokenErrorBody {
    error: String,
    error_description: Option<String>,
}

/// A per-request OAuth2 client for one App.
pub struct OAuth2Client {
    app_name: String,
    config: OAuth2SchemeConfig,
    http: reqwest::Client,
}

impl OAuth2Client {
    /// Build a client from explicit App config. `timeout` bounds every
    /// outbound call to the provider.
    pub fn new(
        app_name: &str,
        config: OAuth2SchemeConfig,
        timeout: Duration,
    ) -> Result<Self, PlatformError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PlatformError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            app_name: app_name.to_string(),
            config,
            http,
        })
    }

    /// Resolve the authorize/token endpoints, fetching the OIDC discovery
    /// document when the App supplies `server_metadata_url` instead of
    /// explicit URLs.
    async fn endpoints(&self) -> Result<Endpoints, PlatformError> {
        if let (Some(authorize_url), Some(token_url)) = (
            self.config.authorize_url.clone(),
            self.config.access_token_url.clone(),
        ) {
            let refresh_url = self
                .config
                .refresh_token_url
                .clone()
                .unwrap_or_else(|| token_url.clone());
            return Ok(Endpoints {
                authorize_url,
                token_url,
                refresh_url,
            });
        }

        let Some(metadata_url) = self.config.server_metadata_url.clone() else {
            return Err(PlatformError::InvalidRequest(format!(
                "App '{}' OAuth2 config has neither explicit endpoints nor a server_metadata_url",
                self.app_name
            )));
        };

        tracing::debug!(app = %self.app_name, url = %metadata_url, "Fetching OIDC discovery document");
        let document: DiscoveryDocument = self
            .http
            .get(&metadata_url)
            .send()
            .await
            .map_err(|e| {
                PlatformError::OAuth2Error(format!("Failed to fetch discovery document: {}", e))
            })?
            .json()
            .await
            .map_err(|e| {
                PlatformError::OAuth2Error(format!("Invalid discovery document: {}", e))
            })?;

        let refresh_url = self
            .config
            .refresh_token_url
            .clone()
            .unwrap_or_else(|| document.token_endpoint.clone());
        Ok(Endpoints {
            authorize_url: document.authorization_endpoint,
            token_url: document.token_endpoint,
            refresh_url,
        })
    }

    /// Build the authorization URL with PKCE (S256) and the fixed defaults
    /// `access_type=offline` and `prompt=consent` so providers keep issuing
    /// refresh tokens on re-auth.
    pub async fn build_authorization_url(
        &self,
        redirect_uri: &str,
    ) -> Result<AuthorizationRequest, PlatformError> {
        let endpoints = self.endpoints().await?;
        let code_verifier = generate_code_verifier();
        let challenge = code_challenge(&code_verifier);
        let state = Uuid::new_v4().simple().to_string();
        let nonce = random_nonce();

        let separator = if endpoints.authorize_url.contains('?') {
            '&'
        } else {
            '?'
        };
        let url = format!(
            "{}{}client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&code_challenge={}&code_challenge_method=S256&nonce={}&access_type=offline&prompt=consent",
            endpoints.authorize_url,
            separator,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&self.config.scope),
            urlencoding::encode(&state),
            urlencoding::encode(&challenge),
            urlencoding::encode(&nonce),
        );

        Ok(AuthorizationRequest {
            url,
            state,
            code_verifier,
            nonce,
        })
    }

    /// Exchange an authorization code for a token response, reading
    /// code/error directly from the callback query parameters instead of a
    /// server-side session.
    ///
    /// If the provider returned an `error` parameter, fails immediately with
    /// its code and description. If the response carries an `id_token` and a
    /// `nonce` was supplied, the id-token claims are validated against that
    /// nonce and attached to the returned value under `userinfo`.
    pub async fn exchange_code_without_session(
        &self,
        params: &OAuth2CallbackParams,
        redirect_uri: &str,
        code_verifier: &str,
        nonce: Option<&str>,
    ) -> Result<serde_json::Value, PlatformError> {
        if let Some(error) = &params.error {
            let description = params
                .error_description
                .as_deref()
                .unwrap_or("no description");
            return Err(PlatformError::OAuth2Error(format!(
                "Provider returned error '{}': {}",
                error, description
            )));
        }

        let code = params.code.as_deref().ok_or_else(|| {
            PlatformError::OAuth2Error("Callback is missing the 'code' parameter".to_string())
        })?;

        let endpoints = self.endpoints().await?;
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", code_verifier),
        ];

        tracing::debug!(app = %self.app_name, token_url = %endpoints.token_url, "Exchanging authorization code");
        let mut response = self.post_token_request(&endpoints.token_url, &form).await?;

        if let Some(expected_nonce) = nonce {
            if let Some(id_token) = response.get("id_token").and_then(|v| v.as_str()) {
                let claims = decode_id_token_claims(id_token)?;
                let claim_nonce = claims.get("nonce").and_then(|v| v.as_str());
                if claim_nonce != Some(expected_nonce) {
                    return Err(PlatformError::OAuth2Error(
                        "id_token nonce does not match the linking state".to_string(),
                    ));
                }
                response["userinfo"] = claims;
            }
        }

        Ok(response)
    }

    /// Perform a `grant_type=refresh_token` exchange.
    pub async fn refresh(&self, refresh_token: &str) -> Result<serde_json::Value, PlatformError> {
        let endpoints = self.endpoints().await?;
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        tracing::debug!(app = %self.app_name, token_url = %endpoints.refresh_url, "Refreshing access token");
        self.post_token_request(&endpoints.refresh_url, &form).await
    }

    /// POST a form to a token endpoint, attaching client credentials per the
    /// App's `token_endpoint_auth_method` (default: in the form body).
    async fn post_token_request(
        &self,
        token_url: &str,
        form: &[(&str, &str)],
    ) -> Result<serde_json::Value, PlatformError> {
        let auth_method = self
            .config
            .token_endpoint_auth_method
            .as_deref()
            .unwrap_or("client_secret_post");

        let mut params: Vec<(&str, &str)> = form.to_vec();
        let request = match auth_method {
            "client_secret_basic" => self
                .http
                .post(token_url)
                .basic_auth(&self.config.client_id, Some(&self.config.client_secret)),
            "none" => {
                params.push(("client_id", self.config.client_id.as_str()));
                self.http.post(token_url)
            }
            _ => {
                params.push(("client_id", self.config.client_id.as_str()));
                params.push(("client_secret", self.config.client_secret.as_str()));
                self.http.post(token_url)
            }
        };

        let response = request
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                PlatformError::OAuth2Error(format!("Token request to provider failed: {}", e))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            PlatformError::OAuth2Error(format!("Failed to read token response: {}", e))
        })?;

        if !status.is_success() {
            // Surface the provider's own error code when it sent one
            if let Ok(err) = serde_json::from_str::<TokenErrorBody>(&body) {
                let description = err.error_description.unwrap_or_default();
                return Err(PlatformError::OAuth2Error(format!(
                    "Provider rejected token request ({}): {} {}",
                    status, err.error, description
                )));
            }
            return Err(PlatformError::OAuth2Error(format!(
                "Provider rejected token request ({}): {}",
                status, body
            )));
        }

        serde_json::from_str(&body).map_err(|e| {
            PlatformError::OAuth2Error(format!("Token response is not valid JSON: {}", e))
        })
    }
}

/// Decode the claims segment of a compact JWT without signature verification.
///
/// The id_token arrives over the TLS channel to the token endpoint, the same
/// trust base as the rest of the token response; the caller only needs the
/// nonce binding and the profile claims.
fn decode_id_token_claims(id_token: &str) -> Result<serde_json::Value, PlatformError> {
    let mut segments = id_token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_)) => payload,
        _ => {
            return Err(PlatformError::OAuth2Error(
                "id_token is not a compact JWT".to_string(),
            ))
        }
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| PlatformError::OAuth2Error(format!("id_token payload is not base64: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| PlatformError::OAuth2Error(format!("id_token payload is not JSON: {}", e)))
}
