//! Signed OAuth2 linking state.
//!
//! The linking handshake must survive without server-side session storage,
//! so everything the callback needs travels in the `state` query parameter as
//! a signed compact token (JWT, HMAC). The token is signed but NOT encrypted:
//! never add a true secret (API key, access token) to this payload. The PKCE
//! verifier is fine — it is useless without the one-time authorization code.

use crate::error::PlatformError;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Linking metadata carried through the provider redirect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkingState {
    pub app_name: String,
    pub project_id: Uuid,
    pub linked_account_owner_id: String,
    /// The callback redirect_uri used at authorization time; the code
    /// exchange must repeat it exactly.
    pub redirect_uri: String,
    pub code_verifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_oauth2_link_redirect_url: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct StateClaims {
    #[serde(flatten)]
    state: LinkingState,
    iat: i64,
    exp: i64,
}

/// Signs and verifies linking-state tokens with the process-wide key.
///
/// The key must be identical across all instances behind a load balancer; a
/// callback landing on an instance with a different key fails verification.
pub struct StateSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    ttl_seconds: i64,
}

impl StateSigner {
    pub fn new(
        signing_key: &str,
        algorithm_name: &str,
        ttl_seconds: i64,
    ) -> Result<Self, PlatformError> {
        let algorithm = match algorithm_name {
            "HS256" => Algorithm::HS256,
            "HS384" => Algorithm::HS384,
            "HS512" => Algorithm::HS512,
            other => {
                return Err(PlatformError::Internal(format!(
                    "Unsupported state signing algorithm '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            encoding_key: EncodingKey::from_secret(signing_key.as_bytes()),
            decoding_key: DecodingKey::from_secret(signing_key.as_bytes()),
            algorithm,
            ttl_seconds,
        })
    }

    /// Sign a state payload into a compact token.
    pub fn sign(&self, state: &LinkingState) -> Result<String, PlatformError> {
        let now = chrono::Utc::now().timestamp();
        let claims = StateClaims {
            state: state.clone(),
            iat: now,
            exp: now + self.ttl_seconds,
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| PlatformError::Internal(format!("Failed to sign linking state: {}", e)))
    }

    /// Verify a token and recover the state payload.
    ///
    /// Any failure — bad signature, malformed payload, expired token — is an
    /// `AuthenticationError`; there is no partial recovery.
    pub fn verify(&self, token: &str) -> Result<LinkingState, PlatformError> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;

        let data = decode::<StateClaims>(token, &self.decoding_key, &validation).map_err(|e| {
            PlatformError::AuthenticationError(format!("Invalid linking state: {}", e))
        })?;
        Ok(data.claims.state)
    }
}

/// Replace the value of the `state` query parameter in an authorization URL.
///
/// The OAuth2 adapter has no hook to inject a custom state before the URL is
/// built, so the signed token is swapped in afterwards. Only the `state`
/// parameter is touched; every other byte of the URL passes through intact.
pub fn replace_state_param(url: &str, new_state: &str) -> Result<String, PlatformError> {
    let Some((base, query)) = url.split_once('?') else {
        return Err(PlatformError::Internal(format!(
            "Authorization URL has no query string: {}",
            url
        )));
    };

    let mut replaced = false;
    let rewritten: Vec<String> = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some(("state", _)) => {
                replaced = true;
                format!("state={}", urlencoding::encode(new_state))
            }
            _ => pair.to_string(),
        })
        .collect();

    if !replaced {
        return Err(PlatformError::Internal(format!(
            "Authorization URL has no state parameter: {}",
            url
        )));
    }

    Ok(format!("{}?{}", base, rewritten.join("&")))
}
