//! Server configuration.
//!
//! Loaded from an optional TOML file with environment-variable overrides for
//! secrets. Two values are required and have no defaults: the linking-state
//! signing key (`ACI_SIGNING_KEY`) and the credential encryption key
//! (`ACI_ENCRYPTION_KEY`).

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

/// Minimum signing key length in bytes (256 bits).
const MIN_SIGNING_KEY_BYTES: usize = 32;

/// Complete server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AciConfig {
    /// Address the HTTP server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Public base URL of this deployment, used to build OAuth2 redirect URIs
    /// (e.g. `https://api.example.com`). No trailing slash.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Symmetric key used to sign linking-state tokens.
    ///
    /// Must be identical across all instances behind a load balancer,
    /// otherwise a callback landing on a different instance than the one
    /// that issued the state fails signature verification.
    #[serde(default)]
    pub signing_key: String,

    /// Signing algorithm name for the linking-state token. Only HMAC
    /// algorithms are supported.
    #[serde(default = "default_signing_algorithm")]
    pub signing_algorithm: String,

    /// How long a linking-state token stays valid (seconds).
    #[serde(default = "default_state_ttl")]
    pub state_ttl_seconds: i64,

    /// Path to the SQLite database holding linked accounts.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Base64-encoded 32-byte AES-256 key for credential encryption at rest.
    #[serde(default)]
    pub encryption_key: String,

    /// Timeout for outbound HTTP calls (provider token endpoints and target
    /// function servers), in seconds.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,

    /// Per-project function executions allowed per minute.
    #[serde(default = "default_execute_quota")]
    pub execute_quota_per_minute: u64,

    /// Optional TOML app catalog loaded at startup.
    #[serde(default)]
    pub apps_file: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_signing_algorithm() -> String {
    "HS256".to_string()
}

fn default_state_ttl() -> i64 {
    600
}

fn default_db_path() -> String {
    "aci.db".to_string()
}

fn default_http_timeout() -> u64 {
    30
}

fn default_execute_quota() -> u64 {
    600
}

impl Default for AciConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            public_base_url: default_public_base_url(),
            signing_key: String::new(),
            signing_algorithm: default_signing_algorithm(),
            state_ttl_seconds: default_state_ttl(),
            db_path: default_db_path(),
            encryption_key: String::new(),
            http_timeout_seconds: default_http_timeout(),
            execute_quota_per_minute: default_execute_quota(),
            apps_file: None,
        }
    }
}

impl AciConfig {
    /// Load configuration from the environment.
    ///
    /// If `ACI_CONFIG` points at a TOML file it is loaded first; individual
    /// `ACI_*` environment variables then override file values. Fails if the
    /// signing or encryption key is missing or the signing key is too short.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("ACI_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file {}", path))?;
                toml::from_str(&raw)
                    .with_context(|| format!("Failed to parse config file {}", path))?
            }
            Err(_) => AciConfig::default(),
        };

        if let Ok(v) = std::env::var("ACI_BIND_ADDR") {
            config.bind_addr = v;
        }
        if let Ok(v) = std::env::var("ACI_PUBLIC_BASE_URL") {
            config.public_base_url = v;
        }
        if let Ok(v) = std::env::var("ACI_SIGNING_KEY") {
            config.signing_key = v;
        }
        if let Ok(v) = std::env::var("ACI_SIGNING_ALGORITHM") {
            config.signing_algorithm = v;
        }
        if let Ok(v) = std::env::var("ACI_DB_PATH") {
            config.db_path = v;
        }
        if let Ok(v) = std::env::var("ACI_ENCRYPTION_KEY") {
            config.encryption_key = v;
        }
        if let Ok(v) = std::env::var("ACI_APPS_FILE") {
            config.apps_file = Some(v);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate required fields and key strength.
    pub fn validate(&self) -> Result<()> {
        if self.signing_key.is_empty() {
            return Err(anyhow!(
                "ACI_SIGNING_KEY is required. Generate one with: openssl rand -hex 32"
            ));
        }
        if self.signing_key.len() < MIN_SIGNING_KEY_BYTES {
            return Err(anyhow!(
                "Signing key must be at least {} bytes, got {}",
                MIN_SIGNING_KEY_BYTES,
                self.signing_key.len()
            ));
        }
        if !matches!(self.signing_algorithm.as_str(), "HS256" | "HS384" | "HS512") {
            return Err(anyhow!(
                "Unsupported signing algorithm '{}' (expected HS256, HS384 or HS512)",
                self.signing_algorithm
            ));
        }
        if self.encryption_key.is_empty() {
            return Err(anyhow!(
                "ACI_ENCRYPTION_KEY is required. Generate one with: openssl rand -base64 32"
            ));
        }
        Ok(())
    }

    /// The redirect URI OAuth2 providers send callbacks to.
    pub fn oauth2_callback_uri(&self) -> String {
        format!(
            "{}/v1/linked-accounts/oauth2/callback",
            self.public_base_url
        )
    }
}
