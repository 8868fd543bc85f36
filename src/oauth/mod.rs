//! OAuth2 support: the client adapter, per-provider quirks, and the signed
//! linking-state token.

pub mod client;
pub mod providers;
pub mod state;

pub use client::{AuthorizationRequest, OAuth2CallbackParams, OAuth2Client};
pub use providers::parse_oauth2_security_credentials;
pub use state::{replace_state_param, LinkingState, StateSigner};
