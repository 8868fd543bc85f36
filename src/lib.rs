// App/Function/AppConfiguration model and registries
pub mod apps;

// HTTP API surface
pub mod api;

// Server configuration
pub mod config;

// Platform error taxonomy
pub mod error;

// Function execution dispatch
pub mod executor;

// OAuth2 client, provider quirks, signed linking state
pub mod oauth;

// Per-project execution quota
pub mod quota;

// Credential typing, resolution and injection
pub mod security;

// LinkedAccount persistence
pub mod storage;
