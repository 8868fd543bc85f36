use aci::api::{create_router, ApiState};
use aci::apps::{AppConfigurationRegistry, AppRegistry, ProjectRegistry};
use aci::config::AciConfig;
use aci::executor::Executor;
use aci::oauth::StateSigner;
use aci::quota::ExecutionQuota;
use aci::storage::LinkedAccountStore;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aci=info".into()),
        )
        .init();

    let config = Arc::new(AciConfig::load().context("Failed to load configuration")?);
    info!(bind_addr = %config.bind_addr, "ACI starting");

    let registry = Arc::new(AppRegistry::new());
    if let Some(path) = &config.apps_file {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read app catalog {}", path))?;
        registry.load_catalog_toml(&raw)?;
    }

    let projects = Arc::new(ProjectRegistry::new());
    let app_configurations = Arc::new(AppConfigurationRegistry::new());
    let linked_accounts = Arc::new(
        LinkedAccountStore::new(&config.db_path, &config.encryption_key)
            .context("Failed to open linked account store")?,
    );
    let state_signer = Arc::new(
        StateSigner::new(
            &config.signing_key,
            &config.signing_algorithm,
            config.state_ttl_seconds,
        )
        .map_err(|e| anyhow::anyhow!("{}", e))?,
    );
    let executor = Arc::new(Executor::new(
        registry.clone(),
        app_configurations.clone(),
        linked_accounts.clone(),
        Duration::from_secs(config.http_timeout_seconds),
    ));

    let router = create_router(ApiState {
        config: config.clone(),
        registry,
        projects,
        app_configurations,
        linked_accounts,
        state_signer,
        executor,
        quota: Arc::new(ExecutionQuota::new()),
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "Listening");
    axum::serve(listener, router)
        .await
        .context("Server error")?;

    Ok(())
}
