// Integration tests for POST /v1/functions/:name/execute, including the
// transactional token refresh paths.

use aci::api::{create_router, ApiState};
use aci::apps::{
    App, AppConfiguration, AppConfigurationRegistry, AppRegistry, FunctionDefinition,
    OAuth2SchemeConfig, ProjectRegistry, RestMetadata, SecurityScheme, SecuritySchemes,
};
use aci::config::AciConfig;
use aci::executor::Executor;
use aci::oauth::StateSigner;
use aci::quota::ExecutionQuota;
use aci::storage::LinkedAccountStore;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

struct TestApp {
    router: Router,
    api_key: String,
    project_id: Uuid,
    linked_accounts: Arc<LinkedAccountStore>,
}

/// App "GOOGLE_CALENDAR" with one GET function against `api_base`, OAuth2
/// token endpoint at `provider_base`/token.
fn test_app(provider_base: &str, api_base: &str, quota_per_minute: u64) -> TestApp {
    let config = Arc::new(AciConfig {
        signing_key: "0123456789abcdef0123456789abcdef".to_string(),
        encryption_key: BASE64.encode([3u8; 32]),
        execute_quota_per_minute: quota_per_minute,
        ..AciConfig::default()
    });

    let registry = Arc::new(AppRegistry::new());
    registry
        .register_app(App {
            name: "GOOGLE_CALENDAR".to_string(),
            display_name: String::new(),
            description: String::new(),
            security_schemes: SecuritySchemes {
                oauth2: Some(OAuth2SchemeConfig {
                    client_id: "cid".to_string(),
                    client_secret: "secret".to_string(),
                    scope: "calendar.readonly".to_string(),
                    authorize_url: Some(format!("{}/auth", provider_base)),
                    access_token_url: Some(format!("{}/token", provider_base)),
                    refresh_token_url: None,
                    server_metadata_url: None,
                    token_endpoint_auth_method: None,
                    header: "Authorization".to_string(),
                    prefix: "Bearer".to_string(),
                }),
                ..SecuritySchemes::default()
            },
            default_security_credentials_by_scheme: HashMap::new(),
        })
        .unwrap();
    registry
        .register_function(FunctionDefinition {
            name: "GOOGLE_CALENDAR__LIST_EVENTS".to_string(),
            app_name: "GOOGLE_CALENDAR".to_string(),
            description: String::new(),
            protocol: RestMetadata {
                method: "GET".to_string(),
                server_url: api_base.to_string(),
                path: "/calendars/{calendar_id}/events".to_string(),
            },
        })
        .unwrap();

    let projects = Arc::new(ProjectRegistry::new());
    let project = projects.create_project("test-project");

    let app_configurations = Arc::new(AppConfigurationRegistry::new());
    app_configurations.upsert(AppConfiguration {
        project_id: project.id,
        app_name: "GOOGLE_CALENDAR".to_string(),
        security_scheme: SecurityScheme::OAuth2,
        enabled: true,
        all_functions_enabled: true,
        enabled_functions: vec![],
    });

    let linked_accounts =
        Arc::new(LinkedAccountStore::new(":memory:", &config.encryption_key).unwrap());
    let executor = Arc::new(Executor::new(
        registry.clone(),
        app_configurations.clone(),
        linked_accounts.clone(),
        Duration::from_secs(5),
    ));
    let signer = Arc::new(
        StateSigner::new(&config.signing_key, &config.signing_algorithm, 600).unwrap(),
    );

    let router = create_router(ApiState {
        config,
        registry,
        projects,
        app_configurations,
        linked_accounts: linked_accounts.clone(),
        state_signer: signer,
        executor,
        quota: Arc::new(ExecutionQuota::new()),
    });

    TestApp {
        router,
        api_key: project.api_key,
        project_id: project.id,
        linked_accounts,
    }
}

async fn execute(app: &TestApp) -> (StatusCode, serde_json::Value) {
    let body = json!({
        "linked_account_owner_id": "user1",
        "function_input": {"path": {"calendar_id": "primary"}}
    });
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/functions/GOOGLE_CALENDAR__LIST_EVENTS/execute")
                .header("x-api-key", &app.api_key)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_expired_token_is_refreshed_persisted_and_used() {
    let mut provider = mockito::Server::new_async().await;
    let refresh_mock = provider
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"refreshed-token","expires_in":3600}"#)
        .expect(1)
        .create_async()
        .await;

    let mut api = mockito::Server::new_async().await;
    let api_mock = api
        .mock("GET", "/calendars/primary/events")
        .match_header("Authorization", "Bearer refreshed-token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"items":[]}"#)
        .create_async()
        .await;

    let app = test_app(&provider.url(), &api.url(), 600);
    app.linked_accounts
        .upsert(
            app.project_id,
            "GOOGLE_CALENDAR",
            "user1",
            SecurityScheme::OAuth2,
            &json!({
                "access_token": "stale-token",
                "expires_at": Utc::now().timestamp() - 60,
                "refresh_token": "1//refresh"
            }),
        )
        .unwrap();

    let (status, body) = execute(&app).await;
    refresh_mock.assert_async().await;
    api_mock.assert_async().await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["items"], json!([]));

    // The refreshed token was written back, with the refresh token retained
    let stored = app
        .linked_accounts
        .get(app.project_id, "GOOGLE_CALENDAR", "user1")
        .unwrap()
        .unwrap();
    assert_eq!(stored.security_credentials["access_token"], "refreshed-token");
    assert_eq!(stored.security_credentials["refresh_token"], "1//refresh");
}

#[tokio::test]
async fn test_expired_token_without_refresh_token_is_sent_stale() {
    let provider = mockito::Server::new_async().await;

    let mut api = mockito::Server::new_async().await;
    let api_mock = api
        .mock("GET", "/calendars/primary/events")
        .match_header("Authorization", "Bearer stale-token")
        .with_status(401)
        .with_body(r#"{"error":"invalid_credentials"}"#)
        .create_async()
        .await;

    let app = test_app(&provider.url(), &api.url(), 600);
    app.linked_accounts
        .upsert(
            app.project_id,
            "GOOGLE_CALENDAR",
            "user1",
            SecurityScheme::OAuth2,
            &json!({
                "access_token": "stale-token",
                "expires_at": Utc::now().timestamp() - 60
            }),
        )
        .unwrap();

    let (status, body) = execute(&app).await;
    api_mock.assert_async().await;

    // Downstream rejection is not a platform error
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("401"));
}

#[tokio::test]
async fn test_failed_refresh_is_a_platform_error() {
    let mut provider = mockito::Server::new_async().await;
    provider
        .mock("POST", "/token")
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"invalid_grant"}"#)
        .create_async()
        .await;

    let app = test_app(&provider.url(), "http://127.0.0.1:9", 600);
    app.linked_accounts
        .upsert(
            app.project_id,
            "GOOGLE_CALENDAR",
            "user1",
            SecurityScheme::OAuth2,
            &json!({
                "access_token": "stale-token",
                "expires_at": Utc::now().timestamp() - 60,
                "refresh_token": "revoked"
            }),
        )
        .unwrap();

    let (status, body) = execute(&app).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["kind"], "oauth2_error");
}

#[tokio::test]
async fn test_unknown_function_is_404() {
    let provider = mockito::Server::new_async().await;
    let app = test_app(&provider.url(), "http://127.0.0.1:9", 600);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/functions/NOPE/execute")
                .header("x-api-key", &app.api_key)
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"linked_account_owner_id": "user1"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_missing_linked_account_is_404() {
    let provider = mockito::Server::new_async().await;
    let app = test_app(&provider.url(), "http://127.0.0.1:9", 600);

    let (status, body) = execute(&app).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "linked_account_not_found");
}

#[tokio::test]
async fn test_quota_exhaustion_is_429() {
    let provider = mockito::Server::new_async().await;
    let mut api = mockito::Server::new_async().await;
    api.mock("GET", "/calendars/primary/events")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let app = test_app(&provider.url(), &api.url(), 1);
    app.linked_accounts
        .upsert(
            app.project_id,
            "GOOGLE_CALENDAR",
            "user1",
            SecurityScheme::OAuth2,
            &json!({"access_token": "t", "expires_at": Utc::now().timestamp() + 3600}),
        )
        .unwrap();

    let (first, _) = execute(&app).await;
    assert_eq!(first, StatusCode::OK);

    let (second, body) = execute(&app).await;
    assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["kind"], "rate_limit_exceeded");
}

#[tokio::test]
async fn test_disabled_configuration_is_403() {
    let provider = mockito::Server::new_async().await;
    let app = test_app(&provider.url(), "http://127.0.0.1:9", 600);

    app.linked_accounts
        .upsert(
            app.project_id,
            "GOOGLE_CALENDAR",
            "user1",
            SecurityScheme::OAuth2,
            &json!({"access_token": "t", "expires_at": Utc::now().timestamp() + 3600}),
        )
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/app-configurations")
                .header("x-api-key", &app.api_key)
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "app_name": "GOOGLE_CALENDAR",
                        "security_scheme": "oauth2",
                        "enabled": false
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (status, body) = execute(&app).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["kind"], "app_configuration_disabled");
}
