// Integration tests for the OAuth2 linking flow:
// GET /v1/linked-accounts/oauth2/authorize + callback

use aci::api::{create_router, ApiState};
use aci::apps::{
    AppConfiguration, AppConfigurationRegistry, AppRegistry, OAuth2SchemeConfig, ProjectRegistry,
    SecurityScheme, SecuritySchemes,
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
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const SIGNING_KEY: &str = "0123456789abcdef0123456789abcdef";

struct TestApp {
    router: Router,
    api_key: String,
    linked_accounts: Arc<LinkedAccountStore>,
    app_configurations: Arc<AppConfigurationRegistry>,
    signer: Arc<StateSigner>,
}

fn test_app(provider_base: &str) -> TestApp {
    let config = Arc::new(AciConfig {
        signing_key: SIGNING_KEY.to_string(),
        encryption_key: BASE64.encode([9u8; 32]),
        public_base_url: "http://localhost:8000".to_string(),
        ..AciConfig::default()
    });

    let registry = Arc::new(AppRegistry::new());
    registry
        .register_app(aci::apps::App {
            name: "GOOGLE_CALENDAR".to_string(),
            display_name: "Google Calendar".to_string(),
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
    let signer = Arc::new(
        StateSigner::new(
            &config.signing_key,
            &config.signing_algorithm,
            config.state_ttl_seconds,
        )
        .unwrap(),
    );
    let executor = Arc::new(Executor::new(
        registry.clone(),
        app_configurations.clone(),
        linked_accounts.clone(),
        Duration::from_secs(5),
    ));

    let router = create_router(ApiState {
        config,
        registry,
        projects,
        app_configurations: app_configurations.clone(),
        linked_accounts: linked_accounts.clone(),
        state_signer: signer.clone(),
        executor,
        quota: Arc::new(ExecutionQuota::new()),
    });

    TestApp {
        router,
        api_key: project.api_key,
        linked_accounts,
        app_configurations,
        signer,
    }
}

fn query_params(url: &str) -> HashMap<String, String> {
    url.split_once('?')
        .map(|(_, q)| q)
        .unwrap_or("")
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (
                urlencoding::decode(k).unwrap().into_owned(),
                urlencoding::decode(v).unwrap().into_owned(),
            )
        })
        .collect()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn authorize_url(app: &TestApp, extra: &str) -> String {
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!(
                    "/v1/linked-accounts/oauth2/authorize?app_name=GOOGLE_CALENDAR&linked_account_owner_id=user1{}",
                    extra
                ))
                .header("x-api-key", &app.api_key)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await["url"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_authorize_returns_url_with_signed_state_and_pkce() {
    let server = mockito::Server::new_async().await;
    let app = test_app(&server.url());

    let url = authorize_url(&app, "").await;
    assert!(url.starts_with(&format!("{}/auth?", server.url())));

    let params = query_params(&url);
    assert_eq!(params["client_id"], "cid");
    assert_eq!(params["response_type"], "code");
    assert_eq!(params["code_challenge_method"], "S256");
    assert_eq!(params["access_type"], "offline");
    assert_eq!(params["prompt"], "consent");
    assert_eq!(
        params["redirect_uri"],
        "http://localhost:8000/v1/linked-accounts/oauth2/callback"
    );

    // The state parameter is a verifiable token carrying the linking context
    let state = app.signer.verify(&params["state"]).unwrap();
    assert_eq!(state.app_name, "GOOGLE_CALENDAR");
    assert_eq!(state.linked_account_owner_id, "user1");
    assert!(!state.code_verifier.is_empty());
    assert!(state.nonce.is_some());
}

#[tokio::test]
async fn test_full_linking_flow_stores_credentials() {
    let mut server = mockito::Server::new_async().await;
    let token_mock = server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"access_token":"ya29.fresh","expires_in":3600,"refresh_token":"1//r","token_type":"Bearer"}"#,
        )
        .create_async()
        .await;

    let app = test_app(&server.url());
    let url = authorize_url(&app, "").await;
    let state_token = query_params(&url)["state"].clone();
    let linking_state = app.signer.verify(&state_token).unwrap();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!(
                    "/v1/linked-accounts/oauth2/callback?state={}&code=auth-code",
                    urlencoding::encode(&state_token)
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    token_mock.assert_async().await;

    let body = body_json(response).await;
    assert_eq!(body["app_name"], "GOOGLE_CALENDAR");
    assert_eq!(body["linked_account_owner_id"], "user1");
    assert_eq!(body["security_scheme"], "oauth2");
    // Secret material never leaves the server
    assert!(body.get("security_credentials").is_none());

    let stored = app
        .linked_accounts
        .get(linking_state.project_id, "GOOGLE_CALENDAR", "user1")
        .unwrap()
        .unwrap();
    assert_eq!(stored.security_credentials["access_token"], "ya29.fresh");
    assert_eq!(stored.security_credentials["refresh_token"], "1//r");
    assert!(stored.security_credentials["expires_at"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_callback_redirects_when_after_link_url_is_set() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"t1","expires_in":3600}"#)
        .create_async()
        .await;

    let app = test_app(&server.url());
    let url = authorize_url(
        &app,
        "&after_oauth2_link_redirect_url=https%3A%2F%2Fapp.example.com%2Fdone",
    )
    .await;
    let state_token = query_params(&url)["state"].clone();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!(
                    "/v1/linked-accounts/oauth2/callback?state={}&code=auth-code",
                    urlencoding::encode(&state_token)
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.status().is_redirection());
    assert_eq!(
        response.headers()["location"],
        "https://app.example.com/done"
    );
}

#[tokio::test]
async fn test_callback_rejects_when_configuration_was_deleted() {
    let mut server = mockito::Server::new_async().await;
    // Must never be called: the callback has to fail before the exchange
    let token_mock = server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"t1","expires_in":3600}"#)
        .expect(0)
        .create_async()
        .await;

    let app = test_app(&server.url());
    let url = authorize_url(&app, "").await;
    let state_token = query_params(&url)["state"].clone();
    let linking_state = app.signer.verify(&state_token).unwrap();

    // The project opts out between authorize and callback
    assert!(app
        .app_configurations
        .delete(linking_state.project_id, "GOOGLE_CALENDAR"));

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!(
                    "/v1/linked-accounts/oauth2/callback?state={}&code=auth-code",
                    urlencoding::encode(&state_token)
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "app_configuration_not_found");
    token_mock.assert_async().await;

    // No account was created
    assert!(app
        .linked_accounts
        .get(linking_state.project_id, "GOOGLE_CALENDAR", "user1")
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_callback_rejects_when_configuration_was_disabled() {
    let server = mockito::Server::new_async().await;
    let app = test_app(&server.url());
    let url = authorize_url(&app, "").await;
    let state_token = query_params(&url)["state"].clone();
    let linking_state = app.signer.verify(&state_token).unwrap();

    let mut config = app
        .app_configurations
        .get(linking_state.project_id, "GOOGLE_CALENDAR")
        .unwrap();
    config.enabled = false;
    app.app_configurations.upsert(config);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!(
                    "/v1/linked-accounts/oauth2/callback?state={}&code=auth-code",
                    urlencoding::encode(&state_token)
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "app_configuration_disabled");
}

#[tokio::test]
async fn test_callback_rejects_tampered_state() {
    let server = mockito::Server::new_async().await;
    let app = test_app(&server.url());
    let url = authorize_url(&app, "").await;
    let mut state_token = query_params(&url)["state"].clone();
    state_token.push('x');

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!(
                    "/v1/linked-accounts/oauth2/callback?state={}&code=auth-code",
                    urlencoding::encode(&state_token)
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "authentication_error");
}

#[tokio::test]
async fn test_callback_surfaces_provider_denial() {
    let server = mockito::Server::new_async().await;
    let app = test_app(&server.url());
    let url = authorize_url(&app, "").await;
    let state_token = query_params(&url)["state"].clone();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!(
                    "/v1/linked-accounts/oauth2/callback?state={}&error=access_denied",
                    urlencoding::encode(&state_token)
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "oauth2_error");
}

#[tokio::test]
async fn test_authorize_requires_api_key() {
    let server = mockito::Server::new_async().await;
    let app = test_app(&server.url());

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/v1/linked-accounts/oauth2/authorize?app_name=GOOGLE_CALENDAR&linked_account_owner_id=user1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_authorize_unknown_app_is_404() {
    let server = mockito::Server::new_async().await;
    let app = test_app(&server.url());

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/v1/linked-accounts/oauth2/authorize?app_name=NOPE&linked_account_owner_id=user1")
                .header("x-api-key", &app.api_key)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "app_not_found");
}

#[tokio::test]
async fn test_relinking_overwrites_existing_account() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"first","expires_in":3600}"#)
        .expect(1)
        .create_async()
        .await;

    let app = test_app(&server.url());

    // First link
    let url = authorize_url(&app, "").await;
    let state_token = query_params(&url)["state"].clone();
    let linking_state = app.signer.verify(&state_token).unwrap();
    app.router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!(
                    "/v1/linked-accounts/oauth2/callback?state={}&code=c1",
                    urlencoding::encode(&state_token)
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Second link for the same owner returns a different token
    server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"second","expires_in":3600}"#)
        .create_async()
        .await;
    let url = authorize_url(&app, "").await;
    let state_token = query_params(&url)["state"].clone();
    app.router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!(
                    "/v1/linked-accounts/oauth2/callback?state={}&code=c2",
                    urlencoding::encode(&state_token)
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let stored = app
        .linked_accounts
        .get(linking_state.project_id, "GOOGLE_CALENDAR", "user1")
        .unwrap()
        .unwrap();
    assert_eq!(stored.security_credentials["access_token"], "second");
}
