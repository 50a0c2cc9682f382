use crate::support::session_for;
use bistro_core::credentials::{CredentialBundle, CredentialStore};
use bistro_core::error::ClientError;
use bistro_core::session::{SessionEvent, SessionState};
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store_with(access: &str, refresh: Option<&str>) -> CredentialStore {
    let store = CredentialStore::in_memory();
    store.establish(
        CredentialBundle {
            access_token: Some(access.to_string()),
            refresh_token: refresh.map(str::to_string),
        },
        None,
    );
    store
}

async fn mock_orders(server: &MockServer, token: &str, status: u16, expected: u64) {
    let template = if status == 200 {
        ResponseTemplate::new(200).set_body_json(json!([{ "id": 1 }]))
    } else {
        ResponseTemplate::new(status).set_body_json(json!({ "message": "Unauthorized" }))
    };
    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .and(header("authorization", format!("Bearer {token}").as_str()))
        .respond_with(template)
        .expect(expected)
        .mount(server)
        .await;
}

async fn mock_refresh(server: &MockServer, response: ResponseTemplate, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(response)
        .expect(expected)
        .mount(server)
        .await;
}

#[tokio::test]
async fn attaches_bearer_token() {
    let server = MockServer::start().await;
    mock_orders(&server, "a1", 200, 1).await;
    let session = session_for(&server, store_with("a1", Some("r1")));

    let body = session.call(Method::GET, "/orders", None).await.expect("orders");
    assert_eq!(body, json!([{ "id": 1 }]));
    server.verify().await;
}

#[tokio::test]
async fn refreshes_once_and_retries_on_401() {
    let server = MockServer::start().await;
    mock_orders(&server, "stale", 401, 1).await;
    mock_orders(&server, "fresh", 200, 1).await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .and(body_json(json!({ "refreshToken": "r1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accessToken": "fresh" })))
        .expect(1)
        .mount(&server)
        .await;
    let session = session_for(&server, store_with("stale", Some("r1")));
    let mut events = session.subscribe();

    let body = session.call(Method::GET, "orders", None).await.expect("retried call");
    assert_eq!(body, json!([{ "id": 1 }]));
    assert_eq!(session.access_token().as_deref(), Some("fresh"));
    assert_eq!(session.credentials().refresh_token().as_deref(), Some("r1"));
    assert_eq!(events.try_recv().ok(), Some(SessionEvent::Refreshed));
    server.verify().await;
}

#[tokio::test]
async fn missing_refresh_token_expires_session_with_original_401() {
    let server = MockServer::start().await;
    mock_orders(&server, "stale", 401, 1).await;
    mock_refresh(&server, ResponseTemplate::new(200), 0).await;
    let session = session_for(&server, store_with("stale", None));
    let mut events = session.subscribe();

    let err = session.call(Method::GET, "orders", None).await.unwrap_err();
    assert!(matches!(err, ClientError::Http { status: 401, .. }));
    assert!(session.access_token().is_none());
    assert_eq!(session.state(), SessionState::Unauthenticated);
    assert_eq!(events.try_recv().ok(), Some(SessionEvent::Expired));
    server.verify().await;
}

#[tokio::test]
async fn second_401_is_not_refreshed_again() {
    let server = MockServer::start().await;
    mock_orders(&server, "stale", 401, 1).await;
    mock_orders(&server, "fresh", 401, 1).await;
    mock_refresh(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "accessToken": "fresh" })),
        1,
    )
    .await;
    let session = session_for(&server, store_with("stale", Some("r1")));

    let err = session.call(Method::GET, "orders", None).await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    server.verify().await;
}

#[tokio::test]
async fn failed_refresh_clears_credentials() {
    let server = MockServer::start().await;
    mock_orders(&server, "stale", 401, 1).await;
    mock_refresh(
        &server,
        ResponseTemplate::new(401).set_body_json(json!({ "message": "Refresh token revoked" })),
        1,
    )
    .await;
    let session = session_for(&server, store_with("stale", Some("revoked")));
    let mut events = session.subscribe();

    let err = session.call(Method::GET, "orders", None).await.unwrap_err();
    match err {
        ClientError::SessionExpired { source } => assert_eq!(source.status(), Some(401)),
        other => panic!("expected SessionExpired, got {other:?}"),
    }
    assert!(session.credentials().refresh_token().is_none());
    assert_eq!(events.try_recv().ok(), Some(SessionEvent::Expired));
    server.verify().await;
}

#[tokio::test]
async fn concurrent_401s_share_one_refresh() {
    let server = MockServer::start().await;
    mock_orders(&server, "stale", 401, 2).await;
    mock_orders(&server, "fresh", 200, 2).await;
    mock_refresh(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(json!({ "accessToken": "fresh", "refreshToken": "r2" }))
            .set_delay(Duration::from_millis(150)),
        1,
    )
    .await;
    let session = session_for(&server, store_with("stale", Some("r1")));

    let (first, second) = tokio::join!(
        session.call(Method::GET, "orders", None),
        session.call(Method::GET, "orders", None)
    );
    first.expect("first call");
    second.expect("second call");
    assert_eq!(session.credentials().refresh_token().as_deref(), Some("r2"));
    server.verify().await;
}

#[tokio::test]
async fn concurrent_401s_with_failed_refresh_expire_once() {
    let server = MockServer::start().await;
    mock_orders(&server, "stale", 401, 2).await;
    mock_refresh(
        &server,
        ResponseTemplate::new(401)
            .set_body_json(json!({ "message": "Refresh token revoked" }))
            .set_delay(Duration::from_millis(150)),
        1,
    )
    .await;
    let session = session_for(&server, store_with("stale", Some("r1")));
    let mut events = session.subscribe();

    let (first, second) = tokio::join!(
        session.call(Method::GET, "orders", None),
        session.call(Method::GET, "orders", None)
    );
    let errors = [first.unwrap_err(), second.unwrap_err()];
    assert_eq!(
        errors
            .iter()
            .filter(|err| matches!(err, ClientError::SessionExpired { .. }))
            .count(),
        1
    );
    assert_eq!(errors.iter().filter(|err| err.status() == Some(401)).count(), 1);
    assert_eq!(events.try_recv().ok(), Some(SessionEvent::Expired));
    assert!(events.try_recv().is_err());
    assert_eq!(session.state(), SessionState::Unauthenticated);
    server.verify().await;
}

#[tokio::test]
async fn other_failures_pass_through_unchanged() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/orders"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({ "message": "Table is closed" })))
        .expect(1)
        .mount(&server)
        .await;
    mock_refresh(&server, ResponseTemplate::new(200), 0).await;
    let session = session_for(&server, store_with("a1", Some("r1")));

    let err = session
        .call(Method::POST, "orders", Some(&json!({ "tableId": 4 })))
        .await
        .unwrap_err();
    match err {
        ClientError::Http { status, body } => {
            assert_eq!(status, 422);
            assert_eq!(body["message"], "Table is closed");
        }
        other => panic!("expected Http error, got {other:?}"),
    }
    assert_eq!(session.access_token().as_deref(), Some("a1"));
    server.verify().await;
}

#[tokio::test]
async fn empty_success_body_decodes_as_null() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/menu/7"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    let session = session_for(&server, store_with("a1", None));

    let body = session.delete("menu/7").await.expect("delete");
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    let session = bistro_core::session::SessionClient::new(
        &url::Url::parse("http://127.0.0.1:9/api").expect("url"),
        CredentialStore::in_memory(),
        Duration::from_secs(2),
    )
    .expect("client");
    let err = session.call(Method::GET, "orders", None).await.unwrap_err();
    assert!(matches!(err, ClientError::Network(_)));
}

#[tokio::test]
async fn login_stores_credentials_and_user() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(json!({ "email": "ana@example.com", "password": "secret" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accessToken": "a1",
            "refreshToken": "r1",
            "expiresIn": 900,
            "tokenType": "Bearer",
            "user": { "id": 5, "email": "ana@example.com", "name": "Ana", "role": "MANAGER" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    let dir = TempDir::new().expect("temp dir");
    let session = session_for(&server, CredentialStore::open(dir.path()).expect("store"));
    let mut events = session.subscribe();

    let response = session.login("ana@example.com", "secret").await.expect("login");
    assert_eq!(response.token_type.as_deref(), Some("Bearer"));
    assert_eq!(session.state(), SessionState::Authenticated);
    assert_eq!(events.try_recv().ok(), Some(SessionEvent::LoggedIn));

    let reloaded = CredentialStore::open(dir.path()).expect("reload");
    assert_eq!(reloaded.access_token().as_deref(), Some("a1"));
    assert_eq!(reloaded.user().and_then(|u| u.role), Some("MANAGER".to_string()));
}

#[tokio::test]
async fn failed_login_records_error_and_stays_unauthenticated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "Invalid credentials" })))
        .mount(&server)
        .await;
    mock_refresh(&server, ResponseTemplate::new(200), 0).await;
    let session = session_for(&server, CredentialStore::in_memory());

    let err = session.login("ana@example.com", "wrong").await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(session.state(), SessionState::Unauthenticated);
    assert_eq!(session.last_error().as_deref(), Some("Invalid credentials"));
    server.verify().await;
}

#[tokio::test]
async fn register_establishes_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/register"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "accessToken": "a9",
            "refreshToken": "r9",
            "user": { "id": "u9", "email": "bo@example.com" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    let session = session_for(&server, CredentialStore::in_memory());

    session
        .register("Bo", "bo@example.com", "pw")
        .await
        .expect("register");
    assert_eq!(session.access_token().as_deref(), Some("a9"));
    assert_eq!(
        session.current_user().map(|u| u.email),
        Some("bo@example.com".to_string())
    );
}
