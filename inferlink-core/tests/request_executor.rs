//! Integration tests for the authenticated request path.
//!
//! These tests verify that the executor correctly:
//! - Acquires a credential lazily and attaches it as a bearer token
//! - Absorbs transient failures inside the retry budget
//! - Counts terminal failures and refreshes a stale credential
//! - Never loops against a failing auth endpoint
//! - Shares one auth exchange between concurrent callers

use std::time::Duration;

use inferlink_core::{
    ClientConfig, ClientError, RetryPolicy, Session, SessionState,
};
use serde_json::json;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, Request, ResponseTemplate,
};

const TEST_KEY: &str = include_str!("fixtures/test_key.pem");
const AUTH_PATH: &str = "/api/auth/jwt_login/";
const INFERENCES_PATH: &str = "/api/models/m1/patients/p1/inferences/";

/// Helper to create a session against the mock server with instant retries.
fn session_for(server: &MockServer, attempts: u32, threshold: u32) -> Session {
    let config = ClientConfig::builder("datashare-admin")
        .private_key_pem(TEST_KEY)
        .base_url(server.uri())
        .retry_policy(RetryPolicy::fixed(attempts, Duration::ZERO))
        .failure_threshold(threshold)
        .build()
        .unwrap();
    Session::new(config).unwrap()
}

/// Helper to mount an auth endpoint that always hands out `token`.
async fn mount_auth(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path(AUTH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": token })))
        .mount(server)
        .await;
}

/// Helper to collect the requests received on one path.
async fn requests_to(server: &MockServer, route: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == route)
        .collect()
}

fn assertion_of(request: &Request) -> String {
    let body: serde_json::Value = request.body_json().unwrap();
    body["jwt"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_first_call_acquires_credential_and_attaches_bearer() {
    let server = MockServer::start().await;
    mount_auth(&server, "tok-1").await;

    Mock::given(method("GET"))
        .and(path(INFERENCES_PATH))
        .and(header("Authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let session = session_for(&server, 3, 3);
    assert_eq!(session.state(), SessionState::NoCredential);

    let body: serde_json::Value = session
        .get_json("api/models/m1/patients/p1/inferences/")
        .await
        .unwrap();
    assert_eq!(body, json!([]));

    let auth = requests_to(&server, AUTH_PATH).await;
    assert_eq!(auth.len(), 1);
    assert_eq!(
        auth[0].headers.get("content-type").unwrap().to_str().unwrap(),
        "application/json"
    );
    assert!(!assertion_of(&auth[0]).is_empty());

    assert_eq!(session.failure_count(), 0);
    assert_eq!(session.state(), SessionState::Credentialed);
}

#[tokio::test]
async fn test_failures_absorbed_by_retry_do_not_count() {
    let server = MockServer::start().await;
    mount_auth(&server, "tok-1").await;

    Mock::given(method("GET"))
        .and(path(INFERENCES_PATH))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(3)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(INFERENCES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    // Budget counts total attempts: three 500s then a 200 needs four.
    let session = session_for(&server, 4, 3);
    let result: Result<serde_json::Value, _> =
        session.get_json("api/models/m1/patients/p1/inferences/").await;

    assert!(result.is_ok());
    assert_eq!(requests_to(&server, INFERENCES_PATH).await.len(), 4);
    assert_eq!(session.failure_count(), 0);
}

#[tokio::test]
async fn test_success_resets_failure_counter() {
    let server = MockServer::start().await;
    mount_auth(&server, "tok-1").await;

    Mock::given(method("GET"))
        .and(path("/api/broken/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/healthy/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;

    let session = session_for(&server, 3, 5);

    for expected in 1..=2 {
        let result: Result<serde_json::Value, _> = session.get_json("api/broken/").await;
        assert!(result.is_err());
        assert_eq!(session.failure_count(), expected);
    }

    let _: serde_json::Value = session.get_json("api/healthy/").await.unwrap();
    assert_eq!(session.failure_count(), 0);
}

#[tokio::test]
async fn test_threshold_refreshes_credential_and_still_reports_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(AUTH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "token-1" })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_auth(&server, "token-2").await;

    Mock::given(method("GET"))
        .and(path(INFERENCES_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"detail": "boom"})))
        .mount(&server)
        .await;

    let session = session_for(&server, 3, 3);

    for call in 1..=3 {
        let result: Result<serde_json::Value, _> =
            session.get_json("api/models/m1/patients/p1/inferences/").await;

        let err = result.unwrap_err();
        let failure = err.request_failure().unwrap();
        assert_eq!(failure.status, Some(500));
        assert_eq!(failure.detail.as_deref(), Some("boom"));
        assert_eq!(failure.attempts, 3);

        let expected_exchanges = if call < 3 { 1 } else { 2 };
        assert_eq!(requests_to(&server, AUTH_PATH).await.len(), expected_exchanges);
    }

    assert_eq!(requests_to(&server, INFERENCES_PATH).await.len(), 9);

    let auth = requests_to(&server, AUTH_PATH).await;
    assert_ne!(assertion_of(&auth[0]), assertion_of(&auth[1]));

    let token = session.executor().credentials().current_token().unwrap();
    assert_eq!(token.expose(), "token-2");
    assert_eq!(session.state(), SessionState::Credentialed);
    // the refresh exchange itself succeeded
    assert_eq!(session.failure_count(), 0);

    // the next call uses the fresh token without another exchange
    Mock::given(method("GET"))
        .and(path(INFERENCES_PATH))
        .and(header("Authorization", "Bearer token-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .with_priority(1)
        .mount(&server)
        .await;

    let _: serde_json::Value = session
        .get_json("api/models/m1/patients/p1/inferences/")
        .await
        .unwrap();
    assert_eq!(requests_to(&server, AUTH_PATH).await.len(), 2);
}

#[tokio::test]
async fn test_auth_failures_never_loop_against_auth_endpoint() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(AUTH_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "Invalid signature"})))
        .mount(&server)
        .await;

    let session = session_for(&server, 3, 1);

    let err = session
        .get_json::<serde_json::Value>("api/models/m1/patients/p1/inferences/")
        .await
        .unwrap_err();
    let failure = err.request_failure().unwrap();
    assert_eq!(failure.method, reqwest::Method::POST);
    assert!(failure.url.ends_with(AUTH_PATH));
    assert_eq!(failure.detail.as_deref(), Some("Invalid signature"));

    assert_eq!(requests_to(&server, AUTH_PATH).await.len(), 3);
    assert!(requests_to(&server, INFERENCES_PATH).await.is_empty());
    assert_eq!(session.failure_count(), 1);

    let _ = session
        .get_json::<serde_json::Value>("api/models/m1/patients/p1/inferences/")
        .await
        .unwrap_err();
    assert_eq!(requests_to(&server, AUTH_PATH).await.len(), 6);
    assert_eq!(session.failure_count(), 2);
    assert_eq!(session.state(), SessionState::NoCredential);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_exchange() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(AUTH_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "token": "shared" }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(INFERENCES_PATH))
        .and(header("Authorization", "Bearer shared"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let session = session_for(&server, 3, 3);

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..10 {
        let session = session.clone();
        tasks.spawn(async move {
            session
                .get_json::<serde_json::Value>("api/models/m1/patients/p1/inferences/")
                .await
        });
    }

    while let Some(result) = tasks.join_next().await {
        assert!(result.unwrap().is_ok());
    }

    assert_eq!(requests_to(&server, AUTH_PATH).await.len(), 1);
    assert_eq!(session.executor().credentials().acquisitions(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_failed_exchange() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(AUTH_PATH))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(json!({ "detail": "auth backend down" }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server, 1, 3);

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let session = session.clone();
        tasks.spawn(async move {
            session
                .get_json::<serde_json::Value>("api/models/m1/patients/p1/inferences/")
                .await
        });
    }

    let mut failures = Vec::new();
    while let Some(result) = tasks.join_next().await {
        let err = result.unwrap().unwrap_err();
        failures.push(err.request_failure().cloned().unwrap());
    }

    assert_eq!(failures.len(), 8);
    for failure in &failures {
        assert_eq!(failure.status, Some(500));
        assert_eq!(failure.detail.as_deref(), Some("auth backend down"));
        assert_eq!(failure.attempts, 1);
        assert!(failure.url.ends_with("api/auth/jwt_login/"));
    }

    assert_eq!(requests_to(&server, AUTH_PATH).await.len(), 1);
    assert!(requests_to(&server, INFERENCES_PATH).await.is_empty());
    assert_eq!(session.failure_count(), 1);
    assert_eq!(session.state(), SessionState::NoCredential);
}

#[tokio::test]
async fn test_transport_error_is_structured() {
    let config = ClientConfig::builder("datashare-admin")
        .private_key_pem(TEST_KEY)
        .base_url("http://127.0.0.1:9/")
        .retry_policy(RetryPolicy::fixed(2, Duration::ZERO))
        .request_timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let session = Session::new(config).unwrap();

    let err = session
        .get_json::<serde_json::Value>("api/things/")
        .await
        .unwrap_err();
    let failure = err.request_failure().unwrap();

    assert_eq!(failure.status, None);
    assert_eq!(failure.attempts, 2);
    assert_eq!(failure.url, "http://127.0.0.1:9/api/auth/jwt_login/");
    assert!(!failure.error.is_empty());
    assert_eq!(session.failure_count(), 1);
}

#[tokio::test]
async fn test_malformed_success_body_is_invalid_response() {
    let server = MockServer::start().await;
    mount_auth(&server, "tok-1").await;

    Mock::given(method("GET"))
        .and(path("/api/things/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let session = session_for(&server, 3, 3);
    let err = session
        .get_json::<serde_json::Value>("api/things/")
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::InvalidResponse { .. }));
    assert_eq!(session.failure_count(), 0);
}

#[tokio::test]
async fn test_auth_response_without_token_is_invalid() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(AUTH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access": "x" })))
        .mount(&server)
        .await;

    let session = session_for(&server, 3, 3);
    let err = session
        .get_json::<serde_json::Value>("api/things/")
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::InvalidResponse { .. }));
    assert_eq!(session.state(), SessionState::NoCredential);
}

#[tokio::test]
async fn test_ambiguous_key_material_fails_before_any_request() {
    let server = MockServer::start().await;
    mount_auth(&server, "tok-1").await;

    let both = ClientConfig::builder("datashare-admin")
        .private_key_pem(TEST_KEY)
        .private_key_file("fixtures/test_key.pem")
        .base_url(server.uri())
        .build();
    assert!(matches!(
        both,
        Err(inferlink_core::ConfigError::ConflictingPrivateKeys)
    ));

    let neither = ClientConfig::builder("datashare-admin")
        .base_url(server.uri())
        .build();
    assert!(matches!(
        neither,
        Err(inferlink_core::ConfigError::MissingPrivateKey)
    ));

    assert!(server.received_requests().await.unwrap().is_empty());
}
