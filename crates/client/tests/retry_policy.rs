//! Retry policy behavior against a mock server.

use serde_json::json;
use sidenote_client::{ApiClient, ApiError};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn session_body() -> serde_json::Value {
    json!({
        "id": "s-1",
        "markdownContent": "# Doc",
        "createdAt": 1000,
        "updatedAt": 1000,
        "forkedFrom": null,
        "threads": []
    })
}

#[tokio::test]
async fn transient_server_error_is_retried_until_success() {
    let server = MockServer::start().await;

    // First attempt sees a 500, the second succeeds.
    Mock::given(method("GET"))
        .and(path("/api/sessions/s-1"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "error": "boom" })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/sessions/s-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_body()))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(server.uri());
    let session = client.get_session("s-1").await.unwrap();
    assert_eq!(session.markdown_content, "# Doc");
}

#[tokio::test]
async fn bad_request_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/sessions"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({ "error": "markdownContent must not be empty" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(server.uri());
    let result = client.create_session("").await;
    match result {
        Err(ApiError::BadRequest(message)) => {
            assert_eq!(message, "markdownContent must not be empty");
        }
        other => panic!("expected BadRequest, got {:?}", other.map(|s| s.session_id)),
    }
}

#[tokio::test]
async fn forbidden_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/api/sessions/s-1"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "error": "Forbidden" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(server.uri());
    let result = client.delete_session("s-1", "wrong-token").await;
    assert!(matches!(result, Err(ApiError::Forbidden)));
}

#[tokio::test]
async fn attempts_exhaust_after_three_server_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/sessions/s-1"))
        .respond_with(ResponseTemplate::new(502).set_body_json(json!({ "error": "bad gateway" })))
        .expect(3)
        .mount(&server)
        .await;

    let client = ApiClient::new(server.uri());
    let result = client.get_session("s-1").await;
    assert!(matches!(result, Err(ApiError::Server(_))));
}

#[tokio::test]
async fn connection_failures_are_retried_and_surface_as_network_errors() {
    // Nothing listens here; every attempt fails at the transport layer.
    let client = ApiClient::new("http://127.0.0.1:9");
    let result = client.get_session("s-1").await;
    assert!(matches!(result, Err(ApiError::Network(_))));
}
