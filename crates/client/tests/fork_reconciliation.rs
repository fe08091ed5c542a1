//! Fork-on-first-write reconciliation against a mock server.

use serde_json::json;
use sidenote_client::{
    ApiClient, ApiError, MemoryOwnershipStore, OwnershipRecord, OwnershipStore, Role,
    SessionWriter, WriteAccess,
};
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn owned_store(records: &[(&str, &str, Option<&str>)]) -> Arc<MemoryOwnershipStore> {
    let store = MemoryOwnershipStore::new();
    for (id, token, forked_from) in records {
        store.insert(
            id,
            OwnershipRecord {
                owner_token: token.to_string(),
                forked_from: forked_from.map(str::to_string),
            },
        );
    }
    Arc::new(store)
}

#[tokio::test]
async fn owner_writes_pass_straight_through() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/sessions/mine/fork"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/sessions/mine/threads"))
        .and(header("X-Owner-Token", "tok-1"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({ "threadId": "t-1", "createdAt": 1000 })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = owned_store(&[("mine", "tok-1", None)]);
    let writer = SessionWriter::open(ApiClient::new(server.uri()), store, "mine");

    let thread = writer.add_thread("quoted text", "snippet").await.unwrap();
    assert_eq!(thread.thread_id, "t-1");
    assert_eq!(writer.session_id(), "mine");
    assert!(writer.is_owner());
}

#[tokio::test]
async fn non_owner_write_forks_then_redirects() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/sessions/shared/fork"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "sessionId": "fork-1",
            "ownerToken": "tok-f",
            "threadIdMap": { "t-orig": "t-new" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/sessions/fork-1/threads/t-new/messages"))
        .and(header("X-Owner-Token", "tok-f"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({ "messageId": "m-1", "timestamp": 2000 })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = owned_store(&[]);
    let writer = SessionWriter::open(ApiClient::new(server.uri()), store.clone(), "shared");
    assert!(!writer.is_owner());

    // The message lands in the fork's remapped thread, never in the original.
    let message = writer
        .add_message("t-orig", Role::User, "hello")
        .await
        .unwrap();
    assert_eq!(message.message_id, "m-1");

    assert_eq!(writer.session_id(), "fork-1");
    assert!(writer.is_owner());
    let record = store.get("fork-1").expect("ownership recorded");
    assert_eq!(record.owner_token, "tok-f");
    assert_eq!(record.forked_from.as_deref(), Some("shared"));
}

#[tokio::test]
async fn repeated_writes_reuse_the_fork() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/sessions/shared/fork"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "sessionId": "fork-1",
            "ownerToken": "tok-f",
            "threadIdMap": { "t-orig": "t-new" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/sessions/fork-1/threads/t-new/messages"))
        .and(header("X-Owner-Token", "tok-f"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({ "messageId": "m-1", "timestamp": 2000 })),
        )
        .expect(2)
        .mount(&server)
        .await;

    let store = owned_store(&[]);
    let writer = SessionWriter::open(ApiClient::new(server.uri()), store, "shared");

    writer.add_message("t-orig", Role::User, "one").await.unwrap();
    // Second write: the writer now owns the fork, no second fork call.
    writer.add_message("t-new", Role::User, "two").await.unwrap();
}

#[tokio::test]
async fn reopening_the_original_link_finds_the_existing_fork() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/sessions/shared/fork"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/sessions/fork-1/threads"))
        .and(header("X-Owner-Token", "tok-f"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({ "threadId": "t-2", "createdAt": 3000 })),
        )
        .expect(1)
        .mount(&server)
        .await;

    // A previous visit already forked "shared"; the record survived.
    let store = owned_store(&[("fork-1", "tok-f", Some("shared"))]);
    let writer = SessionWriter::open(ApiClient::new(server.uri()), store, "shared");
    assert_eq!(
        writer.access(),
        WriteAccess::OwnerOfFork {
            fork_id: "fork-1".to_string(),
            owner_token: "tok-f".to_string()
        }
    );

    writer.add_thread("more context", "more").await.unwrap();
    assert_eq!(writer.session_id(), "fork-1");
}

#[tokio::test]
async fn failed_fork_surfaces_uniformly_and_leaves_no_state() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/sessions/gone/fork"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({ "error": "Session not found" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = owned_store(&[]);
    let writer = SessionWriter::open(ApiClient::new(server.uri()), store.clone(), "gone");

    let result = writer.add_message("t-1", Role::User, "hello").await;
    assert!(matches!(result, Err(ApiError::NotFound(_))));

    assert_eq!(writer.session_id(), "gone");
    assert_eq!(writer.access(), WriteAccess::NotOwner);
    assert!(store.find_fork_of("gone").is_none());
}

#[tokio::test]
async fn create_records_ownership() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/sessions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "sessionId": "s-9",
            "ownerToken": "tok-9"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = owned_store(&[]);
    let writer = SessionWriter::create(ApiClient::new(server.uri()), store.clone(), "# Doc")
        .await
        .unwrap();

    assert_eq!(writer.session_id(), "s-9");
    assert!(writer.is_owner());
    let record = store.get("s-9").unwrap();
    assert_eq!(record.owner_token, "tok-9");
    assert_eq!(record.forked_from, None);
}

#[tokio::test]
async fn delete_never_forks_a_session_this_device_does_not_own() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/sessions/shared/fork"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let store = owned_store(&[]);
    let writer = SessionWriter::open(ApiClient::new(server.uri()), store, "shared");
    let result = writer.delete().await;
    assert!(matches!(result, Err(ApiError::Forbidden)));
}
