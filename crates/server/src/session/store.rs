//! The session store abstraction.

use crate::session::domain::{ForkOutcome, Message, MessagePart, NewSession, Role, Session, Thread};
use crate::session::error::StoreResult;
use async_trait::async_trait;

/// Durable CRUD over sessions, threads, and messages, plus atomic fork.
///
/// Mutating operations take the presented owner token and verify it in
/// constant time before touching any row; a wrong token and an unknown
/// session are both reported as [`StoreError::Forbidden`]. Reading and
/// forking require no proof: possession of the unguessable id is the
/// sharing mechanism.
///
/// [`StoreError::Forbidden`]: crate::session::error::StoreError::Forbidden
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session around the given document. Rejects empty or
    /// oversized content before any write.
    async fn create_session(&self, markdown_content: String) -> StoreResult<NewSession>;

    /// Fetch the fully assembled graph, or `None` if the id is unknown.
    async fn get_session(&self, session_id: &str) -> StoreResult<Option<Session>>;

    /// Delete a session and, by cascade, its threads and messages.
    async fn delete_session(&self, session_id: &str, owner_token: &str) -> StoreResult<()>;

    /// Atomically clone the full session graph under fresh ids. The clone
    /// becomes visible all at once or not at all.
    async fn fork_session(&self, original_id: &str) -> StoreResult<ForkOutcome>;

    /// Add a thread anchored to `context`.
    async fn add_thread(
        &self,
        session_id: &str,
        owner_token: &str,
        context: String,
        snippet: String,
    ) -> StoreResult<Thread>;

    /// Append a message to a thread of the session.
    async fn add_message(
        &self,
        session_id: &str,
        owner_token: &str,
        thread_id: &str,
        role: Role,
        text: String,
        parts: Vec<MessagePart>,
    ) -> StoreResult<Message>;

    /// Rewrite a message's text in place. Returns the mutation timestamp
    /// in epoch milliseconds.
    async fn update_message(
        &self,
        session_id: &str,
        owner_token: &str,
        thread_id: &str,
        message_id: &str,
        text: String,
    ) -> StoreResult<i64>;

    /// Delete every message in the thread sorting strictly after the
    /// anchor under `(created_at, id)` order. Idempotent.
    async fn truncate_thread_after(
        &self,
        session_id: &str,
        owner_token: &str,
        thread_id: &str,
        message_id: &str,
    ) -> StoreResult<()>;

    /// Constant-time owner-token check. `false` for unknown sessions.
    async fn verify_owner_token(&self, session_id: &str, presented: &str) -> StoreResult<bool>;
}
