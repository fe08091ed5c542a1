//! SQLite implementation of the session store.
//!
//! ## Concurrency model
//!
//! A single `Connection` behind `Arc<Mutex<_>>`; every operation runs on
//! the blocking pool via `spawn_blocking`, acquiring the lock only for the
//! duration of its statements. Fork is the one operation needing
//! cross-statement atomicity and runs inside a transaction; the other
//! mutations are single or fixed-cardinality writes whose
//! verify-then-mutate window is an accepted relaxation.

use crate::auth;
use crate::ids;
use crate::session::domain::{
    ForkOutcome, MAX_CONTEXT_BYTES, MAX_MARKDOWN_BYTES, MAX_MESSAGE_BYTES, MAX_SNIPPET_BYTES,
    Message, MessagePart, NewSession, Role, Session, Thread,
};
use crate::session::error::{StoreError, StoreResult};
use crate::session::schema;
use crate::session::store::SessionStore;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

/// SQLite-backed [`SessionStore`].
#[derive(Clone)]
pub struct SqliteSessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSessionStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub async fn connect(path: PathBuf) -> StoreResult<Self> {
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, rusqlite::Error> {
            let mut conn = Connection::open(&path)?;
            conn.execute("PRAGMA foreign_keys = ON;", [])?;
            schema::init_schema(&mut conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| StoreError::Other(format!("Failed to spawn blocking task: {}", e)))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Wrap an already initialized connection. Used by tests and by the
    /// parse cache, which shares the same database.
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Handle to the underlying connection for subsystems sharing the
    /// database file.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    async fn run<F, R>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut Connection) -> StoreResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn_arc = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn_arc.lock().unwrap();
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Other(format!("Task execution failed: {}", e)))?
    }
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Verify the presented owner token before any mutation statement runs.
/// An unknown session and a wrong token are indistinguishable.
fn check_owner(conn: &Connection, session_id: &str, presented: &str) -> StoreResult<()> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT owner_token FROM sessions WHERE id = ?",
            params![session_id],
            |row| row.get(0),
        )
        .optional()?;

    if auth::token_matches(stored.as_deref(), presented) {
        Ok(())
    } else {
        Err(StoreError::Forbidden)
    }
}

fn ensure_thread_in_session(
    conn: &Connection,
    session_id: &str,
    thread_id: &str,
) -> StoreResult<()> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM threads WHERE id = ? AND session_id = ?",
            params![thread_id, session_id],
            |row| row.get(0),
        )
        .optional()?;
    match exists {
        Some(_) => Ok(()),
        None => Err(StoreError::ThreadNotFound(thread_id.to_string())),
    }
}

/// Bump `updated_at`, keeping it monotonic even if the clock steps back.
fn touch_session(conn: &Connection, session_id: &str, now: i64) -> StoreResult<()> {
    conn.execute(
        "UPDATE sessions SET updated_at = MAX(?1, updated_at) WHERE id = ?2",
        params![now, session_id],
    )?;
    Ok(())
}

fn encode_parts(parts: &[MessagePart]) -> StoreResult<Option<String>> {
    if parts.is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(parts)?))
    }
}

fn decode_parts(raw: Option<String>) -> StoreResult<Vec<MessagePart>> {
    match raw {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(Vec::new()),
    }
}

fn map_message_row(
    id: String,
    thread_id: String,
    role: String,
    text: String,
    parts: Option<String>,
    created_at: i64,
) -> StoreResult<Message> {
    Ok(Message {
        id,
        thread_id,
        role: Role::from_str(&role).map_err(StoreError::Other)?,
        text,
        parts: decode_parts(parts)?,
        created_at,
    })
}

/// Clone the full graph of `original_id` under fresh ids inside `tx`.
///
/// Thread and message rows keep their original `created_at` so relative
/// order survives the copy; only the new session row is stamped `now`.
fn clone_session_graph(tx: &Transaction, original_id: &str) -> StoreResult<ForkOutcome> {
    let markdown: Option<String> = tx
        .query_row(
            "SELECT markdown_content FROM sessions WHERE id = ?",
            params![original_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(markdown) = markdown else {
        return Err(StoreError::SessionNotFound(original_id.to_string()));
    };

    let new_session_id = ids::entity_id();
    let new_owner_token = ids::owner_token();
    let now = now_millis();

    tx.execute(
        "INSERT INTO sessions (id, owner_token, markdown_content, created_at, updated_at, forked_from) VALUES (?, ?, ?, ?, ?, ?)",
        params![new_session_id, new_owner_token, markdown, now, now, original_id],
    )?;

    let source_threads: Vec<(String, String, String, i64)> = {
        let mut stmt = tx.prepare(
            "SELECT id, context, snippet, created_at FROM threads WHERE session_id = ? ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![original_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let mut thread_id_map = HashMap::with_capacity(source_threads.len());
    for (old_thread_id, context, snippet, created_at) in &source_threads {
        let new_thread_id = ids::entity_id();
        tx.execute(
            "INSERT INTO threads (id, session_id, context, snippet, created_at) VALUES (?, ?, ?, ?, ?)",
            params![new_thread_id, new_session_id, context, snippet, created_at],
        )?;
        thread_id_map.insert(old_thread_id.clone(), new_thread_id);
    }

    for (old_thread_id, _, _, _) in &source_threads {
        let new_thread_id = &thread_id_map[old_thread_id];
        let messages: Vec<(String, String, Option<String>, i64)> = {
            let mut stmt = tx.prepare(
                "SELECT role, text, parts, created_at FROM messages WHERE thread_id = ? ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt
                .query_map(params![old_thread_id], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        for (role, text, parts, created_at) in messages {
            tx.execute(
                "INSERT INTO messages (id, thread_id, role, text, parts, created_at) VALUES (?, ?, ?, ?, ?, ?)",
                params![ids::entity_id(), new_thread_id, role, text, parts, created_at],
            )?;
        }
    }

    Ok(ForkOutcome {
        session_id: new_session_id,
        owner_token: new_owner_token,
        thread_id_map,
    })
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create_session(&self, markdown_content: String) -> StoreResult<NewSession> {
        if markdown_content.is_empty() {
            return Err(StoreError::Validation(
                "markdownContent must not be empty".to_string(),
            ));
        }
        if markdown_content.len() > MAX_MARKDOWN_BYTES {
            return Err(StoreError::Validation(
                "markdownContent exceeds the 500KB limit".to_string(),
            ));
        }

        let session_id = ids::entity_id();
        let owner_token = ids::owner_token();
        let session_id_for_insert = session_id.clone();
        let owner_token_for_insert = owner_token.clone();

        self.run(move |conn| {
            let now = now_millis();
            conn.execute(
                "INSERT INTO sessions (id, owner_token, markdown_content, created_at, updated_at, forked_from) VALUES (?, ?, ?, ?, ?, NULL)",
                params![
                    session_id_for_insert,
                    owner_token_for_insert,
                    markdown_content,
                    now,
                    now
                ],
            )?;
            Ok(())
        })
        .await?;

        Ok(NewSession {
            session_id,
            owner_token,
        })
    }

    async fn get_session(&self, session_id: &str) -> StoreResult<Option<Session>> {
        let session_id = session_id.to_string();
        self.run(move |conn| {
            let header: Option<(String, i64, i64, Option<String>)> = conn
                .query_row(
                    "SELECT markdown_content, created_at, updated_at, forked_from FROM sessions WHERE id = ?",
                    params![session_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;
            let Some((markdown_content, created_at, updated_at, forked_from)) = header else {
                return Ok(None);
            };

            let mut threads: Vec<Thread> = {
                let mut stmt = conn.prepare(
                    "SELECT id, context, snippet, created_at FROM threads WHERE session_id = ? ORDER BY created_at ASC, id ASC",
                )?;
                let rows = stmt
                    .query_map(params![session_id], |row| {
                        Ok(Thread {
                            id: row.get(0)?,
                            session_id: session_id.clone(),
                            context: row.get(1)?,
                            snippet: row.get(2)?,
                            created_at: row.get(3)?,
                            messages: Vec::new(),
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };

            let message_rows: Vec<(String, String, String, String, Option<String>, i64)> = {
                let mut stmt = conn.prepare(
                    "SELECT m.id, m.thread_id, m.role, m.text, m.parts, m.created_at
                     FROM messages m
                     JOIN threads t ON m.thread_id = t.id
                     WHERE t.session_id = ?
                     ORDER BY m.created_at ASC, m.id ASC",
                )?;
                let rows = stmt
                    .query_map(params![session_id], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };

            let mut by_thread: HashMap<String, Vec<Message>> = HashMap::new();
            for (id, thread_id, role, text, parts, created_at) in message_rows {
                let message = map_message_row(id, thread_id.clone(), role, text, parts, created_at)?;
                by_thread.entry(thread_id).or_default().push(message);
            }
            for thread in &mut threads {
                if let Some(messages) = by_thread.remove(&thread.id) {
                    thread.messages = messages;
                }
            }

            Ok(Some(Session {
                id: session_id.clone(),
                markdown_content,
                created_at,
                updated_at,
                forked_from,
                threads,
            }))
        })
        .await
    }

    async fn delete_session(&self, session_id: &str, owner_token: &str) -> StoreResult<()> {
        let session_id = session_id.to_string();
        let owner_token = owner_token.to_string();
        self.run(move |conn| {
            check_owner(conn, &session_id, &owner_token)?;
            conn.execute("DELETE FROM sessions WHERE id = ?", params![session_id])?;
            Ok(())
        })
        .await
    }

    async fn fork_session(&self, original_id: &str) -> StoreResult<ForkOutcome> {
        let original_id = original_id.to_string();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let outcome = clone_session_graph(&tx, &original_id)?;
            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    async fn add_thread(
        &self,
        session_id: &str,
        owner_token: &str,
        context: String,
        snippet: String,
    ) -> StoreResult<Thread> {
        if context.len() > MAX_CONTEXT_BYTES {
            return Err(StoreError::Validation(
                "context exceeds the 50KB limit".to_string(),
            ));
        }
        if snippet.len() > MAX_SNIPPET_BYTES {
            return Err(StoreError::Validation(
                "snippet exceeds the 1KB limit".to_string(),
            ));
        }

        let session_id = session_id.to_string();
        let owner_token = owner_token.to_string();
        self.run(move |conn| {
            check_owner(conn, &session_id, &owner_token)?;
            let thread_id = ids::entity_id();
            let now = now_millis();
            conn.execute(
                "INSERT INTO threads (id, session_id, context, snippet, created_at) VALUES (?, ?, ?, ?, ?)",
                params![thread_id, session_id, context, snippet, now],
            )?;
            touch_session(conn, &session_id, now)?;
            Ok(Thread {
                id: thread_id,
                session_id: session_id.clone(),
                context,
                snippet,
                created_at: now,
                messages: Vec::new(),
            })
        })
        .await
    }

    async fn add_message(
        &self,
        session_id: &str,
        owner_token: &str,
        thread_id: &str,
        role: Role,
        text: String,
        parts: Vec<MessagePart>,
    ) -> StoreResult<Message> {
        if text.len() > MAX_MESSAGE_BYTES {
            return Err(StoreError::Validation(
                "message text exceeds the 50KB limit".to_string(),
            ));
        }
        let parts_json = encode_parts(&parts)?;

        let session_id = session_id.to_string();
        let owner_token = owner_token.to_string();
        let thread_id = thread_id.to_string();
        self.run(move |conn| {
            check_owner(conn, &session_id, &owner_token)?;
            ensure_thread_in_session(conn, &session_id, &thread_id)?;
            let message_id = ids::entity_id();
            let now = now_millis();
            conn.execute(
                "INSERT INTO messages (id, thread_id, role, text, parts, created_at) VALUES (?, ?, ?, ?, ?, ?)",
                params![message_id, thread_id, role.to_string(), text, parts_json, now],
            )?;
            touch_session(conn, &session_id, now)?;
            Ok(Message {
                id: message_id,
                thread_id: thread_id.clone(),
                role,
                text,
                parts,
                created_at: now,
            })
        })
        .await
    }

    async fn update_message(
        &self,
        session_id: &str,
        owner_token: &str,
        thread_id: &str,
        message_id: &str,
        text: String,
    ) -> StoreResult<i64> {
        if text.len() > MAX_MESSAGE_BYTES {
            return Err(StoreError::Validation(
                "message text exceeds the 50KB limit".to_string(),
            ));
        }

        let session_id = session_id.to_string();
        let owner_token = owner_token.to_string();
        let thread_id = thread_id.to_string();
        let message_id = message_id.to_string();
        self.run(move |conn| {
            check_owner(conn, &session_id, &owner_token)?;
            ensure_thread_in_session(conn, &session_id, &thread_id)?;
            let now = now_millis();
            let affected = conn.execute(
                "UPDATE messages SET text = ? WHERE id = ? AND thread_id = ?",
                params![text, message_id, thread_id],
            )?;
            if affected == 0 {
                return Err(StoreError::MessageNotFound(message_id.clone()));
            }
            touch_session(conn, &session_id, now)?;
            Ok(now)
        })
        .await
    }

    async fn truncate_thread_after(
        &self,
        session_id: &str,
        owner_token: &str,
        thread_id: &str,
        message_id: &str,
    ) -> StoreResult<()> {
        let session_id = session_id.to_string();
        let owner_token = owner_token.to_string();
        let thread_id = thread_id.to_string();
        let message_id = message_id.to_string();
        self.run(move |conn| {
            check_owner(conn, &session_id, &owner_token)?;
            ensure_thread_in_session(conn, &session_id, &thread_id)?;

            let anchor: Option<i64> = conn
                .query_row(
                    "SELECT created_at FROM messages WHERE id = ? AND thread_id = ?",
                    params![message_id, thread_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(anchor_created_at) = anchor else {
                return Err(StoreError::MessageNotFound(message_id.clone()));
            };

            let now = now_millis();
            conn.execute(
                "DELETE FROM messages
                 WHERE thread_id = ?1
                   AND (created_at > ?2 OR (created_at = ?2 AND id > ?3))",
                params![thread_id, anchor_created_at, message_id],
            )?;
            touch_session(conn, &session_id, now)?;
            Ok(())
        })
        .await
    }

    async fn verify_owner_token(&self, session_id: &str, presented: &str) -> StoreResult<bool> {
        let session_id = session_id.to_string();
        let presented = presented.to_string();
        self.run(move |conn| {
            let stored: Option<String> = conn
                .query_row(
                    "SELECT owner_token FROM sessions WHERE id = ?",
                    params![session_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(auth::token_matches(stored.as_deref(), &presented))
        })
        .await
    }
}
