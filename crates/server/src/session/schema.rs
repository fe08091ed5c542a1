//! Database schema initialization.
//!
//! Ids are URL-safe random TEXT primary keys: they are the shareable
//! external identifiers, so there is no internal/public id split. Deletes
//! cascade session -> threads -> messages declaratively; `forked_from`
//! only records lineage and is severed, not cascaded, when the original
//! goes away.

use rusqlite::Connection;

pub fn init_schema(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            owner_token TEXT NOT NULL,
            markdown_content TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            forked_from TEXT,
            FOREIGN KEY(forked_from) REFERENCES sessions(id) ON DELETE SET NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_forked_from ON sessions(forked_from);

        CREATE TABLE IF NOT EXISTS threads (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            context TEXT NOT NULL,
            snippet TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_threads_session ON threads(session_id, created_at);

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            thread_id TEXT NOT NULL,
            role TEXT NOT NULL,
            text TEXT NOT NULL,
            parts TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY(thread_id) REFERENCES threads(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id, created_at, id);

        CREATE TABLE IF NOT EXISTS parse_cache (
            content_hash TEXT PRIMARY KEY,
            markdown TEXT NOT NULL,
            source_type TEXT NOT NULL,
            original_filename TEXT,
            file_size INTEGER,
            created_at INTEGER NOT NULL
        );
        "#,
    )?;

    Ok(())
}
