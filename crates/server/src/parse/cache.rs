//! Content-addressed cache for extraction results.
//!
//! Keys are sha256 digests: file entries hash the raw bytes, URL entries
//! hash the literal URL string rather than whatever it happens to serve.
//! Identical bytes always extract to identical output, so file entries
//! never expire; a URL's content drifts, so URL hits older than the
//! freshness window are treated as misses and overwritten in place.

use crate::parse::extract::ExtractError;
use crate::parse::normalize::normalize_markdown;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;

/// Default freshness window for URL-derived entries.
pub const DEFAULT_URL_FRESHNESS: Duration = Duration::from_secs(6 * 60 * 60);

/// Where a cached document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    File,
    Url,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::File => write!(f, "file"),
            SourceType::Url => write!(f, "url"),
        }
    }
}

impl std::str::FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(SourceType::File),
            "url" => Ok(SourceType::Url),
            _ => Err(format!("Unknown source type: {}", s)),
        }
    }
}

/// Content-addressed lookup key plus the metadata stored alongside it.
#[derive(Debug, Clone)]
pub struct CacheKey {
    content_hash: String,
    source_type: SourceType,
    original_filename: Option<String>,
    file_size: Option<i64>,
}

impl CacheKey {
    /// Key for an uploaded file: digest of the raw bytes.
    pub fn for_file(filename: Option<&str>, bytes: &[u8]) -> Self {
        Self {
            content_hash: digest(bytes),
            source_type: SourceType::File,
            original_filename: filename.map(str::to_string),
            file_size: Some(bytes.len() as i64),
        }
    }

    /// Key for a link: digest of the literal URL string, not of the
    /// fetched bytes, so the lookup costs nothing.
    pub fn for_url(url: &str) -> Self {
        Self {
            content_hash: digest(url.as_bytes()),
            source_type: SourceType::Url,
            original_filename: None,
            file_size: None,
        }
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn source_type(&self) -> SourceType {
        self.source_type
    }
}

fn digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Result of a cache-mediated extraction.
#[derive(Debug, Clone, Serialize)]
pub struct ParseOutcome {
    pub markdown: String,
    pub source_type: SourceType,
    pub cached: bool,
}

/// Errors surfaced by the parse pipeline.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The input can never be parsed. Maps to 400.
    #[error("unsupported document: {0}")]
    Unsupported(String),

    /// The extraction backend failed; details stay in the log.
    #[error("document extraction failed")]
    UpstreamExtraction,

    /// Database error.
    #[error("database error: {0}")]
    Database(String),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl From<rusqlite::Error> for ParseError {
    fn from(err: rusqlite::Error) -> Self {
        ParseError::Database(err.to_string())
    }
}

/// Durable content-addressed cache over the `parse_cache` table. Shares
/// the session store's connection; entries survive restarts.
#[derive(Clone)]
pub struct ParseCache {
    conn: Arc<Mutex<Connection>>,
    url_freshness: Duration,
}

impl ParseCache {
    pub fn new(conn: Arc<Mutex<Connection>>, url_freshness: Duration) -> Self {
        Self {
            conn,
            url_freshness,
        }
    }

    pub fn with_default_freshness(conn: Arc<Mutex<Connection>>) -> Self {
        Self::new(conn, DEFAULT_URL_FRESHNESS)
    }

    async fn run<F, R>(&self, f: F) -> Result<R, ParseError>
    where
        F: FnOnce(&mut Connection) -> Result<R, ParseError> + Send + 'static,
        R: Send + 'static,
    {
        let conn_arc = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn_arc.lock().unwrap();
            f(&mut conn)
        })
        .await
        .map_err(|e| ParseError::Other(format!("Task execution failed: {}", e)))?
    }

    /// Lookup, compute on miss, store, return.
    ///
    /// The raw extractor output is what gets persisted; normalization runs
    /// on the way out for hits and misses alike. An empty or
    /// whitespace-only extraction is a terminal failure and is never
    /// cached.
    pub async fn get_or_extract<F, Fut>(
        &self,
        key: CacheKey,
        extract: F,
    ) -> Result<ParseOutcome, ParseError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, ExtractError>>,
    {
        let hash = key.content_hash.clone();
        let hit: Option<(String, i64)> = self
            .run(move |conn| {
                conn.query_row(
                    "SELECT markdown, created_at FROM parse_cache WHERE content_hash = ?",
                    params![hash],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(ParseError::from)
            })
            .await?;

        if let Some((markdown, created_at)) = hit {
            let fresh = match key.source_type {
                SourceType::File => true,
                SourceType::Url => {
                    let age_millis = now_millis().saturating_sub(created_at);
                    age_millis <= self.url_freshness.as_millis() as i64
                }
            };
            if fresh {
                tracing::debug!(hash = %key.content_hash, source = %key.source_type, "parse cache hit");
                return Ok(ParseOutcome {
                    markdown: normalize_markdown(&markdown),
                    source_type: key.source_type,
                    cached: true,
                });
            }
            tracing::debug!(hash = %key.content_hash, "parse cache entry stale, recomputing");
        }

        let raw = extract().await.map_err(|err| match err {
            ExtractError::Unsupported(reason) => ParseError::Unsupported(reason),
            ExtractError::Upstream(detail) => {
                tracing::warn!(hash = %key.content_hash, error = %detail, "document extraction failed");
                ParseError::UpstreamExtraction
            }
        })?;

        if raw.trim().is_empty() {
            tracing::warn!(hash = %key.content_hash, "extraction produced empty output, not caching");
            return Err(ParseError::UpstreamExtraction);
        }

        let stored = raw.clone();
        let row_key = key.clone();
        self.run(move |conn| {
            // REPLACE keeps the table unique by hash: a stale URL entry is
            // overwritten, never duplicated.
            conn.execute(
                "INSERT OR REPLACE INTO parse_cache (content_hash, markdown, source_type, original_filename, file_size, created_at) VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    row_key.content_hash,
                    stored,
                    row_key.source_type.to_string(),
                    row_key.original_filename,
                    row_key.file_size,
                    now_millis()
                ],
            )?;
            Ok(())
        })
        .await?;

        Ok(ParseOutcome {
            markdown: normalize_markdown(&raw),
            source_type: key.source_type,
            cached: false,
        })
    }
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::schema;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn open_db() -> Arc<Mutex<Connection>> {
        let mut conn = Connection::open_in_memory().expect("in-memory db");
        schema::init_schema(&mut conn).expect("schema init");
        Arc::new(Mutex::new(conn))
    }

    fn counting_extract(
        counter: Arc<AtomicUsize>,
        output: &'static str,
    ) -> impl FnOnce() -> std::future::Ready<Result<String, ExtractError>> {
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(output.to_string()))
        }
    }

    fn entry_created_at(db: &Arc<Mutex<Connection>>, hash: &str) -> i64 {
        let conn = db.lock().unwrap();
        conn.query_row(
            "SELECT created_at FROM parse_cache WHERE content_hash = ?",
            params![hash],
            |row| row.get(0),
        )
        .unwrap()
    }

    fn entry_count(db: &Arc<Mutex<Connection>>) -> i64 {
        let conn = db.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM parse_cache", [], |row| row.get(0))
            .unwrap()
    }

    #[tokio::test]
    async fn identical_file_bytes_extract_once() {
        let cache = ParseCache::with_default_freshness(open_db());
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .get_or_extract(
                CacheKey::for_file(Some("doc.md"), b"# Doc"),
                counting_extract(calls.clone(), "# Doc"),
            )
            .await
            .unwrap();
        let second = cache
            .get_or_extract(
                CacheKey::for_file(Some("doc.md"), b"# Doc"),
                counting_extract(calls.clone(), "# Doc"),
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.markdown, second.markdown);
    }

    #[tokio::test]
    async fn different_bytes_extract_separately() {
        let cache = ParseCache::with_default_freshness(open_db());
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_extract(
                CacheKey::for_file(None, b"first"),
                counting_extract(calls.clone(), "first"),
            )
            .await
            .unwrap();
        cache
            .get_or_extract(
                CacheKey::for_file(None, b"second"),
                counting_extract(calls.clone(), "second"),
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn url_within_freshness_window_extracts_once() {
        let cache = ParseCache::with_default_freshness(open_db());
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            cache
                .get_or_extract(
                    CacheKey::for_url("https://example.com/article"),
                    counting_extract(calls.clone(), "# Article"),
                )
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_url_entry_is_recomputed_and_overwritten() {
        let db = open_db();
        let cache = ParseCache::new(db.clone(), Duration::ZERO);
        let calls = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::for_url("https://example.com/article");
        let hash = key.content_hash().to_string();

        cache
            .get_or_extract(key.clone(), counting_extract(calls.clone(), "# v1"))
            .await
            .unwrap();
        let first_created_at = entry_created_at(&db, &hash);

        // Zero freshness plus a short sleep makes the entry stale.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = cache
            .get_or_extract(key, counting_extract(calls.clone(), "# v2"))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!second.cached);
        assert_eq!(second.markdown, "# v2");
        assert_eq!(entry_count(&db), 1);
        assert!(entry_created_at(&db, &hash) >= first_created_at);
    }

    #[tokio::test]
    async fn file_entries_ignore_the_freshness_window() {
        let cache = ParseCache::new(open_db(), Duration::ZERO);
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_extract(
                CacheKey::for_file(None, b"# Doc"),
                counting_extract(calls.clone(), "# Doc"),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = cache
            .get_or_extract(
                CacheKey::for_file(None, b"# Doc"),
                counting_extract(calls.clone(), "# Doc"),
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(second.cached);
    }

    #[tokio::test]
    async fn empty_extraction_fails_and_is_never_cached() {
        let db = open_db();
        let cache = ParseCache::with_default_freshness(db.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::for_file(None, b"# Doc");

        let result = cache
            .get_or_extract(key.clone(), counting_extract(calls.clone(), "  \n\t "))
            .await;
        assert!(matches!(result, Err(ParseError::UpstreamExtraction)));
        assert_eq!(entry_count(&db), 0);

        // The failure was not cached: the next attempt extracts again.
        let recovered = cache
            .get_or_extract(key, counting_extract(calls.clone(), "# Doc"))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!recovered.cached);
        assert_eq!(recovered.markdown, "# Doc");
    }

    #[tokio::test]
    async fn normalization_applies_to_hits_and_misses() {
        let cache = ParseCache::with_default_freshness(open_db());
        let calls = Arc::new(AtomicUsize::new(0));
        let raw = "| a |\n|---|\n|---|\n| 1 |";
        let key = CacheKey::for_file(None, raw.as_bytes());

        let miss = cache
            .get_or_extract(key.clone(), counting_extract(calls.clone(), raw))
            .await
            .unwrap();
        let hit = cache
            .get_or_extract(key, counting_extract(calls.clone(), raw))
            .await
            .unwrap();

        assert_eq!(miss.markdown, "| a |\n|---|\n| 1 |");
        assert_eq!(hit.markdown, miss.markdown);
        assert!(hit.cached);
    }

    #[tokio::test]
    async fn url_key_hashes_the_literal_url() {
        let a = CacheKey::for_url("https://example.com/a");
        let b = CacheKey::for_url("https://example.com/b");
        assert_ne!(a.content_hash(), b.content_hash());
        assert_eq!(
            a.content_hash(),
            CacheKey::for_url("https://example.com/a").content_hash()
        );
    }

    #[tokio::test]
    async fn upstream_failure_is_generic_and_uncached() {
        let db = open_db();
        let cache = ParseCache::with_default_freshness(db.clone());

        let result = cache
            .get_or_extract(CacheKey::for_url("https://example.com/down"), || {
                std::future::ready(Err(ExtractError::Upstream(
                    "connection refused".to_string(),
                )))
            })
            .await;

        match result {
            Err(ParseError::UpstreamExtraction) => {
                // The public message carries no upstream detail.
                assert_eq!(
                    ParseError::UpstreamExtraction.to_string(),
                    "document extraction failed"
                );
            }
            other => panic!("expected upstream extraction error, got {:?}", other.map(|o| o.markdown)),
        }
        assert_eq!(entry_count(&db), 0);
    }
}
