//! Document ingestion: content-addressed extraction cache, markdown
//! cleanup, and the pluggable extractor behind it.
//!
//! Extraction is expensive and deterministic for identical input, so
//! results are cached by a hash of the raw input: file bytes hash the
//! bytes, links hash the literal URL string. The cache stores the raw
//! extractor output and re-normalizes on every return, so filter
//! improvements reach old entries without invalidation.

pub mod cache;
pub use cache::{CacheKey, DEFAULT_URL_FRESHNESS, ParseCache, ParseError, ParseOutcome, SourceType};

pub mod extract;
pub use extract::{DocumentExtractor, ExtractError, HttpExtractor, ensure_public_http_url};

pub mod normalize;
pub use normalize::normalize_markdown;
