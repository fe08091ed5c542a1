//! Document ingestion handler.
//!
//! One endpoint, two shapes: `multipart/form-data` with a `file` field,
//! or a JSON body carrying a `url`. URL validation runs before any fetch;
//! a rejected URL never leaves the process.

use super::{ApiError, AppState, MAX_UPLOAD_BYTES};
use crate::parse::{CacheKey, ExtractError, ParseOutcome, SourceType, ensure_public_http_url};
use axum::extract::{Multipart, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::{Json, RequestExt};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Deserialize)]
pub(crate) struct ParseUrlRequest {
    url: String,
}

#[derive(Serialize)]
pub(crate) struct ParseResponse {
    markdown: String,
    source: SourceType,
    cached: bool,
}

impl From<ParseOutcome> for ParseResponse {
    fn from(outcome: ParseOutcome) -> Self {
        Self {
            markdown: outcome.markdown,
            source: outcome.source_type,
            cached: outcome.cached,
        }
    }
}

pub(crate) async fn parse_document(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<ParseResponse>, ApiError> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();

    if content_type.starts_with("multipart/form-data") {
        let multipart = request
            .extract::<Multipart, _>()
            .await
            .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?;
        parse_file_upload(state, multipart).await
    } else {
        let Json(body) = request
            .extract::<Json<ParseUrlRequest>, _>()
            .await
            .map_err(|e| ApiError::BadRequest(format!("invalid request body: {e}")))?;
        parse_url(state, body.url).await
    }
}

async fn parse_file_upload(
    state: AppState,
    mut multipart: Multipart,
) -> Result<Json<ParseResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {e}")))?;

        if bytes.is_empty() {
            return Err(ApiError::BadRequest("uploaded file is empty".to_string()));
        }
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(ApiError::BadRequest(
                "uploaded file exceeds the 10MB limit".to_string(),
            ));
        }

        tracing::info!(
            filename = filename.as_deref().unwrap_or("<unnamed>"),
            size = bytes.len(),
            "parsing uploaded file"
        );

        let key = CacheKey::for_file(filename.as_deref(), &bytes);
        let extractor = state.extractor.clone();
        let outcome = state
            .cache
            .get_or_extract(key, move || async move {
                extractor.extract_file(filename.as_deref(), &bytes).await
            })
            .await?;
        return Ok(Json(outcome.into()));
    }

    Err(ApiError::BadRequest(
        "multipart body is missing a 'file' field".to_string(),
    ))
}

async fn parse_url(state: AppState, raw_url: String) -> Result<Json<ParseResponse>, ApiError> {
    let raw_url = raw_url.trim().to_string();
    let url = Url::parse(&raw_url)
        .map_err(|_| ApiError::BadRequest("invalid url".to_string()))?;
    ensure_public_http_url(&url).map_err(|err| match err {
        ExtractError::Unsupported(reason) => ApiError::BadRequest(reason),
        ExtractError::Upstream(detail) => ApiError::Internal(detail),
    })?;

    tracing::info!(url = %url, "parsing url");

    // The cache key is the literal URL string as submitted, so a repeated
    // paste of the same link hits without a fetch.
    let key = CacheKey::for_url(&raw_url);
    let extractor = state.extractor.clone();
    let outcome = state
        .cache
        .get_or_extract(key, move || async move { extractor.extract_url(&url).await })
        .await?;
    Ok(Json(outcome.into()))
}
