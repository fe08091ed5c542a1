//! Session, thread, and message handlers.

use super::{ApiError, AppState};
use crate::session::domain::{Message, MessagePart, Role, Session, Thread};
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

const OWNER_TOKEN_HEADER: &str = "x-owner-token";

/// Pull the owner token out of the request. Absence is the same
/// Forbidden as a mismatch; no separate "missing header" shape.
fn owner_token(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(OWNER_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .filter(|token| !token.is_empty())
        .ok_or(ApiError::Forbidden)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateSessionRequest {
    markdown_content: String,
}

pub(crate) async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state.store.create_session(req.markdown_content).await?;
    tracing::info!(session_id = %created.session_id, "session created");
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionResponse {
    id: String,
    markdown_content: String,
    created_at: i64,
    updated_at: i64,
    forked_from: Option<String>,
    threads: Vec<ThreadResponse>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThreadResponse {
    id: String,
    context: String,
    snippet: String,
    created_at: i64,
    messages: Vec<MessageResponse>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageResponse {
    id: String,
    role: Role,
    text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    parts: Vec<MessagePart>,
    timestamp: i64,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            markdown_content: session.markdown_content,
            created_at: session.created_at,
            updated_at: session.updated_at,
            forked_from: session.forked_from,
            threads: session.threads.into_iter().map(ThreadResponse::from).collect(),
        }
    }
}

impl From<Thread> for ThreadResponse {
    fn from(thread: Thread) -> Self {
        Self {
            id: thread.id,
            context: thread.context,
            snippet: thread.snippet,
            created_at: thread.created_at,
            messages: thread.messages.into_iter().map(MessageResponse::from).collect(),
        }
    }
}

impl From<Message> for MessageResponse {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            role: message.role,
            text: message.text,
            parts: message.parts,
            timestamp: message.created_at,
        }
    }
}

pub(crate) async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state
        .store
        .get_session(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))?;
    Ok(Json(session.into()))
}

#[derive(Serialize)]
pub(crate) struct SuccessResponse {
    success: bool,
}

pub(crate) async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SuccessResponse>, ApiError> {
    let token = owner_token(&headers)?;
    state.store.delete_session(&id, &token).await?;
    tracing::info!(session_id = %id, "session deleted");
    Ok(Json(SuccessResponse { success: true }))
}

pub(crate) async fn fork_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let fork = state.store.fork_session(&id).await?;
    tracing::info!(original = %id, fork = %fork.session_id, "session forked");
    Ok((StatusCode::CREATED, Json(fork)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AddThreadRequest {
    context: String,
    snippet: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ThreadCreatedResponse {
    thread_id: String,
    created_at: i64,
}

pub(crate) async fn add_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<AddThreadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let token = owner_token(&headers)?;
    let thread = state
        .store
        .add_thread(&id, &token, req.context, req.snippet)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ThreadCreatedResponse {
            thread_id: thread.id,
            created_at: thread.created_at,
        }),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AddMessageRequest {
    role: Role,
    text: String,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessageCreatedResponse {
    message_id: String,
    timestamp: i64,
}

pub(crate) async fn add_message(
    State(state): State<AppState>,
    Path((id, thread_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(req): Json<AddMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let token = owner_token(&headers)?;
    let message = state
        .store
        .add_message(&id, &token, &thread_id, req.role, req.text, req.parts)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(MessageCreatedResponse {
            message_id: message.id,
            timestamp: message.created_at,
        }),
    ))
}

#[derive(Deserialize)]
pub(crate) struct UpdateMessageRequest {
    text: String,
}

#[derive(Serialize)]
pub(crate) struct UpdateMessageResponse {
    success: bool,
    timestamp: i64,
}

pub(crate) async fn update_message(
    State(state): State<AppState>,
    Path((id, thread_id, message_id)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(req): Json<UpdateMessageRequest>,
) -> Result<Json<UpdateMessageResponse>, ApiError> {
    let token = owner_token(&headers)?;
    let timestamp = state
        .store
        .update_message(&id, &token, &thread_id, &message_id, req.text)
        .await?;
    Ok(Json(UpdateMessageResponse {
        success: true,
        timestamp,
    }))
}

#[derive(Deserialize)]
pub(crate) struct TruncateQuery {
    after: String,
}

pub(crate) async fn truncate_messages(
    State(state): State<AppState>,
    Path((id, thread_id)): Path<(String, String)>,
    Query(query): Query<TruncateQuery>,
    headers: HeaderMap,
) -> Result<Json<SuccessResponse>, ApiError> {
    let token = owner_token(&headers)?;
    state
        .store
        .truncate_thread_after(&id, &token, &thread_id, &query.after)
        .await?;
    Ok(Json(SuccessResponse { success: true }))
}
