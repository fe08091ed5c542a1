//! Typed HTTP client for the sidenote session endpoints.

use crate::retry::send_with_retry;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const OWNER_TOKEN_HEADER: &str = "X-Owner-Token";

/// Context value for a thread anchored to the whole document rather than
/// a quoted selection. Mirrors the server's sentinel.
pub const WHOLE_DOCUMENT_CONTEXT: &str = "whole-document";

/// Errors surfaced by remote calls.
///
/// `Server` and `Network` are transient and retried by the request
/// wrapper; everything else is permanent and rethrown immediately.
#[derive(Debug, Error)]
pub enum ApiError {
    /// 4xx other than 403/404. Never retried.
    #[error("invalid request: {0}")]
    BadRequest(String),

    /// 403. Wrong or missing owner token, never retried.
    #[error("forbidden")]
    Forbidden,

    /// 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// 5xx. Retryable.
    #[error("server error: {0}")]
    Server(String),

    /// Transport failure before a status line arrived. Retryable.
    #[error("network error: {0}")]
    Network(String),
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Server(_) | ApiError::Network(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Network(err.to_string())
    }
}

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    pub session_id: String,
    pub owner_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkResult {
    pub session_id: String,
    pub owner_token: String,
    /// Original thread id to cloned thread id.
    pub thread_id_map: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadCreated {
    pub thread_id: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCreated {
    pub message_id: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateAck {
    pub success: bool,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ack {
    pub success: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: String,
    pub markdown_content: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub forked_from: Option<String>,
    pub threads: Vec<ThreadView>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadView {
    pub id: String,
    pub context: String,
    pub snippet: String,
    pub created_at: i64,
    pub messages: Vec<MessageView>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub timestamp: i64,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionBody<'a> {
    markdown_content: &'a str,
}

#[derive(Serialize)]
struct AddThreadBody<'a> {
    context: &'a str,
    snippet: &'a str,
}

#[derive(Serialize)]
struct AddMessageBody<'a> {
    role: Role,
    text: &'a str,
}

#[derive(Serialize)]
struct UpdateMessageBody<'a> {
    text: &'a str,
}

/// HTTP client for one sidenote server.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn create_session(&self, markdown_content: &str) -> Result<NewSession, ApiError> {
        let url = self.url("/api/sessions");
        send_with_retry("create_session", || async {
            let response = self
                .http
                .post(&url)
                .json(&CreateSessionBody { markdown_content })
                .send()
                .await?;
            decode(response).await
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<SessionView, ApiError> {
        let url = self.url(&format!("/api/sessions/{}", session_id));
        send_with_retry("get_session", || async {
            let response = self.http.get(&url).send().await?;
            decode(response).await
        })
        .await
    }

    pub async fn delete_session(
        &self,
        session_id: &str,
        owner_token: &str,
    ) -> Result<(), ApiError> {
        let url = self.url(&format!("/api/sessions/{}", session_id));
        send_with_retry("delete_session", || async {
            let response = self
                .http
                .delete(&url)
                .header(OWNER_TOKEN_HEADER, owner_token)
                .send()
                .await?;
            decode::<Ack>(response).await
        })
        .await?;
        Ok(())
    }

    pub async fn fork_session(&self, session_id: &str) -> Result<ForkResult, ApiError> {
        let url = self.url(&format!("/api/sessions/{}/fork", session_id));
        send_with_retry("fork_session", || async {
            let response = self.http.post(&url).send().await?;
            decode(response).await
        })
        .await
    }

    pub async fn add_thread(
        &self,
        session_id: &str,
        owner_token: &str,
        context: &str,
        snippet: &str,
    ) -> Result<ThreadCreated, ApiError> {
        let url = self.url(&format!("/api/sessions/{}/threads", session_id));
        send_with_retry("add_thread", || async {
            let response = self
                .http
                .post(&url)
                .header(OWNER_TOKEN_HEADER, owner_token)
                .json(&AddThreadBody { context, snippet })
                .send()
                .await?;
            decode(response).await
        })
        .await
    }

    pub async fn add_message(
        &self,
        session_id: &str,
        owner_token: &str,
        thread_id: &str,
        role: Role,
        text: &str,
    ) -> Result<MessageCreated, ApiError> {
        let url = self.url(&format!(
            "/api/sessions/{}/threads/{}/messages",
            session_id, thread_id
        ));
        send_with_retry("add_message", || async {
            let response = self
                .http
                .post(&url)
                .header(OWNER_TOKEN_HEADER, owner_token)
                .json(&AddMessageBody { role, text })
                .send()
                .await?;
            decode(response).await
        })
        .await
    }

    pub async fn update_message(
        &self,
        session_id: &str,
        owner_token: &str,
        thread_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<UpdateAck, ApiError> {
        let url = self.url(&format!(
            "/api/sessions/{}/threads/{}/messages/{}",
            session_id, thread_id, message_id
        ));
        send_with_retry("update_message", || async {
            let response = self
                .http
                .put(&url)
                .header(OWNER_TOKEN_HEADER, owner_token)
                .json(&UpdateMessageBody { text })
                .send()
                .await?;
            decode(response).await
        })
        .await
    }

    pub async fn truncate_thread_after(
        &self,
        session_id: &str,
        owner_token: &str,
        thread_id: &str,
        message_id: &str,
    ) -> Result<(), ApiError> {
        let url = self.url(&format!(
            "/api/sessions/{}/threads/{}/messages",
            session_id, thread_id
        ));
        send_with_retry("truncate_thread_after", || async {
            let response = self
                .http
                .delete(&url)
                .query(&[("after", message_id)])
                .header(OWNER_TOKEN_HEADER, owner_token)
                .send()
                .await?;
            decode::<Ack>(response).await
        })
        .await?;
        Ok(())
    }
}

/// Map a response onto the error taxonomy, or decode its JSON body.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let message = response
        .json::<ErrorBody>()
        .await
        .map(|body| body.error)
        .unwrap_or_else(|_| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });

    Err(match status.as_u16() {
        403 => ApiError::Forbidden,
        404 => ApiError::NotFound(message),
        code if (400..500).contains(&code) => ApiError::BadRequest(message),
        _ => ApiError::Server(message),
    })
}
