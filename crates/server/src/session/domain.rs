//! Domain entities for the session graph.
//!
//! A `Session` owns its `Thread`s, a `Thread` its `Message`s. The structs
//! here are the fully assembled shapes the store hands out; row-level
//! plumbing stays inside the sqlite module.

use serde::{Deserialize, Serialize};

/// Context value marking a thread anchored to the whole document rather
/// than a quoted selection.
pub const WHOLE_DOCUMENT_CONTEXT: &str = "whole-document";

/// Upper bound on session document content.
pub const MAX_MARKDOWN_BYTES: usize = 500 * 1024;

/// Upper bound on a thread's quoted context.
pub const MAX_CONTEXT_BYTES: usize = 50 * 1024;

/// Upper bound on a thread's snippet label.
pub const MAX_SNIPPET_BYTES: usize = 1024;

/// Upper bound on a single message's text.
pub const MAX_MESSAGE_BYTES: usize = 50 * 1024;

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// Lifecycle of a tool invocation carried inside an assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolState {
    /// Arguments still streaming in.
    PartialCall,
    /// Arguments complete, result pending.
    Call,
    /// Result available.
    Result,
}

/// One structured segment of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    ToolInvocation {
        id: String,
        name: String,
        args: serde_json::Value,
        state: ToolState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },
}

impl MessagePart {
    pub fn type_name(&self) -> &'static str {
        match self {
            MessagePart::Text { .. } => "text",
            MessagePart::ToolInvocation { .. } => "tool_invocation",
        }
    }
}

/// A single message within a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub role: Role,
    pub text: String,
    /// Structured parts, empty for plain-text messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<MessagePart>,
    /// Epoch milliseconds.
    pub created_at: i64,
}

/// A discussion thread anchored to a document selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    pub session_id: String,
    /// Quoted selection, or [`WHOLE_DOCUMENT_CONTEXT`].
    pub context: String,
    pub snippet: String,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Messages ordered by `(created_at, id)` ascending.
    pub messages: Vec<Message>,
}

/// A fully assembled session graph. The owner token is deliberately
/// absent: it is returned exactly once, at creation or fork time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub markdown_content: String,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds, monotonic non-decreasing.
    pub updated_at: i64,
    pub forked_from: Option<String>,
    pub threads: Vec<Thread>,
}

/// Result of creating a session: the shareable id and the secret proving
/// write authority over it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    pub session_id: String,
    pub owner_token: String,
}

/// Result of forking a session. `thread_id_map` maps every thread id of
/// the original to its clone so callers holding UI state keyed by old ids
/// can retarget it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkOutcome {
    pub session_id: String,
    pub owner_token: String,
    pub thread_id_map: std::collections::HashMap<String, String>,
}
