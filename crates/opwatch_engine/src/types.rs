use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Failure talking to the job or chat routes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl TransportError {
    /// Message suitable for showing to a user.
    pub fn user_message(&self) -> &str {
        match self {
            TransportError::Status { message, .. } => message,
            TransportError::Timeout(_) => "the server took too long to respond",
            TransportError::Network(_) => "the server could not be reached",
            TransportError::InvalidUrl(message) | TransportError::Decode(message) => message,
        }
    }
}

/// Why a streaming answer did not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("stream could not be opened: {0}")]
    Open(TransportError),
    #[error("stream interrupted: {0}")]
    Interrupted(TransportError),
    #[error("server reported an error: {0}")]
    Remote(String),
    #[error("incomplete stream")]
    Incomplete { events: usize },
    #[error("malformed result payload: {0}")]
    Decode(String),
}

/// Both the stream and its single fallback request failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("streaming failed ({stream}); fallback failed ({fallback})")]
pub struct TurnError {
    pub stream: StreamError,
    pub fallback: TransportError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

impl ChatRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            history: Vec::new(),
        }
    }
}

/// Final answer of a chat turn, from either the stream's `result` event or
/// the single-shot fallback.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatAnswer {
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<Value>,
    #[serde(default, alias = "followups")]
    pub follow_ups: Vec<String>,
}

/// Change to the visible answer of a chat turn.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerUpdate {
    /// Accumulated streamed text so far.
    Partial(String),
    /// Authoritative answer; replaces anything shown before.
    Final(ChatAnswer),
    /// User-facing failure text; replaces anything shown before.
    Failed(String),
}

impl fmt::Display for AnswerUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerUpdate::Partial(text) => f.write_str(text),
            AnswerUpdate::Final(answer) => f.write_str(&answer.answer),
            AnswerUpdate::Failed(message) => f.write_str(message),
        }
    }
}
