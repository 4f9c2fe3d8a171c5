use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Inbound request rejected before any upstream call is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid action")]
    InvalidAction,
    #[error("Invalid chatbot_id")]
    InvalidChatbotId,
    #[error("Invalid request body")]
    InvalidBody,
    #[error("user_email is required")]
    MissingUserEmail,
    #[error("Prompt is required")]
    MissingPrompt,
}

impl IntoResponse for ValidationError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

/// Failure talking to the chatbot API, before or during a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    #[error("API connection failed: {0}")]
    Connect(String),
    #[error("API request timed out: {0}")]
    Timeout(String),
    #[error("API request failed: {0}")]
    Transport(String),
    #[error("API returned error code: {0}")]
    Status(u16),
}

impl UpstreamError {
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Connect(_) => "connect",
            UpstreamError::Timeout(_) => "timeout",
            UpstreamError::Transport(_) => "transport",
            UpstreamError::Status(_) => "status",
        }
    }

    /// Wire format for non-streaming operations: 500 with a normalized body.
    /// `debug_info` is attached only when the caller supplies it.
    pub fn into_json_response(self, debug_info: Option<Value>) -> Response {
        let mut body = json!({ "error": format!("Server error: {}", self) });
        if let Some(info) = debug_info {
            body["debug_info"] = info;
        }
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UpstreamError::Timeout(e.to_string())
        } else if e.is_connect() {
            UpstreamError::Connect(e.to_string())
        } else if let Some(status) = e.status() {
            UpstreamError::Status(status.as_u16())
        } else {
            UpstreamError::Transport(e.to_string())
        }
    }
}

/// Outcome of a failed prompt or history call on the client side.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("HTTP error! status: {0}")]
    HttpStatus(u16),
    #[error("{0}")]
    Transport(String),
    /// Message carried by an `error` event from the relay.
    #[error("{0}")]
    Remote(String),
    #[error("Stream ended before completion")]
    Truncated { partial: String },
    #[error("Cancelled")]
    Cancelled { partial: String },
    #[error("A prompt is already in progress")]
    Busy,
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => ChatError::HttpStatus(status.as_u16()),
            None => ChatError::Transport(e.to_string()),
        }
    }
}
