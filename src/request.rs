use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    History,
    Prompt,
}

impl Action {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        match raw {
            "history" => Ok(Action::History),
            "prompt" => Ok(Action::Prompt),
            _ => Err(ValidationError::InvalidAction),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::History => "history",
            Action::Prompt => "prompt",
        }
    }
}

/// Query string of an inbound call. Everything is optional here so that
/// missing fields surface as our own JSON errors instead of extractor
/// rejections.
#[derive(Debug, Default, Deserialize)]
pub struct ChatQuery {
    pub action: Option<String>,
    pub chatbot_id: Option<String>,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
}

/// JSON body of an inbound call
#[derive(Debug, Default, Deserialize)]
pub struct ChatBody {
    pub prompt: Option<String>,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
}

/// A validated inbound call. `prompt` is `Some` and non-blank exactly when
/// `action` is `Prompt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub action: Action,
    pub chatbot_id: u64,
    pub user_email: String,
    pub user_name: String,
    pub prompt: Option<String>,
}

impl ChatRequest {
    /// Validate query and raw body. Checks run in a fixed order and the first
    /// failure wins: action, chatbot_id, body shape, prompt (prompt calls
    /// only), user_email.
    pub fn from_parts(query: ChatQuery, body: &[u8]) -> Result<Self, ValidationError> {
        let action = Action::parse(query.action.as_deref().unwrap_or(""))?;

        let chatbot_id = query
            .chatbot_id
            .as_deref()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .ok_or(ValidationError::InvalidChatbotId)?;

        let body = parse_body(body)?;

        let prompt = match action {
            Action::History => None,
            Action::Prompt => Some(non_blank(body.prompt).ok_or(ValidationError::MissingPrompt)?),
        };

        let user_email = non_blank(body.user_email)
            .or_else(|| non_blank(query.user_email))
            .ok_or(ValidationError::MissingUserEmail)?;
        let user_name = non_blank(body.user_name)
            .or_else(|| non_blank(query.user_name))
            .unwrap_or_default();

        Ok(Self {
            action,
            chatbot_id,
            user_email,
            user_name,
            prompt,
        })
    }

    /// Body sent to the chatbot API for this request
    pub fn upstream_body(&self) -> UpstreamBody<'_> {
        UpstreamBody {
            prompt: self.prompt.as_deref(),
            user_email: &self.user_email,
            user_name: &self.user_name,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UpstreamBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<&'a str>,
    pub user_email: &'a str,
    pub user_name: &'a str,
}

fn parse_body(raw: &[u8]) -> Result<ChatBody, ValidationError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(ChatBody::default());
    }
    let value: Value = serde_json::from_slice(raw).map_err(|_| ValidationError::InvalidBody)?;
    if !value.is_object() {
        return Err(ValidationError::InvalidBody);
    }
    serde_json::from_value(value).map_err(|_| ValidationError::InvalidBody)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
