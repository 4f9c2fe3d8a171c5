//! Chat widget logic behind a pluggable view. The host page supplies the
//! user identity and the place where messages are drawn.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::consumer::consume_stream;
use crate::error::ChatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Bot,
}

impl Role {
    /// History entries use free-form role strings; anything but "user" is
    /// drawn as the bot.
    pub fn from_history(role: &str) -> Self {
        if role == "user" {
            Role::User
        } else {
            Role::Bot
        }
    }
}

/// Where the widget draws. At most one streaming message exists at a time.
pub trait ChatView: Send {
    fn add_message(&mut self, content: &str, role: Role);
    /// Show the "typing" placeholder for an incoming reply.
    fn begin_streaming(&mut self);
    /// Replace the placeholder text with everything received so far.
    fn update_streaming(&mut self, text: &str);
    /// Turn the placeholder into a regular bot message.
    fn finalize_streaming(&mut self);
    fn discard_streaming(&mut self);
    fn show_error(&mut self, message: &str);
    fn set_input_enabled(&mut self, enabled: bool);
}

#[derive(Debug, Clone)]
pub struct WidgetSettings {
    /// Relay endpoint, e.g. `http://127.0.0.1:8088/chatbot`
    pub relay_url: String,
    pub chatbot_id: u64,
    pub user_email: String,
    pub user_name: String,
}

#[derive(Debug, Deserialize)]
struct HistoryPayload {
    #[serde(default)]
    history: Vec<HistoryEntry>,
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ActionQuery<'a> {
    action: &'a str,
    chatbot_id: u64,
}

#[derive(Debug, Serialize)]
struct OutgoingPrompt<'a> {
    prompt: &'a str,
    user_email: &'a str,
    user_name: &'a str,
}

#[derive(Debug, Serialize)]
struct OutgoingIdentity<'a> {
    user_email: &'a str,
    user_name: &'a str,
}

pub struct ChatWidget<V: ChatView> {
    client: reqwest::Client,
    settings: WidgetSettings,
    view: Mutex<V>,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag and re-enables input however the submission
/// ends, including on early return or cancellation.
struct InFlightGuard<'a, V: ChatView> {
    widget: &'a ChatWidget<V>,
}

impl<V: ChatView> Drop for InFlightGuard<'_, V> {
    fn drop(&mut self) {
        self.widget.view().set_input_enabled(true);
        self.widget.in_flight.store(false, Ordering::SeqCst);
    }
}

impl<V: ChatView> ChatWidget<V> {
    pub fn new(client: reqwest::Client, settings: WidgetSettings, view: V) -> Self {
        Self {
            client,
            settings,
            view: Mutex::new(view),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn view(&self) -> MutexGuard<'_, V> {
        self.view.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn into_view(self) -> V {
        self.view.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn action_query<'a>(&self, action: &'a str) -> ActionQuery<'a> {
        ActionQuery {
            action,
            chatbot_id: self.settings.chatbot_id,
        }
    }

    /// Draw the stored conversation. Failures are logged and leave the view
    /// untouched; returns how many messages were drawn.
    pub async fn load_history(&self) -> usize {
        match self.fetch_history().await {
            Ok(entries) => {
                let mut view = self.view();
                for entry in &entries {
                    view.add_message(&entry.content, Role::from_history(&entry.role));
                }
                info!("📜 Loaded {} history message(s)", entries.len());
                entries.len()
            }
            Err(e) => {
                error!("Failed to load chat history: {}", e);
                0
            }
        }
    }

    async fn fetch_history(&self) -> Result<Vec<HistoryEntry>, ChatError> {
        let response = self
            .client
            .post(&self.settings.relay_url)
            .query(&self.action_query("history"))
            .json(&OutgoingIdentity {
                user_email: &self.settings.user_email,
                user_name: &self.settings.user_name,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::HttpStatus(status.as_u16()));
        }
        let payload: HistoryPayload = response.json().await?;
        Ok(payload.history)
    }

    /// Send one prompt and stream the reply into the view.
    ///
    /// Blank input is ignored (`Ok(None)`). Only one submission may be in
    /// flight; a second concurrent call fails with `ChatError::Busy` without
    /// touching the view.
    pub async fn submit(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, ChatError> {
        let prompt = text.trim();
        if prompt.is_empty() {
            return Ok(None);
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Prompt submitted while another is in progress");
            return Err(ChatError::Busy);
        }
        let _guard = InFlightGuard { widget: self };

        {
            let mut view = self.view();
            view.add_message(prompt, Role::User);
            view.set_input_enabled(false);
            view.begin_streaming();
        }

        match self.stream_prompt(prompt, cancel).await {
            Ok(reply) => {
                self.view().finalize_streaming();
                debug!("Reply complete: {} chars", reply.len());
                Ok(Some(reply))
            }
            Err(e) => {
                error!("Streaming failed: {}", e);
                let mut view = self.view();
                view.discard_streaming();
                view.show_error(&e.to_string());
                Err(e)
            }
        }
    }

    async fn stream_prompt(&self, prompt: &str, cancel: &CancellationToken) -> Result<String, ChatError> {
        let request = self
            .client
            .post(&self.settings.relay_url)
            .query(&self.action_query("prompt"))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&OutgoingPrompt {
                prompt,
                user_email: &self.settings.user_email,
                user_name: &self.settings.user_name,
            })
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Cancelled { partial: String::new() }),
            response = request => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::HttpStatus(status.as_u16()));
        }

        consume_stream(Box::pin(response.bytes_stream()), cancel, |text| {
            self.view().update_streaming(text);
        })
        .await
    }
}
