//! Terminal front-end for the relay: history on start, then one prompt per
//! line of stdin with the reply streamed in place. Ctrl-C cancels a reply,
//! Ctrl-D quits.

use std::io::Write;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::Level;

use course_chatbot_relay::widget::{ChatView, ChatWidget, Role, WidgetSettings};

#[derive(Debug, Parser)]
#[command(name = "chatbot-chat", about = "Chat with a course chatbot through the relay")]
struct Args {
    /// Relay endpoint
    #[arg(long, env = "CHATBOT_RELAY_URL", default_value = "http://127.0.0.1:8088/chatbot")]
    relay_url: String,

    #[arg(long, env = "CHATBOT_ID", default_value_t = 1)]
    chatbot_id: u64,

    #[arg(long, env = "CHATBOT_USER_EMAIL")]
    user_email: String,

    #[arg(long, env = "CHATBOT_USER_NAME", default_value = "")]
    user_name: String,
}

/// Prints to stdout. Streaming text is written as deltas so the reply grows
/// on one line.
#[derive(Default)]
struct TerminalView {
    printed: usize,
}

impl ChatView for TerminalView {
    fn add_message(&mut self, content: &str, role: Role) {
        let label = match role {
            Role::User => "you",
            Role::Bot => "bot",
        };
        println!("{}> {}", label, content);
    }

    fn begin_streaming(&mut self) {
        self.printed = 0;
        print!("bot> …");
        let _ = std::io::stdout().flush();
    }

    fn update_streaming(&mut self, text: &str) {
        if self.printed == 0 {
            // Erase the typing marker
            print!("\u{8} \u{8}");
        }
        if let Some(delta) = text.get(self.printed..) {
            print!("{}", delta);
        }
        self.printed = text.len();
        let _ = std::io::stdout().flush();
    }

    fn finalize_streaming(&mut self) {
        println!();
    }

    fn discard_streaming(&mut self) {
        println!();
    }

    fn show_error(&mut self, message: &str) {
        println!("error> {}", message);
    }

    fn set_input_enabled(&mut self, enabled: bool) {
        if enabled {
            print!("> ");
            let _ = std::io::stdout().flush();
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(Level::WARN)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let settings = WidgetSettings {
        relay_url: args.relay_url,
        chatbot_id: args.chatbot_id,
        user_email: args.user_email,
        user_name: args.user_name,
    };
    let widget = ChatWidget::new(reqwest::Client::new(), settings, TerminalView::default());

    widget.load_history().await;
    widget.view().set_input_enabled(true);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            widget.view().set_input_enabled(true);
            continue;
        }

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });

        // Errors are already drawn by the view.
        let _ = widget.submit(&line, &cancel).await;
        watcher.abort();
    }
}
