use axum::serve;
use std::env;
use tokio::net::TcpListener;
use tracing::{error, info, Level};

use course_chatbot_relay::config::RelayConfig;
use course_chatbot_relay::router::{router, RelayState};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(
            env::var("RUST_LOG")
                .ok()
                .and_then(|s| s.parse::<Level>().ok())
                .unwrap_or(Level::INFO)
        )
        .init();

    // Configuration from environment variables
    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let bind_addr = config.bind_addr();

    info!("Starting Course Chatbot Relay");
    info!("Listening on: {}", bind_addr);
    info!("Relaying to: {}", config.api_host);
    info!("Timeout config:");
    info!("  Request timeout: {:?}", config.request_timeout);
    info!("  Stream timeout: {:?}", config.stream_timeout);
    info!("  Connect timeout: {:?}", config.connect_timeout);
    if config.expose_debug_info {
        info!("Debug info is included in error responses (EXPOSE_DEBUG_INFO)");
    }

    // Create shared state
    let state = RelayState::new(config).expect("Failed to build HTTP client");

    // Build router
    let app = router(state);

    // Start server
    let listener = TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    info!("Course Chatbot Relay is ready");

    serve(listener, app)
        .await
        .expect("Server error");
}
