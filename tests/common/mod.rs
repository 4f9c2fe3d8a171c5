//! Shared utilities for integration testing: a scriptable chatbot API and a
//! relay bound to ephemeral ports.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_stream::wrappers::ReceiverStream;

use course_chatbot_relay::config::RelayConfig;
use course_chatbot_relay::router::{router, RelayState};

/// One step of a scripted prompt response body.
#[derive(Debug, Clone)]
pub enum Step {
    Chunk(String),
    Pause(Duration),
    /// Kill the connection mid-body.
    Abort,
}

pub fn chunk(text: &str) -> Step {
    Step::Chunk(text.to_string())
}

pub fn pause(ms: u64) -> Step {
    Step::Pause(Duration::from_millis(ms))
}

#[derive(Clone)]
pub struct MockUpstream {
    pub prompt_status: StatusCode,
    pub prompt_steps: Vec<Step>,
    pub history_status: StatusCode,
    pub history_body: String,
    pub prompt_calls: Arc<AtomicUsize>,
    pub history_calls: Arc<AtomicUsize>,
    pub last_body: Arc<Mutex<Option<Value>>>,
}

impl Default for MockUpstream {
    fn default() -> Self {
        Self {
            prompt_status: StatusCode::OK,
            prompt_steps: Vec::new(),
            history_status: StatusCode::OK,
            history_body: r#"{"history":[{"role":"user","content":"Hi"},{"role":"assistant","content":"Hello! How can I help?"}]}"#.to_string(),
            prompt_calls: Arc::new(AtomicUsize::new(0)),
            history_calls: Arc::new(AtomicUsize::new(0)),
            last_body: Arc::new(Mutex::new(None)),
        }
    }
}

impl MockUpstream {
    pub fn streaming(steps: Vec<Step>) -> Self {
        Self {
            prompt_steps: steps,
            ..Default::default()
        }
    }

    pub fn prompt_calls(&self) -> usize {
        self.prompt_calls.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    pub fn last_body(&self) -> Option<Value> {
        self.last_body.lock().unwrap().clone()
    }
}

async fn mock_history(State(mock): State<MockUpstream>, Json(body): Json<Value>) -> Response {
    mock.history_calls.fetch_add(1, Ordering::SeqCst);
    *mock.last_body.lock().unwrap() = Some(body);

    if mock.history_status != StatusCode::OK {
        return (mock.history_status, "upstream failure").into_response();
    }
    (
        [(header::CONTENT_TYPE, "application/json")],
        mock.history_body.clone(),
    )
        .into_response()
}

async fn mock_prompt(State(mock): State<MockUpstream>, Json(body): Json<Value>) -> Response {
    mock.prompt_calls.fetch_add(1, Ordering::SeqCst);
    *mock.last_body.lock().unwrap() = Some(body);

    if mock.prompt_status != StatusCode::OK {
        return (mock.prompt_status, "upstream failure").into_response();
    }

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(16);
    let steps = mock.prompt_steps.clone();
    tokio::spawn(async move {
        for step in steps {
            match step {
                Step::Chunk(text) => {
                    if tx.send(Ok(Bytes::from(text))).await.is_err() {
                        return;
                    }
                }
                Step::Pause(duration) => tokio::time::sleep(duration).await,
                Step::Abort => {
                    let _ = tx.send(Err(std::io::Error::other("upstream aborted"))).await;
                    return;
                }
            }
        }
    });

    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response()
}

/// Start the scripted chatbot API on an ephemeral port.
pub async fn spawn_upstream(mock: MockUpstream) -> SocketAddr {
    let app = Router::new()
        .route("/api/chatbot/:id/history", post(mock_history))
        .route("/api/chatbot/:id/prompt", post(mock_prompt))
        .with_state(mock);

    serve_on_ephemeral_port(app).await
}

/// Start the relay on an ephemeral port.
pub async fn spawn_relay(config: RelayConfig) -> SocketAddr {
    let state = RelayState::new(config).unwrap();
    serve_on_ephemeral_port(router(state)).await
}

async fn serve_on_ephemeral_port(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

pub fn relay_config(upstream: SocketAddr) -> RelayConfig {
    RelayConfig {
        api_host: format!("http://{}", upstream),
        ..Default::default()
    }
}

/// Mock upstream plus a relay pointed at it
pub async fn start_pair(mock: MockUpstream) -> SocketAddr {
    let upstream = spawn_upstream(mock).await;
    spawn_relay(relay_config(upstream)).await
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .unwrap()
}

pub fn done_event() -> &'static str {
    "event: done\ndata: {\"status\":\"complete\"}\n\n"
}
