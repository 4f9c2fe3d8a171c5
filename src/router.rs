use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{header, HeaderName, Response, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::StreamExt;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::error::{UpstreamError, ValidationError};
use crate::relay::relay_prompt;
use crate::request::{Action, ChatQuery, ChatRequest};
use crate::upstream::UpstreamClient;

/// Path older course pages still post to.
pub const LEGACY_PATH: &str = "/local/course_chatbot/chatbot_ajax_handler.php";

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

#[derive(Clone)]
pub struct RelayState {
    pub config: Arc<RelayConfig>,
    pub upstream: UpstreamClient,
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Result<Self, UpstreamError> {
        let upstream = UpstreamClient::new(&config)?;
        Ok(Self {
            config: Arc::new(config),
            upstream,
        })
    }
}

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/chatbot", get(chatbot_handler).post(chatbot_handler))
        .route(LEGACY_PATH, get(chatbot_handler).post(chatbot_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn chatbot_handler(
    State(state): State<RelayState>,
    query: Option<Query<ChatQuery>>,
    body: Bytes,
) -> Response<Body> {
    let request_id = Uuid::new_v4();
    let span = info_span!("chatbot", %request_id);

    async move {
        let query = query.map(|Query(q)| q).unwrap_or_default();
        info!(
            "📨 Incoming request: action={} chatbot_id={}",
            query.action.as_deref().unwrap_or("-"),
            query.chatbot_id.as_deref().unwrap_or("-")
        );

        let request = match ChatRequest::from_parts(query, &body) {
            Ok(request) => request,
            Err(e) => {
                warn!("🚫 Rejected request: {}", e);
                return e.into_response();
            }
        };

        match request.action {
            Action::History => handle_history(&state, request).await,
            Action::Prompt => handle_prompt(&state, request, request_id),
        }
    }
    .instrument(span)
    .await
}

/// Pass the upstream history body through verbatim
async fn handle_history(state: &RelayState, request: ChatRequest) -> Response<Body> {
    match state.upstream.fetch_history(&request).await {
        Ok(history) => {
            info!("✅ History relayed: {} bytes", history.body.len());
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, history.content_type)
                .body(Body::from(history.body))
                .unwrap_or_else(|e| {
                    error!("Failed to build history response: {}", e);
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                })
        }
        Err(e) => {
            error!("❌ History request failed: {}", e);
            let debug_info = state
                .config
                .expose_debug_info
                .then(|| debug_info(&state.config, &request, &e));
            e.into_json_response(debug_info)
        }
    }
}

/// Switch to SSE and hand the body over to the relay. Headers go out with
/// the first flush, so every failure from here on is an `error` event.
fn handle_prompt(state: &RelayState, request: ChatRequest, request_id: Uuid) -> Response<Body> {
    info!("🌊 Streaming prompt for chatbot {}", request.chatbot_id);

    let frames = relay_prompt(state.upstream.clone(), request, request_id)
        .map(|frame| Ok::<_, Infallible>(frame.into_bytes()));

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}

fn debug_info(config: &RelayConfig, request: &ChatRequest, err: &UpstreamError) -> Value {
    json!({
        "api_host": config.api_host,
        "action": request.action.as_str(),
        "chatbot_id": request.chatbot_id,
        "user_email": request.user_email,
        "kind": err.kind(),
    })
}
