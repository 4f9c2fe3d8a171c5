use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{debug, error, info};

use crate::config::RelayConfig;
use crate::error::UpstreamError;
use crate::request::ChatRequest;

/// Upstream body chunks in arrival order.
pub type UpstreamChunks = BoxStream<'static, Result<Bytes, UpstreamError>>;

/// Body of a successful history call, kept byte-for-byte.
#[derive(Debug, Clone)]
pub struct HistoryResponse {
    pub content_type: String,
    pub body: Bytes,
}

/// Outbound side of the relay. Holds one client per timeout profile; the
/// long profile is only used for streamed prompts.
#[derive(Clone)]
pub struct UpstreamClient {
    api_host: String,
    short: reqwest::Client,
    long: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(config: &RelayConfig) -> Result<Self, UpstreamError> {
        // The chatbot API is addressed directly; ambient proxy settings are ignored.
        let short = reqwest::Client::builder()
            .no_proxy()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| UpstreamError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        let long = reqwest::Client::builder()
            .no_proxy()
            .connect_timeout(config.connect_timeout)
            .timeout(config.stream_timeout)
            .build()
            .map_err(|e| UpstreamError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_host: config.api_host.clone(),
            short,
            long,
        })
    }

    pub fn endpoint(&self, chatbot_id: u64, operation: &str) -> String {
        format!("{}/api/chatbot/{}/{}", self.api_host, chatbot_id, operation)
    }

    /// One synchronous history call with the short timeout profile
    pub async fn fetch_history(&self, request: &ChatRequest) -> Result<HistoryResponse, UpstreamError> {
        let url = self.endpoint(request.chatbot_id, "history");
        info!("🔄 Fetching history from: {}", url);

        let response = self
            .short
            .post(&url)
            .json(&request.upstream_body())
            .send()
            .await
            .map_err(|e| {
                error!("❌ History request failed: {}", e);
                UpstreamError::from(e)
            })?;

        let response = check_status(response)?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/json")
            .to_string();

        let body = response.bytes().await.map_err(|e| {
            error!("❌ Failed to read history body: {}", e);
            UpstreamError::from(e)
        })?;
        debug!("📥 History body: {} bytes", body.len());

        Ok(HistoryResponse { content_type, body })
    }

    /// Open the streamed prompt call with the long timeout profile. Resolves
    /// once response headers arrive; the body is read by the caller.
    pub async fn open_prompt_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<UpstreamChunks, UpstreamError> {
        let url = self.endpoint(request.chatbot_id, "prompt");
        info!("🌊 Opening prompt stream to: {}", url);

        let response = self
            .long
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request.upstream_body())
            .send()
            .await
            .map_err(|e| {
                error!("❌ Prompt request failed: {}", e);
                UpstreamError::from(e)
            })?;

        let response = check_status(response)?;
        debug!("✓ Received response headers from upstream");

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(UpstreamError::from))
            .boxed())
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
    let status = response.status();
    info!("📬 Upstream response status: {}", status);

    if status.is_client_error() || status.is_server_error() {
        error!("Upstream returned error status: {}", status);
        return Err(UpstreamError::Status(status.as_u16()));
    }
    Ok(response)
}
