//! Upstream forwarding: the default reqwest-backed client behind the
//! `Upstream` seam the engine forwards through.

use agentchaos_core::{Flow, FlowResponse, Headers};
use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Upstream failure, surfaced to the agent as a 502.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The request could not be built or sent.
    #[error("upstream request failed: {0}")]
    Request(String),
}

/// The seam between the chaos pipeline and the network. Playback never
/// calls this; live and record modes forward through it.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Send the flow's request and fill in its response.
    async fn forward(&self, flow: &mut Flow) -> Result<(), UpstreamError>;
}

/// Default HTTP upstream.
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    /// Client with sane defaults.
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl Default for HttpUpstream {
    fn default() -> Self {
        Self::new()
    }
}

/// Hop-by-hop headers never forwarded upstream.
const HOP_HEADERS: &[&str] =
    &["host", "content-length", "connection", "transfer-encoding", "proxy-connection"];

#[async_trait]
impl Upstream for HttpUpstream {
    async fn forward(&self, flow: &mut Flow) -> Result<(), UpstreamError> {
        let method = reqwest::Method::from_bytes(flow.request.method.as_bytes())
            .map_err(|err| UpstreamError::Request(format!("bad method: {err}")))?;

        let mut request = self.client.request(method, &flow.request.url);
        for (name, value) in &flow.request.headers {
            if HOP_HEADERS.contains(&name.as_str()) {
                continue;
            }
            request = request.header(name.as_str(), value.as_str());
        }
        if !flow.request.body.is_empty() {
            request = request.body(flow.request.body.clone());
        }

        let response =
            request.send().await.map_err(|err| UpstreamError::Request(err.to_string()))?;

        let status = response.status();
        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
            }
        }
        let body = response
            .bytes()
            .await
            .map_err(|err| UpstreamError::Request(err.to_string()))?
            .to_vec();

        debug!(status = status.as_u16(), bytes = body.len(), "upstream responded");
        flow.response = Some(FlowResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            headers,
            body,
        });
        Ok(())
    }
}
