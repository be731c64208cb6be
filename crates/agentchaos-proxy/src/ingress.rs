//! Ingress adapter: a thin HTTP listener that turns incoming requests
//! into flows and drives them through the engine. Agents either send
//! proxy-style absolute URIs, set `X-Chaos-Upstream` to the real base
//! URL, or rely on the Host header.

use crate::engine::ChaosEngine;
use crate::upstream::Upstream;
use agentchaos_core::Flow;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::Response;
use axum::Router;
use std::sync::Arc;
use tracing::info;

/// Request bodies above this size are rejected at ingress.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

#[derive(Clone)]
struct IngressState {
    engine: Arc<ChaosEngine>,
    upstream: Arc<dyn Upstream>,
}

/// Build the ingress router.
pub fn router(engine: Arc<ChaosEngine>, upstream: Arc<dyn Upstream>) -> Router {
    Router::new().fallback(handle).with_state(IngressState { engine, upstream })
}

/// Serve the ingress on an already-bound listener.
pub async fn serve(
    listener: tokio::net::TcpListener,
    engine: Arc<ChaosEngine>,
    upstream: Arc<dyn Upstream>,
) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "ingress listening");
    axum::serve(listener, router(engine, upstream)).await
}

async fn handle(State(state): State<IngressState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes.to_vec(),
        Err(_) => {
            return plain_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
        }
    };

    let url = resolve_url(&parts);
    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect::<Vec<_>>();

    let mut flow = Flow::new(parts.method.as_str(), url, headers, body);
    state.engine.process(&mut flow, state.upstream.as_ref()).await;

    match flow.response {
        Some(response) => {
            let mut builder = Response::builder().status(response.status);
            for (name, value) in &response.headers {
                if name == "transfer-encoding" || name == "connection" {
                    continue;
                }
                builder = builder.header(name.as_str(), value.as_str());
            }
            builder.body(Body::from(response.body)).unwrap_or_else(|_| {
                plain_response(StatusCode::INTERNAL_SERVER_ERROR, "response build failed")
            })
        }
        None => plain_response(StatusCode::BAD_GATEWAY, "no response produced"),
    }
}

/// Reconstruct the absolute request URL: proxy-style absolute URI first,
/// then `X-Chaos-Upstream`, then the Host header.
fn resolve_url(parts: &Parts) -> String {
    if parts.uri.scheme().is_some() && parts.uri.authority().is_some() {
        return parts.uri.to_string();
    }

    let path_and_query =
        parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/").to_string();

    if let Some(base) = parts
        .headers
        .get("x-chaos-upstream")
        .and_then(|value| value.to_str().ok())
        .filter(|base| !base.is_empty())
    {
        return format!("{}{}", base.trim_end_matches('/'), path_and_query);
    }

    let host = parts
        .headers
        .get(axum::http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{host}{path_and_query}")
}

fn plain_response(status: StatusCode, message: &str) -> Response {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(Body::from(message.to_string()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Uri;

    fn parts_for(uri: &str, headers: Vec<(&str, &str)>) -> Parts {
        let mut builder = axum::http::Request::builder().uri(uri.parse::<Uri>().unwrap());
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn absolute_uri_wins() {
        let parts = parts_for("http://api.test/x?a=1", vec![("host", "proxy.local")]);
        assert_eq!(resolve_url(&parts), "http://api.test/x?a=1");
    }

    #[test]
    fn upstream_header_is_joined_with_path() {
        let parts =
            parts_for("/v1/q?x=2", vec![("x-chaos-upstream", "http://tools.test/")]);
        assert_eq!(resolve_url(&parts), "http://tools.test/v1/q?x=2");
    }

    #[test]
    fn host_header_is_the_fallback() {
        let parts = parts_for("/ping", vec![("host", "backend:8080")]);
        assert_eq!(resolve_url(&parts), "http://backend:8080/ping");
    }
}
