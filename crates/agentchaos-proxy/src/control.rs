//! Control plane: token-guarded runtime operations on a separate port.
//!
//! `GET /healthz` is the unauthenticated liveness probe; everything else
//! requires `X-Chaos-Token` (constant-time compare) and, in strict JWT
//! mode, a valid HS256 bearer token on top.

use crate::state::{ModeSwitchError, ProxyState};
use agentchaos_core::{PlanLoadError, ProxyMode};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::SinkExt;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Build the control-plane router.
pub fn router(state: Arc<ProxyState>) -> Router {
    let protected = Router::new()
        .route("/plan", post(install_plan))
        .route("/mode", post(switch_mode))
        .route("/scorecard", get(scorecard))
        .route("/events", get(events))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new().route("/healthz", get(healthz)).merge(protected).with_state(state)
}

/// Serve the control plane on an already-bound listener.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: Arc<ProxyState>,
) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "control plane listening");
    axum::serve(listener, router(state)).await
}

async fn require_auth(
    State(state): State<Arc<ProxyState>>,
    request: Request,
    next: Next,
) -> Response {
    if let Err(message) = check_auth(&state, request.headers()) {
        state.auth_failures.fetch_add(1, Ordering::Relaxed);
        state.audit.record("auth_failure", request.uri().path(), false);
        warn!(path = request.uri().path(), "control plane auth failure");
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response();
    }
    next.run(request).await
}

fn check_auth(state: &ProxyState, headers: &HeaderMap) -> Result<(), &'static str> {
    if let Some(expected) = &state.control_token {
        let provided =
            headers.get("x-chaos-token").and_then(|value| value.to_str().ok()).unwrap_or("");
        if ring::constant_time::verify_slices_are_equal(
            provided.as_bytes(),
            expected.as_bytes(),
        )
        .is_err()
        {
            return Err("invalid chaos token");
        }
    }

    if state.env.jwt_strict {
        let Some(secret) = state.env.jwt_secret.as_deref() else {
            return Err("jwt validation unavailable");
        };
        let token = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .unwrap_or("");
        jsonwebtoken::decode::<serde_json::Value>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|_| "invalid bearer token")?;
    }

    Ok(())
}

async fn healthz(State(state): State<Arc<ProxyState>>) -> Json<serde_json::Value> {
    Json(json!({
        "mode": state.mode().as_str(),
        "plan_revision": state.plan.revision(),
        "uptime_s": state.uptime_s(),
    }))
}

async fn install_plan(State(state): State<Arc<ProxyState>>, body: String) -> Response {
    match state.install_plan(body.as_bytes()) {
        Ok(revision) => {
            Json(json!({ "status": "installed", "revision": revision })).into_response()
        }
        Err(err) => {
            let messages = match &err {
                PlanLoadError::Validation { messages } => messages.clone(),
                other => vec![other.to_string()],
            };
            state.audit.record("plan_install", &messages.join("; "), false);
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "plan_rejected", "messages": messages })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModeRequest {
    mode: String,
    #[serde(default)]
    tape_path: Option<PathBuf>,
}

async fn switch_mode(
    State(state): State<Arc<ProxyState>>,
    Json(request): Json<ModeRequest>,
) -> Response {
    let mode: ProxyMode = match request.mode.parse() {
        Ok(mode) => mode,
        Err(message) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response();
        }
    };

    match state.switch_mode(mode, request.tape_path.as_deref()) {
        Ok(()) => Json(json!({ "status": "switched", "mode": mode.as_str() })).into_response(),
        Err(err @ ModeSwitchError::TapePathRequired(_)) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() }))).into_response()
        }
        Err(ModeSwitchError::Tape(err)) => {
            state.audit.record("mode_switch", &err.to_string(), false);
            (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() }))).into_response()
        }
    }
}

async fn scorecard(State(state): State<Arc<ProxyState>>) -> Response {
    state.scorecard.set_events_dropped(state.bus.dropped());
    Json(state.scorecard.summary()).into_response()
}

async fn events(State(state): State<Arc<ProxyState>>, upgrade: WebSocketUpgrade) -> Response {
    let receiver = state.dashboard.subscribe();
    upgrade.on_upgrade(move |socket| stream_events(socket, receiver))
}

async fn stream_events(
    mut socket: WebSocket,
    mut receiver: tokio::sync::broadcast::Receiver<agentchaos_observability::Event>,
) {
    loop {
        match receiver.recv().await {
            Ok(event) => {
                let Ok(line) = serde_json::to_string(&event) else {
                    continue;
                };
                if socket.send(Message::Text(line.into())).await.is_err() {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "dashboard subscriber too slow, dropping");
                break;
            }
            Err(RecvError::Closed) => break,
        }
    }
    let _ = socket.close().await;
}
