//! Control-plane tests over a real listener: auth, plan reload, mode
//! switching and the scorecard endpoint.

use agentchaos_core::{loader::validate_plan, PiiRedactor, RuntimeEnv};
use agentchaos_observability::AuditLog;
use agentchaos_proxy::{control, ProxyState};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

const PLAN: &str = r#"
version: "1"
revision: 1
metadata: { name: ctl, experiment_id: exp-ctl }
targets:
  - { name: all, type: http_endpoint, pattern: ".*" }
scenarios:
  - name: slow
    type: latency
    target_ref: all
    params: { delay: 0.01 }
"#;

async fn spawn_control(env: RuntimeEnv, token: Option<&str>) -> (SocketAddr, Arc<ProxyState>) {
    let plan = validate_plan(PLAN.as_bytes(), &env).unwrap();
    let audit = AuditLog::open(None, PiiRedactor::new(true)).unwrap();
    let state = ProxyState::new(plan, env, audit, token.map(ToString::to_string)).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serve_state = state.clone();
    tokio::spawn(async move {
        control::serve(listener, serve_state).await.unwrap();
    });
    (addr, state)
}

#[tokio::test]
async fn healthz_is_open_and_reports_state() {
    let (addr, _state) = spawn_control(RuntimeEnv::default(), Some("secret")).await;
    let client = reqwest::Client::new();

    let response = client.get(format!("http://{addr}/healthz")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["mode"], "live");
    assert_eq!(body["plan_revision"], 1);
    assert!(body["uptime_s"].is_number());
}

#[tokio::test]
async fn protected_routes_require_the_token() {
    let (addr, state) = spawn_control(RuntimeEnv::default(), Some("secret")).await;
    let client = reqwest::Client::new();

    let response = client.get(format!("http://{addr}/scorecard")).send().await.unwrap();
    assert_eq!(response.status(), 401);

    let response = client
        .get(format!("http://{addr}/scorecard"))
        .header("X-Chaos-Token", "wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = client
        .get(format!("http://{addr}/scorecard"))
        .header("X-Chaos-Token", "secret")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    assert_eq!(state.auth_failures.load(std::sync::atomic::Ordering::Relaxed), 2);
}

#[tokio::test]
async fn plan_reload_installs_or_reports_all_errors() {
    let (addr, state) = spawn_control(RuntimeEnv::default(), Some("secret")).await;
    let client = reqwest::Client::new();

    // stale revision is rejected, plan unchanged
    let response = client
        .post(format!("http://{addr}/plan"))
        .header("X-Chaos-Token", "secret")
        .body(PLAN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(state.plan.revision(), 1);

    // broken plan reports every offending path
    let broken = PLAN
        .replace("revision: 1", "revision: 2")
        .replace("target_ref: all", "target_ref: ghost")
        .replace("pattern: \".*\"", "pattern: \"[\"");
    let response = client
        .post(format!("http://{addr}/plan"))
        .header("X-Chaos-Token", "secret")
        .body(broken)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    let messages = body["messages"].as_array().unwrap();
    assert!(messages.len() >= 2);
    assert_eq!(state.plan.revision(), 1);

    // a valid higher revision installs
    let next = PLAN.replace("revision: 1", "revision: 2");
    let response = client
        .post(format!("http://{addr}/plan"))
        .header("X-Chaos-Token", "secret")
        .body(next)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["revision"], 2);
    assert_eq!(state.plan.revision(), 2);
}

#[tokio::test]
async fn mode_switch_validates_tape_path() {
    let (addr, state) = spawn_control(RuntimeEnv::default(), Some("secret")).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/mode"))
        .header("X-Chaos-Token", "secret")
        .json(&json!({ "mode": "record" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let dir = tempfile::TempDir::new().unwrap();
    let tape = dir.path().join("run.tape.json");
    let response = client
        .post(format!("http://{addr}/mode"))
        .header("X-Chaos-Token", "secret")
        .json(&json!({ "mode": "record", "tape_path": tape }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(state.mode().as_str(), "record");

    let response = client
        .post(format!("http://{addr}/mode"))
        .header("X-Chaos-Token", "secret")
        .json(&json!({ "mode": "playback", "tape_path": tape }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(state.mode().as_str(), "playback");
    assert!(state.player().is_some());
}

#[tokio::test]
async fn strict_jwt_mode_requires_a_valid_bearer() {
    let env = RuntimeEnv {
        jwt_strict: true,
        jwt_secret: Some("jwt-secret".to_string()),
        ..RuntimeEnv::default()
    };
    let (addr, _state) = spawn_control(env, Some("secret")).await;
    let client = reqwest::Client::new();

    // token alone is no longer enough
    let response = client
        .get(format!("http://{addr}/scorecard"))
        .header("X-Chaos-Token", "secret")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    #[derive(serde::Serialize)]
    struct Claims {
        sub: String,
        exp: u64,
    }
    let claims = Claims {
        sub: "operator".to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as u64,
    };
    let jwt = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(b"jwt-secret"),
    )
    .unwrap();

    let response = client
        .get(format!("http://{addr}/scorecard"))
        .header("X-Chaos-Token", "secret")
        .header("Authorization", format!("Bearer {jwt}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}
