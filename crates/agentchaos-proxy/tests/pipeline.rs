//! End-to-end pipeline tests: one flow at a time through the full
//! classify → match → mutate → upstream → record path.

use agentchaos_core::{
    loader::validate_plan, Flow, PiiRedactor, ProxyMode, RuntimeEnv, TrafficType,
};
use agentchaos_observability::AuditLog;
use agentchaos_proxy::{ChaosEngine, ProxyState, Upstream, UpstreamError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Scripted upstream: canned responses by URL, counts every call.
struct MockUpstream {
    responses: HashMap<String, (u16, Vec<u8>)>,
    calls: AtomicU64,
}

impl MockUpstream {
    fn new(responses: Vec<(&str, u16, &[u8])>) -> Self {
        Self {
            responses: responses
                .into_iter()
                .map(|(url, status, body)| (url.to_string(), (status, body.to_vec())))
                .collect(),
            calls: AtomicU64::new(0),
        }
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn forward(&self, flow: &mut Flow) -> Result<(), UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (status, body) = self
            .responses
            .get(&flow.request.url)
            .cloned()
            .unwrap_or((200, b"{}".to_vec()));
        let mut headers = agentchaos_core::Headers::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        flow.response = Some(agentchaos_core::FlowResponse {
            status,
            reason: "OK".to_string(),
            headers,
            body,
        });
        Ok(())
    }
}

fn engine_for(plan_yaml: &str) -> ChaosEngine {
    let env = RuntimeEnv::default();
    let plan = validate_plan(plan_yaml.as_bytes(), &env).unwrap();
    let audit = AuditLog::open(None, PiiRedactor::new(true)).unwrap();
    let state = ProxyState::new(plan, env, audit, None).unwrap();
    ChaosEngine::new(state)
}

#[tokio::test]
async fn latency_scenario_delays_and_tags_the_flow() {
    let engine = engine_for(
        r#"
version: "1"
revision: 1
metadata: { name: lat, experiment_id: exp-lat }
targets:
  - { name: x, type: http_endpoint, pattern: "http://x/.*" }
scenarios:
  - name: slow
    type: latency
    target_ref: x
    probability: 1.0
    params: { delay: 0.5 }
"#,
    );
    let upstream = MockUpstream::new(vec![("http://x/a", 200, b"ok")]);

    let mut flow = Flow::new("GET", "http://x/a", vec![], vec![]);
    let start = Instant::now();
    engine.process(&mut flow, &upstream).await;

    assert!(start.elapsed() >= Duration::from_millis(500));
    assert_eq!(flow.metadata.applied_strategies, vec!["latency"]);
    assert!(flow.metadata.chaos_applied);
    assert_eq!(flow.response.as_ref().unwrap().body, b"ok");
    assert_eq!(upstream.calls(), 1);
}

#[tokio::test]
async fn error_injection_short_circuits_before_upstream() {
    let engine = engine_for(
        r#"
version: "1"
revision: 1
metadata: { name: err, experiment_id: exp-err }
targets:
  - { name: pay, type: http_endpoint, pattern: ".*/pay" }
scenarios:
  - name: pay-down
    type: error_injection
    target_ref: pay
    probability: 1.0
    params: { status: 503, body: down }
"#,
    );
    let upstream = MockUpstream::new(vec![]);

    let mut flow = Flow::new("POST", "http://api/pay", vec![], b"{}".to_vec());
    engine.process(&mut flow, &upstream).await;

    let response = flow.response.as_ref().unwrap();
    assert_eq!(response.status, 503);
    assert_eq!(response.body, b"down");
    assert!(flow.metadata.chaos_applied);
    assert_eq!(upstream.calls(), 0, "no upstream traffic on short-circuit");
}

#[tokio::test]
async fn swarm_isolation_cuts_off_listed_agent() {
    let engine = engine_for(
        r#"
version: "1"
revision: 1
metadata: { name: swarm, experiment_id: exp-swarm }
targets:
  - { name: mesh, type: http_endpoint, pattern: ".*" }
scenarios:
  - name: isolate-7
    type: swarm_disruption
    target_ref: mesh
    probability: 1.0
    params:
      attack_type: agent_isolation
      isolated_agents: [agent-7]
"#,
    );
    let upstream = MockUpstream::new(vec![]);

    let mut flow = Flow::new(
        "POST",
        "http://mesh.test/msg",
        vec![
            ("X-Agent-To-Agent".to_string(), "true".to_string()),
            ("X-Agent-Id".to_string(), "agent-7".to_string()),
        ],
        b"{}".to_vec(),
    );
    engine.process(&mut flow, &upstream).await;

    assert_eq!(flow.traffic_type(), TrafficType::AgentToAgent);
    assert_eq!(flow.response.as_ref().unwrap().status, 503);
    assert_eq!(flow.metadata.applied_strategies, vec!["swarm_disruption"]);
    assert_eq!(upstream.calls(), 0);

    let events = engine.state().bus.try_drain();
    let chaos = events
        .iter()
        .find(|e| e.phase == agentchaos_observability::EventPhase::Chaos)
        .expect("chaos event emitted");
    assert_eq!(chaos.traffic_type, TrafficType::AgentToAgent);
    assert!(chaos.chaos_applied);
}

#[tokio::test]
async fn untriggered_strategies_leave_the_flow_byte_identical() {
    let engine = engine_for(
        r#"
version: "1"
revision: 1
metadata: { name: zero, experiment_id: exp-zero }
targets:
  - { name: all, type: http_endpoint, pattern: ".*" }
scenarios:
  - name: never
    type: data_corruption
    target_ref: all
    probability: 0.0
"#,
    );
    let body = br#"{"price": 100, "ok": true}"#;
    let upstream = MockUpstream::new(vec![("http://x/a", 200, body)]);

    let mut flow = Flow::new("GET", "http://x/a", vec![], vec![]);
    engine.process(&mut flow, &upstream).await;

    assert_eq!(flow.response.as_ref().unwrap().body, body);
    assert!(!flow.metadata.chaos_applied);
    assert!(flow.metadata.applied_strategies.is_empty());
}

#[tokio::test]
async fn events_for_one_flow_are_monotonic_in_seq() {
    let engine = engine_for(
        r#"
version: "1"
revision: 1
metadata: { name: ord, experiment_id: exp-ord }
targets:
  - { name: all, type: http_endpoint, pattern: ".*" }
scenarios:
  - name: slow
    type: latency
    target_ref: all
    probability: 1.0
    params: { delay: 0.01 }
"#,
    );
    let upstream = MockUpstream::new(vec![]);
    let mut flow = Flow::new("GET", "http://x/a", vec![], vec![]);
    engine.process(&mut flow, &upstream).await;

    let events = engine.state().bus.try_drain();
    assert!(events.len() >= 3, "request, chaos and response events expected");
    for pair in events.windows(2) {
        assert!(pair[0].seq < pair[1].seq);
    }
}

#[tokio::test]
async fn record_then_playback_is_byte_identical_with_no_upstream() {
    let plan = r#"
version: "1"
revision: 1
metadata: { name: rr, experiment_id: exp-rr }
targets:
  - { name: all, type: http_endpoint, pattern: "http://svc/.*" }
scenarios:
  - name: garble
    type: data_corruption
    target_ref: all
    probability: 1.0
    params: { jitter_pct: 0.3, flip_prob: 1.0 }
"#;
    let engine = engine_for(plan);
    let dir = tempfile::TempDir::new().unwrap();
    let tape = dir.path().join("run.tape.json");

    let upstream = MockUpstream::new(vec![
        ("http://svc/a", 200, br#"{"n": 10, "ok": true}"#),
        ("http://svc/b", 201, br#"{"n": 20, "ok": false}"#),
        ("http://svc/c", 404, br#"{"n": 30}"#),
    ]);

    engine.state().switch_mode(ProxyMode::Record, Some(&tape)).unwrap();

    let urls = ["http://svc/a", "http://svc/b", "http://svc/c"];
    let mut recorded = Vec::new();
    for url in urls {
        let mut flow = Flow::new("GET", url, vec![], vec![]);
        engine.process(&mut flow, &upstream).await;
        recorded.push((
            flow.response.clone().unwrap(),
            flow.metadata.applied_strategies.clone(),
        ));
    }
    assert_eq!(upstream.calls(), 3);

    // record→playback: flushes the tape, loads it back, stops upstream
    engine.state().switch_mode(ProxyMode::Playback, Some(&tape)).unwrap();

    for (url, (expected_response, expected_strategies)) in urls.iter().zip(&recorded) {
        let mut flow = Flow::new("GET", *url, vec![], vec![]);
        engine.process(&mut flow, &upstream).await;

        let replayed = flow.response.as_ref().unwrap();
        assert_eq!(replayed.body, expected_response.body, "byte-identical payload");
        assert_eq!(replayed.status, expected_response.status);
        assert_eq!(&flow.metadata.applied_strategies, expected_strategies);
        assert!(flow.metadata.chaos_applied);
    }
    assert_eq!(upstream.calls(), 3, "playback produced upstream traffic");
}

#[tokio::test]
async fn playback_miss_synthesizes_terminal_404() {
    let engine = engine_for(
        r#"
version: "1"
revision: 1
metadata: { name: miss, experiment_id: exp-miss }
targets: []
scenarios: []
"#,
    );
    let dir = tempfile::TempDir::new().unwrap();
    let tape = dir.path().join("empty.tape.json");

    // record nothing, then play the empty tape back
    let upstream = MockUpstream::new(vec![]);
    engine.state().switch_mode(ProxyMode::Record, Some(&tape)).unwrap();
    engine.state().switch_mode(ProxyMode::Playback, Some(&tape)).unwrap();

    let mut flow = Flow::new("GET", "http://svc/never-recorded", vec![], vec![]);
    engine.process(&mut flow, &upstream).await;

    let response = flow.response.as_ref().unwrap();
    assert_eq!(response.status, 404);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["error"], "tape_miss");
    assert_eq!(upstream.calls(), 0);
}

#[tokio::test]
async fn upstream_failure_becomes_a_502_not_a_crash() {
    struct FailingUpstream;

    #[async_trait]
    impl Upstream for FailingUpstream {
        async fn forward(&self, _flow: &mut Flow) -> Result<(), UpstreamError> {
            Err(UpstreamError::Request("connection refused".to_string()))
        }
    }

    let engine = engine_for(
        r#"
version: "1"
revision: 1
metadata: { name: up, experiment_id: exp-up }
targets: []
scenarios: []
"#,
    );
    let mut flow = Flow::new("GET", "http://svc/x", vec![], vec![]);
    engine.process(&mut flow, &FailingUpstream).await;

    let response = flow.response.as_ref().unwrap();
    assert_eq!(response.status, 502);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["error"], "upstream_error");
}
