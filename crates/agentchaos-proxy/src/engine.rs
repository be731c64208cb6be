//! The flow pipeline: classify → fingerprint → playback-or-match →
//! request strategies → upstream → response strategies → record → events.
//!
//! The engine exposes the interception contract (`on_request` /
//! `on_response`) plus `process`, which drives a whole flow through an
//! `Upstream`. Nothing in here ever propagates an error to the caller: a
//! flow leaves either untouched, mutated, or answered synthetically.

use crate::state::ProxyState;
use crate::upstream::Upstream;
use agentchaos_core::{
    classify, flow_seed, match_strategies, miss_response, CancellationToken, ChaosContext, Flow,
    Headers, PlanSnapshot, ProxyMode, RequestFingerprint, StrategyAction, StrategyContext,
    TrafficType,
};
use agentchaos_observability::{Event, EventPhase};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Per-flow pipeline state carried between the two hooks.
pub struct FlowHandle {
    snapshot: Arc<PlanSnapshot>,
    ctx: StrategyContext,
    selected: Vec<usize>,
    started: Instant,
    served_from_tape: bool,
}

impl FlowHandle {
    /// Cancellation token for this flow; the interceptor cancels it when
    /// the agent aborts.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.ctx.cancel.clone()
    }

    /// Milliseconds since the flow entered the pipeline.
    pub fn latency_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// The chaos engine: one per process, cheap to clone via `Arc`.
pub struct ChaosEngine {
    state: Arc<ProxyState>,
}

impl ChaosEngine {
    /// Wrap the shared state.
    pub fn new(state: Arc<ProxyState>) -> Self {
        Self { state }
    }

    /// The shared state.
    pub fn state(&self) -> &Arc<ProxyState> {
        &self.state
    }

    fn emit(&self, flow: &Flow, phase: EventPhase, latency_ms: u64, error_code: Option<&str>) {
        let seq = self.state.next_sequence();
        let mut event = Event::from_flow(flow, phase, seq, latency_ms, &self.state.redactor);
        if let Some(code) = error_code {
            event = event.with_error(code);
        }
        self.state.bus.emit(event);
    }

    /// Request-side hook. After this returns, a set response on the flow
    /// means upstream must be skipped.
    pub async fn on_request(&self, flow: &mut Flow) -> FlowHandle {
        let started = Instant::now();
        flow.metadata.sequence = self.state.next_sequence();
        let snapshot = self.state.snapshot();
        let mode = self.state.mode();

        if let Err(err) = classify(flow, &snapshot.plan.classifier) {
            warn!(%err, "classification failed, tagging flow unknown");
            flow.metadata.traffic_type = Some(TrafficType::Unknown);
            self.emit(flow, EventPhase::Error, 0, Some("classifier_error"));
        }

        let fingerprint =
            RequestFingerprint::compute(&flow.request, &snapshot.plan.replay_config);
        flow.metadata.fingerprint = Some(fingerprint.clone());

        self.emit(flow, EventPhase::Request, 0, None);

        let ctx = StrategyContext::new(
            flow_seed(&snapshot.plan.metadata.experiment_id, &fingerprint),
            CancellationToken::new(),
            Duration::from_millis(snapshot.plan.defaults.suspension_deadline_ms),
            mode,
        );
        let mut handle =
            FlowHandle { snapshot, ctx, selected: Vec::new(), started, served_from_tape: false };

        if mode == ProxyMode::Playback {
            self.serve_from_tape(flow, &fingerprint);
            handle.served_from_tape = true;
            return handle;
        }

        handle.selected =
            match_strategies(flow, &handle.snapshot.plan, &handle.snapshot.catalog, &handle.ctx);
        debug!(
            sequence = flow.metadata.sequence,
            strategies = handle.selected.len(),
            traffic_type = %flow.traffic_type(),
            "matched strategies"
        );

        for &index in &handle.selected {
            let scenario = &handle.snapshot.catalog.scenarios[index];
            match scenario.strategy.intercept_request(flow, &handle.ctx).await {
                Ok(StrategyAction::Continue) => {}
                Ok(StrategyAction::ShortCircuit) => break,
                Err(err) => {
                    let code = err.code();
                    warn!(scenario = %scenario.name, %err, "request strategy failed, skipping");
                    flow.record_error(&code);
                    self.emit(flow, EventPhase::Error, handle.latency_ms(), Some(&code));
                }
            }
        }

        handle
    }

    fn serve_from_tape(&self, flow: &mut Flow, fingerprint: &RequestFingerprint) {
        let served = self.state.player().and_then(|player| player.serve(fingerprint));
        match served {
            Some((entry, hit)) => {
                debug!(sequence = entry.sequence, ?hit, "serving response from tape");
                entry.chaos_context.restore(flow);
                flow.response = Some(entry.response_snapshot.to_response());
            }
            None => {
                warn!(fingerprint = %fingerprint, "tape miss");
                flow.response = Some(miss_response(fingerprint));
                self.emit(flow, EventPhase::Error, 0, Some("tape_miss"));
            }
        }
    }

    /// Response-side hook: response strategies, tape recording and the
    /// closing events.
    pub async fn on_response(&self, flow: &mut Flow, handle: FlowHandle) {
        if !handle.served_from_tape && flow.response.is_some() {
            for &index in &handle.selected {
                let scenario = &handle.snapshot.catalog.scenarios[index];
                if let Err(err) = scenario.strategy.intercept_response(flow, &handle.ctx).await {
                    let code = err.code();
                    warn!(scenario = %scenario.name, %err, "response strategy failed, skipping");
                    flow.record_error(&code);
                    self.emit(flow, EventPhase::Error, handle.latency_ms(), Some(&code));
                }
            }
        }

        if self.state.mode() == ProxyMode::Record && !handle.served_from_tape {
            if let (Some(recorder), Some(response), Some(fingerprint)) = (
                self.state.recorder(),
                flow.response.as_ref(),
                flow.metadata.fingerprint.clone(),
            ) {
                recorder.append(fingerprint, response, ChaosContext::from_flow(flow));
            }
        }

        if flow.metadata.chaos_applied {
            self.emit(flow, EventPhase::Chaos, handle.latency_ms(), None);
        }
        self.emit(flow, EventPhase::Response, handle.latency_ms(), None);
    }

    /// Drive one flow end to end through the given upstream.
    pub async fn process(&self, flow: &mut Flow, upstream: &dyn Upstream) {
        let handle = self.on_request(flow).await;

        if flow.response.is_none() {
            if let Err(err) = upstream.forward(flow).await {
                warn!(%err, url = %flow.request.url, "upstream failed");
                let body = serde_json::json!({
                    "error": "upstream_error",
                    "message": err.to_string(),
                });
                let body = serde_json::to_vec(&body).unwrap_or_default();
                let mut headers = Headers::new();
                headers.insert("content-type".to_string(), "application/json".to_string());
                headers.insert("content-length".to_string(), body.len().to_string());
                flow.set_response(502, "Bad Gateway", headers, body);
                self.emit(flow, EventPhase::Error, handle.latency_ms(), Some("upstream_error"));
            }
        }

        self.on_response(flow, handle).await;
    }
}
