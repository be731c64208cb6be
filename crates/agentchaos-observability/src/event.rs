//! The per-flow event record emitted by the pipeline.

use agentchaos_core::{Flow, PiiRedactor, TrafficSubtype, TrafficType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Flow lifecycle phase an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPhase {
    /// Request accepted and classified
    Request,
    /// Response delivered to the agent
    Response,
    /// Chaos was applied to the flow
    Chaos,
    /// A non-fatal error occurred
    Error,
}

/// One structured record of a flow lifecycle step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Wall-clock time of the event
    pub t: DateTime<Utc>,
    /// Global sequence number, strictly increasing per process
    pub seq: u64,
    /// Lifecycle phase
    pub phase: EventPhase,
    /// Flow traffic type
    pub traffic_type: TrafficType,
    /// Flow traffic subtype
    pub traffic_subtype: TrafficSubtype,
    /// Agent role, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_role: Option<String>,
    /// Request URL after PII redaction
    pub url_redacted: String,
    /// HTTP method
    pub method: String,
    /// Response status, when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Strategies applied so far
    pub applied_strategies: Vec<String>,
    /// Whether any chaos was applied
    pub chaos_applied: bool,
    /// Flow latency so far in milliseconds
    pub latency_ms: u64,
    /// Stable error code, on error-phase events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Finer-grained chaos markers for the scorecard
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl Event {
    /// Build an event from a flow snapshot. The URL is redacted here so a
    /// raw URL never reaches any sink.
    pub fn from_flow(
        flow: &Flow,
        phase: EventPhase,
        seq: u64,
        latency_ms: u64,
        redactor: &PiiRedactor,
    ) -> Self {
        let (url_redacted, stats) = redactor.redact_counting(&flow.request.url);
        let mut details = flow.metadata.chaos_details.clone();
        if stats.total() > 0 {
            details.push("pii:url".to_string());
        }
        Self {
            t: Utc::now(),
            seq,
            phase,
            traffic_type: flow.traffic_type(),
            traffic_subtype: flow.metadata.traffic_subtype,
            agent_role: flow.metadata.agent_role.clone(),
            url_redacted,
            method: flow.request.method.clone(),
            status: flow.response.as_ref().map(|r| r.status),
            applied_strategies: flow.metadata.applied_strategies.clone(),
            chaos_applied: flow.metadata.chaos_applied,
            latency_ms,
            error_code: None,
            details,
        }
    }

    /// Attach an error code, switching the phase to `error`.
    pub fn with_error(mut self, code: impl Into<String>) -> Self {
        self.phase = EventPhase::Error;
        self.error_code = Some(code.into());
        self
    }

    /// Whether this is an error-phase event (protected from drop-oldest).
    pub fn is_error(&self) -> bool {
        self.phase == EventPhase::Error
    }

    /// Request path component of the redacted URL.
    pub fn endpoint(&self) -> String {
        url::Url::parse(&self.url_redacted)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| self.url_redacted.clone())
    }
}
