//! Flow model: the mutable request/response state a flow carries through
//! the chaos pipeline.

use crate::fingerprint::RequestFingerprint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Header map with lower-cased keys, sorted for deterministic iteration.
pub type Headers = BTreeMap<String, String>;

/// Classification of a flow's purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrafficType {
    /// Outbound tool invocation
    ToolCall,
    /// LLM completion/chat API call
    LlmApi,
    /// Inter-agent message
    AgentToAgent,
    /// Unclassified traffic
    Unknown,
}

impl TrafficType {
    /// Wire name, e.g. `TOOL_CALL`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolCall => "TOOL_CALL",
            Self::LlmApi => "LLM_API",
            Self::AgentToAgent => "AGENT_TO_AGENT",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for TrafficType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finer-grained classification of agent-to-agent traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficSubtype {
    /// Supervisor dispatching work to a worker agent
    SupervisorToWorker,
    /// Consensus/voting round message
    ConsensusVote,
    /// Peer worker chatter
    WorkerCommunication,
    /// AutoGen framework message
    AutogenMessage,
    /// Swarm framework message
    SwarmMessage,
    /// No subtype
    None,
}

impl Default for TrafficSubtype {
    fn default() -> Self {
        Self::None
    }
}

impl TrafficSubtype {
    /// Wire name, e.g. `consensus_vote`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SupervisorToWorker => "supervisor_to_worker",
            Self::ConsensusVote => "consensus_vote",
            Self::WorkerCommunication => "worker_communication",
            Self::AutogenMessage => "autogen_message",
            Self::SwarmMessage => "swarm_message",
            Self::None => "none",
        }
    }

    /// Parse a wire name; unknown names map to `None`.
    pub fn parse(value: &str) -> Self {
        match value {
            "supervisor_to_worker" => Self::SupervisorToWorker,
            "consensus_vote" => Self::ConsensusVote,
            "worker_communication" => Self::WorkerCommunication,
            "autogen_message" => Self::AutogenMessage,
            "swarm_message" => Self::SwarmMessage,
            _ => Self::None,
        }
    }
}

impl fmt::Display for TrafficSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proxy operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    /// Mutate and forward to the real upstream
    Live,
    /// Live behavior plus tape recording
    Record,
    /// Serve everything from a tape; no upstream traffic
    Playback,
}

impl ProxyMode {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Record => "record",
            Self::Playback => "playback",
        }
    }
}

impl std::str::FromStr for ProxyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "live" => Ok(Self::Live),
            "record" => Ok(Self::Record),
            "playback" => Ok(Self::Playback),
            other => Err(format!("unknown mode `{other}` (expected live, record or playback)")),
        }
    }
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The request half of a flow.
#[derive(Debug, Clone)]
pub struct FlowRequest {
    /// HTTP method, upper-cased
    pub method: String,
    /// Absolute request URL
    pub url: String,
    /// Request headers, keys lower-cased
    pub headers: Headers,
    /// Raw request body
    pub body: Vec<u8>,
}

impl FlowRequest {
    /// Parse the request body as JSON, if it is JSON.
    pub fn body_json(&self) -> Option<serde_json::Value> {
        if self.body.is_empty() {
            return None;
        }
        serde_json::from_slice(&self.body).ok()
    }

    /// Replace the body with a serialized JSON value, fixing content-length.
    pub fn set_body_json(&mut self, value: &serde_json::Value) {
        self.body = serde_json::to_vec(value).unwrap_or_default();
        self.headers.insert("content-length".into(), self.body.len().to_string());
    }

    /// Request path component, without query.
    pub fn path(&self) -> String {
        url::Url::parse(&self.url).map(|u| u.path().to_string()).unwrap_or_else(|_| {
            // relative-form request line; strip any query manually
            self.url.split('?').next().unwrap_or_default().to_string()
        })
    }
}

/// The response half of a flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowResponse {
    /// HTTP status code
    pub status: u16,
    /// Reason phrase
    pub reason: String,
    /// Response headers, keys lower-cased
    pub headers: Headers,
    /// Raw response body
    pub body: Vec<u8>,
}

impl FlowResponse {
    /// Parse the response body as JSON, if it is JSON.
    pub fn body_json(&self) -> Option<serde_json::Value> {
        if self.body.is_empty() {
            return None;
        }
        serde_json::from_slice(&self.body).ok()
    }

    /// Replace the body with a serialized JSON value, fixing content-length.
    pub fn set_body_json(&mut self, value: &serde_json::Value) {
        self.body = serde_json::to_vec(value).unwrap_or_default();
        self.headers.insert("content-length".into(), self.body.len().to_string());
    }
}

/// Per-flow metadata written by the classifier, matcher and strategies.
#[derive(Debug, Clone, Default)]
pub struct FlowMetadata {
    /// Assigned traffic type
    pub traffic_type: Option<TrafficType>,
    /// Assigned traffic subtype
    pub traffic_subtype: TrafficSubtype,
    /// Agent role extracted from header or body
    pub agent_role: Option<String>,
    /// Sender agent id extracted from header or body
    pub sender_agent: Option<String>,
    /// Names of strategies that mutated this flow, in execution order
    pub applied_strategies: Vec<String>,
    /// Finer-grained chaos markers, e.g. `swarm:agent_isolation`
    pub chaos_details: Vec<String>,
    /// Whether any chaos was applied
    pub chaos_applied: bool,
    /// Error codes recorded by failing strategies
    pub error_codes: Vec<String>,
    /// Set when a suspension was cancelled mid-flow
    pub cancelled: bool,
    /// Fingerprint computed at ingress
    pub fingerprint: Option<RequestFingerprint>,
    /// Global flow sequence number
    pub sequence: u64,
}

/// One HTTP exchange moving through the pipeline. Owned by the interception
/// framework; the core only mutates it through the hooks.
#[derive(Debug, Clone)]
pub struct Flow {
    /// Request state
    pub request: FlowRequest,
    /// Response state, present after upstream/playback or a short-circuit
    pub response: Option<FlowResponse>,
    /// Pipeline metadata
    pub metadata: FlowMetadata,
}

impl Flow {
    /// Build a flow from raw request parts. Header keys are lower-cased.
    pub fn new(
        method: impl Into<String>,
        url: impl Into<String>,
        headers: impl IntoIterator<Item = (String, String)>,
        body: Vec<u8>,
    ) -> Self {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect::<Headers>();
        Self {
            request: FlowRequest {
                method: method.into().to_ascii_uppercase(),
                url: url.into(),
                headers,
                body,
            },
            response: None,
            metadata: FlowMetadata::default(),
        }
    }

    /// Case-insensitive request header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Set a synthesized response on the flow.
    pub fn set_response(&mut self, status: u16, reason: &str, headers: Headers, body: Vec<u8>) {
        self.response = Some(FlowResponse {
            status,
            reason: reason.to_string(),
            headers,
            body,
        });
    }

    /// Record that a strategy mutated this flow.
    pub fn record_chaos(&mut self, strategy: &str) {
        self.metadata.applied_strategies.push(strategy.to_string());
        self.metadata.chaos_applied = true;
    }

    /// Record a finer-grained chaos marker for the scorecard.
    pub fn record_chaos_detail(&mut self, detail: &str) {
        self.metadata.chaos_details.push(detail.to_string());
    }

    /// Record a non-fatal strategy error.
    pub fn record_error(&mut self, code: &str) {
        self.metadata.error_codes.push(code.to_string());
    }

    /// The traffic type, defaulting to `Unknown` before classification.
    pub fn traffic_type(&self) -> TrafficType {
        self.metadata.traffic_type.unwrap_or(TrafficType::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_lowercased() {
        let flow = Flow::new(
            "get",
            "http://api.test/x",
            vec![("X-Agent-Role".to_string(), "supervisor".to_string())],
            vec![],
        );
        assert_eq!(flow.request.method, "GET");
        assert_eq!(flow.header("x-agent-role"), Some("supervisor"));
        assert_eq!(flow.header("X-AGENT-ROLE"), Some("supervisor"));
    }

    #[test]
    fn traffic_type_wire_names() {
        assert_eq!(TrafficType::ToolCall.as_str(), "TOOL_CALL");
        assert_eq!(
            serde_json::to_string(&TrafficType::AgentToAgent).unwrap(),
            "\"AGENT_TO_AGENT\""
        );
        assert_eq!(TrafficSubtype::parse("consensus_vote"), TrafficSubtype::ConsensusVote);
        assert_eq!(TrafficSubtype::parse("bogus"), TrafficSubtype::None);
    }

    #[test]
    fn mode_round_trip() {
        for mode in [ProxyMode::Live, ProxyMode::Record, ProxyMode::Playback] {
            assert_eq!(mode.as_str().parse::<ProxyMode>().unwrap(), mode);
        }
        assert!("weird".parse::<ProxyMode>().is_err());
    }

    #[test]
    fn record_chaos_tracks_order() {
        let mut flow = Flow::new("POST", "http://api.test/pay", vec![], b"{}".to_vec());
        flow.record_chaos("latency");
        flow.record_chaos("error_injection");
        assert!(flow.metadata.chaos_applied);
        assert_eq!(flow.metadata.applied_strategies, vec!["latency", "error_injection"]);
    }
}
