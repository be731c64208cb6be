//! Test fixtures shared across the strategy unit tests.

use agentchaos_core::{
    CancellationToken, Flow, FlowResponse, Headers, ProxyMode, StrategyContext, TrafficSubtype,
    TrafficType,
};
use std::time::Duration;

pub(crate) fn context() -> StrategyContext {
    StrategyContext::new(
        [42u8; 32],
        CancellationToken::new(),
        Duration::from_secs(30),
        ProxyMode::Live,
    )
}

pub(crate) fn flow_with_request(url: &str, body: &[u8]) -> Flow {
    let mut flow = Flow::new("POST", url, vec![], body.to_vec());
    flow.metadata.traffic_type = Some(TrafficType::ToolCall);
    flow
}

pub(crate) fn tool_flow() -> Flow {
    flow_with_request("http://tools.test/search_flights", br#"{"q":"lisbon"}"#)
}

pub(crate) fn agent_flow(sender: &str, body: &[u8]) -> Flow {
    let mut flow = Flow::new("POST", "http://mesh.test/msg", vec![], body.to_vec());
    flow.metadata.traffic_type = Some(TrafficType::AgentToAgent);
    flow.metadata.traffic_subtype = TrafficSubtype::WorkerCommunication;
    flow.metadata.sender_agent = Some(sender.to_string());
    flow
}

pub(crate) fn flow_with_response(status: u16, body: &[u8]) -> Flow {
    let mut flow = tool_flow();
    let mut headers = Headers::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    flow.response = Some(FlowResponse {
        status,
        reason: "OK".to_string(),
        headers,
        body: body.to_vec(),
    });
    flow
}
