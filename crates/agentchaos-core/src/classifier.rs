//! Traffic classifier: tags each flow with a `TrafficType` and
//! `TrafficSubtype` before any strategy runs.
//!
//! Priority order: explicit agent headers, then rule-pack URL patterns
//! (agent, llm, tool), then JSON body structure, else unknown.

use crate::flow::{Flow, TrafficSubtype, TrafficType};
use crate::plan::{ClassifierRulePack, ClassifierRuleSet};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

/// Classification failure. Non-fatal: the flow is tagged unknown and the
/// incident counted.
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// The flow carries no request URL to classify against.
    #[error("flow has no request URL")]
    MissingUrl,
}

/// One compiled URL rule with its tie-break metadata.
#[derive(Debug)]
pub struct CompiledRule {
    /// Compiled pattern
    pub regex: Regex,
    /// Original pattern text; longer patterns win within a category
    pub pattern: String,
    /// Plan order; breaks length ties
    pub order: usize,
}

/// All compiled classifier rules, merged from the inline override and the
/// rule packs in plan order.
#[derive(Debug, Default)]
pub struct CompiledClassifierRules {
    agent: Vec<CompiledRule>,
    llm: Vec<CompiledRule>,
    tool: Vec<CompiledRule>,
}

impl CompiledClassifierRules {
    /// Compile the inline rule set (if any) followed by every rule pack.
    /// Returns every offending pattern path at once.
    pub fn compile(
        inline: Option<&ClassifierRuleSet>,
        packs: &[ClassifierRulePack],
    ) -> Result<Self, Vec<String>> {
        let mut rules = Self::default();
        let mut errors = Vec::new();
        let mut order = 0usize;

        let mut add_set = |rules: &mut Self, set: &ClassifierRuleSet, prefix: &str| {
            for (category, patterns, bucket) in [
                ("agent_patterns", &set.agent_patterns, 0usize),
                ("llm_patterns", &set.llm_patterns, 1),
                ("tool_patterns", &set.tool_patterns, 2),
            ] {
                for (i, pattern) in patterns.iter().enumerate() {
                    match Regex::new(pattern) {
                        Ok(regex) => {
                            let rule = CompiledRule {
                                regex,
                                pattern: pattern.clone(),
                                order,
                            };
                            order += 1;
                            match bucket {
                                0 => rules.agent.push(rule),
                                1 => rules.llm.push(rule),
                                _ => rules.tool.push(rule),
                            }
                        }
                        Err(err) => {
                            errors.push(format!("{prefix}.{category}[{i}]: invalid regex: {err}"));
                        }
                    }
                }
            }
        };

        if let Some(set) = inline {
            add_set(&mut rules, set, "classifier_rules");
        }
        for (i, pack) in packs.iter().enumerate() {
            add_set(&mut rules, &pack.rules, &format!("classifier_rule_packs[{i}].rules"));
        }

        if errors.is_empty() {
            Ok(rules)
        } else {
            Err(errors)
        }
    }

    /// Whether any rule source was configured.
    pub fn is_empty(&self) -> bool {
        self.agent.is_empty() && self.llm.is_empty() && self.tool.is_empty()
    }

    /// Best match within one category: longest pattern, plan order on ties.
    fn best_match<'a>(rules: &'a [CompiledRule], url: &str) -> Option<&'a CompiledRule> {
        rules
            .iter()
            .filter(|rule| rule.regex.is_match(url))
            .min_by(|a, b| {
                b.pattern
                    .len()
                    .cmp(&a.pattern.len())
                    .then(a.order.cmp(&b.order))
            })
    }
}

/// Classify a flow and write the result into its metadata. Classification
/// is immutable: a flow that already carries a traffic type is untouched.
pub fn classify(flow: &mut Flow, rules: &CompiledClassifierRules) -> Result<(), ClassifierError> {
    if flow.metadata.traffic_type.is_some() {
        return Ok(());
    }
    if flow.request.url.is_empty() {
        return Err(ClassifierError::MissingUrl);
    }

    let body = flow.request.body_json();
    flow.metadata.agent_role = extract_agent_role(flow, body.as_ref());
    flow.metadata.sender_agent = extract_sender_agent(flow, body.as_ref());

    // 1. Explicit agent headers always win.
    if header_is_true(flow, "x-agent-to-agent") || header_is_true(flow, "x-swarm-message") {
        let subtype = match flow.header("x-agent-subtype") {
            Some(value) => TrafficSubtype::parse(value),
            None => detect_subtype(flow, body.as_ref()),
        };
        let subtype = if subtype == TrafficSubtype::None {
            detect_subtype(flow, body.as_ref())
        } else {
            subtype
        };
        set_classification(flow, TrafficType::AgentToAgent, subtype);
        return Ok(());
    }

    // 2. Rule-pack URL match: agent, then llm, then tool.
    let url = flow.request.url.clone();
    if CompiledClassifierRules::best_match(&rules.agent, &url).is_some() {
        let subtype = detect_subtype(flow, body.as_ref());
        set_classification(flow, TrafficType::AgentToAgent, subtype);
        return Ok(());
    }
    if CompiledClassifierRules::best_match(&rules.llm, &url).is_some() {
        set_classification(flow, TrafficType::LlmApi, TrafficSubtype::None);
        return Ok(());
    }
    if CompiledClassifierRules::best_match(&rules.tool, &url).is_some() {
        set_classification(flow, TrafficType::ToolCall, TrafficSubtype::None);
        return Ok(());
    }

    // 3. Body structure, JSON only.
    if let Some(body) = body.as_ref() {
        if is_agent_body(body) {
            let subtype = detect_subtype(flow, Some(body));
            set_classification(flow, TrafficType::AgentToAgent, subtype);
            return Ok(());
        }
        if is_llm_body(body) {
            set_classification(flow, TrafficType::LlmApi, TrafficSubtype::None);
            return Ok(());
        }
        set_classification(flow, TrafficType::ToolCall, TrafficSubtype::None);
        return Ok(());
    }

    set_classification(flow, TrafficType::Unknown, TrafficSubtype::None);
    Ok(())
}

fn set_classification(flow: &mut Flow, traffic_type: TrafficType, subtype: TrafficSubtype) {
    flow.metadata.traffic_type = Some(traffic_type);
    flow.metadata.traffic_subtype = subtype;
}

fn header_is_true(flow: &Flow, name: &str) -> bool {
    flow.header(name).is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Header `X-Agent-Role` first, body `agent_role`/`role` second.
fn extract_agent_role(flow: &Flow, body: Option<&Value>) -> Option<String> {
    if let Some(role) = flow.header("x-agent-role") {
        if !role.is_empty() {
            return Some(role.to_string());
        }
    }
    let body = body?;
    for key in ["agent_role", "role"] {
        if let Some(role) = body.get(key).and_then(Value::as_str) {
            if !role.is_empty() {
                return Some(role.to_string());
            }
        }
    }
    None
}

/// Header `X-Agent-Id` first, body `sender_agent` second.
fn extract_sender_agent(flow: &Flow, body: Option<&Value>) -> Option<String> {
    if let Some(id) = flow.header("x-agent-id") {
        if !id.is_empty() {
            return Some(id.to_string());
        }
    }
    body?
        .get("sender_agent")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(ToString::to_string)
}

/// Agent-to-agent body shapes: an explicit sender/recipient pair, or the
/// AutoGen/Swarm message shape (`messages[*].role` all assistant/tool plus
/// an `agent_id`).
fn is_agent_body(body: &Value) -> bool {
    let Some(obj) = body.as_object() else {
        return false;
    };
    if obj.contains_key("sender_agent") && obj.contains_key("recipient_agent") {
        return true;
    }
    is_framework_message(body)
}

fn is_framework_message(body: &Value) -> bool {
    let Some(obj) = body.as_object() else {
        return false;
    };
    if !obj.contains_key("agent_id") {
        return false;
    }
    let Some(messages) = obj.get("messages").and_then(Value::as_array) else {
        return false;
    };
    !messages.is_empty()
        && messages.iter().all(|msg| {
            matches!(
                msg.get("role").and_then(Value::as_str),
                Some("assistant" | "tool")
            )
        })
}

/// LLM API shape: a `messages` array next to a `model` field.
fn is_llm_body(body: &Value) -> bool {
    body.get("messages").is_some_and(Value::is_array) && body.get("model").is_some()
}

/// Subtype detection for agent-to-agent flows.
fn detect_subtype(flow: &Flow, body: Option<&Value>) -> TrafficSubtype {
    let role = flow.metadata.agent_role.as_deref().unwrap_or_default();
    let recipient = body
        .and_then(|b| {
            b.get("recipient_role")
                .or_else(|| b.get("recipient_agent"))
                .and_then(Value::as_str)
        })
        .unwrap_or_default();

    if role.contains("supervisor") && recipient.contains("worker") {
        return TrafficSubtype::SupervisorToWorker;
    }

    let path = flow.request.path();
    let has_vote_key = body.is_some_and(|b| b.get("vote").is_some());
    if path.contains("/vote") || has_vote_key {
        return TrafficSubtype::ConsensusVote;
    }

    if header_is_true(flow, "x-swarm-message") {
        return TrafficSubtype::SwarmMessage;
    }
    if body.is_some_and(is_framework_message) {
        return TrafficSubtype::AutogenMessage;
    }

    TrafficSubtype::WorkerCommunication
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ClassifierRuleSet;

    fn rules(agent: &[&str], llm: &[&str], tool: &[&str]) -> CompiledClassifierRules {
        let set = ClassifierRuleSet {
            agent_patterns: agent.iter().map(ToString::to_string).collect(),
            llm_patterns: llm.iter().map(ToString::to_string).collect(),
            tool_patterns: tool.iter().map(ToString::to_string).collect(),
        };
        CompiledClassifierRules::compile(Some(&set), &[]).unwrap()
    }

    fn flow(url: &str, headers: Vec<(&str, &str)>, body: &[u8]) -> Flow {
        Flow::new(
            "POST",
            url,
            headers.into_iter().map(|(k, v)| (k.to_string(), v.to_string())),
            body.to_vec(),
        )
    }

    #[test]
    fn agent_header_beats_llm_url_match() {
        let rules = rules(&[], &["/v1/chat/completions"], &[]);
        let mut f = flow(
            "http://llm.test/v1/chat/completions",
            vec![("X-Agent-To-Agent", "true")],
            b"",
        );
        classify(&mut f, &rules).unwrap();
        assert_eq!(f.traffic_type(), TrafficType::AgentToAgent);
    }

    #[test]
    fn longest_pattern_wins_within_category() {
        let rules = rules(&[], &["/v1/.*", "/v1/chat/completions"], &[]);
        let mut f = flow("http://llm.test/v1/chat/completions", vec![], b"");
        classify(&mut f, &rules).unwrap();
        assert_eq!(f.traffic_type(), TrafficType::LlmApi);
    }

    #[test]
    fn llm_body_shape_detected() {
        let rules = CompiledClassifierRules::default();
        let mut f = flow(
            "http://api.test/anything",
            vec![],
            br#"{"model":"m-1","messages":[{"role":"user","content":"hi"}]}"#,
        );
        classify(&mut f, &rules).unwrap();
        assert_eq!(f.traffic_type(), TrafficType::LlmApi);
    }

    #[test]
    fn sender_recipient_body_is_agent_traffic() {
        let rules = CompiledClassifierRules::default();
        let mut f = flow(
            "http://mesh.test/msg",
            vec![],
            br#"{"sender_agent":"a-1","recipient_agent":"a-2","payload":{}}"#,
        );
        classify(&mut f, &rules).unwrap();
        assert_eq!(f.traffic_type(), TrafficType::AgentToAgent);
        assert_eq!(f.metadata.sender_agent.as_deref(), Some("a-1"));
        assert_eq!(f.metadata.traffic_subtype, TrafficSubtype::WorkerCommunication);
    }

    #[test]
    fn json_body_without_llm_shape_is_tool_call() {
        let rules = CompiledClassifierRules::default();
        let mut f = flow("http://api.test/search_flights", vec![], br#"{"date":"2026-12-25"}"#);
        classify(&mut f, &rules).unwrap();
        assert_eq!(f.traffic_type(), TrafficType::ToolCall);
    }

    #[test]
    fn unparseable_body_falls_through_to_unknown() {
        let rules = CompiledClassifierRules::default();
        let mut f = flow("http://api.test/bin", vec![], &[0xff, 0xfe, 0x00]);
        classify(&mut f, &rules).unwrap();
        assert_eq!(f.traffic_type(), TrafficType::Unknown);
    }

    #[test]
    fn consensus_vote_from_path() {
        let rules = CompiledClassifierRules::default();
        let mut f = flow(
            "http://mesh.test/consensus/vote",
            vec![("X-Agent-To-Agent", "true")],
            b"{}",
        );
        classify(&mut f, &rules).unwrap();
        assert_eq!(f.metadata.traffic_subtype, TrafficSubtype::ConsensusVote);
    }

    #[test]
    fn supervisor_to_worker_subtype() {
        let rules = CompiledClassifierRules::default();
        let mut f = flow(
            "http://mesh.test/dispatch",
            vec![("X-Agent-To-Agent", "true"), ("X-Agent-Role", "supervisor")],
            br#"{"recipient_role":"worker-3"}"#,
        );
        classify(&mut f, &rules).unwrap();
        assert_eq!(f.metadata.traffic_subtype, TrafficSubtype::SupervisorToWorker);
    }

    #[test]
    fn explicit_subtype_header_wins() {
        let rules = CompiledClassifierRules::default();
        let mut f = flow(
            "http://mesh.test/msg",
            vec![("X-Agent-To-Agent", "true"), ("X-Agent-Subtype", "swarm_message")],
            b"{}",
        );
        classify(&mut f, &rules).unwrap();
        assert_eq!(f.metadata.traffic_subtype, TrafficSubtype::SwarmMessage);
    }

    #[test]
    fn classification_is_immutable() {
        let rules = rules(&[], &["/v1/.*"], &[]);
        let mut f = flow("http://llm.test/v1/x", vec![], b"");
        f.metadata.traffic_type = Some(TrafficType::ToolCall);
        classify(&mut f, &rules).unwrap();
        assert_eq!(f.traffic_type(), TrafficType::ToolCall);
    }

    #[test]
    fn bad_patterns_are_all_reported() {
        let set = ClassifierRuleSet {
            agent_patterns: vec!["[".to_string()],
            llm_patterns: vec!["(".to_string()],
            tool_patterns: vec![],
        };
        let errors = CompiledClassifierRules::compile(Some(&set), &[]).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("classifier_rules.agent_patterns[0]"));
    }
}
