//! Strategy matcher: resolves which scenarios fire for a classified flow.
//!
//! Matching is deterministic per flow. The RNG driving probability draws
//! is seeded with HMAC-SHA256(experiment_id, fingerprint key), so the same
//! plan, experiment and request always select the same strategies. This is
//! the property record/replay depends on.

use crate::fingerprint::RequestFingerprint;
use crate::flow::{Flow, ProxyMode};
use crate::plan::{ChaosPlan, TargetKind};
use crate::CompiledScenario;
use crate::strategy::{StrategyCatalog, StrategyContext};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Derive the 32-byte per-flow RNG seed.
pub fn flow_seed(experiment_id: &str, fingerprint: &RequestFingerprint) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(experiment_id.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(fingerprint.key().as_bytes());
    mac.finalize().into_bytes().into()
}

/// Select the scenarios that fire for this flow, in plan order. Returns
/// indices into the catalog so the execution list can outlive borrows.
///
/// Playback mode never applies strategies: chaos metadata comes off the
/// tape instead.
pub fn match_strategies(
    flow: &Flow,
    plan: &ChaosPlan,
    catalog: &StrategyCatalog,
    ctx: &StrategyContext,
) -> Vec<usize> {
    if ctx.mode == ProxyMode::Playback {
        return Vec::new();
    }

    let mut selected = Vec::new();
    for (index, scenario) in catalog.scenarios.iter().enumerate() {
        if !scenario.enabled {
            continue;
        }
        if !target_matches(flow, plan, scenario) {
            continue;
        }
        if let Some(required) = scenario.target_subtype {
            if flow.metadata.traffic_subtype != required {
                continue;
            }
        }
        // Deterministic draw; happens only for scenarios that pass the
        // target test so the stream stays stable under plan edits to
        // unrelated targets.
        let u = ctx.random_f64();
        if u < scenario.probability {
            selected.push(index);
        }
    }
    selected
}

fn target_matches(flow: &Flow, plan: &ChaosPlan, scenario: &CompiledScenario) -> bool {
    let Some(compiled) = plan.targets.get(scenario.target_index) else {
        return false;
    };
    match compiled.target.kind {
        TargetKind::HttpEndpoint | TargetKind::Custom => compiled.regex.is_match(&flow.request.url),
        TargetKind::ToolCall | TargetKind::LlmInput => {
            compiled.regex.is_match(flow.traffic_type().as_str())
        }
        TargetKind::AgentRole => {
            compiled.regex.is_match(flow.metadata.agent_role.as_deref().unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::RuntimeEnv;
    use crate::flow::{TrafficSubtype, TrafficType};
    use crate::loader::validate_plan;
    use crate::plan::ReplayConfig;
    use crate::strategy::{ChaosStrategy, CompiledScenario, StrategyCatalog};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct Noop;

    #[async_trait::async_trait]
    impl ChaosStrategy for Noop {
        fn name(&self) -> &'static str {
            "noop"
        }
    }

    fn plan_with_probability(probability: f64) -> ChaosPlan {
        let yaml = format!(
            r#"
version: "1"
revision: 1
metadata:
  name: m
  experiment_id: exp-m
targets:
  - name: api
    type: http_endpoint
    pattern: "http://x/.*"
  - name: roles
    type: agent_role
    pattern: "worker-\\d+"
scenarios:
  - name: s-api
    type: noop
    target_ref: api
    probability: {probability}
  - name: s-role
    type: noop
    target_ref: roles
    target_subtype: consensus_vote
"#
        );
        validate_plan(yaml.as_bytes(), &RuntimeEnv::default()).unwrap()
    }

    fn catalog_for(plan: &ChaosPlan) -> StrategyCatalog {
        StrategyCatalog {
            scenarios: plan
                .scenarios
                .iter()
                .enumerate()
                .map(|(i, s)| CompiledScenario {
                    name: s.name.clone(),
                    strategy_tag: s.strategy.clone(),
                    target_index: plan.scenario_targets[i],
                    enabled: s.enabled,
                    probability: s.probability,
                    target_subtype: s.target_subtype,
                    strategy: Arc::new(Noop),
                })
                .collect(),
        }
    }

    fn context(flow: &Flow, plan: &ChaosPlan, mode: ProxyMode) -> StrategyContext {
        let fp = RequestFingerprint::compute(&flow.request, &ReplayConfig::default());
        StrategyContext::new(
            flow_seed(&plan.metadata.experiment_id, &fp),
            CancellationToken::new(),
            Duration::from_secs(30),
            mode,
        )
    }

    #[test]
    fn probability_one_always_triggers() {
        let plan = plan_with_probability(1.0);
        let catalog = catalog_for(&plan);
        let mut flow = Flow::new("GET", "http://x/a", vec![], vec![]);
        flow.metadata.traffic_type = Some(TrafficType::ToolCall);
        let ctx = context(&flow, &plan, ProxyMode::Live);
        let selected = match_strategies(&flow, &plan, &catalog, &ctx);
        assert_eq!(selected.len(), 1);
        assert_eq!(catalog.scenarios[selected[0]].name, "s-api");
    }

    #[test]
    fn probability_zero_never_triggers() {
        let plan = plan_with_probability(0.0);
        let catalog = catalog_for(&plan);
        let mut flow = Flow::new("GET", "http://x/a", vec![], vec![]);
        flow.metadata.traffic_type = Some(TrafficType::ToolCall);
        for _ in 0..64 {
            let ctx = context(&flow, &plan, ProxyMode::Live);
            assert!(match_strategies(&flow, &plan, &catalog, &ctx).is_empty());
        }
    }

    #[test]
    fn selection_is_deterministic_per_fingerprint() {
        let plan = plan_with_probability(0.5);
        let catalog = catalog_for(&plan);
        let mut flow = Flow::new("GET", "http://x/deterministic", vec![], vec![]);
        flow.metadata.traffic_type = Some(TrafficType::ToolCall);

        let first =
            match_strategies(&flow, &plan, &catalog, &context(&flow, &plan, ProxyMode::Live));

        for _ in 0..32 {
            let again =
                match_strategies(&flow, &plan, &catalog, &context(&flow, &plan, ProxyMode::Live));
            assert_eq!(first, again);
        }
    }

    #[test]
    fn subtype_gate_is_enforced() {
        let plan = plan_with_probability(1.0);
        let catalog = catalog_for(&plan);
        let mut flow = Flow::new("POST", "http://mesh/vote", vec![], vec![]);
        flow.metadata.traffic_type = Some(TrafficType::AgentToAgent);
        flow.metadata.agent_role = Some("worker-7".to_string());
        flow.metadata.traffic_subtype = TrafficSubtype::WorkerCommunication;

        let ctx = context(&flow, &plan, ProxyMode::Live);
        assert!(match_strategies(&flow, &plan, &catalog, &ctx).is_empty());

        flow.metadata.traffic_subtype = TrafficSubtype::ConsensusVote;
        let ctx = context(&flow, &plan, ProxyMode::Live);
        let selected = match_strategies(&flow, &plan, &catalog, &ctx);
        assert_eq!(selected.len(), 1);
        assert_eq!(catalog.scenarios[selected[0]].name, "s-role");
    }

    #[test]
    fn playback_mode_selects_nothing() {
        let plan = plan_with_probability(1.0);
        let catalog = catalog_for(&plan);
        let mut flow = Flow::new("GET", "http://x/a", vec![], vec![]);
        flow.metadata.traffic_type = Some(TrafficType::ToolCall);
        let ctx = context(&flow, &plan, ProxyMode::Playback);
        assert!(match_strategies(&flow, &plan, &catalog, &ctx).is_empty());
    }

    #[test]
    fn disabled_scenarios_are_skipped() {
        let mut plan = plan_with_probability(1.0);
        plan.scenarios[0].enabled = false;
        let mut catalog = catalog_for(&plan);
        catalog.scenarios[0].enabled = false;
        let mut flow = Flow::new("GET", "http://x/a", vec![], vec![]);
        flow.metadata.traffic_type = Some(TrafficType::ToolCall);
        let ctx = context(&flow, &plan, ProxyMode::Live);
        assert!(match_strategies(&flow, &plan, &catalog, &ctx).is_empty());
    }
}
