//! Swarm disruption: attacks on inter-agent coordination. Only fires on
//! agent-to-agent flows; the matcher's subtype gate narrows further.

use crate::json_mutate::{scale_number, visit_fields, visit_leaves};
use crate::params;
use agentchaos_core::{
    ChaosStrategy, Flow, Headers, StrategyAction, StrategyContext, StrategyError, TrafficSubtype,
    TrafficType,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Which coordination attack to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmAttackType {
    /// Mutate fields of the inter-agent message body
    MessageMutation,
    /// Delay consensus-vote messages
    ConsensusDelay,
    /// Cut listed agents off with 503s
    AgentIsolation,
}

/// What a mutation rule does to a matched field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationAction {
    /// Replace the field with `value`
    Set,
    /// Flip a boolean field
    Flip,
    /// Jitter a numeric field by ±20%
    Jitter,
}

/// One field-targeted mutation rule.
#[derive(Debug, Clone, Deserialize)]
pub struct MutationRule {
    /// Field name, matched anywhere in the body
    pub field: String,
    /// Action to apply
    pub action: MutationAction,
    /// Replacement value for `set`
    #[serde(default)]
    pub value: Option<Value>,
}

/// Swarm disruption configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SwarmDisruptionConfig {
    /// Attack type
    pub attack_type: SwarmAttackType,
    /// Explicit mutation rules; when absent a default flip/jitter rule runs
    #[serde(default)]
    pub mutation_rules: Option<Vec<MutationRule>>,
    /// Consensus delay in seconds
    #[serde(default = "default_consensus_delay")]
    pub consensus_delay: f64,
    /// Agents to isolate
    #[serde(default)]
    pub isolated_agents: Vec<String>,
}

fn default_consensus_delay() -> f64 {
    2.0
}

/// Disrupts agent-to-agent coordination traffic.
pub struct SwarmDisruptionStrategy {
    config: SwarmDisruptionConfig,
}

impl SwarmDisruptionStrategy {
    /// Strategy tag.
    pub const NAME: &'static str = "swarm_disruption";

    /// Build from scenario params.
    pub fn from_params(raw: &serde_json::Value) -> Result<Self, StrategyError> {
        Ok(Self { config: params::parse(Self::NAME, raw)? })
    }

    fn mutate_message(&self, flow: &mut Flow, ctx: &StrategyContext) {
        let Some(mut body) = flow.request.body_json() else {
            return;
        };
        let mut changed = false;

        if let Some(rules) = &self.config.mutation_rules {
            for rule in rules {
                visit_fields(&mut body, &mut |name, value| {
                    if name != rule.field {
                        return;
                    }
                    match rule.action {
                        MutationAction::Set => {
                            if let Some(replacement) = &rule.value {
                                *value = replacement.clone();
                                changed = true;
                            }
                        }
                        MutationAction::Flip => {
                            if let Some(b) = value.as_bool() {
                                *value = Value::Bool(!b);
                                changed = true;
                            }
                        }
                        MutationAction::Jitter => {
                            if value.is_number() {
                                let jitter = ctx.random_range_f64(-0.2, 0.2);
                                scale_number(value, 1.0 + jitter);
                                changed = true;
                            }
                        }
                    }
                });
            }
        } else {
            // Default rule: flip booleans, jitter numerics by ±20% or ±1.
            visit_leaves(&mut body, &mut |leaf| match leaf {
                Value::Bool(b) => {
                    *leaf = Value::Bool(!*b);
                    changed = true;
                }
                Value::Number(_) => {
                    if let Some(i) = leaf.as_i64() {
                        if i.abs() < 5 {
                            let delta = if ctx.random_bool(0.5) { 1 } else { -1 };
                            *leaf = Value::from(i + delta);
                            changed = true;
                            return;
                        }
                    }
                    let jitter = ctx.random_range_f64(-0.2, 0.2);
                    scale_number(leaf, 1.0 + jitter);
                    changed = true;
                }
                _ => {}
            });
        }

        if changed {
            flow.request.set_body_json(&body);
            flow.record_chaos(Self::NAME);
            flow.record_chaos_detail("swarm:message_mutation");
            debug!("mutated inter-agent message");
        }
    }

    async fn delay_consensus(&self, flow: &mut Flow, ctx: &StrategyContext) {
        if flow.metadata.traffic_subtype != TrafficSubtype::ConsensusVote {
            return;
        }
        let delay =
            ctx.bounded_delay(Duration::from_secs_f64(self.config.consensus_delay.max(0.0)));
        debug!(delay_ms = delay.as_millis() as u64, "delaying consensus vote");
        tokio::select! {
            () = tokio::time::sleep(delay) => {
                flow.record_chaos(Self::NAME);
                flow.record_chaos_detail("swarm:consensus_delay");
            }
            () = ctx.cancel.cancelled() => {
                flow.metadata.cancelled = true;
            }
        }
    }

    fn isolate(&self, flow: &mut Flow) -> StrategyAction {
        let Some(sender) = flow.metadata.sender_agent.clone() else {
            return StrategyAction::Continue;
        };
        if !self.config.isolated_agents.contains(&sender) {
            return StrategyAction::Continue;
        }

        let body = serde_json::json!({
            "error": "agent_isolated",
            "agent": sender,
        });
        let body = serde_json::to_vec(&body).unwrap_or_default();
        let mut headers = Headers::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        headers.insert("content-length".to_string(), body.len().to_string());
        flow.set_response(503, "Service Unavailable", headers, body);
        flow.record_chaos(Self::NAME);
        flow.record_chaos_detail("swarm:agent_isolation");
        debug!(agent = %sender, "isolated agent");
        StrategyAction::ShortCircuit
    }
}

#[async_trait]
impl ChaosStrategy for SwarmDisruptionStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn intercept_request(
        &self,
        flow: &mut Flow,
        ctx: &StrategyContext,
    ) -> Result<StrategyAction, StrategyError> {
        if flow.traffic_type() != TrafficType::AgentToAgent {
            return Ok(StrategyAction::Continue);
        }
        match self.config.attack_type {
            SwarmAttackType::MessageMutation => {
                self.mutate_message(flow, ctx);
                Ok(StrategyAction::Continue)
            }
            SwarmAttackType::ConsensusDelay => {
                self.delay_consensus(flow, ctx).await;
                Ok(StrategyAction::Continue)
            }
            SwarmAttackType::AgentIsolation => Ok(self.isolate(flow)),
        }
    }
}
