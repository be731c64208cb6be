//! Cognitive attacks: hallucination (plausible-but-wrong response data)
//! and context overflow (filler flooding the model's context window).

use crate::json_mutate::{negate_number, scale_number, shift_date_string, visit_leaves};
use crate::params;
use agentchaos_core::{
    ChaosStrategy, Flow, StrategyAction, StrategyContext, StrategyError, TrafficType,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Hallucination mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HallucinationMode {
    /// Scale numerics by [0.8, 1.2) and nudge dates by ±7 days
    SwapEntities,
    /// Negate numeric leaves
    InvertNumbers,
    /// Shift date leaves by a configured offset
    ShiftDates,
}

/// Hallucination configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HallucinationConfig {
    /// Mutation mode
    pub mode: HallucinationMode,
    /// Day offset for `shift_dates`
    #[serde(default = "default_shift_days")]
    pub date_shift_days: i64,
}

fn default_shift_days() -> i64 {
    30
}

/// Makes response data subtly wrong while keeping the JSON key set and
/// structure identical, so downstream parsing keeps working.
pub struct HallucinationStrategy {
    config: HallucinationConfig,
}

impl HallucinationStrategy {
    /// Strategy tag.
    pub const NAME: &'static str = "hallucination";

    /// Build from scenario params.
    pub fn from_params(raw: &serde_json::Value) -> Result<Self, StrategyError> {
        Ok(Self { config: params::parse(Self::NAME, raw)? })
    }

    fn mutate(&self, value: &mut Value, ctx: &StrategyContext) -> bool {
        let mut changed = false;
        match self.config.mode {
            HallucinationMode::SwapEntities => {
                visit_leaves(value, &mut |leaf| {
                    if leaf.is_number() {
                        let factor = ctx.random_range_f64(0.8, 1.2);
                        scale_number(leaf, factor);
                        changed = true;
                    } else if let Some(s) = leaf.as_str() {
                        let days = if ctx.random_bool(0.5) { 7 } else { -7 };
                        if let Some(shifted) = shift_date_string(s, days) {
                            *leaf = Value::String(shifted);
                            changed = true;
                        }
                    }
                });
            }
            HallucinationMode::InvertNumbers => {
                visit_leaves(value, &mut |leaf| {
                    if leaf.is_number() {
                        negate_number(leaf);
                        changed = true;
                    }
                });
            }
            HallucinationMode::ShiftDates => {
                let days = self.config.date_shift_days;
                visit_leaves(value, &mut |leaf| {
                    if let Some(s) = leaf.as_str() {
                        if let Some(shifted) = shift_date_string(s, days) {
                            *leaf = Value::String(shifted);
                            changed = true;
                        }
                    }
                });
            }
        }
        changed
    }
}

#[async_trait]
impl ChaosStrategy for HallucinationStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn intercept_response(
        &self,
        flow: &mut Flow,
        ctx: &StrategyContext,
    ) -> Result<(), StrategyError> {
        let Some(response) = flow.response.as_mut() else {
            return Ok(());
        };
        let Some(mut body) = response.body_json() else {
            return Ok(());
        };

        let keys_before = collect_keys(&body);
        if self.mutate(&mut body, ctx) {
            debug_assert_eq!(keys_before, collect_keys(&body));
            response.set_body_json(&body);
            flow.record_chaos(Self::NAME);
            flow.record_chaos_detail("cognitive:hallucination");
            debug!(mode = ?self.config.mode, "hallucinated response data");
        }
        Ok(())
    }
}

fn collect_keys(value: &Value) -> Vec<String> {
    let mut keys = Vec::new();
    fn walk(value: &Value, prefix: &str, keys: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    let path = format!("{prefix}.{k}");
                    keys.push(path.clone());
                    walk(v, &path, keys);
                }
            }
            Value::Array(items) => {
                for (i, v) in items.iter().enumerate() {
                    walk(v, &format!("{prefix}[{i}]"), keys);
                }
            }
            _ => {}
        }
    }
    walk(value, "$", &mut keys);
    keys
}

/// Context-overflow filler mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillerMode {
    /// Repeat a fixed filler token
    Filler,
    /// Deterministic pseudo-random words
    Random,
}

/// Context overflow configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ContextOverflowConfig {
    /// Number of filler tokens to append
    #[serde(default = "default_token_count")]
    pub token_count: usize,
    /// Filler generation mode
    #[serde(default = "default_filler_mode")]
    pub mode: FillerMode,
}

fn default_token_count() -> usize {
    512
}

fn default_filler_mode() -> FillerMode {
    FillerMode::Filler
}

const FILLER_WORDS: &[&str] = &[
    "lorem", "ipsum", "dolor", "sit", "amet", "consectetur", "adipiscing", "elit",
];

/// Floods the tail of an LLM conversation with filler tokens. Message
/// order is never changed; only the last message's content grows.
pub struct ContextOverflowStrategy {
    config: ContextOverflowConfig,
}

impl ContextOverflowStrategy {
    /// Strategy tag.
    pub const NAME: &'static str = "context_overflow";

    /// Build from scenario params.
    pub fn from_params(raw: &serde_json::Value) -> Result<Self, StrategyError> {
        Ok(Self { config: params::parse(Self::NAME, raw)? })
    }

    fn filler(&self, ctx: &StrategyContext) -> String {
        let mut out = String::new();
        for i in 0..self.config.token_count {
            let word = match self.config.mode {
                FillerMode::Filler => FILLER_WORDS[i % FILLER_WORDS.len()],
                FillerMode::Random => FILLER_WORDS[ctx.random_index(FILLER_WORDS.len())],
            };
            out.push(' ');
            out.push_str(word);
        }
        out
    }
}

#[async_trait]
impl ChaosStrategy for ContextOverflowStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn intercept_request(
        &self,
        flow: &mut Flow,
        ctx: &StrategyContext,
    ) -> Result<StrategyAction, StrategyError> {
        if flow.traffic_type() != TrafficType::LlmApi {
            return Ok(StrategyAction::Continue);
        }
        let Some(mut body) = flow.request.body_json() else {
            return Ok(StrategyAction::Continue);
        };

        let filler = self.filler(ctx);
        let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) else {
            return Ok(StrategyAction::Continue);
        };
        let Some(last) = messages.last_mut() else {
            return Ok(StrategyAction::Continue);
        };
        let Some(content) = last.get_mut("content") else {
            return Ok(StrategyAction::Continue);
        };
        let Some(text) = content.as_str() else {
            return Ok(StrategyAction::Continue);
        };

        *content = Value::String(format!("{text}{filler}"));
        flow.request.set_body_json(&body);
        flow.record_chaos(Self::NAME);
        flow.record_chaos_detail("cognitive:context_overflow");
        debug!(tokens = self.config.token_count, "overflowed llm context");
        Ok(StrategyAction::Continue)
    }
}
