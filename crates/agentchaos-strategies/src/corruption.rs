//! Data corruption: degrades response payloads. JSON bodies get jittered
//! numerics and flipped booleans; binary bodies get raw byte flips.

use crate::json_mutate::{scale_number, visit_leaves};
use crate::params;
use agentchaos_core::{ChaosStrategy, Flow, StrategyContext, StrategyError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// How binary bodies are corrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptionKind {
    /// Overwrite random bytes with random values
    RandomBytes,
    /// Flip single bits at random positions
    BitFlip,
    /// Truncate the body at a random position
    Truncate,
}

/// Data corruption configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CorruptionConfig {
    /// Relative jitter applied to numeric leaves, e.g. 0.2 for ±20%
    #[serde(default = "default_jitter_pct")]
    pub jitter_pct: f64,
    /// Probability of flipping each boolean leaf
    #[serde(default = "default_flip_prob")]
    pub flip_prob: f64,
    /// Truncate JSON bodies in half instead of mutating leaves
    #[serde(default)]
    pub truncate: bool,
    /// Bytes to corrupt in binary bodies
    #[serde(default = "default_binary_flips")]
    pub binary_flips: usize,
    /// Binary corruption kind
    #[serde(default = "default_corruption_kind")]
    pub corruption: CorruptionKind,
}

fn default_jitter_pct() -> f64 {
    0.2
}

fn default_flip_prob() -> f64 {
    0.5
}

fn default_binary_flips() -> usize {
    8
}

fn default_corruption_kind() -> CorruptionKind {
    CorruptionKind::BitFlip
}

/// Corrupts response payloads while keeping them superficially plausible.
pub struct CorruptionStrategy {
    config: CorruptionConfig,
}

impl CorruptionStrategy {
    /// Strategy tag.
    pub const NAME: &'static str = "data_corruption";

    /// Build from scenario params.
    pub fn from_params(raw: &serde_json::Value) -> Result<Self, StrategyError> {
        Ok(Self { config: params::parse(Self::NAME, raw)? })
    }

    fn corrupt_json(&self, value: &mut Value, ctx: &StrategyContext) -> bool {
        let mut changed = false;
        visit_leaves(value, &mut |leaf| match leaf {
            Value::Number(_) if self.config.jitter_pct > 0.0 => {
                let jitter = ctx.random_range_f64(-self.config.jitter_pct, self.config.jitter_pct);
                scale_number(leaf, 1.0 + jitter);
                changed = true;
            }
            Value::Bool(b) => {
                if ctx.random_bool(self.config.flip_prob) {
                    *leaf = Value::Bool(!*b);
                    changed = true;
                }
            }
            _ => {}
        });
        changed
    }

    fn corrupt_binary(&self, body: &mut Vec<u8>, ctx: &StrategyContext) -> bool {
        if body.is_empty() {
            return false;
        }
        match self.config.corruption {
            CorruptionKind::Truncate => {
                let keep = body.len() / 2 + ctx.random_index(body.len() / 2 + 1);
                body.truncate(keep.max(1));
            }
            CorruptionKind::RandomBytes => {
                for _ in 0..self.config.binary_flips {
                    let index = ctx.random_index(body.len());
                    body[index] = ctx.random_index(256) as u8;
                }
            }
            CorruptionKind::BitFlip => {
                for _ in 0..self.config.binary_flips {
                    let index = ctx.random_index(body.len());
                    let bit = ctx.random_index(8) as u8;
                    body[index] ^= 1 << bit;
                }
            }
        }
        true
    }
}

#[async_trait]
impl ChaosStrategy for CorruptionStrategy {
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
        if response.body.is_empty() {
            return Ok(());
        }

        let changed = if let Some(mut value) = response.body_json() {
            if self.config.truncate {
                let keep = response.body.len() / 2;
                response.body.truncate(keep);
                response
                    .headers
                    .insert("content-length".to_string(), response.body.len().to_string());
                true
            } else {
                let changed = self.corrupt_json(&mut value, ctx);
                if changed {
                    response.set_body_json(&value);
                }
                changed
            }
        } else {
            let mut body = std::mem::take(&mut response.body);
            let changed = self.corrupt_binary(&mut body, ctx);
            response.headers.insert("content-length".to_string(), body.len().to_string());
            response.body = body;
            changed
        };

        if changed {
            debug!("corrupted response payload");
            flow.record_chaos(Self::NAME);
        }
        Ok(())
    }
}
