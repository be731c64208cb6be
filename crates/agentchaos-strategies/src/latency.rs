//! Latency injection: suspends a flow to simulate slow tools, slow models
//! or congested agent meshes.

use crate::params;
use agentchaos_core::{ChaosStrategy, Flow, StrategyAction, StrategyContext, StrategyError};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Which hook the delay applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencySide {
    /// Delay before the request goes upstream
    Request,
    /// Delay before the response returns to the agent
    Response,
}

/// Latency strategy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LatencyConfig {
    /// Fixed delay in seconds
    #[serde(default)]
    pub delay: Option<f64>,
    /// Random delay range (min, max) in milliseconds
    #[serde(default)]
    pub random_delay_range_ms: Option<(u64, u64)>,
    /// Jitter percentage (0-100) applied to the base delay
    #[serde(default)]
    pub jitter_percent: f64,
    /// Side to delay on
    #[serde(default = "default_side")]
    pub side: LatencySide,
}

fn default_side() -> LatencySide {
    LatencySide::Request
}

/// Suspends the flow for a configured duration. Cancellation makes the
/// flow proceed immediately with `cancelled` recorded.
pub struct LatencyStrategy {
    config: LatencyConfig,
}

impl LatencyStrategy {
    /// Strategy tag.
    pub const NAME: &'static str = "latency";

    /// Build from scenario params.
    pub fn from_params(raw: &serde_json::Value) -> Result<Self, StrategyError> {
        let config: LatencyConfig = params::parse(Self::NAME, raw)?;
        if config.delay.is_none() && config.random_delay_range_ms.is_none() {
            return Err(StrategyError::InvalidParams {
                strategy: Self::NAME.to_string(),
                message: "one of `delay` or `random_delay_range_ms` is required".to_string(),
            });
        }
        Ok(Self { config })
    }

    /// Compute the delay for one flow from the flow's deterministic RNG.
    fn calculate_delay_ms(&self, ctx: &StrategyContext) -> u64 {
        let base = if let Some(secs) = self.config.delay {
            (secs.max(0.0) * 1000.0) as u64
        } else if let Some((min, max)) = self.config.random_delay_range_ms {
            if max > min {
                min + ctx.random_index((max - min + 1) as usize) as u64
            } else {
                min
            }
        } else {
            0
        };

        if self.config.jitter_percent > 0.0 {
            let jitter = (base as f64 * self.config.jitter_percent / 100.0) as u64;
            let offset = ctx.random_index((jitter + 1) as usize) as u64;
            if ctx.random_bool(0.5) {
                base + offset
            } else {
                base.saturating_sub(offset)
            }
        } else {
            base
        }
    }

    async fn suspend(&self, flow: &mut Flow, ctx: &StrategyContext) {
        let delay_ms = self.calculate_delay_ms(ctx);
        if delay_ms == 0 {
            return;
        }
        let delay = ctx.bounded_delay(Duration::from_millis(delay_ms));
        debug!(delay_ms = delay.as_millis() as u64, "injecting latency");
        tokio::select! {
            () = tokio::time::sleep(delay) => {
                flow.record_chaos(Self::NAME);
            }
            () = ctx.cancel.cancelled() => {
                flow.metadata.cancelled = true;
                debug!("latency suspension cancelled, flow proceeds");
            }
        }
    }
}

#[async_trait]
impl ChaosStrategy for LatencyStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn intercept_request(
        &self,
        flow: &mut Flow,
        ctx: &StrategyContext,
    ) -> Result<StrategyAction, StrategyError> {
        if self.config.side == LatencySide::Request {
            self.suspend(flow, ctx).await;
        }
        Ok(StrategyAction::Continue)
    }

    async fn intercept_response(
        &self,
        flow: &mut Flow,
        ctx: &StrategyContext,
    ) -> Result<(), StrategyError> {
        if self.config.side == LatencySide::Response {
            self.suspend(flow, ctx).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, tool_flow};
    use serde_json::json;
    use std::time::Instant;

    #[tokio::test]
    async fn fixed_delay_suspends_request() {
        let strategy = LatencyStrategy::from_params(&json!({"delay": 0.05})).unwrap();
        let mut flow = tool_flow();
        let ctx = context();

        let start = Instant::now();
        let action = strategy.intercept_request(&mut flow, &ctx).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(action, StrategyAction::Continue);
        assert_eq!(flow.metadata.applied_strategies, vec!["latency"]);
        assert!(flow.metadata.chaos_applied);
    }

    #[tokio::test]
    async fn cancellation_tags_flow_and_returns_promptly() {
        let strategy = LatencyStrategy::from_params(&json!({"delay": 30.0})).unwrap();
        let mut flow = tool_flow();
        let ctx = context();
        ctx.cancel.cancel();

        let start = Instant::now();
        strategy.intercept_request(&mut flow, &ctx).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(100));
        assert!(flow.metadata.cancelled);
        assert!(flow.metadata.applied_strategies.is_empty());
    }

    #[tokio::test]
    async fn response_side_delay_skips_request_hook() {
        let strategy =
            LatencyStrategy::from_params(&json!({"delay": 5.0, "side": "response"})).unwrap();
        let mut flow = tool_flow();
        let ctx = context();

        let start = Instant::now();
        strategy.intercept_request(&mut flow, &ctx).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(50));
        assert!(flow.metadata.applied_strategies.is_empty());
    }

    #[test]
    fn random_range_is_deterministic_per_seed() {
        let strategy =
            LatencyStrategy::from_params(&json!({"random_delay_range_ms": [50, 150]})).unwrap();
        let a = strategy.calculate_delay_ms(&context());
        let b = strategy.calculate_delay_ms(&context());
        assert_eq!(a, b);
        assert!((50..=150).contains(&a));
    }

    #[test]
    fn missing_delay_params_fail_fast() {
        assert!(LatencyStrategy::from_params(&json!({})).is_err());
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let strategy =
            LatencyStrategy::from_params(&json!({"delay": 0.1, "jitter_percent": 10.0})).unwrap();
        for _ in 0..32 {
            let ms = strategy.calculate_delay_ms(&context());
            assert!((90..=110).contains(&ms));
        }
    }
}
