//! The strategy contract: the capability set every chaos strategy
//! implements, plus the per-flow execution context handed to it.

use crate::flow::{Flow, ProxyMode, TrafficSubtype};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Strategy failure. Never propagates past the pipeline: the strategy is
/// skipped, the code recorded on the flow, and processing continues.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// Params did not deserialize into the strategy's config.
    #[error("invalid params for strategy `{strategy}`: {message}")]
    InvalidParams {
        /// Strategy tag
        strategy: String,
        /// What was wrong
        message: String,
    },
    /// No constructor registered for the scenario's type tag.
    #[error("unknown strategy type `{0}`")]
    UnknownStrategy(String),
    /// The strategy failed mid-flight.
    #[error("strategy `{strategy}` failed: {code}")]
    Failed {
        /// Strategy tag
        strategy: String,
        /// Stable error code recorded on the flow and the event
        code: String,
    },
}

impl StrategyError {
    /// Stable code for event records and the scorecard.
    pub fn code(&self) -> String {
        match self {
            Self::InvalidParams { strategy, .. } => format!("{strategy}_invalid_params"),
            Self::UnknownStrategy(tag) => format!("unknown_strategy_{tag}"),
            Self::Failed { code, .. } => code.clone(),
        }
    }
}

/// What the pipeline should do after a request-side interception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyAction {
    /// Keep processing: later strategies, then upstream.
    Continue,
    /// The strategy synthesized a response; skip upstream and remaining
    /// request-side strategies.
    ShortCircuit,
}

/// Per-flow execution context: deterministic RNG, cancellation, deadlines.
pub struct StrategyContext {
    rng: Mutex<StdRng>,
    /// Cancelled by the interceptor when the flow is aborted.
    pub cancel: CancellationToken,
    /// Upper bound for any suspension inside a strategy.
    pub suspension_deadline: Duration,
    /// Current proxy mode.
    pub mode: ProxyMode,
}

impl StrategyContext {
    /// Build a context with a seeded RNG.
    pub fn new(seed: [u8; 32], cancel: CancellationToken, suspension_deadline: Duration, mode: ProxyMode) -> Self {
        Self {
            rng: Mutex::new(StdRng::from_seed(seed)),
            cancel,
            suspension_deadline,
            mode,
        }
    }

    /// Uniform draw in [0, 1).
    pub fn random_f64(&self) -> f64 {
        self.rng.lock().random::<f64>()
    }

    /// Uniform draw in [low, high).
    pub fn random_range_f64(&self, low: f64, high: f64) -> f64 {
        self.rng.lock().random_range(low..high)
    }

    /// Uniform draw in [0, n).
    pub fn random_index(&self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        self.rng.lock().random_range(0..n)
    }

    /// Bernoulli draw.
    pub fn random_bool(&self, probability: f64) -> bool {
        self.rng.lock().random_bool(probability.clamp(0.0, 1.0))
    }

    /// Clamp a requested delay to the flow's suspension deadline.
    pub fn bounded_delay(&self, requested: Duration) -> Duration {
        requested.min(self.suspension_deadline)
    }
}

/// The capability set all strategies implement. Either hook may be a
/// no-op. Implementations hold configuration only, never per-flow state,
/// so one instance serves concurrent flows.
#[async_trait]
pub trait ChaosStrategy: Send + Sync {
    /// Strategy tag recorded in `applied_strategies`.
    fn name(&self) -> &'static str;

    /// Mutate the request before upstream. Returning `ShortCircuit` means
    /// the strategy set a response and upstream must be skipped.
    async fn intercept_request(
        &self,
        _flow: &mut Flow,
        _ctx: &StrategyContext,
    ) -> Result<StrategyAction, StrategyError> {
        Ok(StrategyAction::Continue)
    }

    /// Mutate the response after upstream (or after a short-circuit).
    async fn intercept_response(
        &self,
        _flow: &mut Flow,
        _ctx: &StrategyContext,
    ) -> Result<(), StrategyError> {
        Ok(())
    }
}

/// One scenario compiled against a plan: resolved target index and a
/// constructed strategy instance.
pub struct CompiledScenario {
    /// Scenario name from the plan
    pub name: String,
    /// Strategy type tag
    pub strategy_tag: String,
    /// Index into the plan's targets
    pub target_index: usize,
    /// Whether the matcher may select this scenario
    pub enabled: bool,
    /// Trigger probability
    pub probability: f64,
    /// Required subtype, if declared
    pub target_subtype: Option<TrafficSubtype>,
    /// The executable strategy
    pub strategy: Arc<dyn ChaosStrategy>,
}

impl std::fmt::Debug for CompiledScenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledScenario")
            .field("name", &self.name)
            .field("strategy_tag", &self.strategy_tag)
            .field("target_index", &self.target_index)
            .field("enabled", &self.enabled)
            .field("probability", &self.probability)
            .field("target_subtype", &self.target_subtype)
            .field("strategy", &self.strategy.name())
            .finish()
    }
}

/// The executable form of a plan's scenarios, parallel to
/// `ChaosPlan::scenarios`.
#[derive(Debug)]
pub struct StrategyCatalog {
    /// Compiled scenarios in plan order
    pub scenarios: Vec<CompiledScenario>,
}

impl StrategyCatalog {
    /// An empty catalog (used before the first plan compiles).
    pub fn empty() -> Self {
        Self { scenarios: Vec::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_context_is_deterministic() {
        let seed = [7u8; 32];
        let a = StrategyContext::new(
            seed,
            CancellationToken::new(),
            Duration::from_secs(30),
            ProxyMode::Live,
        );
        let b = StrategyContext::new(
            seed,
            CancellationToken::new(),
            Duration::from_secs(30),
            ProxyMode::Live,
        );
        for _ in 0..16 {
            assert_eq!(a.random_f64().to_bits(), b.random_f64().to_bits());
        }
    }

    #[test]
    fn bounded_delay_clamps_to_deadline() {
        let ctx = StrategyContext::new(
            [0u8; 32],
            CancellationToken::new(),
            Duration::from_millis(100),
            ProxyMode::Live,
        );
        assert_eq!(ctx.bounded_delay(Duration::from_secs(5)), Duration::from_millis(100));
        assert_eq!(ctx.bounded_delay(Duration::from_millis(20)), Duration::from_millis(20));
    }
}
