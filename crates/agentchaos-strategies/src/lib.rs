//! AgentChaos strategy library
//!
//! Pluggable mutators implementing the core strategy contract, plus the
//! tag-to-constructor registry that compiles a validated plan into an
//! executable catalog at install time. No per-flow lookup happens at
//! request time; dispatch goes through the catalog built here.

pub mod cognitive;
pub mod corruption;
pub mod error_injection;
pub mod group_failure;
mod json_mutate;
pub mod latency;
pub mod mcp_fuzz;
mod params;
pub mod rag;
pub mod swarm;
#[cfg(test)]
pub(crate) mod testing;

pub use cognitive::{
    ContextOverflowConfig, ContextOverflowStrategy, FillerMode, HallucinationConfig,
    HallucinationMode, HallucinationStrategy,
};
pub use corruption::{CorruptionConfig, CorruptionKind, CorruptionStrategy};
pub use error_injection::{ErrorInjectionConfig, ErrorInjectionStrategy};
pub use group_failure::{GroupFailureConfig, GroupFailureStrategy};
pub use latency::{LatencyConfig, LatencySide, LatencyStrategy};
pub use mcp_fuzz::{FuzzType, McpFuzzConfig, McpFuzzStrategy};
pub use rag::{PoisonMode, RagPhantomConfig, RagPhantomStrategy};
pub use swarm::{
    MutationAction, MutationRule, SwarmAttackType, SwarmDisruptionConfig, SwarmDisruptionStrategy,
};

use agentchaos_core::{
    ChaosPlan, ChaosStrategy, CompiledScenario, StrategyCatalog, StrategyError,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Options threaded into strategy constructors.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryOptions {
    /// Strict replay mode: unsupported JSONPath expressions fail the build
    pub replay_strict: bool,
}

type Constructor = fn(&Value, &RegistryOptions) -> Result<Arc<dyn ChaosStrategy>, StrategyError>;

/// Tag-to-constructor mapping, built once and reused for every plan
/// compile.
pub struct StrategyRegistry {
    constructors: HashMap<&'static str, Constructor>,
}

impl StrategyRegistry {
    /// Registry with every built-in strategy.
    pub fn builtin() -> Self {
        let mut registry = Self { constructors: HashMap::new() };
        registry.register(LatencyStrategy::NAME, |params, _| {
            Ok(Arc::new(LatencyStrategy::from_params(params)?))
        });
        registry.register(ErrorInjectionStrategy::NAME, |params, _| {
            Ok(Arc::new(ErrorInjectionStrategy::from_params(params)?))
        });
        registry.register(CorruptionStrategy::NAME, |params, _| {
            Ok(Arc::new(CorruptionStrategy::from_params(params)?))
        });
        registry.register(McpFuzzStrategy::NAME, |params, _| {
            Ok(Arc::new(McpFuzzStrategy::from_params(params)?))
        });
        registry.register(HallucinationStrategy::NAME, |params, _| {
            Ok(Arc::new(HallucinationStrategy::from_params(params)?))
        });
        registry.register(ContextOverflowStrategy::NAME, |params, _| {
            Ok(Arc::new(ContextOverflowStrategy::from_params(params)?))
        });
        registry.register(RagPhantomStrategy::NAME, |params, options| {
            Ok(Arc::new(RagPhantomStrategy::from_params(params, options.replay_strict)?))
        });
        registry.register(SwarmDisruptionStrategy::NAME, |params, _| {
            Ok(Arc::new(SwarmDisruptionStrategy::from_params(params)?))
        });
        registry.register(GroupFailureStrategy::NAME, |params, _| {
            Ok(Arc::new(GroupFailureStrategy::from_params(params)?))
        });
        registry
    }

    /// Register a constructor for a strategy tag.
    pub fn register(&mut self, tag: &'static str, constructor: Constructor) {
        self.constructors.insert(tag, constructor);
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.constructors.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    /// Build one strategy instance.
    pub fn build(
        &self,
        tag: &str,
        params: &Value,
        options: &RegistryOptions,
    ) -> Result<Arc<dyn ChaosStrategy>, StrategyError> {
        let constructor = self
            .constructors
            .get(tag)
            .ok_or_else(|| StrategyError::UnknownStrategy(tag.to_string()))?;
        constructor(params, options)
    }

    /// Compile every scenario of a plan into an executable catalog.
    /// Collects all failures so a plan reload reports every bad scenario
    /// at once.
    pub fn compile(
        &self,
        plan: &ChaosPlan,
        options: &RegistryOptions,
    ) -> Result<StrategyCatalog, Vec<String>> {
        let mut scenarios = Vec::with_capacity(plan.scenarios.len());
        let mut errors = Vec::new();

        for (i, scenario) in plan.scenarios.iter().enumerate() {
            match self.build(&scenario.strategy, &scenario.params, options) {
                Ok(strategy) => scenarios.push(CompiledScenario {
                    name: scenario.name.clone(),
                    strategy_tag: scenario.strategy.clone(),
                    target_index: plan.scenario_targets[i],
                    enabled: scenario.enabled,
                    probability: scenario.probability,
                    target_subtype: scenario.target_subtype,
                    strategy,
                }),
                Err(err) => {
                    errors.push(format!("scenarios[{i}] ({}): {err}", scenario.name));
                }
            }
        }

        if errors.is_empty() {
            Ok(StrategyCatalog { scenarios })
        } else {
            Err(errors)
        }
    }
}
