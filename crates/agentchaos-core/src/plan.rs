//! Chaos plan data model and the process-wide plan snapshot handle.

use crate::classifier::CompiledClassifierRules;
use crate::flow::TrafficSubtype;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Plan-level metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanMetadata {
    /// Human-readable plan name
    pub name: String,
    /// Experiment identifier; seeds the per-flow RNG
    pub experiment_id: String,
    /// Optional free-form description
    #[serde(default)]
    pub description: Option<String>,
}

/// What a target pattern is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Pattern matched against the request URL
    HttpEndpoint,
    /// Pattern matched against the traffic-type name (`LLM_API`)
    LlmInput,
    /// Pattern matched against the traffic-type name (`TOOL_CALL`)
    ToolCall,
    /// Pattern matched against the flow's agent role
    AgentRole,
    /// Pattern matched against the request URL, caller-defined semantics
    Custom,
}

/// A named pattern describing which flows a strategy applies to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Unique, nonempty name referenced by scenarios
    pub name: String,
    /// Match dimension
    #[serde(rename = "type")]
    pub kind: TargetKind,
    /// Regex pattern
    pub pattern: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
}

/// A target with its pattern compiled.
#[derive(Debug, Clone)]
pub struct CompiledTarget {
    /// The declared target
    pub target: Target,
    /// Compiled pattern
    pub regex: Regex,
}

/// A configured strategy instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique scenario name
    pub name: String,
    /// Strategy type tag, resolved through the registry
    #[serde(rename = "type")]
    pub strategy: String,
    /// Name of the target this scenario applies to
    pub target_ref: String,
    /// Disabled scenarios are skipped by the matcher
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Trigger probability in [0, 1]
    #[serde(default = "default_probability")]
    pub probability: f64,
    /// When set, the flow's subtype must match
    #[serde(default)]
    pub target_subtype: Option<TrafficSubtype>,
    /// Strategy-specific parameters
    #[serde(default)]
    pub params: serde_json::Value,
}

fn default_enabled() -> bool {
    true
}

fn default_probability() -> f64 {
    1.0
}

/// One classifier rule source: URL patterns per traffic category.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierRuleSet {
    /// Patterns marking agent-to-agent traffic
    #[serde(default)]
    pub agent_patterns: Vec<String>,
    /// Patterns marking LLM API traffic
    #[serde(default)]
    pub llm_patterns: Vec<String>,
    /// Patterns marking tool-call traffic
    #[serde(default)]
    pub tool_patterns: Vec<String>,
}

/// A named, shippable bundle of classifier rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierRulePack {
    /// Pack name
    pub name: String,
    /// The pack's rules
    pub rules: ClassifierRuleSet,
}

/// Knobs controlling fingerprint normalization during record and playback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// JSONPath expressions masked out of JSON request bodies before hashing
    #[serde(default)]
    pub ignore_paths: Vec<String>,
    /// Query parameter names stripped from the normalized URL
    #[serde(default)]
    pub ignore_params: Vec<String>,
}

/// Plan-wide defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDefaults {
    /// Upper bound for any strategy suspension, in milliseconds
    #[serde(default = "default_suspension_deadline_ms")]
    pub suspension_deadline_ms: u64,
}

fn default_suspension_deadline_ms() -> u64 {
    30_000
}

impl Default for PlanDefaults {
    fn default() -> Self {
        Self { suspension_deadline_ms: default_suspension_deadline_ms() }
    }
}

/// The raw plan document as deserialized from YAML, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanDocument {
    /// Plan format version
    pub version: String,
    /// Monotonically increasing plan revision
    pub revision: u64,
    /// Plan metadata
    pub metadata: PlanMetadata,
    /// Declared targets
    #[serde(default)]
    pub targets: Vec<Target>,
    /// Declared scenarios
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
    /// Inline rule override, consulted before the packs
    #[serde(default)]
    pub classifier_rules: Option<ClassifierRuleSet>,
    /// Named rule packs; required in strict classifier mode
    #[serde(default)]
    pub classifier_rule_packs: Vec<ClassifierRulePack>,
    /// Replay normalization knobs
    #[serde(default)]
    pub replay_config: ReplayConfig,
    /// Plan-wide defaults
    #[serde(default)]
    pub defaults: PlanDefaults,
}

/// A validated, compiled, immutable chaos plan.
#[derive(Debug)]
pub struct ChaosPlan {
    /// Plan format version
    pub version: String,
    /// Plan revision
    pub revision: u64,
    /// Plan metadata
    pub metadata: PlanMetadata,
    /// Compiled targets, in plan order
    pub targets: Vec<CompiledTarget>,
    /// Scenarios, in plan order
    pub scenarios: Vec<Scenario>,
    /// Target index per scenario (parallel to `scenarios`)
    pub scenario_targets: Vec<usize>,
    /// Compiled classifier rules
    pub classifier: CompiledClassifierRules,
    /// Replay normalization knobs
    pub replay_config: ReplayConfig,
    /// Plan-wide defaults
    pub defaults: PlanDefaults,
}

impl ChaosPlan {
    /// The compiled target referenced by scenario `index`.
    pub fn target_for_scenario(&self, index: usize) -> &CompiledTarget {
        &self.targets[self.scenario_targets[index]]
    }
}

/// A plan together with its compiled strategy catalog. The two always
/// swap as one unit so a flow can never see a catalog built for a
/// different revision.
pub struct PlanSnapshot {
    /// The validated plan
    pub plan: Arc<ChaosPlan>,
    /// The executable scenarios, parallel to `plan.scenarios`
    pub catalog: Arc<crate::strategy::StrategyCatalog>,
}

/// Process-wide plan snapshot pointer. `install` swaps the inner `Arc`;
/// readers clone it once at the start of a flow and keep that snapshot for
/// the flow's lifetime regardless of later installs.
pub struct PlanHandle {
    current: parking_lot::RwLock<Arc<PlanSnapshot>>,
}

impl PlanHandle {
    /// Create a handle holding the initial plan and catalog.
    pub fn new(plan: ChaosPlan, catalog: crate::strategy::StrategyCatalog) -> Self {
        Self {
            current: parking_lot::RwLock::new(Arc::new(PlanSnapshot {
                plan: Arc::new(plan),
                catalog: Arc::new(catalog),
            })),
        }
    }

    /// Take a stable snapshot of the current plan and catalog.
    pub fn snapshot(&self) -> Arc<PlanSnapshot> {
        self.current.read().clone()
    }

    /// Revision of the currently installed plan.
    pub fn revision(&self) -> u64 {
        self.current.read().plan.revision
    }

    /// Atomically install a new plan. Rejects stale revisions so a reload
    /// can never roll the plan backwards.
    pub fn install(
        &self,
        plan: ChaosPlan,
        catalog: crate::strategy::StrategyCatalog,
    ) -> Result<u64, String> {
        let mut current = self.current.write();
        if plan.revision <= current.plan.revision {
            return Err(format!(
                "revision: {} does not increase installed revision {}",
                plan.revision, current.plan.revision
            ));
        }
        let revision = plan.revision;
        *current = Arc::new(PlanSnapshot { plan: Arc::new(plan), catalog: Arc::new(catalog) });
        Ok(revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::validate_plan;
    use crate::env::RuntimeEnv;

    const MINIMAL: &str = r#"
version: "1"
revision: 1
metadata:
  name: smoke
  experiment_id: exp-1
targets:
  - name: api
    type: http_endpoint
    pattern: "http://x/.*"
scenarios:
  - name: slow-api
    type: latency
    target_ref: api
    probability: 1.0
    params:
      delay: 0.5
"#;

    #[test]
    fn snapshot_is_stable_across_install() {
        use crate::strategy::StrategyCatalog;

        let plan = validate_plan(MINIMAL.as_bytes(), &RuntimeEnv::default()).unwrap();
        let handle = PlanHandle::new(plan, StrategyCatalog::empty());
        let snapshot = handle.snapshot();

        let mut next = MINIMAL.replace("revision: 1", "revision: 2");
        next = next.replace("name: smoke", "name: smoke-2");
        let plan2 = validate_plan(next.as_bytes(), &RuntimeEnv::default()).unwrap();
        handle.install(plan2, StrategyCatalog::empty()).unwrap();

        assert_eq!(snapshot.plan.revision, 1);
        assert_eq!(snapshot.plan.metadata.name, "smoke");
        assert_eq!(handle.revision(), 2);
    }

    #[test]
    fn stale_revision_is_rejected() {
        use crate::strategy::StrategyCatalog;

        let plan = validate_plan(MINIMAL.as_bytes(), &RuntimeEnv::default()).unwrap();
        let handle = PlanHandle::new(plan, StrategyCatalog::empty());
        let same = validate_plan(MINIMAL.as_bytes(), &RuntimeEnv::default()).unwrap();
        assert!(handle.install(same, StrategyCatalog::empty()).is_err());
        assert_eq!(handle.revision(), 1);
    }
}
