//! AgentChaos core
//!
//! The chaos-injection data path for AI-agent HTTP traffic: the plan model
//! and loader, the traffic classifier, the strategy matcher and contract,
//! deterministic request fingerprinting, and the record/replay tape store.

pub mod classifier;
pub mod env;
pub mod fingerprint;
pub mod flow;
pub mod json_path;
pub mod loader;
pub mod matcher;
pub mod plan;
pub mod redaction;
pub mod strategy;
pub mod tape;
pub mod tape_crypto;

pub use classifier::{classify, ClassifierError, CompiledClassifierRules};
pub use env::RuntimeEnv;
pub use fingerprint::{RequestFingerprint, VOLATILE_HEADERS};
pub use flow::{
    Flow, FlowMetadata, FlowRequest, FlowResponse, Headers, ProxyMode, TrafficSubtype, TrafficType,
};
pub use json_path::{JsonPath, JsonPathError};
pub use loader::{load_plan, validate_plan, PlanLoadError};
pub use matcher::{flow_seed, match_strategies};
pub use plan::{
    ChaosPlan, ClassifierRulePack, ClassifierRuleSet, CompiledTarget, PlanDefaults, PlanHandle,
    PlanMetadata, PlanSnapshot, ReplayConfig, Scenario, Target, TargetKind,
};
pub use redaction::{PiiRedactor, RedactionStats};
pub use strategy::{
    ChaosStrategy, CompiledScenario, StrategyAction, StrategyCatalog, StrategyContext,
    StrategyError,
};
pub use tape::{
    miss_response, ChaosContext, ResponseSnapshot, Tape, TapeEntry, TapeError, TapeHit,
    TapeMetadata, TapePlayer, TapeRecorder, TAPE_VERSION,
};
pub use tape_crypto::{TapeKey, TAPE_MAGIC};
pub use tokio_util::sync::CancellationToken;
