//! RAG phantom documents: poisons retrieval results so the agent grounds
//! its answer on planted misinformation.

use crate::params;
use agentchaos_core::{
    ChaosStrategy, Flow, JsonPath, StrategyContext, StrategyError,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// How misinformation lands in the matched leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoisonMode {
    /// Replace the leaf wholesale
    Overwrite,
    /// Append as a new sentence after the original text
    Injection,
    /// Concatenate directly onto the original text
    Suffix,
}

/// RAG phantom-document configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RagPhantomConfig {
    /// JSONPath selecting the document leaves to poison
    pub target_json_path: String,
    /// Misinformation strings, consumed round-robin
    pub misinformation: Vec<String>,
    /// Poisoning mode
    #[serde(default = "default_mode")]
    pub mode: PoisonMode,
}

fn default_mode() -> PoisonMode {
    PoisonMode::Overwrite
}

/// Rewrites retrieval payloads along a JSONPath. When the configured path
/// is outside the supported dialect the constructor fails in strict replay
/// mode; otherwise the strategy records an error code and leaves flows
/// untouched.
pub struct RagPhantomStrategy {
    config: RagPhantomConfig,
    path: Result<JsonPath, String>,
}

impl RagPhantomStrategy {
    /// Strategy tag.
    pub const NAME: &'static str = "rag_phantom";

    /// Build from scenario params. `replay_strict` makes an unsupported
    /// path a construction failure instead of a per-flow no-op.
    pub fn from_params(raw: &serde_json::Value, replay_strict: bool) -> Result<Self, StrategyError> {
        let config: RagPhantomConfig = params::parse(Self::NAME, raw)?;
        if config.misinformation.is_empty() {
            return Err(StrategyError::InvalidParams {
                strategy: Self::NAME.to_string(),
                message: "`misinformation` must not be empty".to_string(),
            });
        }
        let path = match JsonPath::parse(&config.target_json_path) {
            Ok(path) => Ok(path),
            Err(err) => {
                if replay_strict {
                    return Err(StrategyError::InvalidParams {
                        strategy: Self::NAME.to_string(),
                        message: err.to_string(),
                    });
                }
                Err(err.to_string())
            }
        };
        Ok(Self { config, path })
    }

    fn poison(&self, leaf: &mut Value, text: &str) {
        match self.config.mode {
            PoisonMode::Overwrite => *leaf = Value::String(text.to_string()),
            PoisonMode::Injection => {
                let existing = leaf.as_str().unwrap_or_default();
                *leaf = Value::String(format!("{existing} {text}"));
            }
            PoisonMode::Suffix => {
                let existing = leaf.as_str().unwrap_or_default();
                *leaf = Value::String(format!("{existing}{text}"));
            }
        }
    }
}

#[async_trait]
impl ChaosStrategy for RagPhantomStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn intercept_response(
        &self,
        flow: &mut Flow,
        _ctx: &StrategyContext,
    ) -> Result<(), StrategyError> {
        let path = match &self.path {
            Ok(path) => path,
            Err(_) => {
                return Err(StrategyError::Failed {
                    strategy: Self::NAME.to_string(),
                    code: "rag_path_unsupported".to_string(),
                });
            }
        };

        let Some(response) = flow.response.as_mut() else {
            return Ok(());
        };
        let Some(mut body) = response.body_json() else {
            return Ok(());
        };

        let misinformation = &self.config.misinformation;
        let mut index = 0usize;
        path.for_each_mut(&mut body, &mut |leaf| {
            let text = &misinformation[index % misinformation.len()];
            self.poison(leaf, text);
            index += 1;
        });

        if index > 0 {
            debug!(leaves = index, path = path.expression(), "poisoned retrieval payload");
            response.set_body_json(&body);
            flow.record_chaos(Self::NAME);
            flow.record_chaos_detail("rag:phantom_document");
        }
        Ok(())
    }
}
