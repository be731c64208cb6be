//! Group failure: takes a whole class of agents down by role.

use crate::params;
use agentchaos_core::{
    ChaosStrategy, Flow, Headers, StrategyAction, StrategyContext, StrategyError,
};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

/// Group failure configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupFailureConfig {
    /// Regex matched against the flow's agent role
    pub target_role: String,
    /// Status of the synthesized failure
    #[serde(default = "default_status")]
    pub status: u16,
    /// Failure body
    #[serde(default = "default_body")]
    pub body: String,
}

fn default_status() -> u16 {
    503
}

fn default_body() -> String {
    "agent group unavailable".to_string()
}

/// Short-circuits every flow whose agent role matches the target role.
pub struct GroupFailureStrategy {
    config: GroupFailureConfig,
    role: Regex,
}

impl GroupFailureStrategy {
    /// Strategy tag.
    pub const NAME: &'static str = "group_failure";

    /// Build from scenario params.
    pub fn from_params(raw: &serde_json::Value) -> Result<Self, StrategyError> {
        let config: GroupFailureConfig = params::parse(Self::NAME, raw)?;
        let role = Regex::new(&config.target_role).map_err(|err| StrategyError::InvalidParams {
            strategy: Self::NAME.to_string(),
            message: format!("invalid target_role regex: {err}"),
        })?;
        Ok(Self { config, role })
    }
}

#[async_trait]
impl ChaosStrategy for GroupFailureStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn intercept_request(
        &self,
        flow: &mut Flow,
        _ctx: &StrategyContext,
    ) -> Result<StrategyAction, StrategyError> {
        let role = flow.metadata.agent_role.clone().unwrap_or_default();
        if role.is_empty() || !self.role.is_match(&role) {
            return Ok(StrategyAction::Continue);
        }

        let mut headers = Headers::new();
        headers.insert("content-type".to_string(), "text/plain".to_string());
        headers.insert("content-length".to_string(), self.config.body.len().to_string());
        flow.set_response(
            self.config.status,
            "Service Unavailable",
            headers,
            self.config.body.clone().into_bytes(),
        );
        flow.record_chaos(Self::NAME);
        flow.record_chaos_detail("swarm:group_failure");
        debug!(role, status = self.config.status, "failed agent group");
        Ok(StrategyAction::ShortCircuit)
    }
}
