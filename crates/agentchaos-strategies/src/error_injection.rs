//! Error injection: short-circuits the flow with a synthesized error
//! response before any upstream traffic happens.

use crate::params;
use agentchaos_core::{
    ChaosStrategy, Flow, Headers, StrategyAction, StrategyContext, StrategyError,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

/// Error injection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorInjectionConfig {
    /// Status code of the synthesized response
    #[serde(default = "default_status")]
    pub status: u16,
    /// Response body
    #[serde(default)]
    pub body: String,
    /// Extra response headers
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_status() -> u16 {
    503
}

/// Synthesizes an error response and stops the request pipeline.
pub struct ErrorInjectionStrategy {
    config: ErrorInjectionConfig,
}

impl ErrorInjectionStrategy {
    /// Strategy tag.
    pub const NAME: &'static str = "error_injection";

    /// Build from scenario params.
    pub fn from_params(raw: &serde_json::Value) -> Result<Self, StrategyError> {
        Ok(Self { config: params::parse(Self::NAME, raw)? })
    }
}

#[async_trait]
impl ChaosStrategy for ErrorInjectionStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn intercept_request(
        &self,
        flow: &mut Flow,
        _ctx: &StrategyContext,
    ) -> Result<StrategyAction, StrategyError> {
        let mut headers: Headers = self
            .config
            .headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();
        headers
            .entry("content-type".to_string())
            .or_insert_with(|| "text/plain".to_string());
        headers.insert("content-length".to_string(), self.config.body.len().to_string());

        debug!(status = self.config.status, "injecting error response");
        flow.set_response(
            self.config.status,
            reason_for(self.config.status),
            headers,
            self.config.body.clone().into_bytes(),
        );
        flow.record_chaos(Self::NAME);
        Ok(StrategyAction::ShortCircuit)
    }
}

fn reason_for(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        408 => "Request Timeout",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Error",
    }
}
