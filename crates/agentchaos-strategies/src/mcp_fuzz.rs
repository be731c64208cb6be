//! Schema-aware fuzzing of tool-call requests. Field names drive the type
//! guess (dates, numerics, strings); the configured fuzz type decides what
//! replaces each value. The JSON structure always stays valid.

use crate::json_mutate::visit_fields;
use crate::params;
use agentchaos_core::{
    ChaosStrategy, Flow, StrategyAction, StrategyContext, StrategyError, TrafficType,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// What kind of malformed data to inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuzzType {
    /// Replace values with type-mismatched ones
    SchemaViolation,
    /// Replace values with JSON null
    NullInjection,
    /// Replace values with type boundaries (MIN/MAX, extreme dates)
    Boundary,
    /// Replace values with SQL injection payloads
    SqlInjection,
    /// Replace values with XSS payloads
    Xss,
}

/// MCP fuzzing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct McpFuzzConfig {
    /// The fuzz type to apply
    pub fuzz_type: FuzzType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldClass {
    Date,
    Numeric,
    Text,
}

fn classify_field(name: &str) -> Option<FieldClass> {
    if name == "date" || name.ends_with("_date") || name.ends_with("_at") {
        return Some(FieldClass::Date);
    }
    if name == "count" || name == "quantity" || name == "price" || name.ends_with("_id") {
        return Some(FieldClass::Numeric);
    }
    if name == "query" || name == "text" || name.ends_with("_name") {
        return Some(FieldClass::Text);
    }
    None
}

/// Fuzzes recognized fields in tool-call request bodies.
pub struct McpFuzzStrategy {
    config: McpFuzzConfig,
}

impl McpFuzzStrategy {
    /// Strategy tag.
    pub const NAME: &'static str = "mcp_fuzz";

    /// Build from scenario params.
    pub fn from_params(raw: &serde_json::Value) -> Result<Self, StrategyError> {
        Ok(Self { config: params::parse(Self::NAME, raw)? })
    }

    fn replacement(&self, class: FieldClass, ctx: &StrategyContext) -> Value {
        match self.config.fuzz_type {
            FuzzType::SchemaViolation => match class {
                FieldClass::Date => Value::String("not-a-date".to_string()),
                FieldClass::Numeric => Value::String("not-a-number".to_string()),
                FieldClass::Text => Value::from(42),
            },
            FuzzType::NullInjection => Value::Null,
            FuzzType::Boundary => match class {
                FieldClass::Date => {
                    if ctx.random_bool(0.5) {
                        Value::String("9999-12-31".to_string())
                    } else {
                        Value::String("0001-01-01".to_string())
                    }
                }
                FieldClass::Numeric => {
                    if ctx.random_bool(0.5) {
                        Value::from(i64::MAX)
                    } else {
                        Value::from(i64::MIN)
                    }
                }
                FieldClass::Text => Value::String("A".repeat(65_536)),
            },
            FuzzType::SqlInjection => Value::String("' OR '1'='1' --".to_string()),
            FuzzType::Xss => Value::String("<script>alert(1)</script>".to_string()),
        }
    }
}

#[async_trait]
impl ChaosStrategy for McpFuzzStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn intercept_request(
        &self,
        flow: &mut Flow,
        ctx: &StrategyContext,
    ) -> Result<StrategyAction, StrategyError> {
        if flow.traffic_type() != TrafficType::ToolCall {
            return Ok(StrategyAction::Continue);
        }
        let Some(mut body) = flow.request.body_json() else {
            return Ok(StrategyAction::Continue);
        };

        let mut fuzzed = 0usize;
        visit_fields(&mut body, &mut |name, value| {
            if let Some(class) = classify_field(name) {
                *value = self.replacement(class, ctx);
                fuzzed += 1;
            }
        });

        if fuzzed > 0 {
            debug!(fields = fuzzed, fuzz_type = ?self.config.fuzz_type, "fuzzed tool call");
            flow.request.set_body_json(&body);
            flow.record_chaos(Self::NAME);
            flow.record_chaos_detail("protocol:mcp_fuzz");
        }
        Ok(StrategyAction::Continue)
    }
}
