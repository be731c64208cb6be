//! Scenario parameter parsing shared by all strategy constructors.

use agentchaos_core::StrategyError;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Deserialize a strategy config from scenario params. A missing params
/// block is treated as an empty mapping so defaults apply.
pub(crate) fn parse<T: DeserializeOwned>(strategy: &str, raw: &Value) -> Result<T, StrategyError> {
    let value = if raw.is_null() { Value::Object(serde_json::Map::new()) } else { raw.clone() };
    serde_json::from_value(value).map_err(|err| StrategyError::InvalidParams {
        strategy: strategy.to_string(),
        message: err.to_string(),
    })
}
