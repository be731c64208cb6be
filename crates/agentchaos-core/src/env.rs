//! Process environment knobs shared across the pipeline.

use std::path::PathBuf;

/// Runtime options read from `CHAOS_*` environment variables once at
/// startup and threaded through explicitly.
#[derive(Debug, Clone)]
pub struct RuntimeEnv {
    /// `CHAOS_CLASSIFIER_STRICT`: plans must ship classifier rule packs
    pub classifier_strict: bool,
    /// `CHAOS_REPLAY_STRICT`: unsupported JSONPath expressions are fatal
    pub replay_strict: bool,
    /// `CHAOS_JWT_STRICT`: control plane additionally requires a valid JWT
    pub jwt_strict: bool,
    /// `CHAOS_JWT_SECRET`: HS256 secret for strict JWT validation
    pub jwt_secret: Option<String>,
    /// `CHAOS_TAPE_KEY`: tape at-rest encryption key
    pub tape_key: Option<String>,
    /// `PII_REDACTION_ENABLED`: defaults to true
    pub pii_redaction: bool,
    /// `CHAOS_AUDIT_LOG`: audit sink path
    pub audit_log: Option<PathBuf>,
}

impl Default for RuntimeEnv {
    fn default() -> Self {
        Self {
            classifier_strict: false,
            replay_strict: false,
            jwt_strict: false,
            jwt_secret: None,
            tape_key: None,
            pii_redaction: true,
            audit_log: None,
        }
    }
}

impl RuntimeEnv {
    /// Read options from the process environment.
    pub fn from_env() -> Self {
        Self {
            classifier_strict: flag("CHAOS_CLASSIFIER_STRICT", false),
            replay_strict: flag("CHAOS_REPLAY_STRICT", false),
            jwt_strict: flag("CHAOS_JWT_STRICT", false),
            jwt_secret: var("CHAOS_JWT_SECRET"),
            tape_key: var("CHAOS_TAPE_KEY"),
            pii_redaction: flag("PII_REDACTION_ENABLED", true),
            audit_log: var("CHAOS_AUDIT_LOG").map(PathBuf::from),
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_redaction_on() {
        let env = RuntimeEnv::default();
        assert!(!env.classifier_strict);
        assert!(!env.replay_strict);
        assert!(env.pii_redaction);
    }
}
