//! Plan loading and validation.
//!
//! Validation is total: every offending path in the document is collected
//! and reported in one error instead of stopping at the first.

use crate::classifier::CompiledClassifierRules;
use crate::env::RuntimeEnv;
use crate::plan::{ChaosPlan, CompiledTarget, PlanDocument};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Plan load failure. Fatal at startup; on reload the previous plan stays
/// installed.
#[derive(Debug, Error)]
pub enum PlanLoadError {
    /// The plan file could not be read.
    #[error("failed to read plan {path}: {source}")]
    Io {
        /// Offending path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// The document is not valid YAML for the plan schema.
    #[error("plan is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// The document parsed but failed validation.
    #[error("plan validation failed:\n  {}", messages.join("\n  "))]
    Validation {
        /// One message per offending path
        messages: Vec<String>,
    },
}

/// Load and validate a plan from a YAML file.
pub fn load_plan(path: &Path, env: &RuntimeEnv) -> Result<ChaosPlan, PlanLoadError> {
    let bytes = std::fs::read(path)
        .map_err(|source| PlanLoadError::Io { path: path.to_path_buf(), source })?;
    validate_plan(&bytes, env)
}

/// Parse, validate and compile a plan document.
pub fn validate_plan(bytes: &[u8], env: &RuntimeEnv) -> Result<ChaosPlan, PlanLoadError> {
    let doc: PlanDocument = serde_yaml::from_slice(bytes)?;
    compile_plan(doc, env)
}

fn compile_plan(doc: PlanDocument, env: &RuntimeEnv) -> Result<ChaosPlan, PlanLoadError> {
    let mut errors: Vec<String> = Vec::new();

    if doc.version.trim().is_empty() {
        errors.push("version: must be nonempty".to_string());
    }
    if doc.metadata.experiment_id.trim().is_empty() {
        errors.push("metadata.experiment_id: must be nonempty".to_string());
    }

    // Targets: nonempty unique names, compilable patterns.
    let mut targets = Vec::with_capacity(doc.targets.len());
    let mut target_index: HashMap<String, usize> = HashMap::new();
    for (i, target) in doc.targets.iter().enumerate() {
        if target.name.trim().is_empty() {
            errors.push(format!("targets[{i}].name: must be nonempty"));
        } else if target_index.insert(target.name.clone(), i).is_some() {
            errors.push(format!("targets[{i}].name: duplicate name `{}`", target.name));
        }
        match Regex::new(&target.pattern) {
            Ok(regex) => targets.push(CompiledTarget { target: target.clone(), regex }),
            Err(err) => {
                errors.push(format!("targets[{i}].pattern: invalid regex: {err}"));
                // placeholder keeps indices aligned for scenario resolution
                targets.push(CompiledTarget {
                    target: target.clone(),
                    regex: Regex::new("$^").unwrap_or_else(|_| unreachable!()),
                });
            }
        }
    }

    // Scenarios: unique names, resolvable target refs, sane probabilities.
    let mut scenario_targets = Vec::with_capacity(doc.scenarios.len());
    let mut seen_scenarios: HashMap<&str, usize> = HashMap::new();
    for (i, scenario) in doc.scenarios.iter().enumerate() {
        if scenario.name.trim().is_empty() {
            errors.push(format!("scenarios[{i}].name: must be nonempty"));
        } else if seen_scenarios.insert(scenario.name.as_str(), i).is_some() {
            errors.push(format!("scenarios[{i}].name: duplicate name `{}`", scenario.name));
        }
        match target_index.get(&scenario.target_ref) {
            Some(&index) => scenario_targets.push(index),
            None => {
                errors.push(format!(
                    "scenarios[{i}].target_ref: no target named `{}`",
                    scenario.target_ref
                ));
                scenario_targets.push(usize::MAX);
            }
        }
        if !(0.0..=1.0).contains(&scenario.probability) {
            errors.push(format!(
                "scenarios[{i}].probability: {} outside [0, 1]",
                scenario.probability
            ));
        }
    }

    // Classifier rules; strict mode requires at least one rule source.
    let classifier =
        match CompiledClassifierRules::compile(doc.classifier_rules.as_ref(), &doc.classifier_rule_packs)
        {
            Ok(rules) => rules,
            Err(mut rule_errors) => {
                errors.append(&mut rule_errors);
                CompiledClassifierRules::default()
            }
        };
    if env.classifier_strict && classifier.is_empty() {
        errors.push(
            "classifier_rule_packs: at least one rule pack is required in strict classifier mode"
                .to_string(),
        );
    }

    // Replay config paths must parse under the supported JSONPath subset.
    for (i, expr) in doc.replay_config.ignore_paths.iter().enumerate() {
        if let Err(err) = crate::json_path::JsonPath::parse(expr) {
            errors.push(format!("replay_config.ignore_paths[{i}]: {err}"));
        }
    }

    if !errors.is_empty() {
        return Err(PlanLoadError::Validation { messages: errors });
    }

    Ok(ChaosPlan {
        version: doc.version,
        revision: doc.revision,
        metadata: doc.metadata,
        targets,
        scenarios: doc.scenarios,
        scenario_targets,
        classifier,
        replay_config: doc.replay_config,
        defaults: doc.defaults,
    })
}
