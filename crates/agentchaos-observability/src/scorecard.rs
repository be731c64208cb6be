//! Scorecard aggregation: resilience counters for a chaos run, including
//! the race-condition heuristic over agent request ordering.

use crate::event::{Event, EventPhase};
use agentchaos_core::TrafficType;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

/// Verbs that must not fire before their read-side counterpart answered.
const COMMIT_PREFIXES: &[&str] = &["book_", "commit_", "finalize_"];
/// Read-side verbs the heuristic tracks.
const READ_PREFIXES: &[&str] = &["search_", "query_", "prepare_"];

#[derive(Debug, Default)]
struct RaceTracker {
    /// Per agent_role: outstanding read-side requests (seq, endpoint).
    pending: HashMap<String, Vec<(u64, String)>>,
}

impl RaceTracker {
    fn last_segment(endpoint: &str) -> &str {
        endpoint.rsplit('/').next().unwrap_or(endpoint)
    }

    fn on_request(&mut self, role: &str, endpoint: &str, seq: u64) -> bool {
        let segment = Self::last_segment(endpoint);
        if READ_PREFIXES.iter().any(|p| segment.starts_with(p)) {
            self.pending.entry(role.to_string()).or_default().push((seq, endpoint.to_string()));
            return false;
        }
        if COMMIT_PREFIXES.iter().any(|p| segment.starts_with(p)) {
            return self
                .pending
                .get(role)
                .is_some_and(|pending| pending.iter().any(|(s, _)| *s < seq));
        }
        false
    }

    fn on_response(&mut self, role: &str, endpoint: &str) {
        if let Some(pending) = self.pending.get_mut(role) {
            if let Some(index) = pending.iter().position(|(_, e)| e == endpoint) {
                pending.remove(index);
            }
        }
    }
}

#[derive(Debug, Default)]
struct ScorecardState {
    total_requests: u64,
    chaos_injections: u64,
    swarm_communication_errors: HashMap<String, u64>,
    agent_to_agent_disruptions: u64,
    consensus_delays: u64,
    message_mutations: u64,
    agent_isolations: u64,
    hallucinations: u64,
    context_overflows: u64,
    protocol_attacks: u64,
    pii_leakage_incidents: u64,
    race_condition_candidates: u64,
    chaos_error_codes_total: HashMap<String, u64>,
    events_dropped: u64,
    races: RaceTracker,
}

/// Aggregated resilience counters. Single writer (the event pump);
/// concurrent readers take the lock briefly for a summary snapshot.
pub struct Scorecard {
    state: Mutex<ScorecardState>,
    started_at: DateTime<Utc>,
}

/// Serializable scorecard snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ScorecardSummary {
    /// Run start time
    pub started_at: DateTime<Utc>,
    /// Total request-phase events
    pub total_requests: u64,
    /// Total strategy applications
    pub chaos_injections: u64,
    /// Swarm communication errors by attack type
    pub swarm_communication_errors: HashMap<String, u64>,
    /// Disruptions on agent-to-agent flows
    pub agent_to_agent_disruptions: u64,
    /// Consensus delays applied
    pub consensus_delays: u64,
    /// Inter-agent messages mutated
    pub message_mutations: u64,
    /// Agents isolated
    pub agent_isolations: u64,
    /// Hallucination injections applied
    pub hallucinations: u64,
    /// Context overflows applied
    pub context_overflows: u64,
    /// Hallucinations per request
    pub hallucination_rate: f64,
    /// Protocol-level attacks (schema fuzzing)
    pub protocol_attacks: u64,
    /// PII redaction hits observed on outbound records
    pub pii_leakage_incidents: u64,
    /// Commit-before-read orderings flagged
    pub race_condition_candidates: u64,
    /// Strategy error codes by code
    pub chaos_error_codes_total: HashMap<String, u64>,
    /// Events dropped by the bounded channel
    pub events_dropped: u64,
}

impl Scorecard {
    /// Fresh scorecard.
    pub fn new() -> Self {
        Self { state: Mutex::new(ScorecardState::default()), started_at: Utc::now() }
    }

    /// Fold one event into the counters.
    pub fn observe(&self, event: &Event) {
        let mut state = self.state.lock();
        let role = event.agent_role.clone().unwrap_or_default();
        let endpoint = event.endpoint();

        match event.phase {
            EventPhase::Request => {
                state.total_requests += 1;
                if !role.is_empty() && state.races.on_request(&role, &endpoint, event.seq) {
                    state.race_condition_candidates += 1;
                }
            }
            EventPhase::Response => {
                if !role.is_empty() {
                    state.races.on_response(&role, &endpoint);
                }
            }
            EventPhase::Chaos => {
                state.chaos_injections += event.applied_strategies.len().max(1) as u64;
            }
            EventPhase::Error => {
                if let Some(code) = &event.error_code {
                    *state.chaos_error_codes_total.entry(code.clone()).or_default() += 1;
                }
            }
        }

        for detail in &event.details {
            match detail.as_str() {
                "swarm:message_mutation" => {
                    state.message_mutations += 1;
                    *state
                        .swarm_communication_errors
                        .entry("message_mutation".to_string())
                        .or_default() += 1;
                }
                "swarm:consensus_delay" => {
                    state.consensus_delays += 1;
                    *state
                        .swarm_communication_errors
                        .entry("consensus_delay".to_string())
                        .or_default() += 1;
                }
                "swarm:agent_isolation" => {
                    state.agent_isolations += 1;
                    *state
                        .swarm_communication_errors
                        .entry("agent_isolation".to_string())
                        .or_default() += 1;
                }
                "swarm:group_failure" => {
                    *state
                        .swarm_communication_errors
                        .entry("group_failure".to_string())
                        .or_default() += 1;
                }
                "cognitive:hallucination" => state.hallucinations += 1,
                "cognitive:context_overflow" => state.context_overflows += 1,
                "protocol:mcp_fuzz" => state.protocol_attacks += 1,
                detail if detail.starts_with("pii:") => state.pii_leakage_incidents += 1,
                _ => {}
            }
            if detail.starts_with("swarm:") && event.traffic_type == TrafficType::AgentToAgent {
                state.agent_to_agent_disruptions += 1;
            }
        }
    }

    /// Record the bounded-channel drop total.
    pub fn set_events_dropped(&self, dropped: u64) {
        self.state.lock().events_dropped = dropped;
    }

    /// Snapshot the counters.
    pub fn summary(&self) -> ScorecardSummary {
        let state = self.state.lock();
        let hallucination_rate = if state.total_requests > 0 {
            state.hallucinations as f64 / state.total_requests as f64
        } else {
            0.0
        };
        ScorecardSummary {
            started_at: self.started_at,
            total_requests: state.total_requests,
            chaos_injections: state.chaos_injections,
            swarm_communication_errors: state.swarm_communication_errors.clone(),
            agent_to_agent_disruptions: state.agent_to_agent_disruptions,
            consensus_delays: state.consensus_delays,
            message_mutations: state.message_mutations,
            agent_isolations: state.agent_isolations,
            hallucinations: state.hallucinations,
            context_overflows: state.context_overflows,
            hallucination_rate,
            protocol_attacks: state.protocol_attacks,
            pii_leakage_incidents: state.pii_leakage_incidents,
            race_condition_candidates: state.race_condition_candidates,
            chaos_error_codes_total: state.chaos_error_codes_total.clone(),
            events_dropped: state.events_dropped,
        }
    }
}

impl Default for Scorecard {
    fn default() -> Self {
        Self::new()
    }
}
