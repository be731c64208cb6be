//! AgentChaos observability
//!
//! The per-flow event record, the bounded event pipeline with its drop
//! policy, the JSONL log and audit sinks, the dashboard broadcast fan-out
//! and the scorecard aggregator.

pub mod dashboard;
pub mod event;
pub mod pipeline;
pub mod scorecard;
pub mod sink;

pub use dashboard::{DashboardHub, SUBSCRIBER_BUFFER};
pub use event::{Event, EventPhase};
pub use pipeline::{spawn_pump, EventBus, EVENT_CHANNEL_CAPACITY};
pub use scorecard::{Scorecard, ScorecardSummary};
pub use sink::{AuditLog, AuditRecord, LogSink};
