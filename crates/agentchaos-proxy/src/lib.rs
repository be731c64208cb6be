//! AgentChaos proxy
//!
//! The flow pipeline engine behind the interception contract, the
//! reqwest-backed upstream forwarder, the ingress adapter and the
//! token-guarded control plane.

pub mod control;
pub mod engine;
pub mod ingress;
pub mod state;
pub mod upstream;

pub use engine::{ChaosEngine, FlowHandle};
pub use state::{ModeSwitchError, ProxyState};
pub use upstream::{HttpUpstream, Upstream, UpstreamError};
