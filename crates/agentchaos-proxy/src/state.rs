//! Shared runtime state: the installed plan snapshot, the proxy mode, the
//! tape recorder/player and the observability fan-out.

use agentchaos_core::{
    loader, ChaosPlan, PiiRedactor, PlanHandle, PlanLoadError, PlanSnapshot, ProxyMode,
    RuntimeEnv, TapeError, TapeKey, TapePlayer, TapeRecorder,
};
use agentchaos_observability::{AuditLog, DashboardHub, EventBus, Scorecard};
use agentchaos_strategies::{RegistryOptions, StrategyRegistry};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::info;

/// Mode-switch failure, reported as a 400 by the control plane.
#[derive(Debug, Error)]
pub enum ModeSwitchError {
    /// The requested mode needs a tape path.
    #[error("mode `{0}` requires a tape path")]
    TapePathRequired(ProxyMode),
    /// Tape I/O failed while entering the mode.
    #[error(transparent)]
    Tape(#[from] TapeError),
}

/// Process-wide proxy state. One instance lives for the whole run.
pub struct ProxyState {
    /// Environment knobs
    pub env: RuntimeEnv,
    /// Installed plan + catalog snapshot pointer
    pub plan: PlanHandle,
    /// Event channel
    pub bus: Arc<EventBus>,
    /// Scorecard aggregator
    pub scorecard: Arc<Scorecard>,
    /// Dashboard fan-out
    pub dashboard: Arc<DashboardHub>,
    /// Shared PII redactor
    pub redactor: PiiRedactor,
    /// Audit sink
    pub audit: Arc<AuditLog>,
    /// Control-plane token; `None` disables the control plane guard
    pub control_token: Option<String>,
    /// Control-plane auth failures
    pub auth_failures: AtomicU64,

    registry: StrategyRegistry,
    mode: RwLock<ProxyMode>,
    recorder: RwLock<Option<Arc<TapeRecorder>>>,
    player: RwLock<Option<Arc<TapePlayer>>>,
    sequence: AtomicU64,
    started: Instant,
}

impl ProxyState {
    /// Build the state around an initial validated plan.
    pub fn new(
        plan: ChaosPlan,
        env: RuntimeEnv,
        audit: AuditLog,
        control_token: Option<String>,
    ) -> Result<Arc<Self>, PlanLoadError> {
        let registry = StrategyRegistry::builtin();
        let options = RegistryOptions { replay_strict: env.replay_strict };
        let catalog = registry
            .compile(&plan, &options)
            .map_err(|messages| PlanLoadError::Validation { messages })?;
        let redactor = PiiRedactor::new(env.pii_redaction);

        Ok(Arc::new(Self {
            env,
            plan: PlanHandle::new(plan, catalog),
            bus: Arc::new(EventBus::new()),
            scorecard: Arc::new(Scorecard::new()),
            dashboard: Arc::new(DashboardHub::new()),
            redactor,
            audit: Arc::new(audit),
            control_token,
            auth_failures: AtomicU64::new(0),
            registry,
            mode: RwLock::new(ProxyMode::Live),
            recorder: RwLock::new(None),
            player: RwLock::new(None),
            sequence: AtomicU64::new(0),
            started: Instant::now(),
        }))
    }

    /// Validate, compile and atomically install a new plan from YAML
    /// bytes. On failure the current plan stays installed.
    pub fn install_plan(&self, bytes: &[u8]) -> Result<u64, PlanLoadError> {
        let plan = loader::validate_plan(bytes, &self.env)?;
        let options = RegistryOptions { replay_strict: self.env.replay_strict };
        let catalog = self
            .registry
            .compile(&plan, &options)
            .map_err(|messages| PlanLoadError::Validation { messages })?;
        let revision = self
            .plan
            .install(plan, catalog)
            .map_err(|message| PlanLoadError::Validation { messages: vec![message] })?;
        self.audit.record("plan_install", &format!("revision {revision}"), true);
        info!(revision, "installed new chaos plan");
        Ok(revision)
    }

    /// Stable plan snapshot for one flow.
    pub fn snapshot(&self) -> Arc<PlanSnapshot> {
        self.plan.snapshot()
    }

    /// Current proxy mode.
    pub fn mode(&self) -> ProxyMode {
        *self.mode.read()
    }

    /// Switch modes. RECORD opens a recorder on the tape path; PLAYBACK
    /// flushes any active recorder first, then loads and indexes the tape.
    pub fn switch_mode(
        &self,
        mode: ProxyMode,
        tape_path: Option<&Path>,
    ) -> Result<(), ModeSwitchError> {
        match mode {
            ProxyMode::Live => {
                self.flush_recorder()?;
                *self.recorder.write() = None;
                *self.player.write() = None;
            }
            ProxyMode::Record => {
                let path = tape_path.ok_or(ModeSwitchError::TapePathRequired(mode))?;
                *self.recorder.write() =
                    Some(Arc::new(TapeRecorder::new(path.to_path_buf(), self.tape_key())));
                *self.player.write() = None;
            }
            ProxyMode::Playback => {
                let path = tape_path.ok_or(ModeSwitchError::TapePathRequired(mode))?;
                self.flush_recorder()?;
                *self.recorder.write() = None;
                let key = self.tape_key();
                *self.player.write() = Some(Arc::new(TapePlayer::load(path, key.as_ref())?));
            }
        }
        *self.mode.write() = mode;
        self.audit.record(
            "mode_switch",
            &format!("{mode} tape={}", tape_path.map(PathBuf::from).unwrap_or_default().display()),
            true,
        );
        info!(%mode, "switched proxy mode");
        Ok(())
    }

    /// The tape encryption key, when configured.
    pub fn tape_key(&self) -> Option<TapeKey> {
        self.env.tape_key.as_deref().map(TapeKey::from_env_value)
    }

    /// Active recorder, in RECORD mode.
    pub fn recorder(&self) -> Option<Arc<TapeRecorder>> {
        self.recorder.read().clone()
    }

    /// Active player, in PLAYBACK mode.
    pub fn player(&self) -> Option<Arc<TapePlayer>> {
        self.player.read().clone()
    }

    /// Flush the active recorder, if any. Fatal in RECORD mode.
    pub fn flush_recorder(&self) -> Result<(), TapeError> {
        if let Some(recorder) = self.recorder() {
            recorder.flush()?;
        }
        Ok(())
    }

    /// Next value of the process-wide sequence counter, shared by flows
    /// and events.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Seconds since startup.
    pub fn uptime_s(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentchaos_core::loader::validate_plan;

    const PLAN: &str = r#"
version: "1"
revision: 1
metadata:
  name: state-test
  experiment_id: exp-state
targets:
  - name: all
    type: http_endpoint
    pattern: ".*"
scenarios:
  - name: slow
    type: latency
    target_ref: all
    params: { delay: 0.01 }
"#;

    fn state() -> Arc<ProxyState> {
        let env = RuntimeEnv::default();
        let plan = validate_plan(PLAN.as_bytes(), &env).unwrap();
        let audit = AuditLog::open(None, PiiRedactor::new(true)).unwrap();
        ProxyState::new(plan, env, audit, Some("token".to_string())).unwrap()
    }

    #[test]
    fn install_rejects_stale_revision_and_keeps_plan() {
        let state = state();
        assert!(state.install_plan(PLAN.as_bytes()).is_err());
        assert_eq!(state.plan.revision(), 1);

        let next = PLAN.replace("revision: 1", "revision: 2");
        assert_eq!(state.install_plan(next.as_bytes()).unwrap(), 2);
        assert_eq!(state.plan.revision(), 2);
    }

    #[test]
    fn bad_plan_reload_keeps_current_plan() {
        let state = state();
        let broken = PLAN.replace("target_ref: all", "target_ref: nope")
            .replace("revision: 1", "revision: 5");
        let err = state.install_plan(broken.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("target_ref"));
        assert_eq!(state.plan.revision(), 1);
    }

    #[test]
    fn record_and_playback_require_tape_path() {
        let state = state();
        assert!(matches!(
            state.switch_mode(ProxyMode::Record, None),
            Err(ModeSwitchError::TapePathRequired(ProxyMode::Record))
        ));
        assert!(matches!(
            state.switch_mode(ProxyMode::Playback, None),
            Err(ModeSwitchError::TapePathRequired(ProxyMode::Playback))
        ));
        assert_eq!(state.mode(), ProxyMode::Live);
    }

    #[test]
    fn record_then_playback_round_trips_through_disk() {
        let state = state();
        let dir = tempfile::TempDir::new().unwrap();
        let tape = dir.path().join("run.tape.json");

        state.switch_mode(ProxyMode::Record, Some(&tape)).unwrap();
        assert_eq!(state.mode(), ProxyMode::Record);
        assert!(state.recorder().is_some());

        state.switch_mode(ProxyMode::Playback, Some(&tape)).unwrap();
        assert_eq!(state.mode(), ProxyMode::Playback);
        assert!(state.recorder().is_none());
        let player = state.player().unwrap();
        assert!(player.is_empty());
    }

    #[test]
    fn sequence_is_strictly_increasing() {
        let state = state();
        let a = state.next_sequence();
        let b = state.next_sequence();
        assert!(b > a);
    }
}
