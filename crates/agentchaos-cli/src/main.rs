//! AgentChaos command-line interface: serve the proxy, validate plans,
//! inspect tapes.

use agentchaos_core::{loader, PiiRedactor, ProxyMode, RuntimeEnv, Tape};
use agentchaos_observability::{spawn_pump, AuditLog, LogSink};
use agentchaos_proxy::{control, ingress, ChaosEngine, HttpUpstream, ProxyState, Upstream};
use agentchaos_strategies::{RegistryOptions, StrategyRegistry};
use clap::{Args, Parser, Subcommand};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Exit code: plan failed to load or validate.
const EXIT_PLAN: u8 = 1;
/// Exit code: a listener port could not be bound.
const EXIT_BIND: u8 = 2;
/// Exit code: tape I/O failed.
const EXIT_TAPE: u8 = 3;
/// Exit code: a strict-mode dependency is missing.
const EXIT_STRICT: u8 = 4;

#[derive(Parser)]
#[command(name = "agentchaos", version, about = "Chaos-engineering proxy for AI-agent traffic")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the proxy and its control plane
    Serve(ServeArgs),
    /// Validate a plan file and exit
    Validate {
        /// Path to the plan YAML
        #[arg(long)]
        plan: PathBuf,
    },
    /// Print a summary of a recorded tape
    Tape {
        /// Path to the tape file
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// Path to the chaos plan YAML
    #[arg(long, env = "CHAOS_PLAN")]
    plan: PathBuf,

    /// Ingress listen address (agents point their traffic here)
    #[arg(long, default_value = "127.0.0.1:8888")]
    listen: SocketAddr,

    /// Control-plane listen address
    #[arg(long, default_value = "127.0.0.1:9095")]
    control: SocketAddr,

    /// Initial mode: live, record or playback
    #[arg(long, default_value = "live")]
    mode: ProxyMode,

    /// Tape path, required for record and playback
    #[arg(long)]
    tape: Option<PathBuf>,

    /// Control-plane token; unset disables the guard
    #[arg(long, env = "CHAOS_TOKEN")]
    token: Option<String>,

    /// Event log path (newline-delimited JSON)
    #[arg(long, default_value = "agentchaos.events.jsonl")]
    event_log: PathBuf,

    /// Write the final scorecard summary to this file on shutdown
    #[arg(long)]
    scorecard_out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Serve(args) => serve(args).await,
        Command::Validate { plan } => validate(&plan),
        Command::Tape { file } => inspect_tape(&file),
    }
}

fn validate(plan_path: &PathBuf) -> ExitCode {
    let env = RuntimeEnv::from_env();
    match loader::load_plan(plan_path, &env) {
        Ok(plan) => {
            let registry = StrategyRegistry::builtin();
            let options = RegistryOptions { replay_strict: env.replay_strict };
            match registry.compile(&plan, &options) {
                Ok(catalog) => {
                    info!(
                        revision = plan.revision,
                        targets = plan.targets.len(),
                        scenarios = catalog.scenarios.len(),
                        "plan is valid"
                    );
                    ExitCode::SUCCESS
                }
                Err(messages) => {
                    for message in messages {
                        error!("{message}");
                    }
                    ExitCode::from(EXIT_PLAN)
                }
            }
        }
        Err(err) => {
            error!("{err}");
            ExitCode::from(EXIT_PLAN)
        }
    }
}

fn inspect_tape(file: &PathBuf) -> ExitCode {
    let env = RuntimeEnv::from_env();
    let key = env.tape_key.as_deref().map(agentchaos_core::TapeKey::from_env_value);
    match Tape::read_from(file, key.as_ref()) {
        Ok(tape) => {
            let unique: HashSet<String> =
                tape.entries.iter().map(|entry| entry.fingerprint.key()).collect();
            let chaos = tape.entries.iter().filter(|e| e.chaos_context.chaos_applied).count();
            println!("tape version:        {}", tape.version);
            println!("created at:          {}", tape.metadata.created_at);
            println!("recorder version:    {}", tape.metadata.recorder_version);
            println!("entries:             {}", tape.entries.len());
            println!("unique fingerprints: {}", unique.len());
            println!("chaos entries:       {chaos}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            ExitCode::from(EXIT_TAPE)
        }
    }
}

async fn serve(args: ServeArgs) -> ExitCode {
    let env = RuntimeEnv::from_env();

    if env.jwt_strict && env.jwt_secret.is_none() {
        error!("CHAOS_JWT_STRICT is set but CHAOS_JWT_SECRET is missing");
        return ExitCode::from(EXIT_STRICT);
    }

    let plan = match loader::load_plan(&args.plan, &env) {
        Ok(plan) => plan,
        Err(err) => {
            error!("plan load failed: {err}");
            return ExitCode::from(EXIT_PLAN);
        }
    };

    let redactor = PiiRedactor::new(env.pii_redaction);
    let audit = match AuditLog::open(env.audit_log.as_deref(), redactor.clone()) {
        Ok(audit) => audit,
        Err(err) => {
            warn!(%err, "audit log unavailable, continuing without it");
            AuditLog::open(None, redactor.clone()).unwrap_or_else(|_| unreachable!())
        }
    };

    let state = match ProxyState::new(plan, env, audit, args.token.clone()) {
        Ok(state) => state,
        Err(err) => {
            error!("plan rejected: {err}");
            return ExitCode::from(EXIT_PLAN);
        }
    };

    if args.mode != ProxyMode::Live {
        let Some(tape) = args.tape.as_deref() else {
            error!("--tape is required for {} mode", args.mode);
            return ExitCode::from(EXIT_TAPE);
        };
        if let Err(err) = state.switch_mode(args.mode, Some(tape)) {
            error!("cannot enter {} mode: {err}", args.mode);
            return ExitCode::from(EXIT_TAPE);
        }
    }

    let sink = match LogSink::to_file(&args.event_log, redactor) {
        Ok(sink) => Arc::new(sink),
        Err(err) => {
            error!("cannot open event log {}: {err}", args.event_log.display());
            return ExitCode::from(EXIT_TAPE);
        }
    };
    let pump = spawn_pump(
        state.bus.clone(),
        sink,
        state.dashboard.clone(),
        state.scorecard.clone(),
    );

    let control_listener = match tokio::net::TcpListener::bind(args.control).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("cannot bind control port {}: {err}", args.control);
            return ExitCode::from(EXIT_BIND);
        }
    };
    let ingress_listener = match tokio::net::TcpListener::bind(args.listen).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("cannot bind ingress port {}: {err}", args.listen);
            return ExitCode::from(EXIT_BIND);
        }
    };

    let engine = Arc::new(ChaosEngine::new(state.clone()));
    let upstream: Arc<dyn Upstream> = Arc::new(HttpUpstream::new());

    let control_state = state.clone();
    tokio::spawn(async move {
        if let Err(err) = control::serve(control_listener, control_state).await {
            error!(%err, "control plane stopped");
        }
    });
    let ingress_engine = engine.clone();
    tokio::spawn(async move {
        if let Err(err) = ingress::serve(ingress_listener, ingress_engine, upstream).await {
            error!(%err, "ingress stopped");
        }
    });

    info!(
        mode = %state.mode(),
        plan_revision = state.plan.revision(),
        "agentchaos running, press ctrl-c to stop"
    );

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "signal handler failed");
    }
    info!("shutting down");

    let mut code = ExitCode::SUCCESS;
    if let Err(err) = state.flush_recorder() {
        error!("tape flush failed: {err}");
        code = ExitCode::from(EXIT_TAPE);
    }

    state.bus.close();
    let _ = pump.await;

    let summary = state.scorecard.summary();
    if let Some(path) = &args.scorecard_out {
        match serde_json::to_vec_pretty(&summary) {
            Ok(bytes) => {
                if let Err(err) = std::fs::write(path, bytes) {
                    error!("cannot write scorecard to {}: {err}", path.display());
                }
            }
            Err(err) => error!(%err, "cannot serialize scorecard"),
        }
    }
    info!(
        total_requests = summary.total_requests,
        chaos_injections = summary.chaos_injections,
        race_candidates = summary.race_condition_candidates,
        events_dropped = summary.events_dropped,
        "run complete"
    );

    code
}
