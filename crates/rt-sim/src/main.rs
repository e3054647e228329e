//! Simulator entrypoint (§6).
//!
//! With no `--processor-id`, this process is the supervisor: it reads the processor count from
//! config, re-execs itself once per processor (each child gets its own `--processor-id`), and
//! aggregates their exit codes. A process given `--processor-id` is a leaf: it builds one
//! [`rt_controller::ProcessorRuntime`] and drives it to completion.

use clap::Parser;
use rt_config::SchedulerConfig;
use rt_controller::{ProcessorRuntime, RunOutcome};
use std::path::PathBuf;
use std::process::Command;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "rt-sim", about = "Mixed-criticality multi-core scheduler simulator")]
struct Cli {
    /// Optional YAML override of the compiled-in task/allocation/tunable defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Internal: this process is the leaf for the given processor id. Omit to run the
    /// supervisor, which spawns one child per processor.
    #[arg(long)]
    processor_id: Option<u32>,
    /// Number of ticks to run before stopping cleanly. Unset means run until a fatal condition.
    #[arg(long, env = "RT_SCHED_TICKS")]
    ticks: Option<u64>,
    /// Overrides the processor count from config, for the supervisor only.
    #[arg(long, env = "RT_SCHED_NUM_PROC")]
    num_proc: Option<u32>,
    /// Log level filter, e.g. `info`, `debug`, `rt_core=trace,info`. Falls back to `RUST_LOG`.
    #[arg(long)]
    log_level: Option<String>,
}

/// Why a leaf process exited, mapped to the exit codes a supervisor aggregates (§10.2).
#[derive(Debug, Clone, Copy)]
enum ExitReason {
    /// The run completed with no fatal condition.
    Clean,
    /// A core observed a running job past its actual deadline.
    DeadlineMiss,
    /// The static configuration was invalid; failed before any threads started.
    ConfigError,
    /// A thread panicked, or setup (transport bind, thread spawn) failed unrecoverably.
    FatalFault,
}

impl ExitReason {
    fn code(self) -> i32 {
        match self {
            ExitReason::Clean => 0,
            ExitReason::DeadlineMiss => 1,
            ExitReason::ConfigError => 2,
            ExitReason::FatalFault => 3,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let log_level = cli
        .log_level
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());

    match cli.processor_id {
        Some(processor_id) => {
            let _guard = init_logging(processor_id, &log_level);
            let reason = run_leaf(processor_id, &cli);
            std::process::exit(reason.code());
        }
        None => {
            let code = run_supervisor(&cli, &log_level);
            std::process::exit(code);
        }
    }
}

fn run_leaf(processor_id: u32, cli: &Cli) -> ExitReason {
    let config = match SchedulerConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(source) => {
            error!(%source, "invalid configuration");
            return ExitReason::ConfigError;
        }
    };

    let transport = match rt_transport::Transport::new_default() {
        Ok(transport) => transport,
        Err(source) => {
            error!(%source, "failed to set up transport");
            return ExitReason::FatalFault;
        }
    };

    let runtime = ProcessorRuntime::new(processor_id, &config, transport);
    match runtime.run(cli.ticks) {
        Ok(RunOutcome::Clean) => {
            info!(processor_id, "run completed cleanly");
            ExitReason::Clean
        }
        Ok(RunOutcome::DeadlineMiss { core_id, task_id, arrival_tick, tick }) => {
            error!(processor_id, core_id, %task_id, arrival_tick, tick, "fatal deadline miss");
            ExitReason::DeadlineMiss
        }
        Err(source) => {
            error!(processor_id, %source, "processor runtime failed");
            ExitReason::FatalFault
        }
    }
}

fn run_supervisor(cli: &Cli, log_level: &str) -> i32 {
    init_logging_stderr_only(log_level);

    let config = match SchedulerConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(source) => {
            error!(%source, "invalid configuration");
            return ExitReason::ConfigError.code();
        }
    };
    let num_proc = cli.num_proc.unwrap_or(config.limits.num_proc);

    let current_exe = match std::env::current_exe() {
        Ok(path) => path,
        Err(source) => {
            error!(%source, "failed to resolve own executable path");
            return ExitReason::FatalFault.code();
        }
    };

    let mut children = Vec::with_capacity(num_proc as usize);
    for processor_id in 0..num_proc {
        let mut command = Command::new(&current_exe);
        command.arg("--processor-id").arg(processor_id.to_string());
        if let Some(config_path) = &cli.config {
            command.arg("--config").arg(config_path);
        }
        if let Some(ticks) = cli.ticks {
            command.arg("--ticks").arg(ticks.to_string());
        }
        command.arg("--log-level").arg(log_level);

        match command.spawn() {
            Ok(child) => children.push((processor_id, child)),
            Err(source) => {
                error!(processor_id, %source, "failed to spawn processor process");
                return ExitReason::FatalFault.code();
            }
        }
    }

    let mut codes = Vec::with_capacity(children.len());
    for (processor_id, mut child) in children {
        match child.wait() {
            Ok(status) => {
                let code = status.code().unwrap_or(ExitReason::FatalFault.code());
                info!(processor_id, code, "processor process exited");
                codes.push(code);
            }
            Err(source) => {
                error!(processor_id, %source, "failed to wait on processor process");
                codes.push(ExitReason::FatalFault.code());
            }
        }
    }

    aggregate_exit_codes(&codes)
}

/// Pick the most actionable non-zero code across every child: a crash outranks a config
/// problem, which outranks an (expected, by-design) deadline miss, which outranks a clean exit.
fn aggregate_exit_codes(codes: &[i32]) -> i32 {
    for wanted in [ExitReason::FatalFault, ExitReason::ConfigError, ExitReason::DeadlineMiss] {
        if codes.contains(&wanted.code()) {
            return wanted.code();
        }
    }
    ExitReason::Clean.code()
}

fn init_logging(processor_id: u32, log_level: &str) -> tracing_appender::non_blocking::WorkerGuard {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let file_appender = tracing_appender::rolling::never(".", format!("processor-{processor_id}.log"));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let file_layer = tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry().with(filter).with(file_layer).with(stderr_layer).init();

    guard
}

/// The supervisor has no processor id of its own and no per-core work to log about; stderr only.
fn init_logging_stderr_only(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
