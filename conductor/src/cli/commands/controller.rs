//! Controller lifecycle commands

use crate::cli::commands::diagnostics::ping_controller;
use crate::cli::dry_run::DryRun;
use crate::cli::output::OutputContext;
use crate::cli::Session;
use crate::client::{DaemonClient, HealthReport, VersionInfo};
use crate::common::config::{ControllerConfig, Overrides};
use crate::common::error::{CliError, ErrorCode, Result};
use crate::common::exit_code::codes;
use crate::common::status::format_status;
use crate::common::timestamp::format_duration_ms;
use crate::common::validation::parse_duration;
use crate::controller::supervisor::{
    StartOutcome, StopOutcome, Supervisor, DEFAULT_START_TIMEOUT, DEFAULT_STOP_TIMEOUT,
};
use crate::controller::{system_supervisor, PidFile};
use clap::{Args, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Args)]
pub struct ControllerCommand {
    #[command(subcommand)]
    command: ControllerSubcommands,
}

#[derive(Debug, Subcommand)]
enum ControllerSubcommands {
    /// Start the controller (no-op when a healthy one is running)
    Start(StartArgs),

    /// Stop the controller (no-op when it is not running)
    Stop(StopArgs),

    /// Stop, then start the controller
    Restart(StopArgs),

    /// Show controller health and version
    Status,

    /// Check that the controller answers
    Ping,
}

#[derive(Debug, Args)]
struct StartArgs {
    /// Run attached to this terminal instead of in the background
    #[arg(long)]
    foreground: bool,

    /// How long to wait for the controller to become ready
    #[arg(long, value_parser = parse_duration, default_value = "30s")]
    timeout: Duration,

    /// Listen on this Unix socket
    #[arg(long, value_name = "PATH", conflicts_with = "tcp")]
    socket: Option<PathBuf>,

    /// Listen on this TCP address
    #[arg(long, value_name = "HOST:PORT")]
    tcp: Option<String>,

    /// Accept connections from other hosts (TCP only)
    #[arg(long)]
    allow_remote: bool,

    /// Storage backend
    #[arg(long)]
    backend: Option<String>,

    /// Directory to load workflows from
    #[arg(long, value_name = "DIR")]
    workflows_dir: Option<PathBuf>,

    /// Acknowledge running a remote listener without TLS
    #[arg(long)]
    force_insecure: bool,

    /// Show what would happen without starting anything
    #[arg(long)]
    dry_run: bool,
}

impl StartArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            socket: self.socket.clone(),
            tcp: self.tcp.clone(),
            allow_remote: self.allow_remote,
            workflows_dir: self.workflows_dir.clone(),
            backend: self.backend.clone(),
            force_insecure: self.force_insecure,
        }
    }
}

#[derive(Debug, Args)]
struct StopArgs {
    /// Graceful shutdown budget before SIGKILL
    #[arg(long, value_parser = parse_duration, default_value = "30s")]
    timeout: Duration,

    /// Send SIGKILL immediately
    #[arg(long)]
    force: bool,
}

impl ControllerCommand {
    pub async fn execute(self, session: &Session) -> Result<()> {
        match self.command {
            ControllerSubcommands::Start(args) => start(args, session).await,
            ControllerSubcommands::Stop(args) => stop(args, session).await,
            ControllerSubcommands::Restart(args) => restart(args, session).await,
            ControllerSubcommands::Status => status(session).await,
            ControllerSubcommands::Ping => {
                let client = session.client()?;
                ping_controller(session.out(), &client).await
            }
        }
    }
}

async fn start(args: StartArgs, session: &Session) -> Result<()> {
    let ctx = session.out();
    let config = session.controller_config(&args.overrides())?;
    let supervisor = system_supervisor(&config)?.with_interrupt(session.interrupt().clone());

    if args.dry_run {
        start_preview(&args, &config, &supervisor, session).render(ctx);
        return Ok(());
    }

    if args.foreground {
        ctx.status(format!(
            "Running controller in the foreground on {} (Ctrl-C to stop)",
            config.listen
        ));
        tokio::task::spawn_blocking(move || supervisor.start_foreground())
            .await
            .map_err(|e| CliError::Generic(format!("foreground controller task failed: {}", e)))??;
        ctx.status("Controller exited");
        return Ok(());
    }

    if args.timeout != DEFAULT_START_TIMEOUT {
        ctx.detail(format!("Readiness timeout: {:?}", args.timeout));
    }
    ctx.status(format!("Starting controller on {}...", config.listen));
    let outcome = supervisor.start(args.timeout).await?;
    report_start(ctx, &outcome, &config, "started");
    Ok(())
}

fn start_preview(
    args: &StartArgs,
    config: &ControllerConfig,
    supervisor: &Supervisor,
    session: &Session,
) -> DryRun {
    let paths = session.paths();
    let launch = supervisor.launch();
    let shown_args = |args: Vec<String>| {
        args.iter()
            .map(|arg| paths.placeholder(Path::new(arg)))
            .collect::<Vec<_>>()
            .join(" ")
    };
    let plan = DryRun::new().path("read", &config.pid_file, paths);

    if args.foreground {
        return plan
            .action(
                "run",
                format!(
                    "{} {}",
                    file_name(&launch.engine_binary),
                    shown_args(launch.engine_args.clone())
                ),
            )
            .path("append", &config.lifecycle_log, paths);
    }

    plan.action(
        "spawn",
        format!("{} {}", file_name(&launch.binary), shown_args(launch.child_args())),
    )
    .path("append", &config.controller_log, paths)
    .action("probe", format!("{} /v1/ping for up to {:?}", config.listen, args.timeout))
    .path("write", &config.pid_file, paths)
    .path("append", &config.lifecycle_log, paths)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn report_start(ctx: &OutputContext, outcome: &StartOutcome, config: &ControllerConfig, verb: &str) {
    for warning in &outcome.warnings {
        ctx.failure_warning(warning);
    }
    if ctx.json() {
        ctx.emit_json(json!({
            "pid": outcome.pid,
            "already_running": outcome.already_running,
            "endpoint": config.listen.to_string(),
            "duration_ms": outcome.duration.as_millis() as u64,
            "warnings": outcome.warnings,
        }));
        return;
    }
    if outcome.already_running {
        ctx.status(format!(
            "{} Controller already running (PID {})",
            ctx.ok("✓"),
            outcome.pid
        ));
    } else {
        ctx.status(format!(
            "{} Controller {} successfully (PID {})",
            ctx.ok("✓"),
            verb,
            outcome.pid
        ));
        ctx.detail(format!(
            "Ready after {}",
            format_duration_ms(outcome.duration.as_secs_f64() * 1000.0)
        ));
    }
}

async fn stop(args: StopArgs, session: &Session) -> Result<()> {
    let ctx = session.out();
    let config = session.controller_config(&Overrides::default())?;
    let supervisor = system_supervisor(&config)?;
    if args.timeout != DEFAULT_STOP_TIMEOUT {
        ctx.detail(format!("Graceful shutdown budget: {:?}", args.timeout));
    }
    let outcome = supervisor.stop(args.timeout, args.force).await?;
    report_stop(ctx, &outcome);
    Ok(())
}

fn report_stop(ctx: &OutputContext, outcome: &StopOutcome) {
    if let StopOutcome::Stopped { warnings, .. } = outcome {
        for warning in warnings {
            ctx.failure_warning(warning);
        }
    }
    if ctx.json() {
        let data = match outcome {
            StopOutcome::NotRunning => json!({"stopped": false, "was_running": false}),
            StopOutcome::Stale { pid } => {
                json!({"stopped": false, "was_running": false, "stale_pid": pid})
            }
            StopOutcome::Stopped { pid, duration, .. } => json!({
                "stopped": true,
                "was_running": true,
                "pid": pid,
                "duration_ms": duration.as_millis() as u64,
            }),
        };
        ctx.emit_json(data);
        return;
    }
    match outcome {
        StopOutcome::NotRunning => ctx.status("Controller is not running"),
        StopOutcome::Stale { pid } => ctx.status(format!(
            "Controller is not running (removed stale PID file for PID {})",
            pid
        )),
        StopOutcome::Stopped { pid, .. } => {
            ctx.status(format!("{} Controller stopped (PID {})", ctx.ok("✓"), pid))
        }
    }
}

async fn restart(args: StopArgs, session: &Session) -> Result<()> {
    let ctx = session.out();
    let config = session.controller_config(&Overrides::default())?;
    let supervisor = system_supervisor(&config)?.with_interrupt(session.interrupt().clone());
    ctx.status("Restarting controller...");
    let outcome = supervisor.restart(args.timeout, args.force).await?;
    match &outcome.stop {
        Ok(StopOutcome::Stopped { pid, .. }) => ctx.detail(format!("Stopped PID {}", pid)),
        Ok(_) => ctx.detail("Controller was not running"),
        Err(e) => ctx.warning(format!("stop failed, starting anyway: {}", e)),
    }
    report_start(ctx, &outcome.start, &config, "restarted");
    Ok(())
}

async fn status(session: &Session) -> Result<()> {
    let ctx = session.out();
    let config = session.controller_config(&Overrides::default())?;
    let client = DaemonClient::new(config.listen.clone());
    let pid = PidFile::new(&config.pid_file).read().ok();

    let (health, version) = tokio::join!(client.health(), client.version());
    let health = health?;
    let version = match version {
        Ok(version) => Some(version),
        Err(e) => {
            ctx.warning(format!("could not fetch controller version: {}", e));
            None
        }
    };

    if ctx.json() {
        if !health.is_healthy() {
            return Err(unhealthy(&health));
        }
        ctx.emit_json(json!({
            "running": true,
            "pid": pid,
            "endpoint": config.listen.to_string(),
            "health": health,
            "version": version,
        }));
        return Ok(());
    }

    print_status(ctx, &config, pid, &health, version.as_ref());
    if health.is_healthy() {
        Ok(())
    } else {
        Err(unhealthy(&health))
    }
}

fn unhealthy(health: &HealthReport) -> CliError {
    CliError::tagged(
        codes::GENERAL_ERROR,
        ErrorCode::E503,
        format!("controller is unhealthy (status {})", health.status),
    )
    .with_suggestion("Check the controller log or restart with `conductor controller restart`")
}

fn print_status(
    ctx: &OutputContext,
    config: &ControllerConfig,
    pid: Option<u32>,
    health: &HealthReport,
    version: Option<&VersionInfo>,
) {
    let state = match pid {
        Some(pid) => format!("running (PID {})", pid),
        None => "running (no PID file)".to_string(),
    };
    ctx.print(ctx.header("Controller"));
    ctx.print(format!("  State:    {}", ctx.ok(&state)));
    ctx.print(format!("  Endpoint: {}", config.listen));
    ctx.print(format!("  Health:   {}", format_status(&health.status, ctx.styled())));
    ctx.print(format!("  Uptime:   {}", uptime_text(&health.uptime)));
    if let Some(version) = version {
        ctx.print(format!(
            "  Version:  {} ({}, built {})",
            version.version,
            if version.commit.is_empty() { "-" } else { &version.commit },
            if version.build_date.is_empty() { "-" } else { &version.build_date },
        ));
    }
    if !health.checks.is_empty() {
        ctx.print(ctx.header("Checks"));
        for (name, check) in &health.checks {
            let status = match check {
                Value::String(s) => s.clone(),
                other => other
                    .get("status")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| other.to_string()),
            };
            ctx.print(format!("  {:<16} {}", name, format_status(&status, ctx.styled())));
        }
    }
}

/// Uptime arrives either preformatted or as seconds
fn uptime_text(uptime: &Value) -> String {
    match uptime {
        Value::String(s) => s.clone(),
        Value::Number(n) => n
            .as_f64()
            .map(|secs| format_duration_ms(secs * 1000.0))
            .unwrap_or_else(|| n.to_string()),
        _ => "-".to_string(),
    }
}
