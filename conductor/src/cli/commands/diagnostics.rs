//! Diagnostics: `doctor`, `ping` and `providers test`

use crate::cli::output::OutputContext;
use crate::cli::utils::{checked_id, lookup, table, text_any};
use crate::cli::Session;
use crate::client::{ClientError, DaemonClient};
use crate::common::config::{ControllerConfig, Overrides};
use crate::common::error::{CliError, ErrorCode, Result};
use crate::common::exit_code::codes;
use crate::controller::pid_file::{PidFile, PidFileError};
use crate::controller::process::{is_process_running, ProcessIdentity};
use clap::{Args, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Instant;
use tabled::Tabled;
use tracing::debug;
use uuid::Uuid;

/// Ping the controller and report the round trip
pub async fn ping_controller(ctx: &OutputContext, client: &DaemonClient) -> Result<()> {
    let started = Instant::now();
    client.ping().await?;
    let latency_ms = started.elapsed().as_millis() as u64;
    let endpoint = client.endpoint().to_string();
    if ctx.json() {
        ctx.emit_json(json!({ "endpoint": endpoint, "latency_ms": latency_ms }));
    } else {
        ctx.print(format!(
            "{} Controller is responding at {} ({}ms)",
            ctx.ok("✓"),
            endpoint,
            latency_ms
        ));
    }
    Ok(())
}

#[derive(Debug, Args)]
pub struct PingCommand {}

impl PingCommand {
    pub async fn execute(self, session: &Session) -> Result<()> {
        let client = session.client()?;
        ping_controller(session.out(), &client).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
struct Check {
    name: &'static str,
    status: CheckStatus,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name,
            status,
            message: message.into(),
        }
    }
}

#[derive(Tabled)]
struct CheckRow {
    #[tabled(rename = "CHECK")]
    name: String,

    #[tabled(rename = "STATUS")]
    status: String,

    #[tabled(rename = "DETAIL")]
    message: String,
}

/// Local installation and controller checks
#[derive(Debug, Args)]
pub struct DoctorCommand {}

impl DoctorCommand {
    pub async fn execute(self, session: &Session) -> Result<()> {
        let ctx = session.out();
        let (config_check, config) = check_config(session);
        let mut checks = vec![config_check];
        let config = config.unwrap_or_else(|| ControllerConfig::defaults(session.paths()));

        let identity = ProcessIdentity::for_current_exe(&config.identity_allowlist);
        checks.push(check_pid_file(&PidFile::new(&config.pid_file), |pid| {
            if !is_process_running(pid) {
                PidState::Dead
            } else if identity.is_conductor_process(pid) {
                PidState::Conductor
            } else {
                PidState::Foreign
            }
        }));
        checks.push(check_state_dir(&config.state_dir));
        checks.push(check_controller(&DaemonClient::new(config.listen.clone())).await);

        let failed: Vec<&str> = checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .map(|c| c.name)
            .collect();

        if ctx.json() {
            if failed.is_empty() {
                ctx.emit_json(json!({ "checks": checks, "healthy": true }));
            }
        } else {
            let rows: Vec<CheckRow> = checks
                .iter()
                .map(|c| CheckRow {
                    name: c.name.to_string(),
                    status: match c.status {
                        CheckStatus::Pass => ctx.ok("pass"),
                        CheckStatus::Warn => ctx.warn("warn"),
                        CheckStatus::Fail => ctx.error("fail"),
                    },
                    message: c.message.clone(),
                })
                .collect();
            ctx.print(table(rows));
        }

        if failed.is_empty() {
            return Ok(());
        }
        Err(CliError::tagged(
            codes::GENERAL_ERROR,
            ErrorCode::E503,
            format!("doctor found problems: {}", failed.join(", ")),
        ))
    }
}

fn check_config(session: &Session) -> (Check, Option<ControllerConfig>) {
    const NAME: &str = "config";
    let settings = match session.settings() {
        Ok(settings) => settings,
        Err(e) => return (Check::new(NAME, CheckStatus::Fail, e.to_string()), None),
    };
    match session.controller_config(&Overrides::default()) {
        Ok(config) if settings.exists => (
            Check::new(NAME, CheckStatus::Pass, settings.path.display().to_string()),
            Some(config),
        ),
        Ok(config) => (
            Check::new(
                NAME,
                CheckStatus::Warn,
                format!("no settings file at {}; defaults apply", settings.path.display()),
            ),
            Some(config),
        ),
        Err(e) => (Check::new(NAME, CheckStatus::Fail, e.to_string()), None),
    }
}

enum PidState {
    Dead,
    Conductor,
    Foreign,
}

fn check_pid_file(pid_file: &PidFile, probe: impl Fn(u32) -> PidState) -> Check {
    const NAME: &str = "pid file";
    match pid_file.read() {
        Ok(pid) => match probe(pid) {
            PidState::Conductor => {
                Check::new(NAME, CheckStatus::Pass, format!("controller running (PID {})", pid))
            }
            PidState::Dead => Check::new(
                NAME,
                CheckStatus::Warn,
                format!("stale PID {}; removed by the next start or stop", pid),
            ),
            PidState::Foreign => Check::new(
                NAME,
                CheckStatus::Fail,
                format!("PID {} belongs to another program", pid),
            ),
        },
        Err(PidFileError::NotFound { .. }) => {
            Check::new(NAME, CheckStatus::Pass, "no PID file (controller stopped)")
        }
        Err(e) => Check::new(NAME, CheckStatus::Fail, e.to_string()),
    }
}

fn check_state_dir(dir: &Path) -> Check {
    const NAME: &str = "state dir";
    let probe = dir.join(format!(".doctor-{}", Uuid::new_v4().simple()));
    let result = std::fs::create_dir_all(dir).and_then(|()| std::fs::write(&probe, b"ok"));
    let _ = std::fs::remove_file(&probe);
    match result {
        Ok(()) => Check::new(NAME, CheckStatus::Pass, format!("{} is writable", dir.display())),
        Err(e) => Check::new(
            NAME,
            CheckStatus::Fail,
            format!("{} is not writable: {}", dir.display(), e),
        ),
    }
}

async fn check_controller(client: &DaemonClient) -> Check {
    const NAME: &str = "controller";
    let started = Instant::now();
    match client.ping().await {
        Ok(()) => Check::new(
            NAME,
            CheckStatus::Pass,
            format!(
                "responding at {} ({}ms)",
                client.endpoint(),
                started.elapsed().as_millis()
            ),
        ),
        Err(e) if e.is_controller_not_running() => Check::new(
            NAME,
            CheckStatus::Warn,
            format!("not running at {}", client.endpoint()),
        ),
        Err(e) => Check::new(NAME, CheckStatus::Fail, e.to_string()),
    }
}

#[derive(Debug, Args)]
pub struct ProvidersCommand {
    #[command(subcommand)]
    command: ProvidersSubcommands,
}

#[derive(Debug, Subcommand)]
enum ProvidersSubcommands {
    /// Check that the controller can reach an LLM provider
    Test {
        /// Provider name
        name: String,
    },
}

impl ProvidersCommand {
    pub async fn execute(self, session: &Session) -> Result<()> {
        match self.command {
            ProvidersSubcommands::Test { name } => {
                let name = checked_id("provider", &name)?;
                let path = format!("/v1/providers/{}/test", name);
                let report = match session.client()?.post(&path, &json!({})).await {
                    Ok(report) => report,
                    Err(ClientError::NotFound { .. }) => {
                        return Err(CliError::tagged(
                            codes::PROVIDER_ERROR,
                            ErrorCode::E101,
                            format!("provider not found: {}", name),
                        )
                        .with_suggestion("Check the providers section of the settings file"));
                    }
                    Err(e) => return Err(e.into()),
                };
                report_provider_test(session.out(), name, &report)
            }
        }
    }
}

fn provider_test_passed(report: &Value) -> bool {
    if let Some(success) = lookup(report, "success").and_then(Value::as_bool) {
        return success;
    }
    match lookup(report, "status").and_then(Value::as_str) {
        Some(status) => matches!(status.to_ascii_lowercase().as_str(), "ok" | "success" | "passed"),
        None => lookup(report, "error").is_none(),
    }
}

fn report_provider_test(ctx: &OutputContext, name: &str, report: &Value) -> Result<()> {
    if !provider_test_passed(report) {
        debug!(?report, "provider test failed");
        let reason = text_any(report, &["error", "message"]);
        return Err(CliError::tagged(
            codes::PROVIDER_ERROR,
            ErrorCode::E102,
            format!("provider {} failed its connectivity test: {}", name, reason),
        )
        .with_suggestion("Check the provider credentials and network access"));
    }
    if ctx.json() {
        ctx.emit_json(json!({ "provider": name, "result": report }));
        return Ok(());
    }
    let mut line = format!("{} Provider {} is reachable", ctx.ok("✓"), name);
    if let Some(latency) = lookup(report, "latency_ms").and_then(Value::as_u64) {
        line.push_str(&format!(" ({}ms)", latency));
    }
    ctx.print(line);
    if let Some(model) = lookup(report, "model").and_then(Value::as_str) {
        ctx.detail(format!("model: {}", model));
    }
    Ok(())
}
