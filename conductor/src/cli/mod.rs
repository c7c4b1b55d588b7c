pub mod commands;
pub mod dry_run;
pub mod help;
pub mod output;
pub mod utils;

use crate::client::DaemonClient;
use crate::common::config::{
    settings_path, ControllerConfig, Overrides, SettingsFile, ENV_CONFIG,
};
use crate::common::error::{CliError, Result};
use crate::common::exit_code::codes;
use crate::common::paths::ConductorPaths;
use crate::controller::supervisor::Interrupt;
use crate::controller::BEST_EFFORT_TARGET;
use clap::{ArgAction, ArgMatches, CommandFactory, FromArgMatches, Parser, Subcommand};
use commands::*;
use help::HelpCommand;
use output::{error_envelope, styling_enabled, GlobalFlags, OutputContext, StyleEnv};
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(name = "conductor")]
#[command(version, about = "Run, inspect and supervise Conductor workflows", long_about = None)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// Show more detail (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress everything except requested data and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Machine-readable JSON output
    #[arg(long, global = true)]
    pub json: bool,

    /// Settings file to use instead of the default
    #[arg(long, global = true, env = ENV_CONFIG, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    pub fn global_flags(&self) -> GlobalFlags {
        GlobalFlags {
            verbose: self.verbose,
            quiet: self.quiet,
            json: self.json,
            config: self.config.clone(),
            no_color: self.no_color,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start, stop and inspect the background controller
    Controller(ControllerCommand),

    /// List and inspect workflow runs
    Runs(RunsCommand),

    /// Act on a single run (replay)
    Run(RunCommand),

    /// Query execution traces
    Traces(TracesCommand),

    /// List or follow controller events
    Events(EventsCommand),

    /// Inspect MCP servers known to the controller
    Mcp(McpCommand),

    /// Manage the workflow cache
    Cache(CacheCommand),

    /// Manage workspaces
    Workspace(WorkspaceCommand),

    /// Discover connectors and their operations
    Connectors(ConnectorsCommand),

    /// Show and validate the settings file
    Config(ConfigCommand),

    /// Check the local installation and the controller
    Doctor(DoctorCommand),

    /// Check that the controller answers
    Ping(PingCommand),

    /// Test LLM provider connectivity
    Providers(ProvidersCommand),

    /// Documentation links
    Docs(DocsCommand),

    /// Describe commands (text or --json metadata)
    Help(HelpCommand),

    /// Show version information
    Version(VersionCommand),
}

/// Per-invocation state handed to every command
#[derive(Debug, Clone)]
pub struct Session {
    out: OutputContext,
    paths: ConductorPaths,
    env: Overrides,
    interrupt: Interrupt,
}

impl Session {
    pub fn new(out: OutputContext, paths: ConductorPaths) -> Self {
        Self {
            out,
            paths,
            env: Overrides::from_env(),
            interrupt: Interrupt::new(),
        }
    }

    /// Replace the environment layer of the configuration
    pub fn with_env(mut self, env: Overrides) -> Self {
        self.env = env;
        self
    }

    /// Ctrl-C flag handed to long-running supervisor operations
    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    pub fn out(&self) -> &OutputContext {
        &self.out
    }

    pub fn paths(&self) -> &ConductorPaths {
        &self.paths
    }

    pub fn settings(&self) -> Result<SettingsFile> {
        let (path, explicit) = settings_path(self.out.flags().config.as_deref(), &self.paths);
        Ok(SettingsFile::load(&path, explicit)?)
    }

    /// Resolve the controller configuration with command-line overrides on top
    pub fn controller_config(&self, flags: &Overrides) -> Result<ControllerConfig> {
        let settings = self.settings()?;
        Ok(ControllerConfig::resolve(&settings, &self.env, flags, &self.paths)?)
    }

    pub fn client(&self) -> Result<DaemonClient> {
        let config = self.controller_config(&Overrides::default())?;
        debug!(endpoint = %config.listen, "using controller endpoint");
        Ok(DaemonClient::new(config.listen))
    }
}

/// Parse `args` (including the program name), run the command and return
/// the process exit code
pub async fn run(args: Vec<OsString>) -> i32 {
    let json_requested = args.iter().skip(1).any(|arg| arg == "--json");
    let matches = match Cli::command().try_get_matches_from(&args) {
        Ok(matches) => matches,
        Err(err) => return report_parse_error(err, json_requested),
    };
    let cli = match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(err) => return report_parse_error(err, json_requested),
    };

    let flags = cli.global_flags();
    init_tracing(&flags);
    let styled = styling_enabled(flags.no_color, &StyleEnv::detect());
    colored::control::set_override(styled);
    let out = OutputContext::new(flags, styled, command_slug(&matches));

    let Some(command) = cli.command else {
        let mut root = Cli::command();
        out.print(root.render_help().to_string());
        return codes::SUCCESS;
    };

    let session = Session::new(out.clone(), ConductorPaths::new());
    let running = dispatch(command, &session);
    tokio::pin!(running);
    let finished = tokio::select! {
        result = &mut running => Some(result),
        _ = interrupted() => None,
    };
    let result = match finished {
        Some(result) => result,
        // A start waiting on readiness terminates its child before returning
        None if session.interrupt().trigger() => running.await,
        None => Err(CliError::Interrupted),
    };

    match result {
        Ok(()) => codes::SUCCESS,
        Err(err) => {
            debug!("command failed: {:?}", err);
            out.report_error(&err);
            err.exit_code()
        }
    }
}

pub async fn dispatch(command: Commands, session: &Session) -> Result<()> {
    match command {
        Commands::Controller(cmd) => cmd.execute(session).await,
        Commands::Runs(cmd) => cmd.execute(session).await,
        Commands::Run(cmd) => cmd.execute(session).await,
        Commands::Traces(cmd) => cmd.execute(session).await,
        Commands::Events(cmd) => cmd.execute(session).await,
        Commands::Mcp(cmd) => cmd.execute(session).await,
        Commands::Cache(cmd) => cmd.execute(session).await,
        Commands::Workspace(cmd) => cmd.execute(session).await,
        Commands::Connectors(cmd) => cmd.execute(session).await,
        Commands::Config(cmd) => cmd.execute(session),
        Commands::Doctor(cmd) => cmd.execute(session).await,
        Commands::Ping(cmd) => cmd.execute(session).await,
        Commands::Providers(cmd) => cmd.execute(session).await,
        Commands::Docs(cmd) => cmd.execute(session.out()),
        Commands::Help(cmd) => cmd.execute(session.out(), &Cli::command()),
        Commands::Version(cmd) => cmd.execute(session.out()),
    }
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        debug!("Ctrl-C handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Space-separated subcommand chain, e.g. `controller start`
pub fn command_slug(matches: &ArgMatches) -> String {
    let mut parts = Vec::new();
    let mut current = matches;
    while let Some((name, sub)) = current.subcommand() {
        parts.push(name.to_string());
        current = sub;
    }
    if parts.is_empty() {
        "conductor".to_string()
    } else {
        parts.join(" ")
    }
}

/// `--help`/`--version` exit 0; anything else is a usage error (exit 2)
fn report_parse_error(err: clap::Error, json: bool) -> i32 {
    use clap::error::ErrorKind;

    let informational = matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion);
    if informational || !json {
        let _ = err.print();
        return if informational {
            codes::SUCCESS
        } else {
            codes::INVALID_USAGE
        };
    }

    let message = err
        .render()
        .to_string()
        .lines()
        .next()
        .unwrap_or("invalid usage")
        .trim_start_matches("error: ")
        .to_string();
    let envelope = error_envelope("conductor", &CliError::Usage(message));
    println!(
        "{}",
        serde_json::to_string_pretty(&envelope).unwrap_or_else(|_| envelope.to_string())
    );
    codes::INVALID_USAGE
}

fn default_directive(flags: &GlobalFlags) -> String {
    if flags.quiet {
        return format!("conductor=error,{}=warn", BEST_EFFORT_TARGET);
    }
    match flags.verbose {
        0 => "conductor=warn",
        1 => "conductor=info",
        _ => "conductor=debug",
    }
    .to_string()
}

fn init_tracing(flags: &GlobalFlags) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(flags)));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .try_init();
}
