//! Background controller supervision: PID file, process control, lifecycle
//! log and the supervisor that ties them together.

pub mod engine;
pub mod lifecycle_log;
pub mod pid_file;
pub mod process;
pub mod spawn;
pub mod supervisor;

pub use lifecycle_log::{EventKind, LifecycleEvent, LifecycleLog};
pub use pid_file::{PidFile, PidFileError};
pub use process::ProcessIdentity;
pub use spawn::{ProcessControl, SpawnError, SystemProcesses};
pub use supervisor::{
    Interrupt, LaunchSpec, ReadinessProbe, StartOutcome, StopOutcome, Supervisor,
    SupervisorError,
};

/// Tracing target for failed best-effort steps; `--quiet` keeps it visible
pub const BEST_EFFORT_TARGET: &str = "conductor::best_effort";

use crate::client::DaemonClient;
use crate::common::config::ControllerConfig;

/// Supervisor wired to the real OS and a client for `config.listen`
pub fn system_supervisor(config: &ControllerConfig) -> Result<Supervisor, engine::EngineError> {
    let identity = ProcessIdentity::for_current_exe(&config.identity_allowlist);
    Ok(Supervisor::new(
        Box::new(SystemProcesses::new(identity)),
        Box::new(DaemonClient::new(config.listen.clone())),
        PidFile::new(&config.pid_file),
        LifecycleLog::new(&config.lifecycle_log),
        engine::launch_spec(config)?,
    ))
}
