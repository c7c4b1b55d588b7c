//! Detached process launch and signal delivery.

use crate::controller::process::{self, ProcessIdentity};
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How often liveness is re-checked while waiting for an exit
pub const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How long to wait for the kernel to reap a process after SIGKILL
pub const KILL_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to prepare controller log {path:?}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to launch {binary:?}: {source}")]
    Launch {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to send {signal} to PID {pid}: {source}")]
    Signal {
        pid: u32,
        signal: Signal,
        #[source]
        source: io::Error,
    },

    #[error("PID {pid} is still running {waited:?} after SIGKILL")]
    StillRunning { pid: u32, waited: Duration },

    #[error("signals are not supported on this platform")]
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Ask the process to shut down (SIGTERM)
    Terminate,
    /// Stop the process immediately (SIGKILL)
    Kill,
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Terminate => write!(f, "SIGTERM"),
            Signal::Kill => write!(f, "SIGKILL"),
        }
    }
}

/// Everything needed to launch the controller in the background
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub binary: PathBuf,
    pub args: Vec<OsString>,
    pub log_path: PathBuf,
    pub working_dir: PathBuf,
}

/// Launch `binary` in a new session with stdout/stderr appended to the log.
/// Returns the child's PID; the child is not waited on.
pub fn spawn_detached(request: &SpawnRequest) -> Result<u32, SpawnError> {
    let log_error = |source| SpawnError::LogFile {
        path: request.log_path.clone(),
        source,
    };

    if let Some(parent) = request.log_path.parent() {
        fs::create_dir_all(parent).map_err(log_error)?;
    }
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&request.log_path)
        .map_err(log_error)?;
    let stderr_file = log_file.try_clone().map_err(log_error)?;

    let mut cmd = Command::new(&request.binary);
    cmd.args(&request.args)
        .current_dir(&request.working_dir)
        .stdin(Stdio::null())
        .stdout(log_file)
        .stderr(stderr_file);

    // Detach from the parent's terminal and process group
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid()?;
                Ok(())
            });
        }
    }

    let child = cmd.spawn().map_err(|source| SpawnError::Launch {
        binary: request.binary.clone(),
        source,
    })?;
    let pid = child.id();
    info!(pid, binary = ?request.binary, log = ?request.log_path, "spawned detached process");
    Ok(pid)
}

#[cfg(unix)]
pub fn send_signal(pid: u32, signal: Signal) -> Result<(), SpawnError> {
    use nix::sys::signal::{kill, Signal as NixSignal};
    use nix::unistd::Pid;

    let nix_signal = match signal {
        Signal::Terminate => NixSignal::SIGTERM,
        Signal::Kill => NixSignal::SIGKILL,
    };
    let raw = i32::try_from(pid).map_err(|_| SpawnError::Signal {
        pid,
        signal,
        source: io::Error::new(io::ErrorKind::InvalidInput, "PID out of range"),
    })?;
    debug!(pid, %signal, "sending signal");
    kill(Pid::from_raw(raw), nix_signal).map_err(|errno| SpawnError::Signal {
        pid,
        signal,
        source: io::Error::from(errno),
    })
}

#[cfg(not(unix))]
pub fn send_signal(_pid: u32, _signal: Signal) -> Result<(), SpawnError> {
    Err(SpawnError::Unsupported)
}

/// OS operations the supervisor needs; mocked in tests
#[cfg_attr(test, mockall::automock)]
pub trait ProcessControl: Send + Sync {
    fn is_running(&self, pid: u32) -> bool;
    fn is_conductor(&self, pid: u32) -> bool;
    fn spawn_detached(&self, request: &SpawnRequest) -> Result<u32, SpawnError>;
    fn signal(&self, pid: u32, signal: Signal) -> Result<(), SpawnError>;
    /// Run `binary` with inherited stdio and wait; `None` means killed by a signal
    fn run_attached(&self, binary: &Path, args: &[String]) -> Result<Option<i32>, SpawnError>;
}

/// The real operating system
#[derive(Debug, Clone)]
pub struct SystemProcesses {
    identity: ProcessIdentity,
}

impl SystemProcesses {
    pub fn new(identity: ProcessIdentity) -> Self {
        Self { identity }
    }
}

impl ProcessControl for SystemProcesses {
    fn is_running(&self, pid: u32) -> bool {
        process::is_process_running(pid)
    }

    fn is_conductor(&self, pid: u32) -> bool {
        self.identity.is_conductor_process(pid)
    }

    fn spawn_detached(&self, request: &SpawnRequest) -> Result<u32, SpawnError> {
        spawn_detached(request)
    }

    fn signal(&self, pid: u32, signal: Signal) -> Result<(), SpawnError> {
        send_signal(pid, signal)
    }

    fn run_attached(&self, binary: &Path, args: &[String]) -> Result<Option<i32>, SpawnError> {
        let status = Command::new(binary)
            .args(args)
            .status()
            .map_err(|source| SpawnError::Launch {
                binary: binary.to_path_buf(),
                source,
            })?;
        Ok(status.code())
    }
}

/// Stop `pid`: SIGTERM and wait up to `timeout`, then SIGKILL. With `force`
/// go straight to SIGKILL. Succeeds once the process is observed gone.
pub async fn graceful_shutdown<P: ProcessControl + ?Sized>(
    processes: &P,
    pid: u32,
    timeout: Duration,
    force: bool,
) -> Result<(), SpawnError> {
    if !force {
        match processes.signal(pid, Signal::Terminate) {
            Ok(()) => {}
            Err(_) if !processes.is_running(pid) => return Ok(()),
            Err(e) => return Err(e),
        }
        if wait_for_exit(processes, pid, timeout).await {
            info!(pid, "process exited after SIGTERM");
            return Ok(());
        }
        warn!(pid, ?timeout, "process ignored SIGTERM, escalating to SIGKILL");
    }

    match processes.signal(pid, Signal::Kill) {
        Ok(()) => {}
        Err(_) if !processes.is_running(pid) => return Ok(()),
        Err(e) => return Err(e),
    }
    if wait_for_exit(processes, pid, KILL_GRACE).await {
        info!(pid, "process exited after SIGKILL");
        return Ok(());
    }
    Err(SpawnError::StillRunning {
        pid,
        waited: KILL_GRACE,
    })
}

/// Poll liveness until the process is gone or `timeout` elapses
pub async fn wait_for_exit<P: ProcessControl + ?Sized>(
    processes: &P,
    pid: u32,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !processes.is_running(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
}

/// Directory the controller runs in, independent of where the CLI was invoked
pub fn default_working_dir(state_dir: &Path) -> PathBuf {
    if state_dir.is_dir() {
        state_dir.to_path_buf()
    } else {
        PathBuf::from("/")
    }
}
