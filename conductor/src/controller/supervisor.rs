//! Idempotent start, stop and restart of the background controller.

use crate::client::{ClientError, DaemonClient, Deadline, PING_TIMEOUT};
use crate::controller::engine::CHILD_MARKER;
use crate::controller::lifecycle_log::{EventKind, LifecycleEvent, LifecycleLog};
use crate::controller::pid_file::{PidFile, PidFileError};
use crate::controller::spawn::{self, ProcessControl, Signal, SpawnError, SpawnRequest};
use crate::controller::BEST_EFFORT_TARGET;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default readiness budget for `controller start`
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(30);
/// Default graceful budget for `controller stop`
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    PidFile(#[from] PidFileError),

    #[error("PID {pid} is not a conductor process (refusing to stop)")]
    NotConductor { pid: u32 },

    #[error("failed to launch the controller: {0}")]
    Spawn(#[from] SpawnError),

    #[error("controller (PID {pid}) did not become ready within {timeout:?}")]
    StartTimeout {
        pid: u32,
        timeout: Duration,
        log: PathBuf,
    },

    #[error("controller (PID {pid}) exited during startup")]
    ExitedDuringStartup { pid: u32, log: PathBuf },

    #[error("interrupted while waiting for controller (PID {pid}); it was terminated")]
    Interrupted { pid: u32 },

    #[error("failed to stop controller (PID {pid}): {source}")]
    Shutdown {
        pid: u32,
        #[source]
        source: SpawnError,
    },

    #[error("controller exited with {}", describe_exit(.code))]
    ForegroundExited { code: Option<i32> },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

impl SupervisorError {
    /// Controller log worth pointing the user at, if any
    pub fn log_path(&self) -> Option<&Path> {
        match self {
            SupervisorError::StartTimeout { log, .. }
            | SupervisorError::ExitedDuringStartup { log, .. } => Some(log),
            _ => None,
        }
    }
}

/// Liveness check against the controller API; mocked in tests
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn ping(&self, deadline: Deadline) -> Result<(), ClientError>;
}

#[async_trait]
impl ReadinessProbe for DaemonClient {
    async fn ping(&self, deadline: Deadline) -> Result<(), ClientError> {
        self.ping_with(deadline).await
    }
}

/// Ctrl-C flag shared between the CLI and a start waiting on readiness
#[derive(Debug, Clone)]
pub struct Interrupt(Arc<watch::Sender<bool>>);

impl Default for Interrupt {
    fn default() -> Self {
        Self(Arc::new(watch::channel(false).0))
    }
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag; true when a start is listening and will clean up
    pub fn trigger(&self) -> bool {
        self.0.send_replace(true);
        self.0.receiver_count() > 0
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.0.subscribe()
    }
}

/// Waits and backoff used by the supervisor
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    /// Outer budget for probing an already-running controller
    pub existing_probe: Duration,
    pub backoff_initial: Duration,
    pub backoff_factor: f64,
    pub backoff_cap: Duration,
    /// Grace given to a child that failed readiness before SIGKILL
    pub failed_start_grace: Duration,
    /// Pause between stop and start on restart
    pub restart_pause: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            existing_probe: Duration::from_secs(5),
            backoff_initial: Duration::from_millis(100),
            backoff_factor: 1.5,
            backoff_cap: Duration::from_secs(1),
            failed_start_grace: Duration::from_secs(1),
            restart_pause: Duration::from_millis(100),
        }
    }
}

/// How the controller is launched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// The CLI binary, re-invoked with the child marker for background starts
    pub binary: PathBuf,
    /// The engine, run directly for foreground starts
    pub engine_binary: PathBuf,
    pub engine_args: Vec<String>,
    pub controller_log: PathBuf,
    pub working_dir: PathBuf,
}

impl LaunchSpec {
    pub fn child_args(&self) -> Vec<String> {
        std::iter::once(CHILD_MARKER.to_string())
            .chain(self.engine_args.iter().cloned())
            .collect()
    }

    pub fn spawn_request(&self) -> SpawnRequest {
        SpawnRequest {
            binary: self.binary.clone(),
            args: self.child_args().into_iter().map(Into::into).collect(),
            log_path: self.controller_log.clone(),
            working_dir: self.working_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub pid: u32,
    pub already_running: bool,
    pub duration: Duration,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    /// The PID file pointed at a dead process and was removed
    Stale { pid: u32 },
    Stopped {
        pid: u32,
        duration: Duration,
        warnings: Vec<String>,
    },
}

#[derive(Debug)]
pub struct RestartOutcome {
    pub stop: Result<StopOutcome, SupervisorError>,
    pub start: StartOutcome,
}

enum Readiness {
    Ready,
    TimedOut,
    Exited,
    Interrupted,
}

pub struct Supervisor {
    processes: Box<dyn ProcessControl>,
    probe: Box<dyn ReadinessProbe>,
    pid_file: PidFile,
    log: LifecycleLog,
    launch: LaunchSpec,
    timings: Timings,
    interrupt: Interrupt,
}

impl Supervisor {
    pub fn new(
        processes: Box<dyn ProcessControl>,
        probe: Box<dyn ReadinessProbe>,
        pid_file: PidFile,
        log: LifecycleLog,
        launch: LaunchSpec,
    ) -> Self {
        Self {
            processes,
            probe,
            pid_file,
            log,
            launch,
            timings: Timings::default(),
            interrupt: Interrupt::new(),
        }
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn pid_file(&self) -> &PidFile {
        &self.pid_file
    }

    pub fn launch(&self) -> &LaunchSpec {
        &self.launch
    }

    /// Start the controller in the background unless a healthy one is running
    pub async fn start(&self, timeout: Duration) -> Result<StartOutcome, SupervisorError> {
        let started = Instant::now();
        let mut warnings = Vec::new();

        match self.pid_file.read() {
            Ok(pid) => {
                if self.processes.is_running(pid) && self.processes.is_conductor(pid) {
                    let deadline = Instant::now() + self.timings.existing_probe;
                    if matches!(self.poll_ready(deadline, None).await, Readiness::Ready) {
                        info!(pid, "controller already running");
                        self.log
                            .record(LifecycleEvent::new(EventKind::AlreadyRunning, Some(pid)));
                        return Ok(StartOutcome {
                            pid,
                            already_running: true,
                            duration: started.elapsed(),
                            warnings,
                        });
                    }
                    let message = format!(
                        "controller PID {} is running but not responding; starting a new instance",
                        pid
                    );
                    debug!("{}", message);
                    warnings.push(message);
                } else {
                    let reason = if self.processes.is_running(pid) {
                        "not a conductor process"
                    } else {
                        "process not running"
                    };
                    self.log
                        .record(LifecycleEvent::new(EventKind::StalePid, Some(pid)).with_reason(reason));
                    self.pid_file.remove()?;
                }
            }
            Err(PidFileError::NotFound { .. }) => {}
            Err(PidFileError::Corrupt { contents, .. }) => {
                debug!(?contents, "discarding corrupt PID file");
                self.log.record(
                    LifecycleEvent::new(EventKind::StalePid, None).with_reason("corrupt PID file"),
                );
                self.pid_file.remove()?;
            }
            Err(e) => return Err(e.into()),
        }

        let args = self.launch.child_args();
        self.log
            .record(LifecycleEvent::new(EventKind::Start, None).with_args(args.iter().cloned()));

        let pid = match self.processes.spawn_detached(&self.launch.spawn_request()) {
            Ok(pid) => pid,
            Err(e) => {
                self.log.record(
                    LifecycleEvent::new(EventKind::StartFailure, None)
                        .with_duration(started.elapsed())
                        .with_reason(e.to_string()),
                );
                return Err(e.into());
            }
        };
        debug!(pid, "waiting for controller readiness");

        // The budget starts at spawn, not at the probe of an earlier instance
        let deadline = Instant::now() + timeout;
        let mut interrupted = self.interrupt.subscribe();
        let readiness = tokio::select! {
            readiness = self.poll_ready(deadline, Some(pid)) => readiness,
            Ok(_) = interrupted.wait_for(|set| *set) => Readiness::Interrupted,
        };
        match readiness {
            Readiness::Ready => {}
            Readiness::Interrupted => {
                warn!(pid, "interrupted during startup; terminating controller");
                self.abandon_child(pid).await;
                self.log.record(
                    LifecycleEvent::new(EventKind::StartFailure, Some(pid))
                        .with_duration(started.elapsed())
                        .with_reason("interrupted"),
                );
                return Err(SupervisorError::Interrupted { pid });
            }
            Readiness::TimedOut => {
                self.abandon_child(pid).await;
                self.log.record(
                    LifecycleEvent::new(EventKind::StartFailure, Some(pid))
                        .with_duration(started.elapsed())
                        .with_reason("readiness timeout"),
                );
                return Err(SupervisorError::StartTimeout {
                    pid,
                    timeout,
                    log: self.launch.controller_log.clone(),
                });
            }
            Readiness::Exited => {
                self.log.record(
                    LifecycleEvent::new(EventKind::StartFailure, Some(pid))
                        .with_duration(started.elapsed())
                        .with_reason("process exited during startup"),
                );
                return Err(SupervisorError::ExitedDuringStartup {
                    pid,
                    log: self.launch.controller_log.clone(),
                });
            }
        }

        // A healthy controller outranks the bookkeeping file
        if let Err(e) = self.pid_file.create(pid) {
            let message = format!("controller is running but the PID file was not written: {}", e);
            debug!("{}", message);
            warnings.push(message);
        }

        let duration = started.elapsed();
        self.log.record(
            LifecycleEvent::new(EventKind::StartSuccess, Some(pid)).with_duration(duration),
        );
        info!(pid, ?duration, "controller started");
        Ok(StartOutcome {
            pid,
            already_running: false,
            duration,
            warnings,
        })
    }

    /// Run the engine attached to this terminal; no PID file is written
    pub fn start_foreground(&self) -> Result<(), SupervisorError> {
        let started = Instant::now();
        self.log.record(
            LifecycleEvent::new(EventKind::Start, Some(std::process::id()))
                .with_args(self.launch.engine_args.iter().cloned()),
        );

        let result = self
            .processes
            .run_attached(&self.launch.engine_binary, &self.launch.engine_args);
        let failure = match result {
            Ok(Some(0)) => return Ok(()),
            Ok(code) => SupervisorError::ForegroundExited { code },
            Err(e) => SupervisorError::Spawn(e),
        };
        self.log.record(
            LifecycleEvent::new(EventKind::StartFailure, None)
                .with_duration(started.elapsed())
                .with_reason(failure.to_string()),
        );
        Err(failure)
    }

    /// Stop the recorded controller; absent or stale PID files are success
    pub async fn stop(&self, timeout: Duration, force: bool) -> Result<StopOutcome, SupervisorError> {
        let started = Instant::now();
        let pid = match self.pid_file.read() {
            Ok(pid) => pid,
            Err(PidFileError::NotFound { .. }) => return Ok(StopOutcome::NotRunning),
            Err(e) => return Err(e.into()),
        };

        if !self.processes.is_running(pid) {
            self.log.record(
                LifecycleEvent::new(EventKind::StalePid, Some(pid)).with_reason("process not running"),
            );
            if let Err(e) = self.pid_file.remove() {
                warn!(target: BEST_EFFORT_TARGET, "failed to remove stale PID file: {}", e);
            }
            return Ok(StopOutcome::Stale { pid });
        }

        if !self.processes.is_conductor(pid) {
            return Err(SupervisorError::NotConductor { pid });
        }

        let mode = if force { "force" } else { "graceful" };
        self.log
            .record(LifecycleEvent::new(EventKind::Stop, Some(pid)).with_reason(mode));

        if let Err(source) = spawn::graceful_shutdown(&*self.processes, pid, timeout, force).await {
            self.log.record(
                LifecycleEvent::new(EventKind::StopFailure, Some(pid))
                    .with_duration(started.elapsed())
                    .with_reason(source.to_string()),
            );
            return Err(SupervisorError::Shutdown { pid, source });
        }

        let mut warnings = Vec::new();
        if let Err(e) = self.pid_file.remove() {
            let message = format!("controller stopped but the PID file was not removed: {}", e);
            debug!("{}", message);
            warnings.push(message);
        }

        let duration = started.elapsed();
        self.log.record(
            LifecycleEvent::new(EventKind::StopSuccess, Some(pid)).with_duration(duration),
        );
        Ok(StopOutcome::Stopped {
            pid,
            duration,
            warnings,
        })
    }

    /// Stop (errors tolerated), pause, then start with the default timeout
    pub async fn restart(&self, timeout: Duration, force: bool) -> Result<RestartOutcome, SupervisorError> {
        let stop = self.stop(timeout, force).await;
        if let Err(e) = &stop {
            warn!("stop during restart failed: {}", e);
        }
        tokio::time::sleep(self.timings.restart_pause).await;
        let start = self.start(DEFAULT_START_TIMEOUT).await?;
        Ok(RestartOutcome { stop, start })
    }

    /// Ping with exponential backoff until ready, `deadline`, or (when a
    /// child PID is given) the child exits
    async fn poll_ready(&self, deadline: Instant, child: Option<u32>) -> Readiness {
        let mut delay = self.timings.backoff_initial;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let attempt = Deadline::after(remaining.min(PING_TIMEOUT));
            match self.probe.ping(attempt).await {
                Ok(()) => return Readiness::Ready,
                Err(e) => debug!("readiness probe failed: {}", e),
            }

            if let Some(pid) = child {
                if !self.processes.is_running(pid) {
                    return Readiness::Exited;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Readiness::TimedOut;
            }
            tokio::time::sleep(delay.min(deadline - now)).await;
            delay = delay.mul_f64(self.timings.backoff_factor).min(self.timings.backoff_cap);
        }
    }

    /// Terminate a child that never became ready
    async fn abandon_child(&self, pid: u32) {
        let grace = self.timings.failed_start_grace;
        if let Err(e) = spawn::graceful_shutdown(&*self.processes, pid, grace, false).await {
            warn!(
                target: BEST_EFFORT_TARGET,
                pid,
                "failed to terminate controller that never became ready: {}",
                e
            );
        }
    }
}
