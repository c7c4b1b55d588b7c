//! The error type every command returns, and its mapping to exit codes,
//! published error codes and suggestions.

use crate::client::{ClientError, TransportError};
use crate::common::config::ConfigError;
use crate::common::exit_code::codes;
use crate::controller::engine::{EngineError, ENGINE_BIN_ENV};
use crate::controller::pid_file::PidFileError;
use crate::controller::spawn::SpawnError;
use crate::controller::supervisor::SupervisorError;
use serde::Serialize;
use std::fmt;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

/// Stable error codes for the JSON error envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    /// Missing required field
    E001,
    /// Invalid syntax
    E002,
    /// Schema violation
    E003,
    /// Provider not found
    E101,
    /// Provider error
    E102,
    /// Config not found
    E201,
    /// Invalid config
    E202,
    /// Missing input
    E301,
    /// Invalid input
    E302,
    /// File not found
    E303,
    /// Resource not found
    E401,
    /// Controller not running
    E501,
    /// Timeout
    E502,
    /// Execution failed
    E503,
    /// Interrupted
    E504,
    /// Internal error
    E900,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 1-based position inside a user-supplied file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedError {
    pub exit_code: i32,
    pub code: ErrorCode,
    pub message: String,
    pub suggestion: Option<String>,
    pub location: Option<Location>,
}

impl TaggedError {
    pub fn new(exit_code: i32, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            code,
            message: message.into(),
            suggestion: None,
            location: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Generic(String),

    #[error("{}", .0.message)]
    Tagged(TaggedError),

    #[error("controller is not running at {endpoint}")]
    ControllerNotRunning { endpoint: String },

    #[error("interrupted")]
    Interrupted,

    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

const START_HINT: &str = "Start it with `conductor controller start`";

impl CliError {
    pub fn tagged(exit_code: i32, code: ErrorCode, message: impl Into<String>) -> Self {
        CliError::Tagged(TaggedError::new(exit_code, code, message))
    }

    /// Attach a suggestion; non-tagged errors are converted to tagged ones
    pub fn with_suggestion(self, suggestion: impl Into<String>) -> Self {
        let mut tagged = match self {
            CliError::Tagged(tagged) => tagged,
            other => TaggedError {
                exit_code: other.exit_code(),
                code: other.error_code(),
                message: other.to_string(),
                suggestion: None,
                location: other.location(),
            },
        };
        tagged.suggestion = Some(suggestion.into());
        CliError::Tagged(tagged)
    }

    pub fn not_found(kind: &str, id: &str) -> Self {
        Self::tagged(codes::GENERAL_ERROR, ErrorCode::E401, format!("{} not found: {}", kind, id))
    }

    pub fn missing_input(message: impl Into<String>) -> Self {
        Self::tagged(codes::MISSING_INPUT, ErrorCode::E301, message)
    }

    /// A prompt was needed but nobody can answer it
    pub fn non_interactive(message: impl Into<String>) -> Self {
        CliError::Tagged(
            TaggedError::new(codes::MISSING_INPUT_NON_INTERACTIVE, ErrorCode::E301, message)
                .with_suggestion("Pass --yes to confirm in non-interactive mode"),
        )
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::tagged(codes::INVALID_USAGE, ErrorCode::E302, message)
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::tagged(codes::GENERAL_ERROR, ErrorCode::E503, message)
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Generic(_) => codes::GENERAL_ERROR,
            CliError::Tagged(tagged) => tagged.exit_code,
            CliError::ControllerNotRunning { .. } => codes::CONTROLLER_NOT_RUNNING,
            CliError::Interrupted => codes::INTERRUPTED,
            CliError::Usage(_) => codes::INVALID_USAGE,
            CliError::Client(e) => client_exit_code(e),
            CliError::Config(e) => match e {
                ConfigError::NotFound { .. } | ConfigError::Read { .. } => codes::GENERAL_ERROR,
                _ => codes::INVALID_USAGE,
            },
            CliError::Supervisor(SupervisorError::Interrupted { .. }) => codes::INTERRUPTED,
            CliError::Supervisor(_)
            | CliError::Engine(_)
            | CliError::Io(_)
            | CliError::Json(_) => codes::GENERAL_ERROR,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            CliError::Generic(_) => ErrorCode::E503,
            CliError::Tagged(tagged) => tagged.code,
            CliError::ControllerNotRunning { .. } => ErrorCode::E501,
            CliError::Interrupted => ErrorCode::E504,
            CliError::Usage(_) => ErrorCode::E302,
            CliError::Client(e) => match e {
                ClientError::ControllerNotRunning { .. } => ErrorCode::E501,
                ClientError::Timeout { .. } => ErrorCode::E502,
                ClientError::NotFound { .. } => ErrorCode::E401,
                ClientError::Transport(TransportError::InvalidEndpoint(_)) => ErrorCode::E202,
                _ => ErrorCode::E503,
            },
            CliError::Supervisor(e) => match e {
                SupervisorError::StartTimeout { .. } => ErrorCode::E502,
                SupervisorError::Interrupted { .. } => ErrorCode::E504,
                SupervisorError::PidFile(PidFileError::Io { .. }) => ErrorCode::E900,
                _ => ErrorCode::E503,
            },
            CliError::Config(e) => match e {
                ConfigError::NotFound { .. } => ErrorCode::E201,
                ConfigError::Read { .. } => ErrorCode::E900,
                ConfigError::Parse { .. } => ErrorCode::E002,
                ConfigError::ListenConflict { .. } | ConfigError::InvalidTcp { .. } => {
                    ErrorCode::E003
                }
                ConfigError::InvalidValue { .. } => ErrorCode::E202,
            },
            CliError::Engine(_) => ErrorCode::E503,
            CliError::Io(e) if e.kind() == io::ErrorKind::NotFound => ErrorCode::E303,
            CliError::Io(_) => ErrorCode::E900,
            CliError::Json(_) => ErrorCode::E503,
        }
    }

    /// One sentence telling the user what to do next, when known
    pub fn suggestion(&self) -> Option<String> {
        match self {
            CliError::Tagged(tagged) => tagged.suggestion.clone(),
            CliError::ControllerNotRunning { .. } => Some(START_HINT.to_string()),
            CliError::Interrupted => None,
            CliError::Usage(_) => Some("Run `conductor help` for usage".to_string()),
            CliError::Client(e) => match e {
                ClientError::ControllerNotRunning { .. } => Some(START_HINT.to_string()),
                ClientError::Timeout { .. } => Some(
                    "Check the controller with `conductor controller status`".to_string(),
                ),
                ClientError::Transport(TransportError::InvalidEndpoint(_)) => Some(
                    "Use unix:<path> or tcp:<host:port> for the controller address".to_string(),
                ),
                _ => None,
            },
            CliError::Supervisor(e) => supervisor_suggestion(e),
            CliError::Config(e) => match e {
                ConfigError::NotFound { .. } => {
                    Some("Check the --config path or run `conductor config path`".to_string())
                }
                ConfigError::Parse { .. } => {
                    Some("Fix the YAML syntax and run `conductor config validate`".to_string())
                }
                ConfigError::ListenConflict { .. } => {
                    Some("Set either socket or tcp, not both".to_string())
                }
                ConfigError::InvalidTcp { .. } => {
                    Some("Use host:port, for example 127.0.0.1:9876".to_string())
                }
                _ => None,
            },
            CliError::Engine(_) => Some(format!(
                "Install conductor-controller next to conductor or set {}",
                ENGINE_BIN_ENV
            )),
            CliError::Generic(_) | CliError::Io(_) | CliError::Json(_) => None,
        }
    }

    pub fn location(&self) -> Option<Location> {
        match self {
            CliError::Tagged(tagged) => tagged.location,
            CliError::Config(e) => e.location().map(|(line, column)| Location { line, column }),
            _ => None,
        }
    }
}

fn client_exit_code(error: &ClientError) -> i32 {
    match error {
        ClientError::ControllerNotRunning { .. } => codes::CONTROLLER_NOT_RUNNING,
        ClientError::Transport(TransportError::InvalidEndpoint(_)) => codes::INVALID_USAGE,
        _ => codes::GENERAL_ERROR,
    }
}

fn supervisor_suggestion(error: &SupervisorError) -> Option<String> {
    match error {
        SupervisorError::NotConductor { .. } => Some(
            "Another program reuses this PID; remove the stale PID file if the controller is not running"
                .to_string(),
        ),
        SupervisorError::StartTimeout { log, .. } | SupervisorError::ExitedDuringStartup { log, .. } => {
            Some(format!("Check the controller log at {}", log.display()))
        }
        SupervisorError::Shutdown { .. } => {
            Some("Retry with `conductor controller stop --force`".to_string())
        }
        SupervisorError::PidFile(PidFileError::Corrupt { path, .. }) => Some(format!(
            "Delete {} if no controller is running",
            path.display()
        )),
        SupervisorError::Spawn(SpawnError::Launch { .. }) => Some(format!(
            "Install conductor-controller next to conductor or set {}",
            ENGINE_BIN_ENV
        )),
        SupervisorError::ForegroundExited { .. } => {
            Some("See the controller output above for the cause".to_string())
        }
        _ => None,
    }
}
