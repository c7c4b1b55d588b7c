//! Settings file loading and controller configuration resolution.
//!
//! Precedence: command-line flags > environment > settings file > defaults.
//! Within one layer, setting both `socket` and `tcp` is an error; a layer that
//! sets either replaces the listen descriptor of every lower layer.

use crate::client::Endpoint;
use crate::common::paths::ConductorPaths;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const ENV_CONFIG: &str = "CONDUCTOR_CONFIG";
pub const ENV_SOCKET: &str = "CONDUCTOR_SOCKET";
pub const ENV_TCP: &str = "CONDUCTOR_TCP";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid YAML in {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{origin} sets both socket and tcp; choose one listen address")]
    ListenConflict { origin: &'static str },

    #[error("invalid tcp address {addr:?} (expected host:port)")]
    InvalidTcp { addr: String },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}

impl ConfigError {
    /// Line and column of a YAML syntax error, 1-based
    pub fn location(&self) -> Option<(usize, usize)> {
        match self {
            ConfigError::Parse { source, .. } => source
                .location()
                .map(|loc| (loc.line(), loc.column())),
            _ => None,
        }
    }
}

/// The `controller:` section of settings.yaml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSection {
    pub socket: Option<PathBuf>,
    pub tcp: Option<String>,
    pub allow_remote: bool,
    pub workflows_dir: Option<PathBuf>,
    pub backend: Option<String>,
    pub pid_file: Option<PathBuf>,
    pub force_insecure: bool,
    /// Extra executable basenames accepted as the controller
    pub identity_allowlist: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsDocument {
    #[serde(default)]
    controller: ControllerSection,
}

/// A loaded settings file. Sections other than `controller:` are kept only
/// so `config show` can print them.
#[derive(Debug, Clone)]
pub struct SettingsFile {
    pub path: PathBuf,
    pub exists: bool,
    pub raw: serde_yaml::Value,
    pub controller: ControllerSection,
}

impl SettingsFile {
    /// Load `path`. A missing file is only an error when it was named
    /// explicitly (`--config` or `CONDUCTOR_CONFIG`).
    pub fn load(path: &Path, explicit: bool) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if explicit {
                    return Err(ConfigError::NotFound {
                        path: path.to_path_buf(),
                    });
                }
                debug!(path = ?path, "no settings file, using defaults");
                return Ok(Self::empty(path));
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::parse(path, &contents)
    }

    pub fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        let parse_error = |source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        };
        if contents.trim().is_empty() {
            return Ok(Self {
                exists: true,
                ..Self::empty(path)
            });
        }
        let raw: serde_yaml::Value = serde_yaml::from_str(contents).map_err(parse_error)?;
        let document: SettingsDocument = serde_yaml::from_value(raw.clone()).map_err(parse_error)?;
        Ok(Self {
            path: path.to_path_buf(),
            exists: true,
            raw,
            controller: document.controller,
        })
    }

    fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            exists: false,
            raw: serde_yaml::Value::Null,
            controller: ControllerSection::default(),
        }
    }
}

/// Listen and launch overrides from one layer (flags or environment)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub socket: Option<PathBuf>,
    pub tcp: Option<String>,
    pub allow_remote: bool,
    pub workflows_dir: Option<PathBuf>,
    pub backend: Option<String>,
    pub force_insecure: bool,
}

impl Overrides {
    /// `CONDUCTOR_SOCKET` / `CONDUCTOR_TCP`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        Self {
            socket: non_empty(ENV_SOCKET).map(PathBuf::from),
            tcp: non_empty(ENV_TCP),
            ..Self::default()
        }
    }
}

fn listen_from(
    origin: &'static str,
    socket: Option<&PathBuf>,
    tcp: Option<&String>,
) -> Result<Option<Endpoint>, ConfigError> {
    match (socket, tcp) {
        (Some(_), Some(_)) => Err(ConfigError::ListenConflict { origin }),
        (Some(path), None) => Ok(Some(Endpoint::Unix(path.clone()))),
        (None, Some(addr)) => {
            let addr = addr.strip_prefix("tcp:").unwrap_or(addr);
            if !crate::client::transport::is_host_port(addr) {
                return Err(ConfigError::InvalidTcp {
                    addr: addr.to_string(),
                });
            }
            Ok(Some(Endpoint::Tcp(addr.to_string())))
        }
        (None, None) => Ok(None),
    }
}

/// Fully resolved controller configuration; immutable once built
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub listen: Endpoint,
    pub allow_remote: bool,
    pub workflows_dir: Option<PathBuf>,
    pub backend: Option<String>,
    pub pid_file: PathBuf,
    pub force_insecure: bool,
    pub identity_allowlist: Vec<String>,
    pub settings_path: PathBuf,
    pub lifecycle_log: PathBuf,
    pub controller_log: PathBuf,
    pub state_dir: PathBuf,
}

impl ControllerConfig {
    pub fn resolve(
        settings: &SettingsFile,
        env: &Overrides,
        flags: &Overrides,
        paths: &ConductorPaths,
    ) -> Result<Self, ConfigError> {
        let file = &settings.controller;
        let from_file = listen_from("settings file", file.socket.as_ref(), file.tcp.as_ref())?;
        let from_env = listen_from("environment", env.socket.as_ref(), env.tcp.as_ref())?;
        let from_flags = listen_from("command line", flags.socket.as_ref(), flags.tcp.as_ref())?;
        let listen = from_flags
            .or(from_env)
            .or(from_file)
            .unwrap_or_else(|| Endpoint::Unix(paths.socket_path.clone()));

        let backend = flags.backend.clone().or_else(|| file.backend.clone());
        if let Some(backend) = &backend {
            if backend.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "backend",
                    message: "must not be empty".to_string(),
                });
            }
        }

        let pid_file = file.pid_file.clone().unwrap_or_else(|| paths.pid_file.clone());
        if pid_file.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "pid_file",
                message: "must not be empty".to_string(),
            });
        }

        Ok(Self {
            listen,
            allow_remote: flags.allow_remote || env.allow_remote || file.allow_remote,
            workflows_dir: flags
                .workflows_dir
                .clone()
                .or_else(|| file.workflows_dir.clone()),
            backend,
            pid_file,
            force_insecure: flags.force_insecure || file.force_insecure,
            identity_allowlist: file.identity_allowlist.clone(),
            settings_path: settings.path.clone(),
            lifecycle_log: paths.lifecycle_log(),
            controller_log: paths.controller_log(),
            state_dir: paths.state_dir.clone(),
        })
    }

    /// Resolve without a settings file or overrides
    pub fn defaults(paths: &ConductorPaths) -> Self {
        Self {
            listen: Endpoint::Unix(paths.socket_path.clone()),
            allow_remote: false,
            workflows_dir: None,
            backend: None,
            pid_file: paths.pid_file.clone(),
            force_insecure: false,
            identity_allowlist: Vec::new(),
            settings_path: paths.settings_file(),
            lifecycle_log: paths.lifecycle_log(),
            controller_log: paths.controller_log(),
            state_dir: paths.state_dir.clone(),
        }
    }
}

/// Pick the settings path: `--config`/`CONDUCTOR_CONFIG` (explicit) or the default
pub fn settings_path(explicit: Option<&Path>, paths: &ConductorPaths) -> (PathBuf, bool) {
    match explicit {
        Some(path) => (path.to_path_buf(), true),
        None => (paths.settings_file(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> ConductorPaths {
        ConductorPaths::with_dirs(
            PathBuf::from("/home/u"),
            PathBuf::from("/home/u/.config/conductor"),
            PathBuf::from("/home/u/.local/share/conductor"),
        )
    }

    fn settings(yaml: &str) -> SettingsFile {
        SettingsFile::parse(Path::new("/tmp/settings.yaml"), yaml).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::defaults(&paths());
        assert_eq!(
            config.listen,
            Endpoint::Unix(PathBuf::from("/home/u/.conductor/conductor.sock"))
        );
        assert_eq!(config.pid_file, PathBuf::from("/home/u/.conductor/conductor.pid"));
        assert_eq!(
            config.lifecycle_log,
            PathBuf::from("/home/u/.local/share/conductor/lifecycle.log")
        );
        assert!(!config.allow_remote);
    }

    #[test]
    fn test_file_values_apply() {
        let file = settings(
            "controller:\n  tcp: 127.0.0.1:9876\n  backend: postgres\n  pid_file: /var/run/c.pid\n  identity_allowlist: [conductord]\nproviders:\n  openai: {}\n",
        );
        let config =
            ControllerConfig::resolve(&file, &Overrides::default(), &Overrides::default(), &paths())
                .unwrap();
        assert_eq!(config.listen, Endpoint::Tcp("127.0.0.1:9876".into()));
        assert_eq!(config.backend.as_deref(), Some("postgres"));
        assert_eq!(config.pid_file, PathBuf::from("/var/run/c.pid"));
        assert_eq!(config.identity_allowlist, vec!["conductord"]);
        assert!(file.raw.get("providers").is_some());
    }

    #[test]
    fn test_precedence_flags_over_env_over_file() {
        let file = settings("controller:\n  socket: /from/file.sock\n");
        let env = Overrides::from_lookup(|key| {
            (key == ENV_TCP).then(|| "localhost:7000".to_string())
        });
        let config =
            ControllerConfig::resolve(&file, &env, &Overrides::default(), &paths()).unwrap();
        assert_eq!(config.listen, Endpoint::Tcp("localhost:7000".into()));

        let flags = Overrides {
            socket: Some(PathBuf::from("/from/flag.sock")),
            backend: Some("sqlite".into()),
            ..Overrides::default()
        };
        let config = ControllerConfig::resolve(&file, &env, &flags, &paths()).unwrap();
        assert_eq!(config.listen, Endpoint::Unix(PathBuf::from("/from/flag.sock")));
        assert_eq!(config.backend.as_deref(), Some("sqlite"));
    }

    #[test]
    fn test_socket_and_tcp_in_one_layer_conflict() {
        let file = settings("controller:\n  socket: /a.sock\n  tcp: 127.0.0.1:1\n");
        let err = ControllerConfig::resolve(&file, &Overrides::default(), &Overrides::default(), &paths())
            .unwrap_err();
        assert!(matches!(err, ConfigError::ListenConflict { origin: "settings file" }));

        let flags = Overrides {
            socket: Some(PathBuf::from("/a.sock")),
            tcp: Some("127.0.0.1:1".into()),
            ..Overrides::default()
        };
        let err = ControllerConfig::resolve(&settings(""), &Overrides::default(), &flags, &paths())
            .unwrap_err();
        assert!(matches!(err, ConfigError::ListenConflict { origin: "command line" }));
    }

    #[test]
    fn test_invalid_tcp_address() {
        let flags = Overrides {
            tcp: Some("localhost".into()),
            ..Overrides::default()
        };
        let err = ControllerConfig::resolve(&settings(""), &Overrides::default(), &flags, &paths())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTcp { .. }));
    }

    #[test]
    fn test_invalid_yaml_reports_location() {
        let err = SettingsFile::parse(Path::new("s.yaml"), "controller:\n  socket: [unclosed\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.location().is_some());
    }

    #[test]
    fn test_wrong_field_type_is_parse_error() {
        let err = SettingsFile::parse(Path::new("s.yaml"), "controller:\n  allow_remote: maybe\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        let loaded = SettingsFile::load(&path, false).unwrap();
        assert!(!loaded.exists);
        assert!(matches!(
            SettingsFile::load(&path, true),
            Err(ConfigError::NotFound { .. })
        ));
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let env = Overrides::from_lookup(|_| Some(String::new()));
        assert_eq!(env, Overrides::default());
    }
}
