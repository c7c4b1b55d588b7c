//! Hand-off to the controller engine binary.
//!
//! A background start re-invokes the CLI as `conductor --controller-child
//! <engine args>`; that child replaces its image with the engine so the PID
//! recorded by the supervisor stays valid.

use crate::common::config::ControllerConfig;
use crate::client::Endpoint;
use crate::controller::process::ENGINE_BINARY;
use crate::controller::spawn::default_working_dir;
use crate::controller::supervisor::LaunchSpec;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Marker flag recognised by `main` before normal argument parsing
pub const CHILD_MARKER: &str = "--controller-child";
/// Overrides where the engine binary is found
pub const ENGINE_BIN_ENV: &str = "CONDUCTOR_CONTROLLER_BIN";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to resolve the conductor executable: {0}")]
    CurrentExe(#[source] io::Error),

    #[error("failed to exec controller engine {binary:?}: {source}")]
    Exec {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Arguments the engine receives for a resolved configuration
pub fn engine_args(config: &ControllerConfig) -> Vec<String> {
    let mut args = Vec::new();
    match &config.listen {
        Endpoint::Unix(path) => {
            args.push("--socket".to_string());
            args.push(path.display().to_string());
        }
        Endpoint::Tcp(addr) => {
            args.push("--tcp".to_string());
            args.push(addr.clone());
        }
    }
    if config.allow_remote {
        args.push("--allow-remote".to_string());
    }
    if let Some(backend) = &config.backend {
        args.push("--backend".to_string());
        args.push(backend.clone());
    }
    if let Some(dir) = &config.workflows_dir {
        args.push("--workflows-dir".to_string());
        args.push(dir.display().to_string());
    }
    if config.force_insecure {
        args.push("--force-insecure".to_string());
    }
    args
}

/// `$CONDUCTOR_CONTROLLER_BIN`, else `conductor-controller` beside the
/// running executable, else a bare name resolved through `PATH`
pub fn resolve_engine_binary() -> PathBuf {
    if let Some(bin) = std::env::var_os(ENGINE_BIN_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(bin);
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(ENGINE_BINARY)))
        .filter(|candidate| candidate.exists())
        .unwrap_or_else(|| PathBuf::from(ENGINE_BINARY))
}

pub fn launch_spec(config: &ControllerConfig) -> Result<LaunchSpec, EngineError> {
    let binary = std::env::current_exe().map_err(EngineError::CurrentExe)?;
    Ok(LaunchSpec {
        binary,
        engine_binary: resolve_engine_binary(),
        engine_args: engine_args(config),
        controller_log: config.controller_log.clone(),
        working_dir: default_working_dir(&config.state_dir),
    })
}

/// Replace this process with the engine. Returns only if exec fails.
#[cfg(unix)]
pub fn run_child(args: Vec<OsString>) -> EngineError {
    use std::os::unix::process::CommandExt;

    let binary = resolve_engine_binary();
    let source = std::process::Command::new(&binary).args(args).exec();
    EngineError::Exec { binary, source }
}

#[cfg(not(unix))]
pub fn run_child(args: Vec<OsString>) -> EngineError {
    let binary = resolve_engine_binary();
    match std::process::Command::new(&binary).args(args).status() {
        Ok(status) => std::process::exit(status.code().unwrap_or(1)),
        Err(source) => EngineError::Exec { binary, source },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::paths::ConductorPaths;
    use serial_test::serial;

    fn config() -> ControllerConfig {
        ControllerConfig::defaults(&ConductorPaths::with_dirs(
            PathBuf::from("/home/u"),
            PathBuf::from("/home/u/.config/conductor"),
            PathBuf::from("/home/u/.local/share/conductor"),
        ))
    }

    #[test]
    fn test_default_engine_args() {
        assert_eq!(
            engine_args(&config()),
            vec!["--socket", "/home/u/.conductor/conductor.sock"]
        );
    }

    #[test]
    fn test_all_engine_args_are_forwarded() {
        let config = ControllerConfig {
            listen: Endpoint::Tcp("0.0.0.0:9876".into()),
            allow_remote: true,
            backend: Some("postgres".into()),
            workflows_dir: Some(PathBuf::from("/srv/flows")),
            force_insecure: true,
            ..config()
        };
        assert_eq!(
            engine_args(&config),
            vec![
                "--tcp",
                "0.0.0.0:9876",
                "--allow-remote",
                "--backend",
                "postgres",
                "--workflows-dir",
                "/srv/flows",
                "--force-insecure",
            ]
        );
    }

    #[test]
    #[serial]
    fn test_engine_binary_env_override() {
        std::env::set_var(ENGINE_BIN_ENV, "/opt/conductor/bin/engine");
        assert_eq!(resolve_engine_binary(), PathBuf::from("/opt/conductor/bin/engine"));
        std::env::remove_var(ENGINE_BIN_ENV);
        assert!(resolve_engine_binary().ends_with(ENGINE_BINARY));
    }

    #[test]
    fn test_launch_spec_child_args_start_with_marker() {
        let spec = launch_spec(&config()).unwrap();
        let args = spec.child_args();
        assert_eq!(args[0], CHILD_MARKER);
        assert_eq!(&args[1..], engine_args(&config()).as_slice());
        assert_eq!(spec.working_dir, PathBuf::from("/"));
    }
}
