//! Common path management for the conductor CLI

use crate::common::xdg;
use std::path::{Path, PathBuf};

/// Default file-system layout used when the settings file does not override it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConductorPaths {
    /// Home directory the defaults are derived from
    pub home: PathBuf,
    /// Runtime directory (e.g., ~/.conductor)
    pub runtime_dir: PathBuf,
    /// Default PID file path
    pub pid_file: PathBuf,
    /// Default Unix socket path
    pub socket_path: PathBuf,
    /// Config directory holding settings.yaml
    pub config_dir: PathBuf,
    /// State directory holding lifecycle.log and controller.log
    pub state_dir: PathBuf,
}

impl Default for ConductorPaths {
    fn default() -> Self {
        Self::with_dirs(xdg::home_dir(), xdg::get_config_dir(), xdg::get_data_dir())
    }
}

impl ConductorPaths {
    /// Create a new ConductorPaths instance with default paths
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the layout from explicit base directories
    pub fn with_dirs(home: PathBuf, config_dir: PathBuf, state_dir: PathBuf) -> Self {
        let runtime_dir = home.join(".conductor");
        Self {
            pid_file: runtime_dir.join("conductor.pid"),
            socket_path: runtime_dir.join("conductor.sock"),
            runtime_dir,
            home,
            config_dir,
            state_dir,
        }
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("settings.yaml")
    }

    pub fn lifecycle_log(&self) -> PathBuf {
        self.state_dir.join("lifecycle.log")
    }

    pub fn controller_log(&self) -> PathBuf {
        self.state_dir.join("controller.log")
    }

    /// Replace well-known directory prefixes with `<config-dir>`, `<state-dir>`
    /// or `<home>` so previews never leak the user's real layout.
    pub fn placeholder(&self, path: &Path) -> String {
        let prefixes = [
            (&self.config_dir, "<config-dir>"),
            (&self.state_dir, "<state-dir>"),
            (&self.home, "<home>"),
        ];
        for (prefix, label) in prefixes {
            if let Ok(rest) = path.strip_prefix(prefix) {
                if rest.as_os_str().is_empty() {
                    return label.to_string();
                }
                return format!("{}/{}", label, rest.display());
            }
        }
        path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConductorPaths {
        ConductorPaths::with_dirs(
            PathBuf::from("/home/ada"),
            PathBuf::from("/home/ada/.config/conductor"),
            PathBuf::from("/home/ada/.local/share/conductor"),
        )
    }

    #[test]
    fn test_default_layout() {
        let paths = sample();
        assert_eq!(paths.pid_file, PathBuf::from("/home/ada/.conductor/conductor.pid"));
        assert_eq!(
            paths.lifecycle_log(),
            PathBuf::from("/home/ada/.local/share/conductor/lifecycle.log")
        );
        assert_eq!(
            paths.settings_file(),
            PathBuf::from("/home/ada/.config/conductor/settings.yaml")
        );
    }

    #[test]
    fn test_placeholder_prefers_most_specific_dir() {
        let paths = sample();
        assert_eq!(
            paths.placeholder(&paths.settings_file()),
            "<config-dir>/settings.yaml"
        );
        assert_eq!(
            paths.placeholder(&paths.controller_log()),
            "<state-dir>/controller.log"
        );
        assert_eq!(
            paths.placeholder(&paths.pid_file),
            "<home>/.conductor/conductor.pid"
        );
        assert_eq!(paths.placeholder(Path::new("/srv/x")), "/srv/x");
    }
}
