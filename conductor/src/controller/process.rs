//! Liveness and identity checks for a recorded controller PID.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Basename the engine runs under once the child has replaced its image
pub const ENGINE_BINARY: &str = "conductor-controller";

/// Check whether `pid` refers to a live, non-zombie process
#[cfg(unix)]
pub fn is_process_running(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        // EPERM: the process exists but belongs to someone else
        Ok(()) | Err(Errno::EPERM) => !is_zombie(pid),
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_process_running(_pid: u32) -> bool {
    false
}

fn is_zombie(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        // The state is the first field after the parenthesised command name
        if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            if let Some(end) = stat.rfind(')') {
                return stat[end + 1..].split_whitespace().next() == Some("Z");
            }
        }
        false
    }

    #[cfg(all(unix, not(target_os = "linux")))]
    {
        std::process::Command::new("ps")
            .args(["-p", &pid.to_string(), "-o", "stat="])
            .output()
            .ok()
            .and_then(|out| String::from_utf8(out.stdout).ok())
            .map(|stat| stat.trim().starts_with('Z'))
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Executable path (or name, where the OS only exposes that) of `pid`
pub fn process_executable(pid: u32) -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let exe = std::fs::read_link(format!("/proc/{}/exe", pid)).ok()?;
        // A binary replaced on disk while running reads back as "<path> (deleted)"
        let text = exe.to_string_lossy();
        match text.strip_suffix(" (deleted)") {
            Some(original) => Some(PathBuf::from(original)),
            None => Some(exe),
        }
    }

    #[cfg(all(unix, not(target_os = "linux")))]
    {
        let output = std::process::Command::new("ps")
            .args(["-p", &pid.to_string(), "-o", "comm="])
            .output()
            .ok()?;
        let comm = String::from_utf8(output.stdout).ok()?;
        let comm = comm.trim();
        (!comm.is_empty()).then(|| PathBuf::from(comm))
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        None
    }
}

/// Executable basenames that identify a conductor controller process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    allowed: BTreeSet<String>,
}

impl ProcessIdentity {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: names
                .into_iter()
                .map(Into::into)
                .filter(|n: &String| !n.is_empty())
                .collect(),
        }
    }

    /// The running binary, the engine, and any configured extras
    pub fn for_current_exe(extra: &[String]) -> Self {
        let mut names: Vec<String> = vec![ENGINE_BINARY.to_string()];
        if let Some(name) = std::env::current_exe()
            .ok()
            .as_deref()
            .and_then(basename)
        {
            names.push(name);
        }
        names.extend(extra.iter().cloned());
        Self::new(names)
    }

    pub fn allowed(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }

    /// Exact basename match; unknown executables never match
    pub fn matches_path(&self, executable: &Path) -> bool {
        basename(executable)
            .map(|name| self.allowed.contains(&name))
            .unwrap_or(false)
    }

    pub fn is_conductor_process(&self, pid: u32) -> bool {
        process_executable(pid)
            .map(|exe| self.matches_path(&exe))
            .unwrap_or(false)
    }
}

fn basename(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_exact_basename_only() {
        let identity = ProcessIdentity::new(["conductor", ENGINE_BINARY]);
        assert!(identity.matches_path(Path::new("/usr/local/bin/conductor")));
        assert!(identity.matches_path(Path::new("conductor-controller")));
        assert!(!identity.matches_path(Path::new("/usr/bin/conductor-helper")));
        assert!(!identity.matches_path(Path::new("/usr/bin/vim")));
        assert!(!identity.matches_path(Path::new("/")));
    }

    #[test]
    fn test_empty_names_are_ignored() {
        let identity = ProcessIdentity::new(["", "conductor"]);
        assert_eq!(identity.allowed().collect::<Vec<_>>(), vec!["conductor"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_current_process_is_running() {
        assert!(is_process_running(std::process::id()));
        assert!(!is_process_running(0));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_current_process_matches_own_identity() {
        let identity = ProcessIdentity::for_current_exe(&[]);
        assert!(identity.is_conductor_process(std::process::id()));

        let stranger = ProcessIdentity::new(["definitely-not-this-binary"]);
        assert!(!stranger.is_conductor_process(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn test_exited_child_is_not_running() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!is_process_running(pid));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_unreaped_child_counts_as_stopped() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        std::thread::sleep(std::time::Duration::from_millis(300));
        assert!(!is_process_running(pid), "zombie reported as running");
        child.wait().unwrap();
    }
}
