//! The controller PID file: one positive decimal integer and a newline.
//!
//! Writes go through a temporary file in the same directory that is synced
//! and then linked into place, so readers never observe a partial file and an
//! existing PID file is never overwritten.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PidFileError {
    #[error("PID file {path:?} does not exist")]
    NotFound { path: PathBuf },

    #[error("PID file {path:?} is corrupt (contents: {contents:?})")]
    Corrupt { path: PathBuf, contents: String },

    #[error("PID file {path:?} already exists")]
    AlreadyExists { path: PathBuf },

    #[error("PID {pid} is not a valid process id")]
    InvalidPid { pid: u32 },

    #[error("failed to access PID file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PidFileError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PidFileError::NotFound { .. })
    }
}

#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically create the PID file; fails if one is already in place
    pub fn create(&self, pid: u32) -> Result<(), PidFileError> {
        if pid == 0 {
            return Err(PidFileError::InvalidPid { pid });
        }
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "conductor.pid".to_string());
        let temp = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

        let result = self.write_temp(&temp, pid).and_then(|()| self.publish(&temp));
        if temp.exists() {
            let _ = fs::remove_file(&temp);
        }
        result?;

        sync_dir(dir);
        debug!(pid, path = ?self.path, "wrote PID file");
        Ok(())
    }

    /// Read the recorded PID
    pub fn read(&self) -> Result<u32, PidFileError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(PidFileError::NotFound {
                    path: self.path.clone(),
                })
            }
            Err(e) => return Err(self.io_error(e)),
        };
        parse_pid(&contents).ok_or_else(|| PidFileError::Corrupt {
            path: self.path.clone(),
            contents,
        })
    }

    /// Delete the PID file; a missing file is not an error
    pub fn remove(&self) -> Result<(), PidFileError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn write_temp(&self, temp: &Path, pid: u32) -> Result<(), PidFileError> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(temp)
            .map_err(|e| self.io_error(e))?;
        file.write_all(format!("{}\n", pid).as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| self.io_error(e))
    }

    /// Link the synced temp file into place. Linking fails when the target
    /// exists, which gives create-if-absent semantics in one syscall.
    fn publish(&self, temp: &Path) -> Result<(), PidFileError> {
        match fs::hard_link(temp, &self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(PidFileError::AlreadyExists {
                    path: self.path.clone(),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::Unsupported => {
                // Filesystems without hard links fall back to check-then-rename.
                if self.path.exists() {
                    return Err(PidFileError::AlreadyExists {
                        path: self.path.clone(),
                    });
                }
                fs::rename(temp, &self.path).map_err(|e| self.io_error(e))
            }
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn io_error(&self, source: io::Error) -> PidFileError {
        PidFileError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// A positive decimal integer, optionally followed by a line ending
fn parse_pid(contents: &str) -> Option<u32> {
    let digits = contents
        .strip_suffix('\n')
        .map(|s| s.strip_suffix('\r').unwrap_or(s))
        .unwrap_or(contents);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u32>().ok().filter(|pid| *pid > 0)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = fs::File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = PidFile::new(dir.path().join("nested").join("conductor.pid"));

        pid_file.create(1234).unwrap();
        assert_eq!(fs::read_to_string(pid_file.path()).unwrap(), "1234\n");
        assert_eq!(pid_file.read().unwrap(), 1234);

        pid_file.remove().unwrap();
        assert!(pid_file.read().unwrap_err().is_not_found());
        pid_file.remove().unwrap();
    }

    #[test]
    fn test_create_never_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = PidFile::new(dir.path().join("conductor.pid"));
        pid_file.create(1234).unwrap();

        let err = pid_file.create(5678).unwrap_err();
        assert!(matches!(err, PidFileError::AlreadyExists { .. }));
        assert_eq!(pid_file.read().unwrap(), 1234);

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1, "temp files leaked: {leftovers:?}");
    }

    #[test]
    fn test_rejects_zero_pid() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = PidFile::new(dir.path().join("conductor.pid"));
        assert!(matches!(
            pid_file.create(0),
            Err(PidFileError::InvalidPid { pid: 0 })
        ));
        assert!(!pid_file.path().exists());
    }

    #[test]
    fn test_corrupt_contents() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = PidFile::new(dir.path().join("conductor.pid"));
        for contents in ["", "\n", "abc\n", "-5\n", "0\n", "12 34\n", "1234\n\n", " 1234"] {
            fs::write(pid_file.path(), contents).unwrap();
            assert!(
                matches!(pid_file.read(), Err(PidFileError::Corrupt { .. })),
                "accepted {contents:?}"
            );
        }
        fs::write(pid_file.path(), "42").unwrap();
        assert_eq!(pid_file.read().unwrap(), 42);
        fs::write(pid_file.path(), "42\r\n").unwrap();
        assert_eq!(pid_file.read().unwrap(), 42);
    }
}
