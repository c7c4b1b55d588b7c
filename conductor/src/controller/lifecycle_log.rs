//! Append-only, one-JSON-object-per-line record of supervision actions.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use crate::controller::BEST_EFFORT_TARGET;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    StartSuccess,
    StartFailure,
    AlreadyRunning,
    StalePid,
    Stop,
    StopSuccess,
    StopFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// RFC 3339 with nanoseconds
    pub timestamp: String,
    pub kind: EventKind,
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl LifecycleEvent {
    pub fn new(kind: EventKind, pid: Option<u32>) -> Self {
        Self {
            timestamp: String::new(),
            kind,
            pid,
            duration_ms: None,
            reason: None,
            args: Vec::new(),
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = Some(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Writer for `<state-dir>/lifecycle.log`. Writes are best-effort: a failure
/// is reported through `tracing` and never returned to the caller.
#[derive(Debug)]
pub struct LifecycleLog {
    path: PathBuf,
    last_timestamp: Mutex<Option<DateTime<Utc>>>,
}

impl LifecycleLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_timestamp: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stamp and append one event
    pub fn record(&self, mut event: LifecycleEvent) {
        event.timestamp = self
            .next_timestamp()
            .to_rfc3339_opts(SecondsFormat::Nanos, true);
        if let Err(e) = self.append(&event) {
            warn!(
                target: BEST_EFFORT_TARGET,
                path = ?self.path,
                event = ?event.kind,
                "failed to write lifecycle log: {}",
                e
            );
        }
    }

    /// Read every well-formed event back, skipping lines that fail to parse
    pub fn read_all(&self) -> io::Result<Vec<LifecycleEvent>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    fn append(&self, event: &LifecycleEvent) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        // One write per record keeps concurrent appenders from splitting lines
        file.write_all(&line)
    }

    /// Wall clock, clamped so it never goes backwards within this log
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let mut last = match self.last_timestamp.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let stamped = match *last {
            Some(previous) if previous > now => previous,
            _ => now,
        };
        *last = Some(stamped);
        stamped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let log = LifecycleLog::new(dir.path().join("state").join("lifecycle.log"));

        log.record(LifecycleEvent::new(EventKind::Start, None).with_args(["--tcp", "127.0.0.1:9876"]));
        log.record(
            LifecycleEvent::new(EventKind::StartSuccess, Some(1234))
                .with_duration(Duration::from_millis(1500)),
        );
        log.record(LifecycleEvent::new(EventKind::StalePid, Some(9999)).with_reason("process not running"));

        let raw = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 3);

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["kind"], "start_success");
        assert_eq!(second["pid"], 1234);
        assert_eq!(second["duration_ms"], 1500);
        assert!(second.get("reason").is_none());

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert!(first["pid"].is_null());
        assert_eq!(first["args"][1], "127.0.0.1:9876");

        let events = log.read_all().unwrap();
        assert_eq!(events[2].kind, EventKind::StalePid);
        assert_eq!(events[2].reason.as_deref(), Some("process not running"));
    }

    #[test]
    fn test_timestamps_are_rfc3339_and_non_decreasing() {
        let dir = tempfile::tempdir().unwrap();
        let log = LifecycleLog::new(dir.path().join("lifecycle.log"));
        for _ in 0..50 {
            log.record(LifecycleEvent::new(EventKind::Stop, Some(1)));
        }
        let stamps: Vec<DateTime<Utc>> = log
            .read_all()
            .unwrap()
            .iter()
            .map(|e| DateTime::parse_from_rfc3339(&e.timestamp).unwrap().with_timezone(&Utc))
            .collect();
        assert_eq!(stamps.len(), 50);
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_clock_stepping_backwards_is_clamped() {
        let log = LifecycleLog::new("/nonexistent/lifecycle.log");
        let future = Utc::now() + chrono::Duration::hours(1);
        *log.last_timestamp.lock().unwrap() = Some(future);
        assert_eq!(log.next_timestamp(), future);
    }

    #[test]
    fn test_write_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the parent directory should be
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let log = LifecycleLog::new(blocker.join("lifecycle.log"));
        log.record(LifecycleEvent::new(EventKind::Start, None));
        assert!(log.read_all().is_err() || log.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_appends_to_existing_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lifecycle.log");
        LifecycleLog::new(&path).record(LifecycleEvent::new(EventKind::Start, None));
        LifecycleLog::new(&path).record(LifecycleEvent::new(EventKind::StopSuccess, Some(2)));
        let events = LifecycleLog::new(&path).read_all().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, EventKind::StopSuccess);
    }
}
