//! Output contract shared by every command: styling detection, semantic
//! renderers, and the `--json` envelopes.

use crate::common::error::CliError;
use colored::Colorize;
use serde_json::{json, Map, Value};
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Version of the JSON envelope format
pub const ENVELOPE_VERSION: &str = "1.0";

/// Options every command accepts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalFlags {
    /// `-v` count: 1 = info, 2+ = debug
    pub verbose: u8,
    pub quiet: bool,
    pub json: bool,
    pub config: Option<PathBuf>,
    pub no_color: bool,
}

/// The parts of the environment that decide whether to style output
#[derive(Debug, Clone, Default)]
pub struct StyleEnv {
    pub stdout_is_terminal: bool,
    pub no_color: bool,
    pub force_color: bool,
    pub term: Option<String>,
}

impl StyleEnv {
    pub fn detect() -> Self {
        let var = |key: &str| std::env::var(key).ok();
        Self {
            stdout_is_terminal: io::stdout().is_terminal(),
            no_color: std::env::var_os("NO_COLOR").is_some(),
            force_color: var("FORCE_COLOR")
                .map(|v| !matches!(v.as_str(), "" | "0" | "false"))
                .unwrap_or(false),
            term: var("TERM"),
        }
    }
}

/// `--no-color` always wins; otherwise `FORCE_COLOR` enables styling, and
/// without it stdout must be a terminal with a usable `TERM` and no `NO_COLOR`.
pub fn styling_enabled(no_color_flag: bool, env: &StyleEnv) -> bool {
    if no_color_flag {
        return false;
    }
    if env.force_color {
        return true;
    }
    let term_ok = matches!(env.term.as_deref(), Some(term) if !term.is_empty() && term != "dumb");
    env.stdout_is_terminal && !env.no_color && term_ok
}

#[derive(Debug, Clone)]
enum Sink {
    Std,
    Buffer {
        stdout: Arc<Mutex<Vec<u8>>>,
        stderr: Arc<Mutex<Vec<u8>>>,
    },
}

/// Captured output of a buffered context
#[derive(Debug, Clone)]
pub struct Captured {
    stdout: Arc<Mutex<Vec<u8>>>,
    stderr: Arc<Mutex<Vec<u8>>>,
}

impl Captured {
    pub fn stdout(&self) -> String {
        read_buffer(&self.stdout)
    }

    pub fn stderr(&self) -> String {
        read_buffer(&self.stderr)
    }
}

fn read_buffer(buffer: &Mutex<Vec<u8>>) -> String {
    let guard = match buffer.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    String::from_utf8_lossy(&guard).into_owned()
}

/// Immutable output settings handed to every command
#[derive(Debug, Clone)]
pub struct OutputContext {
    flags: GlobalFlags,
    styled: bool,
    command: String,
    sink: Sink,
}

impl OutputContext {
    pub fn new(flags: GlobalFlags, styled: bool, command: impl Into<String>) -> Self {
        Self {
            flags,
            styled,
            command: command.into(),
            sink: Sink::Std,
        }
    }

    /// A context writing into memory, for tests
    pub fn buffered(flags: GlobalFlags, command: impl Into<String>) -> (Self, Captured) {
        let stdout = Arc::new(Mutex::new(Vec::new()));
        let stderr = Arc::new(Mutex::new(Vec::new()));
        let ctx = Self {
            flags,
            styled: false,
            command: command.into(),
            sink: Sink::Buffer {
                stdout: stdout.clone(),
                stderr: stderr.clone(),
            },
        };
        (ctx, Captured { stdout, stderr })
    }

    pub fn flags(&self) -> &GlobalFlags {
        &self.flags
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn json(&self) -> bool {
        self.flags.json
    }

    pub fn quiet(&self) -> bool {
        self.flags.quiet
    }

    pub fn verbose(&self) -> bool {
        self.flags.verbose > 0
    }

    pub fn styled(&self) -> bool {
        self.styled
    }

    pub fn ok(&self, text: &str) -> String {
        self.paint(text, |t| t.green().to_string())
    }

    pub fn warn(&self, text: &str) -> String {
        self.paint(text, |t| t.yellow().to_string())
    }

    pub fn error(&self, text: &str) -> String {
        self.paint(text, |t| t.red().bold().to_string())
    }

    pub fn muted(&self, text: &str) -> String {
        self.paint(text, |t| t.dimmed().to_string())
    }

    pub fn header(&self, text: &str) -> String {
        self.paint(text, |t| t.bold().underline().to_string())
    }

    pub fn bold(&self, text: &str) -> String {
        self.paint(text, |t| t.bold().to_string())
    }

    fn paint(&self, text: &str, style: impl FnOnce(&str) -> String) -> String {
        if self.styled {
            style(text)
        } else {
            text.to_string()
        }
    }

    /// Requested data; printed even with `--quiet`
    pub fn print(&self, line: impl AsRef<str>) {
        self.write_stdout(line.as_ref());
    }

    /// Progress or confirmation text; suppressed by `--quiet` and `--json`
    pub fn status(&self, line: impl AsRef<str>) {
        if !self.flags.quiet && !self.flags.json {
            self.write_stdout(line.as_ref());
        }
    }

    /// Extra detail shown only with `--verbose`
    pub fn detail(&self, line: impl AsRef<str>) {
        if self.verbose() && !self.flags.quiet && !self.flags.json {
            let muted = self.muted(line.as_ref());
            self.write_stderr(&muted);
        }
    }

    pub fn warning(&self, message: impl AsRef<str>) {
        if !self.flags.quiet {
            self.failure_warning(message);
        }
    }

    /// A best-effort step failed and the command carried on; `--quiet`
    /// does not hide it
    pub fn failure_warning(&self, message: impl AsRef<str>) {
        let line = format!("{} {}", self.warn("Warning:"), message.as_ref());
        self.write_stderr(&line);
    }

    /// Emit the success envelope with `data` merged in
    pub fn emit_json(&self, data: Value) {
        let envelope = success_envelope(&self.command, data);
        self.write_stdout(&pretty(&envelope));
    }

    /// Report a failed command on the channel its mode requires
    pub fn report_error(&self, err: &CliError) {
        if self.flags.json {
            let envelope = error_envelope(&self.command, err);
            self.write_stdout(&pretty(&envelope));
            return;
        }
        let mut text = format!("{} {}", self.error("Error:"), err);
        if let Some(suggestion) = err.suggestion() {
            text.push_str(&format!("\n{} {}", self.bold("Suggestion:"), suggestion));
        }
        self.write_stderr(&text);
    }

    fn write_stdout(&self, line: &str) {
        match &self.sink {
            Sink::Std => write_line(&mut io::stdout().lock(), line),
            Sink::Buffer { stdout, .. } => push_line(stdout, line),
        }
    }

    fn write_stderr(&self, line: &str) {
        match &self.sink {
            Sink::Std => write_line(&mut io::stderr().lock(), line),
            Sink::Buffer { stderr, .. } => push_line(stderr, line),
        }
    }
}

/// Broken pipes (e.g. `| head`) end output quietly
fn write_line(out: &mut impl Write, line: &str) {
    let _ = writeln!(out, "{}", line).and_then(|()| out.flush());
}

fn push_line(buffer: &Mutex<Vec<u8>>, line: &str) {
    let mut guard = match buffer.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard.extend_from_slice(line.as_bytes());
    guard.push(b'\n');
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// `{"@version","command","success":true, ...data}`; non-object data goes
/// under `"data"`
pub fn success_envelope(command: &str, data: Value) -> Value {
    let mut envelope = Map::new();
    envelope.insert("@version".into(), json!(ENVELOPE_VERSION));
    envelope.insert("command".into(), json!(command));
    envelope.insert("success".into(), json!(true));
    match data {
        Value::Object(fields) => {
            for (key, value) in fields {
                if !matches!(key.as_str(), "@version" | "command" | "success") {
                    envelope.insert(key, value);
                }
            }
        }
        Value::Null => {}
        other => {
            envelope.insert("data".into(), other);
        }
    }
    Value::Object(envelope)
}

pub fn error_envelope(command: &str, err: &CliError) -> Value {
    let mut entry = Map::new();
    entry.insert("code".into(), json!(err.error_code().to_string()));
    entry.insert("message".into(), json!(err.to_string()));
    if let Some(location) = err.location() {
        entry.insert("location".into(), json!(location));
    }
    if let Some(suggestion) = err.suggestion() {
        entry.insert("suggestion".into(), json!(suggestion));
    }
    json!({
        "@version": ENVELOPE_VERSION,
        "command": command,
        "success": false,
        "errors": [Value::Object(entry)],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::ErrorCode;

    fn env(terminal: bool, no_color: bool, force: bool, term: Option<&str>) -> StyleEnv {
        StyleEnv {
            stdout_is_terminal: terminal,
            no_color,
            force_color: force,
            term: term.map(String::from),
        }
    }

    #[test]
    fn test_styling_detection() {
        assert!(styling_enabled(false, &env(true, false, false, Some("xterm-256color"))));
        assert!(!styling_enabled(false, &env(false, false, false, Some("xterm"))));
        assert!(!styling_enabled(false, &env(true, true, false, Some("xterm"))));
        assert!(!styling_enabled(false, &env(true, false, false, Some("dumb"))));
        assert!(!styling_enabled(false, &env(true, false, false, Some(""))));
        assert!(!styling_enabled(false, &env(true, false, false, None)));
        assert!(styling_enabled(false, &env(false, true, true, None)));
        assert!(!styling_enabled(true, &env(true, false, true, Some("xterm"))));
    }

    #[test]
    fn test_plain_renderers() {
        let (ctx, _) = OutputContext::buffered(GlobalFlags::default(), "version");
        assert_eq!(ctx.ok("done"), "done");
        assert_eq!(ctx.header("Runs"), "Runs");
        assert_eq!(ctx.muted("-"), "-");
    }

    #[test]
    fn test_quiet_and_json_suppress_status_only() {
        let flags = GlobalFlags {
            quiet: true,
            ..GlobalFlags::default()
        };
        let (ctx, out) = OutputContext::buffered(flags, "runs output");
        ctx.status("Fetching output...");
        ctx.warning("slow");
        ctx.print("{\"a\":1}");
        assert_eq!(out.stdout(), "{\"a\":1}\n");
        assert_eq!(out.stderr(), "");
        ctx.failure_warning("PID file was not removed");
        assert_eq!(out.stderr(), "Warning: PID file was not removed\n");

        let flags = GlobalFlags {
            json: true,
            ..GlobalFlags::default()
        };
        let (ctx, out) = OutputContext::buffered(flags, "controller stop");
        ctx.status("Stopping...");
        ctx.emit_json(json!({"stopped": true}));
        let value: Value = serde_json::from_str(&out.stdout()).unwrap();
        assert_eq!(value["@version"], "1.0");
        assert_eq!(value["command"], "controller stop");
        assert_eq!(value["success"], true);
        assert_eq!(value["stopped"], true);
    }

    #[test]
    fn test_success_envelope_wraps_non_objects() {
        let value = success_envelope("runs output", json!([1, 2]));
        assert_eq!(value["data"], json!([1, 2]));
        let value = success_envelope("x", json!({"success": false, "n": 1}));
        assert_eq!(value["success"], true);
        assert_eq!(value["n"], 1);
    }

    #[test]
    fn test_error_reporting() {
        let err = CliError::ControllerNotRunning {
            endpoint: "unix:/tmp/c.sock".into(),
        };
        let (ctx, out) = OutputContext::buffered(GlobalFlags::default(), "runs list");
        ctx.report_error(&err);
        assert_eq!(
            out.stderr(),
            "Error: controller is not running at unix:/tmp/c.sock\nSuggestion: Start it with `conductor controller start`\n"
        );

        let envelope = error_envelope("runs list", &err);
        assert_eq!(envelope["success"], false);
        assert_eq!(envelope["errors"][0]["code"], ErrorCode::E501.to_string());
        assert!(envelope["errors"][0].get("location").is_none());
    }

    #[test]
    fn test_error_location_is_reported() {
        let source = crate::common::config::SettingsFile::parse(
            std::path::Path::new("s.yaml"),
            "controller: [\n",
        )
        .unwrap_err();
        let envelope = error_envelope("config validate", &CliError::from(source));
        assert_eq!(envelope["errors"][0]["code"], "E002");
        assert!(envelope["errors"][0]["location"]["line"].as_u64().unwrap() >= 1);
    }
}
