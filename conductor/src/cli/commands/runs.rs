//! Run history: list, show, output, logs and cancel

use crate::cli::dry_run::DryRun;
use crate::cli::output::OutputContext;
use crate::cli::utils::{checked_id, cost, duration, items, lookup, table, text, text_any, timestamp, truncate};
use crate::cli::Session;
use crate::client::sse::decode_stream;
use crate::client::{path_with_query, DaemonClient, EVENT_STREAM};
use crate::common::error::{CliError, Result};
use crate::common::status::{classify, format_status, StatusClass};
use crate::common::timestamp::format_log_time;
use clap::{Args, Subcommand};
use colored::Colorize;
use regex::Regex;
use serde_json::{json, Value};
use tabled::Tabled;
use tokio_stream::StreamExt;
use tracing::debug;

#[derive(Debug, Args)]
pub struct RunsCommand {
    #[command(subcommand)]
    command: RunsSubcommands,
}

#[derive(Debug, Subcommand)]
enum RunsSubcommands {
    /// List workflow runs
    List {
        /// Only runs with this status
        #[arg(short, long, conflicts_with = "failed")]
        status: Option<String>,

        /// Only runs of this workflow
        #[arg(short, long)]
        workflow: Option<String>,

        /// Only failed runs
        #[arg(long)]
        failed: bool,

        /// Maximum number of runs
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Show one run
    Show {
        /// Run ID
        id: String,

        /// Explain the failure and suggest a replay command
        #[arg(long)]
        failed: bool,
    },

    /// Print the output of a run
    Output {
        /// Run ID
        id: String,
    },

    /// Show the logs of a run
    Logs(LogsArgs),

    /// Cancel a run
    Cancel {
        /// Run ID
        id: String,

        /// Show the request without sending it
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Debug, Args)]
struct LogsArgs {
    /// Run ID
    id: String,

    /// Stream new entries until the run finishes
    #[arg(short, long)]
    follow: bool,

    /// Only entries from this step
    #[arg(long)]
    step: Option<String>,

    /// Only entries whose message matches this regular expression
    #[arg(short, long, value_name = "PATTERN")]
    grep: Option<String>,
}

#[derive(Tabled)]
struct RunRow {
    #[tabled(rename = "ID")]
    id: String,

    #[tabled(rename = "WORKFLOW")]
    workflow: String,

    #[tabled(rename = "STATUS")]
    status: String,

    #[tabled(rename = "STEP")]
    step: String,

    #[tabled(rename = "STARTED")]
    started: String,

    #[tabled(rename = "DURATION")]
    duration: String,

    #[tabled(rename = "COST")]
    cost: String,
}

impl RunsCommand {
    pub async fn execute(self, session: &Session) -> Result<()> {
        let ctx = session.out();
        match self.command {
            RunsSubcommands::List {
                status,
                workflow,
                failed,
                limit,
            } => {
                let status = if failed { Some("failed".to_string()) } else { status };
                let limit = limit.map(|n| n.to_string());
                let path = path_with_query(
                    "/v1/runs",
                    &[
                        ("status", status.as_deref()),
                        ("workflow", workflow.as_deref()),
                        ("limit", limit.as_deref()),
                    ],
                );
                let response = session.client()?.get(&path).await?;
                list(ctx, &response);
                Ok(())
            }
            RunsSubcommands::Show { id, failed } => {
                let id = checked_id("run id", &id)?;
                let run = session.client()?.get(&format!("/v1/runs/{}", id)).await?;
                show(ctx, id, &run, failed);
                Ok(())
            }
            RunsSubcommands::Output { id } => {
                let id = checked_id("run id", &id)?;
                let output = session
                    .client()?
                    .get(&format!("/v1/runs/{}/output", id))
                    .await?;
                if ctx.json() {
                    ctx.emit_json(json!({ "run_id": id, "output": output }));
                } else {
                    ctx.print(serde_json::to_string_pretty(&output)?);
                }
                Ok(())
            }
            RunsSubcommands::Logs(args) => logs(args, session).await,
            RunsSubcommands::Cancel { id, dry_run } => {
                let id = checked_id("run id", &id)?;
                let path = format!("/v1/runs/{}", id);
                if dry_run {
                    DryRun::new().action("DELETE", path).render(ctx);
                    return Ok(());
                }
                session.client()?.delete(&path).await?;
                if ctx.json() {
                    ctx.emit_json(json!({ "run_id": id, "cancelled": true }));
                } else {
                    ctx.status(format!("{} Run {} cancelled", ctx.ok("✓"), id));
                }
                Ok(())
            }
        }
    }
}

fn list(ctx: &OutputContext, response: &Value) {
    let runs = items(response, "runs");
    if ctx.json() {
        ctx.emit_json(json!({ "runs": runs, "count": runs.len() }));
        return;
    }
    if runs.is_empty() {
        ctx.status("No runs found");
        return;
    }
    let rows: Vec<RunRow> = runs
        .iter()
        .map(|run| RunRow {
            id: text(run, "id"),
            workflow: truncate(&text_any(run, &["workflow", "workflow_name"]), 30),
            status: format_status(&text(run, "status"), ctx.styled()),
            step: text(run, "progress.current_step"),
            started: timestamp(run, "started_at"),
            duration: duration(run, "duration_ms"),
            cost: cost(run, "cost"),
        })
        .collect();
    ctx.print(table(rows));
}

/// Step a failed run should be replayed from
fn failed_step(run: &Value) -> Option<String> {
    ["failed_step", "error.step_id", "progress.current_step"]
        .iter()
        .find_map(|path| lookup(run, path).and_then(Value::as_str))
        .map(str::to_string)
}

fn replay_command(id: &str, run: &Value) -> Option<String> {
    if classify(&text(run, "status")) != StatusClass::Failure {
        return None;
    }
    let step = failed_step(run)?;
    Some(format!("conductor run replay {} --from {}", id, step))
}

fn show(ctx: &OutputContext, id: &str, run: &Value, failed: bool) {
    let suggestion = if failed { replay_command(id, run) } else { None };
    if ctx.json() {
        let mut data = json!({ "run": run });
        if let Some(command) = &suggestion {
            data["replay_command"] = json!(command);
        }
        ctx.emit_json(data);
        return;
    }

    ctx.print(ctx.header(&format!("Run {}", id)));
    ctx.print(format!("  Workflow: {}", text_any(run, &["workflow", "workflow_name"])));
    ctx.print(format!("  Status:   {}", format_status(&text(run, "status"), ctx.styled())));
    ctx.print(format!("  Step:     {}", text(run, "progress.current_step")));
    ctx.print(format!("  Started:  {}", timestamp(run, "started_at")));
    ctx.print(format!("  Finished: {}", timestamp(run, "completed_at")));
    ctx.print(format!("  Duration: {}", duration(run, "duration_ms")));
    ctx.print(format!("  Cost:     {}", cost(run, "cost")));

    if failed {
        let error = text_any(run, &["error.message", "error"]);
        if error != "-" {
            ctx.print(format!("  Error:    {}", ctx.error(&error)));
        }
        match suggestion {
            Some(command) => {
                ctx.print("");
                ctx.print(ctx.bold("Suggested replay:"));
                ctx.print(format!("  {}", command));
            }
            None => ctx.status(ctx.muted("Run has not failed; nothing to replay")),
        }
    }
}

async fn logs(args: LogsArgs, session: &Session) -> Result<()> {
    let ctx = session.out();
    let id = checked_id("run id", &args.id)?;
    let filter = LogFilter::new(args.step.clone(), args.grep.as_deref())?;
    let client = session.client()?;
    let path = format!("/v1/runs/{}/logs", id);

    if args.follow {
        return follow_logs(ctx, &client, &path, &filter).await;
    }

    let response = client.get(&path).await?;
    let entries: Vec<&Value> = items(&response, "logs")
        .iter()
        .filter(|entry| filter.matches(entry))
        .collect();
    if ctx.json() {
        ctx.emit_json(json!({ "run_id": id, "logs": entries }));
        return Ok(());
    }
    if entries.is_empty() {
        ctx.status("No log entries");
    }
    for entry in entries {
        ctx.print(format_log_entry(entry, ctx.styled()));
    }
    Ok(())
}

/// Print entries as they arrive until `event: done` or the server closes;
/// `--json` prints one compact JSON object per line
async fn follow_logs(ctx: &OutputContext, client: &DaemonClient, path: &str, filter: &LogFilter) -> Result<()> {
    let body = client.get_stream(path, EVENT_STREAM).await?;
    let mut messages = Box::pin(decode_stream(body));
    while let Some(message) = messages.next().await {
        let message = message?;
        let entry: Value = match message.json() {
            Ok(entry) => entry,
            Err(e) => {
                debug!("skipping log record: {}", e);
                continue;
            }
        };
        if !filter.matches(&entry) {
            continue;
        }
        if ctx.json() {
            ctx.print(serde_json::to_string(&entry)?);
        } else {
            ctx.print(format_log_entry(&entry, ctx.styled()));
        }
    }
    Ok(())
}

struct LogFilter {
    step: Option<String>,
    pattern: Option<Regex>,
}

impl LogFilter {
    fn new(step: Option<String>, pattern: Option<&str>) -> Result<Self> {
        let pattern = pattern
            .map(Regex::new)
            .transpose()
            .map_err(|e| CliError::invalid_input(format!("invalid --grep pattern: {}", e)))?;
        Ok(Self { step, pattern })
    }

    fn matches(&self, entry: &Value) -> bool {
        if let Some(step) = &self.step {
            if text_any(entry, &["step_id", "step"]) != *step {
                return false;
            }
        }
        match &self.pattern {
            Some(pattern) => pattern.is_match(&text(entry, "message")),
            None => true,
        }
    }
}

/// `15:04:05 [INFO] [step1] hello`
pub fn format_log_entry(entry: &Value, styled: bool) -> String {
    let time = lookup(entry, "timestamp")
        .and_then(Value::as_str)
        .map(format_log_time)
        .unwrap_or_else(|| "--:--:--".to_string());
    let level = lookup(entry, "level")
        .and_then(Value::as_str)
        .unwrap_or("info")
        .to_ascii_uppercase();
    let message = text(entry, "message");
    let message = if styled {
        message
    } else {
        String::from_utf8_lossy(&strip_ansi_escapes::strip(message.as_bytes())).into_owned()
    };

    let level_tag = format!("[{}]", level);
    let level_tag = if styled {
        match level.as_str() {
            "ERROR" => level_tag.red().bold().to_string(),
            "WARN" | "WARNING" => level_tag.yellow().to_string(),
            "DEBUG" | "TRACE" => level_tag.dimmed().to_string(),
            _ => level_tag.cyan().to_string(),
        }
    } else {
        level_tag
    };

    match lookup(entry, "step_id").or_else(|| lookup(entry, "step")).and_then(Value::as_str) {
        Some(step) => format!("{} {} [{}] {}", time, level_tag, step, message),
        None => format!("{} {} {}", time, level_tag, message),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::cli::dispatch;
    use crate::cli::output::GlobalFlags;
    use crate::cli::test_support::*;

    #[test]
    fn test_log_line_format() {
        let entry = json!({"timestamp": "2025-01-02T15:04:05Z", "level": "info", "step_id": "step1", "message": "hello"});
        assert_eq!(format_log_entry(&entry, false), "15:04:05 [INFO] [step1] hello");
        let entry = json!({"timestamp": "2025-01-02T15:04:05Z", "level": "error", "message": "\u{1b}[31mboom\u{1b}[0m"});
        assert_eq!(format_log_entry(&entry, false), "15:04:05 [ERROR] boom");
    }

    #[test]
    fn test_replay_suggestion_only_for_failures() {
        let failed = json!({"status": "failed", "progress": {"current_step": "summarize"}});
        assert_eq!(
            replay_command("r1", &failed).unwrap(),
            "conductor run replay r1 --from summarize"
        );
        let failed = json!({"status": "failed", "failed_step": "fetch", "progress": {"current_step": "x"}});
        assert_eq!(replay_command("r1", &failed).unwrap(), "conductor run replay r1 --from fetch");
        assert!(replay_command("r1", &json!({"status": "completed"})).is_none());
    }

    #[tokio::test]
    async fn test_follow_logs_until_done() {
        let t = session(GlobalFlags::default(), "runs logs");
        let body = concat!(
            "data: {\"timestamp\":\"2025-01-02T15:04:05Z\",\"level\":\"info\",\"step_id\":\"step1\",\"message\":\"hello\"}\n\n",
            "data: {not json}\n\n",
            "data: {\"timestamp\":\"2025-01-02T15:04:06Z\",\"level\":\"warn\",\"step_id\":\"step2\",\"message\":\"slow\"}\n\n",
            "event: done\ndata: {}\n\n",
            "data: {\"timestamp\":\"2025-01-02T15:04:07Z\",\"level\":\"info\",\"message\":\"after done\"}\n\n",
        );
        let server = t.serve(vec![route("GET /v1/runs/abc123/logs", sse_response(body))]);

        dispatch(parse(&["runs", "logs", "abc123", "-f"]), &t.session)
            .await
            .unwrap();

        assert_eq!(
            t.out.stdout(),
            "15:04:05 [INFO] [step1] hello\n15:04:06 [WARN] [step2] slow\n"
        );
        let requests = server.requests.lock().unwrap();
        assert!(requests[0].to_ascii_lowercase().contains("accept: text/event-stream"));
    }

    #[tokio::test]
    async fn test_logs_filtered_by_step_and_pattern() {
        let t = session(GlobalFlags::default(), "runs logs");
        let body = r#"{"logs":[
            {"timestamp":"2025-01-02T15:04:05Z","level":"info","step_id":"a","message":"fetching page 1"},
            {"timestamp":"2025-01-02T15:04:06Z","level":"info","step_id":"b","message":"fetching page 2"},
            {"timestamp":"2025-01-02T15:04:07Z","level":"info","step_id":"a","message":"done"}
        ]}"#;
        let _server = t.serve(vec![route("GET /v1/runs/r1/logs", json_response("200 OK", body))]);
        dispatch(
            parse(&["runs", "logs", "r1", "--step", "a", "--grep", "page \\d"]),
            &t.session,
        )
        .await
        .unwrap();
        assert_eq!(t.out.stdout(), "15:04:05 [INFO] [a] fetching page 1\n");
    }

    #[tokio::test]
    async fn test_list_passes_filters() {
        let t = session(json_flags(), "runs list");
        let body = r#"{"runs":[{"id":"r1","workflow":"digest","status":"failed"}]}"#;
        let server = t.serve(vec![route("GET /v1/runs", json_response("200 OK", body))]);
        dispatch(parse(&["runs", "list", "--failed", "--workflow", "digest"]), &t.session)
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&t.out.stdout()).unwrap();
        assert_eq!(value["command"], "runs list");
        assert_eq!(value["count"], 1);
        let requests = server.requests.lock().unwrap();
        assert!(requests[0].starts_with("GET /v1/runs?status=failed&workflow=digest "));
    }

    #[tokio::test]
    async fn test_show_failed_prints_replay_command() {
        let t = session(GlobalFlags::default(), "runs show");
        let body = r#"{"id":"r9","workflow":"digest","status":"failed","failed_step":"summarize","error":{"message":"rate limited"}}"#;
        let _server = t.serve(vec![route("GET /v1/runs/r9", json_response("200 OK", body))]);
        dispatch(parse(&["runs", "show", "r9", "--failed"]), &t.session)
            .await
            .unwrap();
        let out = t.out.stdout();
        assert!(out.contains("rate limited"));
        assert!(out.contains("conductor run replay r9 --from summarize"));
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let t = session(GlobalFlags::default(), "runs show");
        let _server = t.serve(vec![]);
        let err = dispatch(parse(&["runs", "show", "nope"]), &t.session)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), crate::common::error::ErrorCode::E401);
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_cancel_dry_run_sends_nothing() {
        let t = session(GlobalFlags::default(), "runs cancel");
        let server = t.serve(vec![]);
        dispatch(parse(&["runs", "cancel", "r1", "--dry-run"]), &t.session)
            .await
            .unwrap();
        assert!(t.out.stdout().contains("DELETE  /v1/runs/r1"));
        assert!(server.requests.lock().unwrap().is_empty());
    }
}
