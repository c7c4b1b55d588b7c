//! Trace querying: list, show, timeline, export and diff

use crate::cli::output::OutputContext;
use crate::cli::utils::{checked_id, cost, duration, items, lookup, table, text, text_any, timestamp, truncate};
use crate::cli::Session;
use crate::client::path_with_query;
use crate::common::error::Result;
use crate::common::status::format_status;
use crate::common::timestamp::format_duration_ms;
use chrono::DateTime;
use clap::{Args, Subcommand};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use tabled::Tabled;

/// Width of the bar column in `traces timeline`
const TIMELINE_WIDTH: usize = 40;

#[derive(Debug, Args)]
pub struct TracesCommand {
    #[command(subcommand)]
    command: TracesSubcommands,
}

#[derive(Debug, Subcommand)]
enum TracesSubcommands {
    /// List recent traces
    List {
        /// Only traces of this workflow
        #[arg(short, long)]
        workflow: Option<String>,

        /// Only traces with this status
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum number of traces
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Show a trace and its spans
    Show {
        /// Trace ID
        id: String,
    },

    /// Draw the spans of a trace on a time axis
    Timeline {
        /// Trace ID
        id: String,
    },

    /// Write a trace as JSON
    Export {
        /// Trace ID
        id: String,

        /// File to write instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Compare the spans of two traces
    Diff {
        /// Baseline trace ID
        a: String,

        /// Trace ID to compare against the baseline
        b: String,
    },
}

#[derive(Tabled)]
struct TraceRow {
    #[tabled(rename = "ID")]
    id: String,

    #[tabled(rename = "WORKFLOW")]
    workflow: String,

    #[tabled(rename = "STATUS")]
    status: String,

    #[tabled(rename = "SPANS")]
    spans: String,

    #[tabled(rename = "DURATION")]
    duration: String,

    #[tabled(rename = "STARTED")]
    started: String,
}

#[derive(Tabled)]
struct SpanRow {
    #[tabled(rename = "SPAN")]
    name: String,

    #[tabled(rename = "STATUS")]
    status: String,

    #[tabled(rename = "DURATION")]
    duration: String,

    #[tabled(rename = "COST")]
    cost: String,
}

#[derive(Debug, Clone, PartialEq, Tabled)]
pub struct SpanDiff {
    #[tabled(rename = "SPAN")]
    pub name: String,

    #[tabled(rename = "STATUS A")]
    pub status_a: String,

    #[tabled(rename = "STATUS B")]
    pub status_b: String,

    #[tabled(rename = "DURATION A")]
    pub duration_a: String,

    #[tabled(rename = "DURATION B")]
    pub duration_b: String,

    #[tabled(rename = "DELTA")]
    pub delta: String,
}

impl TracesCommand {
    pub async fn execute(self, session: &Session) -> Result<()> {
        let ctx = session.out();
        match self.command {
            TracesSubcommands::List {
                workflow,
                status,
                limit,
            } => {
                let limit = limit.map(|n| n.to_string());
                let path = path_with_query(
                    "/v1/traces",
                    &[
                        ("workflow", workflow.as_deref()),
                        ("status", status.as_deref()),
                        ("limit", limit.as_deref()),
                    ],
                );
                let response = session.client()?.get(&path).await?;
                list(ctx, &response);
                Ok(())
            }
            TracesSubcommands::Show { id } => {
                let trace = fetch(session, &id).await?;
                show(ctx, &trace);
                Ok(())
            }
            TracesSubcommands::Timeline { id } => {
                let trace = fetch(session, &id).await?;
                if ctx.json() {
                    ctx.emit_json(json!({ "trace_id": id, "spans": timeline_json(&trace) }));
                } else {
                    for line in render_timeline(&trace, TIMELINE_WIDTH) {
                        ctx.print(line);
                    }
                }
                Ok(())
            }
            TracesSubcommands::Export { id, output } => {
                let trace = fetch(session, &id).await?;
                let pretty = serde_json::to_string_pretty(&trace)?;
                match output {
                    Some(path) => {
                        std::fs::write(&path, format!("{}\n", pretty))?;
                        if ctx.json() {
                            ctx.emit_json(json!({ "trace_id": id, "path": path }));
                        } else {
                            ctx.status(format!("Exported trace {} to {}", id, path.display()));
                        }
                    }
                    None if ctx.json() => ctx.emit_json(json!({ "trace": trace })),
                    None => ctx.print(pretty),
                }
                Ok(())
            }
            TracesSubcommands::Diff { a, b } => {
                let (left, right) = tokio::try_join!(fetch(session, &a), fetch(session, &b))?;
                let diffs = diff_spans(&left, &right);
                if ctx.json() {
                    let rows: Vec<Value> = diffs
                        .iter()
                        .map(|d| {
                            json!({
                                "span": d.name,
                                "status_a": d.status_a,
                                "status_b": d.status_b,
                                "duration_a": d.duration_a,
                                "duration_b": d.duration_b,
                                "delta": d.delta,
                            })
                        })
                        .collect();
                    ctx.emit_json(json!({ "a": a, "b": b, "spans": rows }));
                } else if diffs.is_empty() {
                    ctx.status("Neither trace has spans");
                } else {
                    ctx.print(format!("{} {} vs {}", ctx.header("Trace diff"), a, b));
                    ctx.print(table(diffs));
                }
                Ok(())
            }
        }
    }
}

async fn fetch(session: &Session, id: &str) -> Result<Value> {
    let id = checked_id("trace id", id)?;
    Ok(session.client()?.get(&format!("/v1/traces/{}", id)).await?)
}

fn list(ctx: &OutputContext, response: &Value) {
    let traces = items(response, "traces");
    if ctx.json() {
        ctx.emit_json(json!({ "traces": traces, "count": traces.len() }));
        return;
    }
    if traces.is_empty() {
        ctx.status("No traces found");
        return;
    }
    let rows: Vec<TraceRow> = traces
        .iter()
        .map(|trace| TraceRow {
            id: text_any(trace, &["trace_id", "id"]),
            workflow: truncate(&text(trace, "workflow"), 30),
            status: format_status(&text(trace, "status"), ctx.styled()),
            spans: lookup(trace, "span_count")
                .map(Value::to_string)
                .unwrap_or_else(|| match items(trace, "spans").len() {
                    0 => "-".to_string(),
                    n => n.to_string(),
                }),
            duration: duration(trace, "duration_ms"),
            started: timestamp(trace, "start_time"),
        })
        .collect();
    ctx.print(table(rows));
}

fn show(ctx: &OutputContext, trace: &Value) {
    if ctx.json() {
        ctx.emit_json(json!({ "trace": trace }));
        return;
    }
    ctx.print(ctx.header(&format!("Trace {}", text_any(trace, &["trace_id", "id"]))));
    ctx.print(format!("  Workflow: {}", text(trace, "workflow")));
    ctx.print(format!("  Status:   {}", format_status(&text(trace, "status"), ctx.styled())));
    ctx.print(format!("  Started:  {}", timestamp(trace, "start_time")));
    ctx.print(format!("  Duration: {}", duration(trace, "duration_ms")));
    ctx.print(format!("  Cost:     {}", cost(trace, "cost")));

    let spans = ordered_spans(trace);
    if spans.is_empty() {
        return;
    }
    let rows: Vec<SpanRow> = spans
        .iter()
        .map(|(depth, span)| SpanRow {
            name: format!("{}{}", "  ".repeat(*depth), span_name(span)),
            status: format_status(&text(span, "status"), ctx.styled()),
            duration: duration(span, "duration_ms"),
            cost: cost(span, "cost"),
        })
        .collect();
    ctx.print(table(rows));
}

fn span_name(span: &Value) -> String {
    text_any(span, &["name", "step_id", "span_id"])
}

/// Spans in tree order (parents before children) with their depth
fn ordered_spans(trace: &Value) -> Vec<(usize, &Value)> {
    let spans = items(trace, "spans");
    let id_of = |span: &Value| lookup(span, "span_id").and_then(Value::as_str).map(str::to_string);
    let known: Vec<Option<String>> = spans.iter().map(id_of).collect();

    let mut children: HashMap<Option<String>, Vec<&Value>> = HashMap::new();
    for span in spans {
        let parent = lookup(span, "parent_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|parent| known.iter().any(|id| id.as_deref() == Some(parent.as_str())));
        children.entry(parent).or_default().push(span);
    }

    let mut ordered = Vec::with_capacity(spans.len());
    let mut stack: Vec<(usize, &Value)> = children
        .get(&None)
        .map(|roots| roots.iter().rev().map(|span| (0, *span)).collect())
        .unwrap_or_default();
    while let Some((depth, span)) = stack.pop() {
        ordered.push((depth, span));
        if ordered.len() > spans.len() {
            break;
        }
        if let Some(kids) = children.get(&id_of(span)) {
            if id_of(span).is_some() {
                stack.extend(kids.iter().rev().map(|kid| (depth + 1, *kid)));
            }
        }
    }
    ordered
}

/// Start of a span relative to the trace start, in milliseconds
fn span_offset_ms(trace: &Value, span: &Value) -> f64 {
    if let Some(offset) = lookup(span, "offset_ms").and_then(Value::as_f64) {
        return offset;
    }
    let parse = |value: &Value, key: &str| {
        lookup(value, key)
            .and_then(Value::as_str)
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
    };
    match (parse(trace, "start_time"), parse(span, "start_time")) {
        (Some(trace_start), Some(span_start)) => {
            (span_start - trace_start).num_microseconds().unwrap_or(0) as f64 / 1000.0
        }
        _ => 0.0,
    }
}

fn span_duration_ms(span: &Value) -> f64 {
    lookup(span, "duration_ms").and_then(Value::as_f64).unwrap_or(0.0)
}

fn timeline_json(trace: &Value) -> Vec<Value> {
    ordered_spans(trace)
        .into_iter()
        .map(|(depth, span)| {
            json!({
                "name": span_name(span),
                "depth": depth,
                "status": lookup(span, "status"),
                "offset_ms": span_offset_ms(trace, span),
                "duration_ms": span_duration_ms(span),
            })
        })
        .collect()
}

/// One line per span: name, a bar positioned on a `width`-column axis scaled
/// to the trace duration, and the span duration
pub fn render_timeline(trace: &Value, width: usize) -> Vec<String> {
    let spans = ordered_spans(trace);
    if spans.is_empty() {
        return vec!["(no spans)".to_string()];
    }
    let width = width.max(1);
    let end_of_last = spans
        .iter()
        .map(|(_, span)| span_offset_ms(trace, span) + span_duration_ms(span))
        .fold(0.0_f64, f64::max);
    let total = lookup(trace, "duration_ms")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        .max(end_of_last);

    let labels: Vec<String> = spans
        .iter()
        .map(|(depth, span)| format!("{}{}", "  ".repeat(*depth), span_name(span)))
        .collect();
    let label_width = labels.iter().map(|l| l.chars().count()).max().unwrap_or(0);

    let mut lines = Vec::with_capacity(spans.len() + 1);
    lines.push(format!(
        "{:<label_width$} |{}| {}",
        "",
        "-".repeat(width),
        format_duration_ms(total)
    ));
    for ((_, span), label) in spans.iter().zip(labels) {
        let (start, len) = if total > 0.0 {
            let start = ((span_offset_ms(trace, span) / total) * width as f64).floor() as usize;
            let start = start.min(width - 1);
            let len = ((span_duration_ms(span) / total) * width as f64).round() as usize;
            (start, len.clamp(1, width - start))
        } else {
            (0, width)
        };
        let bar = format!(
            "{}{}{}",
            " ".repeat(start),
            "█".repeat(len),
            " ".repeat(width - start - len)
        );
        lines.push(format!(
            "{:<label_width$} |{}| {}",
            label,
            bar,
            format_duration_ms(span_duration_ms(span))
        ));
    }
    lines
}

/// Pair spans by name and report status and duration changes from `a` to `b`
pub fn diff_spans(a: &Value, b: &Value) -> Vec<SpanDiff> {
    let left = items(a, "spans");
    let right = items(b, "spans");
    let mut names: Vec<String> = Vec::new();
    for span in left.iter().chain(right) {
        let name = span_name(span);
        if !names.contains(&name) {
            names.push(name);
        }
    }

    let find = |spans: &'_ [Value], name: &str| -> Option<Value> {
        spans.iter().find(|span| span_name(span) == name).cloned()
    };

    names
        .into_iter()
        .map(|name| {
            let sa = find(left, &name);
            let sb = find(right, &name);
            let status = |span: &Option<Value>| span.as_ref().map(|s| text(s, "status")).unwrap_or_else(|| "-".to_string());
            let dur = |span: &Option<Value>| span.as_ref().and_then(|s| lookup(s, "duration_ms")).and_then(Value::as_f64);
            let delta = match (dur(&sa), dur(&sb)) {
                (Some(x), Some(y)) => {
                    let change = y - x;
                    let sign = if change >= 0.0 { "+" } else { "-" };
                    format!("{}{}", sign, format_duration_ms(change.abs()))
                }
                (None, Some(_)) => "added".to_string(),
                (Some(_), None) => "removed".to_string(),
                (None, None) => "-".to_string(),
            };
            SpanDiff {
                status_a: status(&sa),
                status_b: status(&sb),
                duration_a: dur(&sa).map(format_duration_ms).unwrap_or_else(|| "-".to_string()),
                duration_b: dur(&sb).map(format_duration_ms).unwrap_or_else(|| "-".to_string()),
                delta,
                name,
            }
        })
        .collect()
}
