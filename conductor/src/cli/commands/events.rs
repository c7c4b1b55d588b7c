//! Controller events, listed or followed live

use crate::cli::output::OutputContext;
use crate::cli::utils::{items, lookup, text_any};
use crate::cli::Session;
use crate::client::sse::decode_stream;
use crate::client::{path_with_query, EVENT_STREAM};
use crate::common::error::Result;
use crate::common::timestamp::format_log_time;
use clap::Args;
use serde_json::{json, Value};
use tokio_stream::StreamExt;
use tracing::debug;

#[derive(Debug, Args)]
pub struct EventsCommand {
    /// Only events of this run
    #[arg(long, value_name = "RUN_ID")]
    run: Option<String>,

    /// Only events of this type
    #[arg(long = "type", value_name = "TYPE")]
    event_type: Option<String>,

    /// Maximum number of events to list
    #[arg(short, long, conflicts_with = "follow")]
    limit: Option<u32>,

    /// Stream events as they happen
    #[arg(short, long)]
    follow: bool,
}

impl EventsCommand {
    pub async fn execute(self, session: &Session) -> Result<()> {
        let ctx = session.out();
        let client = session.client()?;
        let limit = self.limit.map(|n| n.to_string());

        if self.follow {
            let path = path_with_query(
                "/v1/events/stream",
                &[("run_id", self.run.as_deref()), ("type", self.event_type.as_deref())],
            );
            let body = client.get_stream(&path, EVENT_STREAM).await?;
            let mut messages = Box::pin(decode_stream(body));
            while let Some(message) = messages.next().await {
                let message = message?;
                let mut event: Value = match message.json() {
                    Ok(event) => event,
                    Err(e) => {
                        debug!("skipping event record: {}", e);
                        continue;
                    }
                };
                if event.get("type").is_none() && message.event_type != "message" {
                    if let Value::Object(fields) = &mut event {
                        fields.insert("type".to_string(), json!(message.event_type));
                    }
                }
                if ctx.json() {
                    ctx.print(serde_json::to_string(&event)?);
                } else {
                    ctx.print(format_event(&event));
                }
            }
            return Ok(());
        }

        let path = path_with_query(
            "/v1/events",
            &[
                ("run_id", self.run.as_deref()),
                ("type", self.event_type.as_deref()),
                ("limit", limit.as_deref()),
            ],
        );
        let response = client.get(&path).await?;
        print_events(ctx, items(&response, "events"));
        Ok(())
    }
}

fn print_events(ctx: &OutputContext, events: &[Value]) {
    if ctx.json() {
        ctx.emit_json(json!({ "events": events, "count": events.len() }));
        return;
    }
    if events.is_empty() {
        ctx.status("No events");
        return;
    }
    for event in events {
        ctx.print(format_event(event));
    }
}

/// `15:04:05 run.completed [r1] message`
pub fn format_event(event: &Value) -> String {
    let time = lookup(event, "timestamp")
        .and_then(Value::as_str)
        .map(format_log_time)
        .unwrap_or_else(|| "--:--:--".to_string());
    let kind = text_any(event, &["type", "event_type"]);
    let mut line = format!("{} {}", time, kind);
    if let Some(run) = lookup(event, "run_id").and_then(Value::as_str) {
        line.push_str(&format!(" [{}]", run));
    }
    match lookup(event, "message").or_else(|| lookup(event, "data")) {
        Some(Value::String(message)) => line.push_str(&format!(" {}", message)),
        Some(other) => line.push_str(&format!(" {}", other)),
        None => {}
    }
    line
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::cli::dispatch;
    use crate::cli::output::GlobalFlags;
    use crate::cli::test_support::*;

    #[test]
    fn test_format_event() {
        let event = json!({"timestamp": "2025-01-02T15:04:05Z", "type": "run.completed", "run_id": "r1", "message": "ok"});
        assert_eq!(format_event(&event), "15:04:05 run.completed [r1] ok");
        let event = json!({"type": "cache.cleared", "data": {"entries": 3}});
        assert_eq!(format_event(&event), "--:--:-- cache.cleared {\"entries\":3}");
    }

    #[tokio::test]
    async fn test_follow_uses_sse_event_type() {
        let t = session(json_flags(), "events");
        let body = concat!(
            "event: run.started\ndata: {\"run_id\":\"r1\"}\n\n",
            "data: {\"type\":\"step.completed\",\"run_id\":\"r1\"}\n\n",
            "event: done\ndata: {}\n\n",
        );
        let server = t.serve(vec![route("GET /v1/events/stream", sse_response(body))]);
        dispatch(parse(&["events", "-f", "--run", "r1"]), &t.session)
            .await
            .unwrap();
        let lines: Vec<Value> = t
            .out
            .stdout()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "run.started");
        assert_eq!(lines[1]["type"], "step.completed");
        assert!(server.requests.lock().unwrap()[0].starts_with("GET /v1/events/stream?run_id=r1 "));
    }

    #[tokio::test]
    async fn test_list_events() {
        let t = session(GlobalFlags::default(), "events");
        let body = r#"{"events":[{"timestamp":"2025-01-02T15:04:05Z","type":"run.failed","run_id":"r2","message":"boom"}]}"#;
        let _server = t.serve(vec![route("GET /v1/events", json_response("200 OK", body))]);
        dispatch(parse(&["events", "--type", "run.failed"]), &t.session)
            .await
            .unwrap();
        assert_eq!(t.out.stdout(), "15:04:05 run.failed [r2] boom\n");
    }
}
