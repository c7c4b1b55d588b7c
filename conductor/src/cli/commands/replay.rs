//! `run replay`: re-execute a run from a step, optionally with overrides

use crate::cli::dry_run::DryRun;
use crate::cli::output::OutputContext;
use crate::cli::utils::{checked_id, cost, items, lookup, table, text, text_any};
use crate::cli::Session;
use crate::common::error::Result;
use crate::common::validation::{parse_key_value, parse_step_override};
use clap::{Args, Subcommand};
use serde_json::{json, Map, Value};
use tabled::Tabled;

#[derive(Debug, Args)]
pub struct RunCommand {
    #[command(subcommand)]
    command: RunSubcommands,
}

#[derive(Debug, Subcommand)]
enum RunSubcommands {
    /// Re-run a run starting from one of its steps
    Replay(ReplayArgs),
}

#[derive(Debug, Args)]
struct ReplayArgs {
    /// Run ID to replay
    id: String,

    /// Step to resume from; earlier steps reuse recorded outputs
    #[arg(long, value_name = "STEP")]
    from: String,

    /// Replace an input value (repeatable)
    #[arg(long = "override-input", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    override_input: Vec<(String, String)>,

    /// Replace a recorded step output with JSON (repeatable)
    #[arg(long = "override-step", value_name = "STEP=JSON", value_parser = parse_step_override)]
    override_step: Vec<(String, Value)>,

    /// Refuse to run if the replay would cost more than this many USD
    #[arg(long, value_name = "USD")]
    max_cost: Option<f64>,

    /// Only estimate the cost of the replay
    #[arg(long)]
    estimate: bool,

    /// Per-step breakdown of the estimate
    #[arg(long, requires = "estimate")]
    detailed: bool,

    /// Show the request without sending it
    #[arg(long)]
    dry_run: bool,
}

impl ReplayArgs {
    fn body(&self) -> Value {
        let inputs: Map<String, Value> = self
            .override_input
            .iter()
            .map(|(key, value)| (key.clone(), json!(value)))
            .collect();
        let steps: Map<String, Value> = self.override_step.iter().cloned().collect();

        let mut body = json!({ "from_step": self.from });
        if !inputs.is_empty() {
            body["input_overrides"] = Value::Object(inputs);
        }
        if !steps.is_empty() {
            body["step_overrides"] = Value::Object(steps);
        }
        if let Some(max_cost) = self.max_cost {
            body["max_cost"] = json!(max_cost);
        }
        body
    }
}

#[derive(Tabled)]
struct EstimateRow {
    #[tabled(rename = "STEP")]
    step: String,

    #[tabled(rename = "ACTION")]
    action: String,

    #[tabled(rename = "COST")]
    cost: String,
}

impl RunCommand {
    pub async fn execute(self, session: &Session) -> Result<()> {
        match self.command {
            RunSubcommands::Replay(args) => replay(args, session).await,
        }
    }
}

async fn replay(args: ReplayArgs, session: &Session) -> Result<()> {
    let ctx = session.out();
    let id = checked_id("run id", &args.id)?;
    checked_id("step id", &args.from)?;
    let body = args.body();
    let path = if args.estimate {
        format!("/v1/runs/{}/replay/estimate", id)
    } else {
        format!("/v1/runs/{}/replay", id)
    };

    if args.dry_run {
        DryRun::new().action_with("POST", path, &body).render(ctx);
        return Ok(());
    }

    let response = session.client()?.post(&path, &body).await?;
    if args.estimate {
        print_estimate(ctx, &response, args.detailed, args.max_cost);
        return Ok(());
    }

    if ctx.json() {
        ctx.emit_json(json!({ "replay": response }));
        return Ok(());
    }
    let new_id = text_any(&response, &["run_id", "id"]);
    ctx.status(format!(
        "{} Replay of {} from step {} started: run {}",
        ctx.ok("✓"),
        id,
        args.from,
        new_id
    ));
    if new_id != "-" {
        ctx.status(ctx.muted(&format!("Follow it with: conductor runs logs {} -f", new_id)));
    }
    Ok(())
}

fn print_estimate(ctx: &OutputContext, estimate: &Value, detailed: bool, max_cost: Option<f64>) {
    let total = lookup(estimate, "estimated_cost")
        .or_else(|| lookup(estimate, "total_cost"))
        .and_then(Value::as_f64);
    let over_budget = matches!((total, max_cost), (Some(total), Some(max)) if total > max);

    if ctx.json() {
        ctx.emit_json(json!({ "estimate": estimate, "exceeds_max_cost": over_budget }));
        return;
    }

    let total_text = total
        .map(|usd| format!("${:.4}", usd))
        .unwrap_or_else(|| "unknown".to_string());
    ctx.print(format!("Estimated cost: {}", ctx.bold(&total_text)));
    if detailed {
        let rows: Vec<EstimateRow> = items(estimate, "steps")
            .iter()
            .map(|step| EstimateRow {
                step: text_any(step, &["step_id", "id"]),
                action: text(step, "action"),
                cost: cost(step, "cost"),
            })
            .collect();
        if !rows.is_empty() {
            ctx.print(table(rows));
        }
    }
    if let (true, Some(max)) = (over_budget, max_cost) {
        ctx.warning(format!("estimate exceeds --max-cost ${:.4}", max));
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::cli::dispatch;
    use crate::cli::output::GlobalFlags;
    use crate::cli::test_support::*;

    #[tokio::test]
    async fn test_dry_run_masks_secrets() {
        let t = session(GlobalFlags::default(), "run replay");
        let server = t.serve(vec![]);
        dispatch(
            parse(&[
                "run", "replay", "r1", "--from", "fetch",
                "--override-input", "api_key=sk-live-123",
                "--override-input", "city=Paris",
                "--override-step", "fetch={\"token\":\"abc\",\"status\":200}",
                "--dry-run",
            ]),
            &t.session,
        )
        .await
        .unwrap();
        let out = t.out.stdout();
        assert!(out.contains("POST    /v1/runs/r1/replay"));
        assert!(out.contains("\"api_key\": \"[REDACTED]\""));
        assert!(out.contains("\"token\": \"[REDACTED]\""));
        assert!(out.contains("\"city\": \"Paris\""));
        assert!(out.contains("\"status\": 200"));
        assert!(!out.contains("sk-live-123"));
        assert!(server.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_estimate_detailed() {
        let t = session(GlobalFlags::default(), "run replay");
        let body = r#"{"estimated_cost":0.42,"steps":[{"step_id":"fetch","action":"cached","cost":0},{"step_id":"summarize","action":"execute","cost":0.42}]}"#;
        let server = t.serve(vec![route(
            "POST /v1/runs/r1/replay/estimate",
            json_response("200 OK", body),
        )]);
        dispatch(
            parse(&["run", "replay", "r1", "--from", "summarize", "--estimate", "--detailed", "--max-cost", "0.1"]),
            &t.session,
        )
        .await
        .unwrap();
        let out = t.out.stdout();
        assert!(out.contains("Estimated cost: $0.4200"));
        assert!(out.contains("summarize"));
        assert!(t.out.stderr().contains("exceeds --max-cost"));
        let request = &server.requests.lock().unwrap()[0];
        assert!(request.contains("content-type: application/json"));
    }

    #[tokio::test]
    async fn test_replay_submits() {
        let t = session(json_flags(), "run replay");
        let _server = t.serve(vec![route(
            "POST /v1/runs/r1/replay",
            json_response("202 Accepted", r#"{"run_id":"r2","status":"queued"}"#),
        )]);
        dispatch(parse(&["run", "replay", "r1", "--from", "fetch"]), &t.session)
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&t.out.stdout()).unwrap();
        assert_eq!(value["replay"]["run_id"], "r2");
        assert_eq!(value["command"], "run replay");
    }

    #[test]
    fn test_body_shape() {
        let args = ReplayArgs {
            id: "r1".into(),
            from: "b".into(),
            override_input: vec![("n".into(), "3".into())],
            override_step: vec![("a".into(), json!({"ok": true}))],
            max_cost: Some(1.5),
            estimate: false,
            detailed: false,
            dry_run: false,
        };
        assert_eq!(
            args.body(),
            json!({"from_step": "b", "input_overrides": {"n": "3"}, "step_overrides": {"a": {"ok": true}}, "max_cost": 1.5})
        );
    }
}
