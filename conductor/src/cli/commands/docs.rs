//! Documentation links

use crate::cli::output::OutputContext;
use crate::common::error::{CliError, Result};
use clap::Args;
use serde_json::json;

const DOCS_BASE: &str = "https://docs.conductor.dev";

/// (topic, path, summary)
const TOPICS: &[(&str, &str, &str)] = &[
    ("getting-started", "/getting-started", "Install and run a first workflow"),
    ("controller", "/controller", "Starting, stopping and configuring the controller"),
    ("workflows", "/workflows", "Workflow file reference"),
    ("runs", "/runs", "Inspecting, replaying and cancelling runs"),
    ("traces", "/traces", "Execution traces and timelines"),
    ("connectors", "/connectors", "Built-in and custom connectors"),
    ("providers", "/providers", "LLM provider configuration"),
    ("config", "/configuration", "settings.yaml reference"),
    ("errors", "/errors", "Error codes and exit codes"),
];

#[derive(Debug, Args)]
pub struct DocsCommand {
    /// Topic to link to; lists every topic when omitted
    topic: Option<String>,
}

impl DocsCommand {
    pub fn execute(self, ctx: &OutputContext) -> Result<()> {
        match self.topic {
            Some(topic) => {
                let Some((name, path, summary)) = TOPICS.iter().find(|(name, _, _)| *name == topic)
                else {
                    return Err(CliError::invalid_input(format!("unknown docs topic: {}", topic))
                        .with_suggestion(format!("Available topics: {}", topic_names())));
                };
                let url = format!("{}{}", DOCS_BASE, path);
                if ctx.json() {
                    ctx.emit_json(json!({ "topic": name, "url": url, "summary": summary }));
                } else {
                    ctx.print(url);
                }
            }
            None => {
                if ctx.json() {
                    let topics: Vec<_> = TOPICS
                        .iter()
                        .map(|(name, path, summary)| {
                            json!({ "topic": name, "url": format!("{}{}", DOCS_BASE, path), "summary": summary })
                        })
                        .collect();
                    ctx.emit_json(json!({ "url": DOCS_BASE, "topics": topics }));
                    return Ok(());
                }
                ctx.print(format!("Documentation: {}", DOCS_BASE));
                ctx.print("");
                for (name, path, summary) in TOPICS {
                    ctx.print(format!("  {:<16} {}{}", name, DOCS_BASE, path));
                    ctx.print(ctx.muted(&format!("  {:<16} {}", "", summary)));
                }
            }
        }
        Ok(())
    }
}

fn topic_names() -> String {
    TOPICS
        .iter()
        .map(|(name, _, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}
