//! Workflow cache listing and clearing

use crate::cli::dry_run::DryRun;
use crate::cli::utils::{items, table, text, text_any, timestamp};
use crate::cli::Session;
use crate::client::path_with_query;
use crate::common::error::Result;
use crate::common::interactive::confirm;
use clap::{Args, Subcommand};
use serde_json::{json, Value};
use tabled::Tabled;

#[derive(Debug, Args)]
pub struct CacheCommand {
    #[command(subcommand)]
    command: CacheSubcommands,
}

#[derive(Debug, Subcommand)]
enum CacheSubcommands {
    /// List cached entries
    List {
        /// Only entries of this workflow
        #[arg(short, long)]
        workflow: Option<String>,
    },

    /// Remove cached entries
    Clear {
        /// Only entries of this workflow
        #[arg(short, long)]
        workflow: Option<String>,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,

        /// Show the request without sending it
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Tabled)]
struct CacheRow {
    #[tabled(rename = "WORKFLOW")]
    workflow: String,

    #[tabled(rename = "KEY")]
    key: String,

    #[tabled(rename = "SIZE")]
    size: String,

    #[tabled(rename = "HITS")]
    hits: String,

    #[tabled(rename = "CREATED")]
    created: String,
}

impl CacheCommand {
    pub async fn execute(self, session: &Session) -> Result<()> {
        let ctx = session.out();
        match self.command {
            CacheSubcommands::List { workflow } => {
                let path = path_with_query("/v1/cache", &[("workflow", workflow.as_deref())]);
                let response = session.client()?.get(&path).await?;
                let entries = items(&response, "entries");
                if ctx.json() {
                    ctx.emit_json(json!({ "entries": entries, "count": entries.len() }));
                    return Ok(());
                }
                if entries.is_empty() {
                    ctx.status("Cache is empty");
                    return Ok(());
                }
                let rows: Vec<CacheRow> = entries
                    .iter()
                    .map(|entry| CacheRow {
                        workflow: text(entry, "workflow"),
                        key: text_any(entry, &["key", "id"]),
                        size: format_size(entry.get("size_bytes")),
                        hits: text(entry, "hits"),
                        created: timestamp(entry, "created_at"),
                    })
                    .collect();
                ctx.print(table(rows));
                Ok(())
            }
            CacheSubcommands::Clear {
                workflow,
                yes,
                dry_run,
            } => {
                let path = path_with_query("/v1/cache", &[("workflow", workflow.as_deref())]);
                if dry_run {
                    DryRun::new().action("DELETE", path).render(ctx);
                    return Ok(());
                }
                let question = match &workflow {
                    Some(workflow) => format!("Clear cached entries of workflow {}?", workflow),
                    None => "Clear the entire workflow cache?".to_string(),
                };
                if !confirm(&question, yes)? {
                    ctx.status("Aborted");
                    return Ok(());
                }
                session.client()?.delete(&path).await?;
                if ctx.json() {
                    ctx.emit_json(json!({ "cleared": true, "workflow": workflow }));
                } else {
                    ctx.status(format!("{} Cache cleared", ctx.ok("✓")));
                }
                Ok(())
            }
        }
    }
}

fn format_size(bytes: Option<&Value>) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let Some(mut size) = bytes.and_then(Value::as_f64) else {
        return "-".to_string();
    };
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", size as u64, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
