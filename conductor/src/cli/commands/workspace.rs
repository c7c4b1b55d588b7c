//! Workspace management

use crate::cli::dry_run::DryRun;
use crate::cli::utils::{checked_id, items, table, text, text_any, timestamp};
use crate::cli::Session;
use crate::common::error::Result;
use crate::common::interactive::confirm;
use clap::{Args, Subcommand};
use serde_json::{json, Value};
use tabled::Tabled;

#[derive(Debug, Args)]
pub struct WorkspaceCommand {
    #[command(subcommand)]
    command: WorkspaceSubcommands,
}

#[derive(Debug, Subcommand)]
enum WorkspaceSubcommands {
    /// Create a workspace
    Create {
        /// Workspace name
        name: String,

        /// Free-form description
        #[arg(short, long)]
        description: Option<String>,

        /// Show the request without sending it
        #[arg(long)]
        dry_run: bool,
    },

    /// List workspaces
    List,

    /// Switch the current workspace
    Use {
        /// Workspace name
        name: String,

        /// Show the request without sending it
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the current workspace
    Current,

    /// Delete a workspace
    Delete {
        /// Workspace name
        name: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,

        /// Show the request without sending it
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Tabled)]
struct WorkspaceRow {
    #[tabled(rename = "")]
    marker: String,

    #[tabled(rename = "NAME")]
    name: String,

    #[tabled(rename = "DESCRIPTION")]
    description: String,

    #[tabled(rename = "CREATED")]
    created: String,
}

impl WorkspaceCommand {
    pub async fn execute(self, session: &Session) -> Result<()> {
        let ctx = session.out();
        match self.command {
            WorkspaceSubcommands::Create {
                name,
                description,
                dry_run,
            } => {
                let name = checked_id("workspace", &name)?;
                let mut body = json!({ "name": name });
                if let Some(description) = description {
                    body["description"] = json!(description);
                }
                if dry_run {
                    DryRun::new().action_with("POST", "/v1/workspaces", &body).render(ctx);
                    return Ok(());
                }
                let created = session.client()?.post("/v1/workspaces", &body).await?;
                if ctx.json() {
                    ctx.emit_json(json!({ "workspace": created }));
                } else {
                    ctx.status(format!("{} Workspace {} created", ctx.ok("✓"), name));
                }
                Ok(())
            }
            WorkspaceSubcommands::List => {
                let response = session.client()?.get("/v1/workspaces").await?;
                let workspaces = items(&response, "workspaces");
                let current = response.get("current").and_then(Value::as_str);
                if ctx.json() {
                    ctx.emit_json(json!({ "workspaces": workspaces, "current": current }));
                    return Ok(());
                }
                if workspaces.is_empty() {
                    ctx.status("No workspaces");
                    return Ok(());
                }
                let rows: Vec<WorkspaceRow> = workspaces
                    .iter()
                    .map(|ws| {
                        let name = text(ws, "name");
                        let is_current = current == Some(name.as_str())
                            || ws.get("current").and_then(Value::as_bool) == Some(true);
                        WorkspaceRow {
                            marker: if is_current { "*".to_string() } else { String::new() },
                            name,
                            description: text(ws, "description"),
                            created: timestamp(ws, "created_at"),
                        }
                    })
                    .collect();
                ctx.print(table(rows));
                Ok(())
            }
            WorkspaceSubcommands::Use { name, dry_run } => {
                let name = checked_id("workspace", &name)?;
                let body = json!({ "name": name });
                if dry_run {
                    DryRun::new()
                        .action_with("POST", "/v1/workspaces/current", &body)
                        .render(ctx);
                    return Ok(());
                }
                session.client()?.post("/v1/workspaces/current", &body).await?;
                if ctx.json() {
                    ctx.emit_json(json!({ "current": name }));
                } else {
                    ctx.status(format!("{} Now using workspace {}", ctx.ok("✓"), name));
                }
                Ok(())
            }
            WorkspaceSubcommands::Current => {
                let current = session.client()?.get("/v1/workspaces/current").await?;
                if ctx.json() {
                    ctx.emit_json(json!({ "workspace": current }));
                } else {
                    ctx.print(text_any(&current, &["name", "workspace"]));
                }
                Ok(())
            }
            WorkspaceSubcommands::Delete { name, yes, dry_run } => {
                let name = checked_id("workspace", &name)?;
                let path = format!("/v1/workspaces/{}", name);
                if dry_run {
                    DryRun::new().action("DELETE", path).render(ctx);
                    return Ok(());
                }
                if !confirm(&format!("Delete workspace {}?", name), yes)? {
                    ctx.status("Aborted");
                    return Ok(());
                }
                session.client()?.delete(&path).await?;
                if ctx.json() {
                    ctx.emit_json(json!({ "deleted": name }));
                } else {
                    ctx.status(format!("{} Workspace {} deleted", ctx.ok("✓"), name));
                }
                Ok(())
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::cli::dispatch;
    use crate::cli::output::GlobalFlags;
    use crate::cli::test_support::*;

    #[tokio::test]
    async fn test_list_marks_current() {
        let t = session(GlobalFlags::default(), "workspace list");
        let body = r#"{"current":"team-b","workspaces":[{"name":"team-a"},{"name":"team-b","description":"shared"}]}"#;
        let _server = t.serve(vec![route("GET /v1/workspaces", json_response("200 OK", body))]);
        dispatch(parse(&["workspace", "list"]), &t.session).await.unwrap();
        let out = t.out.stdout();
        let current_line = out.lines().find(|l| l.contains("team-b")).unwrap();
        assert!(current_line.contains('*'));
        let other_line = out.lines().find(|l| l.contains("team-a")).unwrap();
        assert!(!other_line.contains('*'));
    }

    #[tokio::test]
    async fn test_use_posts_current() {
        let t = session(GlobalFlags::default(), "workspace use");
        let server = t.serve(vec![route(
            "POST /v1/workspaces/current",
            json_response("200 OK", r#"{"name":"team-a"}"#),
        )]);
        dispatch(parse(&["workspace", "use", "team-a"]), &t.session)
            .await
            .unwrap();
        assert!(t.out.stdout().contains("Now using workspace team-a"));
        assert_eq!(server.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_dry_run() {
        let t = session(json_flags(), "workspace delete");
        dispatch(parse(&["workspace", "delete", "team-a", "--dry-run"]), &t.session)
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&t.out.stdout()).unwrap();
        assert_eq!(value["actions"][0]["action"], "DELETE");
        assert_eq!(value["actions"][0]["target"], "/v1/workspaces/team-a");
    }
}
