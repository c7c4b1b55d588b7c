//! MCP server inspection

use crate::cli::output::OutputContext;
use crate::cli::utils::{checked_id, items, table, text, text_any, truncate};
use crate::cli::Session;
use crate::common::error::Result;
use crate::common::status::format_status;
use clap::{Args, Subcommand};
use serde_json::{json, Value};
use tabled::Tabled;

#[derive(Debug, Args)]
pub struct McpCommand {
    #[command(subcommand)]
    command: McpSubcommands,
}

#[derive(Debug, Subcommand)]
enum McpSubcommands {
    /// Show one MCP server and its tools
    Show {
        /// Server name
        name: String,
    },
}

#[derive(Tabled)]
struct ToolRow {
    #[tabled(rename = "TOOL")]
    name: String,

    #[tabled(rename = "DESCRIPTION")]
    description: String,
}

impl McpCommand {
    pub async fn execute(self, session: &Session) -> Result<()> {
        match self.command {
            McpSubcommands::Show { name } => {
                let name = checked_id("server name", &name)?;
                let server = session
                    .client()?
                    .get(&format!("/v1/mcp/servers/{}", name))
                    .await?;
                show(session.out(), name, &server);
                Ok(())
            }
        }
    }
}

fn show(ctx: &OutputContext, name: &str, server: &Value) {
    if ctx.json() {
        ctx.emit_json(json!({ "server": server }));
        return;
    }
    ctx.print(ctx.header(&format!("MCP server {}", name)));
    ctx.print(format!("  Status:    {}", format_status(&text(server, "status"), ctx.styled())));
    ctx.print(format!("  Transport: {}", text(server, "transport")));
    ctx.print(format!("  Target:    {}", text_any(server, &["url", "command"])));

    let tools = items(server, "tools");
    if tools.is_empty() {
        ctx.print(ctx.muted("  No tools reported"));
        return;
    }
    let rows: Vec<ToolRow> = tools
        .iter()
        .map(|tool| ToolRow {
            name: match tool {
                Value::String(s) => s.clone(),
                other => text(other, "name"),
            },
            description: truncate(&text(tool, "description"), 60),
        })
        .collect();
    ctx.print(table(rows));
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::cli::dispatch;
    use crate::cli::output::GlobalFlags;
    use crate::cli::test_support::*;

    #[tokio::test]
    async fn test_show_server() {
        let t = session(GlobalFlags::default(), "mcp show");
        let body = r#"{"name":"files","status":"running","transport":"stdio","command":"mcp-files","tools":[{"name":"read_file","description":"Read a file"},"list_dir"]}"#;
        let _server = t.serve(vec![route("GET /v1/mcp/servers/files", json_response("200 OK", body))]);
        dispatch(parse(&["mcp", "show", "files"]), &t.session).await.unwrap();
        let out = t.out.stdout();
        assert!(out.contains("MCP server files"));
        assert!(out.contains("Transport: stdio"));
        assert!(out.contains("read_file"));
        assert!(out.contains("list_dir"));
    }

    #[tokio::test]
    async fn test_rejects_path_like_names() {
        let t = session(GlobalFlags::default(), "mcp show");
        let err = dispatch(parse(&["mcp", "show", "../admin"]), &t.session)
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
