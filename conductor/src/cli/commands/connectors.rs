//! Connector discovery

use crate::cli::output::OutputContext;
use crate::cli::utils::{checked_id, items, lookup, table, text, truncate};
use crate::cli::Session;
use crate::common::error::Result;
use clap::{Args, Subcommand};
use serde_json::{json, Value};
use tabled::Tabled;

#[derive(Debug, Args)]
pub struct ConnectorsCommand {
    #[command(subcommand)]
    command: ConnectorsSubcommands,
}

#[derive(Debug, Subcommand)]
enum ConnectorsSubcommands {
    /// List available connectors
    List,

    /// Show a connector and its operations
    Show {
        /// Connector name
        name: String,
    },

    /// Show one operation of a connector
    Operation {
        /// Connector name
        name: String,

        /// Operation name
        operation: String,
    },
}

#[derive(Tabled)]
struct ConnectorRow {
    #[tabled(rename = "NAME")]
    name: String,

    #[tabled(rename = "TYPE")]
    kind: String,

    #[tabled(rename = "OPERATIONS")]
    operations: String,

    #[tabled(rename = "DESCRIPTION")]
    description: String,
}

#[derive(Tabled)]
struct OperationRow {
    #[tabled(rename = "OPERATION")]
    name: String,

    #[tabled(rename = "DESCRIPTION")]
    description: String,
}

#[derive(Tabled)]
struct ParameterRow {
    #[tabled(rename = "PARAMETER")]
    name: String,

    #[tabled(rename = "TYPE")]
    kind: String,

    #[tabled(rename = "REQUIRED")]
    required: String,

    #[tabled(rename = "DESCRIPTION")]
    description: String,
}

impl ConnectorsCommand {
    pub async fn execute(self, session: &Session) -> Result<()> {
        let ctx = session.out();
        let client = session.client()?;
        match self.command {
            ConnectorsSubcommands::List => {
                let response = client.get("/v1/connectors").await?;
                list(ctx, items(&response, "connectors"));
            }
            ConnectorsSubcommands::Show { name } => {
                let name = checked_id("connector", &name)?;
                let connector = client.get(&format!("/v1/connectors/{}", name)).await?;
                show(ctx, name, &connector);
            }
            ConnectorsSubcommands::Operation { name, operation } => {
                let name = checked_id("connector", &name)?;
                let operation = checked_id("operation", &operation)?;
                let detail = client
                    .get(&format!("/v1/connectors/{}/operations/{}", name, operation))
                    .await?;
                show_operation(ctx, name, operation, &detail);
            }
        }
        Ok(())
    }
}

fn list(ctx: &OutputContext, connectors: &[Value]) {
    if ctx.json() {
        ctx.emit_json(json!({ "connectors": connectors, "count": connectors.len() }));
        return;
    }
    if connectors.is_empty() {
        ctx.status("No connectors available");
        return;
    }
    let rows: Vec<ConnectorRow> = connectors
        .iter()
        .map(|c| ConnectorRow {
            name: text(c, "name"),
            kind: text(c, "type"),
            operations: match c.get("operations") {
                Some(Value::Array(ops)) => ops.len().to_string(),
                Some(Value::Number(n)) => n.to_string(),
                _ => "-".to_string(),
            },
            description: truncate(&text(c, "description"), 50),
        })
        .collect();
    ctx.print(table(rows));
}

fn show(ctx: &OutputContext, name: &str, connector: &Value) {
    if ctx.json() {
        ctx.emit_json(json!({ "connector": connector }));
        return;
    }
    ctx.print(ctx.header(&format!("Connector {}", name)));
    ctx.print(format!("  Type:        {}", text(connector, "type")));
    ctx.print(format!("  Description: {}", text(connector, "description")));

    let operations = items(connector, "operations");
    if operations.is_empty() {
        ctx.print(ctx.muted("  No operations"));
        return;
    }
    let rows: Vec<OperationRow> = operations
        .iter()
        .map(|op| OperationRow {
            name: match op {
                Value::String(s) => s.clone(),
                other => text(other, "name"),
            },
            description: truncate(&text(op, "description"), 60),
        })
        .collect();
    ctx.print(table(rows));
}

fn show_operation(ctx: &OutputContext, connector: &str, operation: &str, detail: &Value) {
    if ctx.json() {
        ctx.emit_json(json!({ "connector": connector, "operation": detail }));
        return;
    }
    ctx.print(ctx.header(&format!("{}.{}", connector, operation)));
    ctx.print(format!("  {}", text(detail, "description")));

    let parameters = parameters(detail);
    if parameters.is_empty() {
        ctx.print(ctx.muted("  No parameters"));
        return;
    }
    ctx.print(table(parameters));
}

/// Parameters come either as a list of `{name, type, required}` objects or
/// as a JSON-schema style `{properties, required}` object.
fn parameters(detail: &Value) -> Vec<ParameterRow> {
    match lookup(detail, "parameters").or_else(|| lookup(detail, "input_schema")) {
        Some(Value::Array(list)) => list
            .iter()
            .map(|p| ParameterRow {
                name: text(p, "name"),
                kind: text(p, "type"),
                required: yes_no(p.get("required").and_then(Value::as_bool).unwrap_or(false)),
                description: truncate(&text(p, "description"), 50),
            })
            .collect(),
        Some(schema @ Value::Object(_)) => {
            let required: Vec<&str> = schema
                .get("required")
                .and_then(Value::as_array)
                .map(|r| r.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            schema
                .get("properties")
                .and_then(Value::as_object)
                .map(|props| {
                    props
                        .iter()
                        .map(|(name, p)| ParameterRow {
                            name: name.clone(),
                            kind: text(p, "type"),
                            required: yes_no(required.contains(&name.as_str())),
                            description: truncate(&text(p, "description"), 50),
                        })
                        .collect()
                })
                .unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

fn yes_no(flag: bool) -> String {
    if flag { "yes" } else { "no" }.to_string()
}
