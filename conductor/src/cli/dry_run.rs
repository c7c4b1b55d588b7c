//! `--dry-run` previews: what a mutating command would do, with sensitive
//! values masked and user paths replaced by placeholders.

use crate::cli::output::OutputContext;
use crate::common::paths::ConductorPaths;
use serde_json::{json, Map, Value};
use std::path::Path;

pub const REDACTED: &str = "[REDACTED]";

/// Substrings (case-insensitive) marking a key as sensitive
const SENSITIVE_MARKERS: &[&str] = &["apikey", "api_key", "api-key", "token", "password", "secret"];

pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_MARKERS.iter().any(|marker| key.contains(marker))
}

/// Copy of `value` with every value under a sensitive key replaced
pub fn mask_secrets(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| {
                    let masked = if is_sensitive_key(key) && !inner.is_null() {
                        json!(REDACTED)
                    } else {
                        mask_secrets(inner)
                    };
                    (key.clone(), masked)
                })
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(mask_secrets).collect()),
        other => other.clone(),
    }
}

/// Mask `key=value` pairs given on the command line
pub fn mask_pair(key: &str, value: &str) -> String {
    if is_sensitive_key(key) {
        REDACTED.to_string()
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Action {
    verb: &'static str,
    target: String,
    detail: Option<Value>,
}

/// Ordered list of actions a command would take
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DryRun {
    actions: Vec<Action>,
}

impl DryRun {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action(mut self, verb: &'static str, target: impl Into<String>) -> Self {
        self.actions.push(Action {
            verb,
            target: target.into(),
            detail: None,
        });
        self
    }

    /// An action carrying a request body or other structured detail; the
    /// detail is masked before it is stored
    pub fn action_with(mut self, verb: &'static str, target: impl Into<String>, detail: &Value) -> Self {
        self.actions.push(Action {
            verb,
            target: target.into(),
            detail: Some(mask_secrets(detail)),
        });
        self
    }

    pub fn path(self, verb: &'static str, path: &Path, paths: &ConductorPaths) -> Self {
        let target = paths.placeholder(path);
        self.action(verb, target)
    }

    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for action in &self.actions {
            lines.push(format!("  {:<7} {}", action.verb, action.target));
            if let Some(detail) = &action.detail {
                let body = serde_json::to_string_pretty(detail).unwrap_or_default();
                lines.extend(body.lines().map(|l| format!("          {}", l)));
            }
        }
        lines
    }

    pub fn to_json(&self) -> Value {
        let actions: Vec<Value> = self
            .actions
            .iter()
            .map(|a| {
                let mut entry = json!({"action": a.verb, "target": a.target});
                if let Some(detail) = &a.detail {
                    entry["detail"] = detail.clone();
                }
                entry
            })
            .collect();
        json!({"dry_run": true, "actions": actions})
    }

    pub fn render(&self, ctx: &OutputContext) {
        if ctx.json() {
            ctx.emit_json(self.to_json());
            return;
        }
        ctx.print(ctx.bold("Dry run: no changes made. Would:"));
        for line in self.lines() {
            ctx.print(line);
        }
    }
}
