//! Helpers for rendering the controller's untyped JSON documents

use crate::common::error::{CliError, Result};
use crate::common::timestamp::{format_duration_ms, format_timestamp_local};
use crate::common::validation::validate_identifier;
use serde_json::Value;
use tabled::{Table, Tabled};

/// Follow a dotted path such as `progress.current_step`
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, key| current.get(key))
        .filter(|v| !v.is_null())
}

/// Display text for the value at `path`; `-` when absent
pub fn text(value: &Value, path: &str) -> String {
    match lookup(value, path) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "-".to_string(),
    }
}

/// The first of `paths` that is present
pub fn text_any(value: &Value, paths: &[&str]) -> String {
    paths
        .iter()
        .find_map(|path| lookup(value, path))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| "-".to_string())
}

/// Elements of `value[key]`, or of `value` itself when it is an array
pub fn items<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .or_else(|| value.as_array())
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Local-time rendering of the timestamp at `path`
pub fn timestamp(value: &Value, path: &str) -> String {
    match lookup(value, path).and_then(Value::as_str) {
        Some(ts) => format_timestamp_local(ts),
        None => "-".to_string(),
    }
}

/// Duration at `path`, in milliseconds
pub fn duration(value: &Value, path: &str) -> String {
    match lookup(value, path).and_then(Value::as_f64) {
        Some(ms) => format_duration_ms(ms),
        None => "-".to_string(),
    }
}

/// Cost in USD at `path`
pub fn cost(value: &Value, path: &str) -> String {
    match lookup(value, path).and_then(Value::as_f64) {
        Some(usd) => format!("${:.4}", usd),
        None => "-".to_string(),
    }
}

/// Reject identifiers that cannot be used as one API path segment
pub fn checked_id<'a>(kind: &str, value: &'a str) -> Result<&'a str> {
    validate_identifier(kind, value).map_err(CliError::invalid_input)?;
    Ok(value)
}

pub fn table<T: Tabled>(rows: Vec<T>) -> String {
    Table::new(rows).to_string()
}
