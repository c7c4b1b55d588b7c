//! Validation of identifiers and `key=value` arguments

use serde_json::Value;
use std::time::Duration;

/// Validate an identifier (run id, workspace, connector, provider) that is
/// interpolated into an API path segment
pub fn validate_identifier(kind: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{} cannot be empty", kind));
    }

    if value == "." || value == ".." {
        return Err(format!("{} cannot be '.' or '..'", kind));
    }

    if value.contains('/') || value.contains('\\') {
        return Err(format!("{} cannot contain path separators (/ or \\)", kind));
    }

    const INVALID_CHARS: &[char] = &['?', '#', '%', '"', '<', '>', '|', '\0'];
    if let Some(invalid_char) = value.chars().find(|c| INVALID_CHARS.contains(c)) {
        return Err(format!("{} cannot contain '{}'", kind, invalid_char));
    }

    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(format!("{} cannot contain whitespace or control characters", kind));
    }

    if value.len() > 255 {
        return Err(format!("{} cannot exceed 255 characters", kind));
    }

    Ok(())
}

/// Parse `key=value`; the value may itself contain `=`
pub fn parse_key_value(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got {:?}", arg)),
    }
}

/// Parse `step_id=<json>` for step output overrides
pub fn parse_step_override(arg: &str) -> Result<(String, Value), String> {
    let (step, raw) = parse_key_value(arg)?;
    let value = serde_json::from_str(&raw)
        .map_err(|e| format!("invalid JSON for step {:?}: {}", step, e))?;
    Ok((step, value))
}

/// Parse `500ms`, `2s`, `1m`, `1h` or bare seconds (`30`, `1.5`)
pub fn parse_duration(arg: &str) -> Result<Duration, String> {
    let arg = arg.trim();
    let split = arg
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(arg.len());
    let (number, unit) = arg.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid duration {:?}", arg))?;
    let seconds = match unit.trim() {
        "ms" => value / 1000.0,
        "" | "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        other => return Err(format!("unknown duration unit {:?} in {:?}", other, arg)),
    };
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(format!("duration must be positive, got {:?}", arg));
    }
    Ok(Duration::from_secs_f64(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(validate_identifier("run id", "abc123").is_ok());
        assert!(validate_identifier("workspace", "team-a_2").is_ok());
        assert!(validate_identifier("connector", "github.issues").is_ok());
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(validate_identifier("run id", "").is_err());
        assert!(validate_identifier("run id", "..").is_err());
        assert!(validate_identifier("run id", "a/b").is_err());
        assert!(validate_identifier("run id", "a?b").is_err());
        assert!(validate_identifier("run id", "a b").is_err());
        assert!(validate_identifier("run id", &"x".repeat(256)).is_err());
        let err = validate_identifier("workspace", "").unwrap_err();
        assert_eq!(err, "workspace cannot be empty");
    }

    #[test]
    fn test_key_value() {
        assert_eq!(
            parse_key_value("url=https://x?a=b").unwrap(),
            ("url".to_string(), "https://x?a=b".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_step_override() {
        let (step, value) = parse_step_override("fetch={\"status\":200}").unwrap();
        assert_eq!(step, "fetch");
        assert_eq!(value["status"], 200);
        assert!(parse_step_override("fetch={bad").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("5d").is_err());
    }
}
