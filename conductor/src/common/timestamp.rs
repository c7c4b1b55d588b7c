/// Timestamp formatting utilities
use chrono::{DateTime, Local};

/// `HH:MM:SS` in the timestamp's own offset, as used in log lines.
/// Unparseable input is returned unchanged.
pub fn format_log_time(timestamp: &str) -> String {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|dt| dt.format("%H:%M:%S").to_string())
        .unwrap_or_else(|_| timestamp.to_string())
}

/// Format an RFC 3339 timestamp as local `YYYY-MM-DD HH:MM:SS`
pub fn format_timestamp_local(timestamp: &str) -> String {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|dt| {
            dt.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|_| timestamp.to_string())
}

/// Human duration from milliseconds: `850ms`, `1.5s`, `2m 5s`, `1h 2m`
pub fn format_duration_ms(ms: f64) -> String {
    if !ms.is_finite() || ms < 0.0 {
        return "-".to_string();
    }
    if ms < 1000.0 {
        return format!("{}ms", ms.round() as u64);
    }
    let secs = ms / 1000.0;
    if secs < 60.0 {
        return format!("{:.1}s", secs);
    }
    let total = secs.round() as u64;
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m {}s", minutes, seconds)
    }
}
