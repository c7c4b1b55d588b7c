//! Common status formatting utilities

use colored::Colorize;

/// Broad buckets the daemon's run, span and check statuses fall into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Active,
    Failure,
    Cancelled,
    Unknown,
}

pub fn classify(status: &str) -> StatusClass {
    match status.to_ascii_lowercase().as_str() {
        "completed" | "complete" | "succeeded" | "success" | "ok" | "healthy" | "pass" => {
            StatusClass::Success
        }
        "running" | "pending" | "queued" | "starting" | "degraded" | "warn" => StatusClass::Active,
        "failed" | "failure" | "error" | "unhealthy" | "fail" => StatusClass::Failure,
        "cancelled" | "canceled" => StatusClass::Cancelled,
        _ => StatusClass::Unknown,
    }
}

/// Format a status for display, colored when `styled`
pub fn format_status(status: &str, styled: bool) -> String {
    if !styled {
        return status.to_string();
    }
    match classify(status) {
        StatusClass::Success => status.green().to_string(),
        StatusClass::Active => status.yellow().to_string(),
        StatusClass::Failure => status.red().bold().to_string(),
        StatusClass::Cancelled => status.dimmed().to_string(),
        StatusClass::Unknown => status.white().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("COMPLETED"), StatusClass::Success);
        assert_eq!(classify("running"), StatusClass::Active);
        assert_eq!(classify("failed"), StatusClass::Failure);
        assert_eq!(classify("canceled"), StatusClass::Cancelled);
        assert_eq!(classify("mystery"), StatusClass::Unknown);
    }

    #[test]
    fn test_plain_status_is_unchanged() {
        assert_eq!(format_status("failed", false), "failed");
    }
}
