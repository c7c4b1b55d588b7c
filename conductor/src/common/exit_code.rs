//! Process exit codes shared by every command

/// Exit codes the dispatcher hands back to the shell
pub mod codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const INVALID_USAGE: i32 = 2;
    pub const MISSING_INPUT: i32 = 3;
    pub const PROVIDER_ERROR: i32 = 4;
    pub const CONTROLLER_NOT_RUNNING: i32 = 10;
    pub const MISSING_INPUT_NON_INTERACTIVE: i32 = 70;
    pub const SIGNAL_BASE: i32 = 128;
    pub const INTERRUPTED: i32 = SIGNAL_BASE + 2;
}

/// Describe an exit code for `--verbose` diagnostics
pub fn describe(exit_code: i32) -> &'static str {
    match exit_code {
        codes::SUCCESS => "success",
        codes::GENERAL_ERROR => "execution failed",
        codes::INVALID_USAGE => "invalid usage or workflow",
        codes::MISSING_INPUT => "missing input",
        codes::PROVIDER_ERROR => "provider error",
        codes::CONTROLLER_NOT_RUNNING => "controller not running",
        codes::MISSING_INPUT_NON_INTERACTIVE => "missing input in non-interactive mode",
        codes::INTERRUPTED => "interrupted",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupted_is_sigint_equivalent() {
        assert_eq!(codes::INTERRUPTED, 130);
        assert_eq!(describe(130), "interrupted");
        assert_eq!(describe(10), "controller not running");
        assert_eq!(describe(42), "unknown");
    }
}
