//! Non-interactive detection and confirmation prompts.

use crate::common::error::{CliError, Result};
use std::io::{self, BufRead, IsTerminal, Write};

/// CI systems that export `<NAME>=true` or `<NAME>=1`
const CI_VARS: &[&str] = &["CI", "GITHUB_ACTIONS", "GITLAB_CI", "CIRCLECI"];

/// True when nobody can answer a prompt
pub fn is_non_interactive() -> bool {
    detect_non_interactive(|key| std::env::var(key).ok(), io::stdin().is_terminal())
}

pub fn detect_non_interactive(env: impl Fn(&str) -> Option<String>, stdin_is_terminal: bool) -> bool {
    let truthy = |key: &str| matches!(env(key).as_deref(), Some("true") | Some("1"));
    if env("CONDUCTOR_NON_INTERACTIVE").as_deref() == Some("true") {
        return true;
    }
    if CI_VARS.iter().any(|key| truthy(key)) {
        return true;
    }
    if env("JENKINS_HOME").is_some() {
        return true;
    }
    !stdin_is_terminal
}

/// Ask a yes/no question on stderr. `assume_yes` skips the prompt; in
/// non-interactive mode the prompt fails with exit 70.
pub fn confirm(question: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    if is_non_interactive() {
        return Err(CliError::non_interactive(format!(
            "confirmation required: {}",
            question
        )));
    }
    let stdin = io::stdin();
    confirm_with(question, &mut stdin.lock(), &mut io::stderr())
}

pub fn confirm_with(question: &str, input: &mut impl BufRead, prompt: &mut impl Write) -> Result<bool> {
    write!(prompt, "{} [y/N] ", question)?;
    prompt.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
