//! Settings file inspection

use crate::cli::dry_run::mask_secrets;
use crate::cli::Session;
use crate::common::config::{settings_path, ControllerConfig, Overrides};
use crate::common::error::{CliError, Result};
use clap::{Args, Subcommand};
use serde_json::{json, Value};

#[derive(Debug, Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    command: ConfigSubcommands,
}

#[derive(Debug, Subcommand)]
enum ConfigSubcommands {
    /// Print the settings file (secrets masked) and the resolved controller config
    Show,

    /// Print the settings file location
    Path,

    /// Check the settings file for syntax and consistency errors
    Validate,
}

impl ConfigCommand {
    pub fn execute(self, session: &Session) -> Result<()> {
        match self.command {
            ConfigSubcommands::Show => show(session),
            ConfigSubcommands::Path => path(session),
            ConfigSubcommands::Validate => validate(session),
        }
    }
}

fn show(session: &Session) -> Result<()> {
    let ctx = session.out();
    let settings = session.settings()?;
    let config = session.controller_config(&Overrides::default())?;
    let masked = mask_secrets(&serde_json::to_value(&settings.raw)?);
    let resolved = resolved_json(&config);

    if ctx.json() {
        ctx.emit_json(json!({
            "path": settings.path,
            "exists": settings.exists,
            "settings": masked,
            "resolved": resolved,
        }));
        return Ok(());
    }

    ctx.print(ctx.header(&format!("Settings ({})", settings.path.display())));
    if settings.exists && !masked.is_null() {
        let yaml = serde_yaml::to_string(&masked)
            .map_err(|e| CliError::Generic(format!("failed to render settings: {}", e)))?;
        for line in yaml.lines() {
            ctx.print(format!("  {}", line));
        }
    } else {
        ctx.print(ctx.muted("  (no settings file, defaults apply)"));
    }

    ctx.print("");
    ctx.print(ctx.header("Resolved controller config"));
    ctx.print(format!("  Listen:         {}", config.listen));
    ctx.print(format!("  Allow remote:   {}", config.allow_remote));
    ctx.print(format!("  Backend:        {}", config.backend.as_deref().unwrap_or("-")));
    ctx.print(format!(
        "  Workflows dir:  {}",
        config
            .workflows_dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string())
    ));
    ctx.print(format!("  PID file:       {}", config.pid_file.display()));
    ctx.print(format!("  Lifecycle log:  {}", config.lifecycle_log.display()));
    ctx.print(format!("  Controller log: {}", config.controller_log.display()));
    Ok(())
}

fn resolved_json(config: &ControllerConfig) -> Value {
    json!({
        "listen": config.listen.to_string(),
        "allow_remote": config.allow_remote,
        "backend": config.backend,
        "workflows_dir": config.workflows_dir,
        "pid_file": config.pid_file,
        "force_insecure": config.force_insecure,
        "identity_allowlist": config.identity_allowlist,
        "lifecycle_log": config.lifecycle_log,
        "controller_log": config.controller_log,
    })
}

fn path(session: &Session) -> Result<()> {
    let ctx = session.out();
    let (path, explicit) = settings_path(
        ctx.flags().config.as_deref(),
        session.paths(),
    );
    let exists = path.is_file();
    if ctx.json() {
        ctx.emit_json(json!({ "path": path, "exists": exists, "explicit": explicit }));
        return Ok(());
    }
    ctx.print(path.display().to_string());
    if !exists {
        ctx.detail(ctx.muted("(file does not exist; defaults apply)"));
    }
    Ok(())
}

fn validate(session: &Session) -> Result<()> {
    let ctx = session.out();
    let settings = session.settings()?;
    session.controller_config(&Overrides::default())?;

    if ctx.json() {
        ctx.emit_json(json!({
            "valid": true,
            "path": settings.path,
            "exists": settings.exists,
        }));
        return Ok(());
    }
    if settings.exists {
        ctx.status(format!("{} {} is valid", ctx.ok("✓"), settings.path.display()));
    } else {
        ctx.warning(format!(
            "No settings file at {}; defaults apply",
            settings.path.display()
        ));
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::cli::dispatch;
    use crate::cli::output::GlobalFlags;
    use crate::cli::test_support::*;

    fn write_settings(t: &TestSession, yaml: &str) {
        std::fs::write(t.session.paths().settings_file(), yaml).unwrap();
    }

    #[tokio::test]
    async fn test_show_masks_secrets() {
        let t = session(json_flags(), "config show");
        write_settings(
            &t,
            "controller:\n  backend: sqlite\nproviders:\n  openai:\n    api_key: sk-live-123\n",
        );
        dispatch(parse(&["config", "show"]), &t.session).await.unwrap();
        let out = t.out.stdout();
        assert!(!out.contains("sk-live-123"));
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["settings"]["providers"]["openai"]["api_key"], "[REDACTED]");
        assert_eq!(value["resolved"]["backend"], "sqlite");
    }

    #[tokio::test]
    async fn test_validate_reports_syntax_location() {
        let t = session(json_flags(), "config validate");
        write_settings(&t, "controller:\n  socket: [unclosed\n");
        let err = dispatch(parse(&["config", "validate"]), &t.session)
            .await
            .unwrap_err();
        assert_eq!(err.error_code().to_string(), "E002");
        assert_eq!(err.exit_code(), 2);
        assert!(err.location().is_some());
    }

    #[tokio::test]
    async fn test_validate_listen_conflict() {
        let t = session(GlobalFlags::default(), "config validate");
        write_settings(&t, "controller:\n  socket: /tmp/a.sock\n  tcp: 127.0.0.1:9000\n");
        let err = dispatch(parse(&["config", "validate"]), &t.session)
            .await
            .unwrap_err();
        assert_eq!(err.error_code().to_string(), "E003");
    }

    #[tokio::test]
    async fn test_validate_ok() {
        let t = session(GlobalFlags::default(), "config validate");
        dispatch(parse(&["config", "validate"]), &t.session).await.unwrap();
        assert!(t.out.stdout().contains("is valid"));
    }

    #[tokio::test]
    async fn test_path() {
        let t = session(json_flags(), "config path");
        dispatch(parse(&["config", "path"]), &t.session).await.unwrap();
        let value: Value = serde_json::from_str(&t.out.stdout()).unwrap();
        assert_eq!(value["exists"], true);
        assert_eq!(value["explicit"], false);
        assert!(value["path"].as_str().unwrap().ends_with("settings.yaml"));
    }
}
