//! Version command implementation

use crate::cli::output::OutputContext;
use crate::common::error::Result;
use crate::common::version::BuildInfo;
use clap::Args;

#[derive(Debug, Args)]
pub struct VersionCommand {}

impl VersionCommand {
    pub fn execute(self, ctx: &OutputContext) -> Result<()> {
        let info = BuildInfo::current();
        if ctx.json() {
            ctx.emit_json(serde_json::to_value(&info)?);
            return Ok(());
        }
        ctx.print(format!("conductor {}", info.version));
        ctx.print(format!("  commit:     {}", info.commit));
        ctx.print(format!("  built:      {}", info.build_date));
        ctx.print(format!("  runtime:    {}", info.runtime_version));
        ctx.print(format!("  platform:   {}/{}", info.os, info.arch));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::output::GlobalFlags;
    use serde_json::Value;

    #[test]
    fn test_json_envelope() {
        let flags = GlobalFlags {
            json: true,
            ..GlobalFlags::default()
        };
        let (ctx, out) = OutputContext::buffered(flags, "version");
        VersionCommand {}.execute(&ctx).unwrap();
        let value: Value = serde_json::from_str(&out.stdout()).unwrap();
        assert_eq!(value["@version"], "1.0");
        assert_eq!(value["command"], "version");
        assert_eq!(value["success"], true);
        assert_eq!(value["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(value["os"], std::env::consts::OS);
        assert!(value.get("commit").is_some());
    }

    #[test]
    fn test_text_output() {
        let (ctx, out) = OutputContext::buffered(GlobalFlags::default(), "version");
        VersionCommand {}.execute(&ctx).unwrap();
        assert!(out
            .stdout()
            .starts_with(&format!("conductor {}", env!("CARGO_PKG_VERSION"))));
    }
}
