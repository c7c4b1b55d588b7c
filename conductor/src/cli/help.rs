//! `help [cmd...] [--json]`: the command tree as text or as JSON metadata.

use crate::cli::output::OutputContext;
use crate::common::error::{CliError, Result};
use clap::{Arg, Args, Command};
use serde_json::{json, Value};

#[derive(Debug, Args)]
pub struct HelpCommand {
    /// Command path to describe, e.g. `controller start`
    command: Vec<String>,
}

impl HelpCommand {
    pub fn execute(self, ctx: &OutputContext, root: &Command) -> Result<()> {
        let target = find_command(root, &self.command).ok_or_else(|| {
            CliError::Usage(format!("unknown command: {}", self.command.join(" ")))
        })?;

        if ctx.json() {
            ctx.emit_json(json!({ "help": command_metadata(target) }));
            return Ok(());
        }

        let bin_name = std::iter::once(root.get_name())
            .chain(self.command.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        let mut target = target.clone().bin_name(bin_name);
        let text = target.render_long_help();
        if ctx.styled() {
            ctx.print(text.ansi().to_string());
        } else {
            ctx.print(text.to_string());
        }
        Ok(())
    }
}

/// Walk `path` down from `root`; an empty path is the root itself
pub fn find_command<'a>(root: &'a Command, path: &[String]) -> Option<&'a Command> {
    path.iter()
        .try_fold(root, |current, name| current.find_subcommand(name))
}

/// Name, description, arguments and nested subcommands of `cmd`
pub fn command_metadata(cmd: &Command) -> Value {
    let arguments: Vec<Value> = cmd
        .get_arguments()
        .filter(|arg| !arg.is_hide_set() && !matches!(arg.get_id().as_str(), "help" | "version"))
        .map(argument_metadata)
        .collect();
    let subcommands: Vec<Value> = cmd
        .get_subcommands()
        .filter(|sub| !sub.is_hide_set())
        .map(command_metadata)
        .collect();

    json!({
        "name": cmd.get_name(),
        "about": cmd.get_about().map(|about| about.to_string()),
        "aliases": cmd.get_visible_aliases().collect::<Vec<_>>(),
        "arguments": arguments,
        "subcommands": subcommands,
    })
}

fn argument_metadata(arg: &Arg) -> Value {
    json!({
        "name": arg.get_id().as_str(),
        "long": arg.get_long(),
        "short": arg.get_short().map(|c| c.to_string()),
        "help": arg.get_help().map(|help| help.to_string()),
        "positional": arg.is_positional(),
        "required": arg.is_required_set(),
        "global": arg.is_global_set(),
        "takes_value": arg.get_action().takes_values(),
        "env": arg.get_env().map(|env| env.to_string_lossy().into_owned()),
    })
}
