//! `provider` command group: one sub-command per provider.

use std::io::Write;

use anyhow::Result;
use clap::{ArgMatches, Command};

use crate::provider::Provider;

pub const NAME: &str = "provider";

/// Build the command group from the providers' own commands.
pub fn command<P: Provider>(provider: &P) -> Command {
	Command::new(NAME)
		.about("Provider specific commands")
		.subcommand_required(true)
		.arg_required_else_help(true)
		.subcommand(provider.command())
}

/// Run the provider command group.
///
/// No provider implements any sub-operations yet.
pub fn run<W: Write>(_matches: &ArgMatches, mut writer: W) -> Result<()> {
	writeln!(writer, "not implemented")?;
	Ok(())
}
