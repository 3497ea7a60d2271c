//! Show command handler.

use std::io::{IsTerminal, Write};

use anyhow::{bail, Context, Result};
use clap::Args;
use serde_json::{Map, Value as JsonValue};

use super::util::ProviderArgs;
use crate::provider::Provider;

#[derive(Args)]
pub struct ShowArgs {
	#[command(flatten)]
	pub provider: ProviderArgs,

	/// Allow redirecting output to a file or a pipe
	#[arg(long)]
	pub dangerous_allow_redirect: bool,
}

/// Run the show command.
pub fn run<W: Write>(args: ShowArgs, mut writer: W) -> Result<()> {
	if !args.dangerous_allow_redirect && !std::io::stdout().is_terminal() {
		bail!(
			"redirection of the output of show is discouraged and disabled by default. \
			 Pass --dangerous-allow-redirect to enable it"
		);
	}

	let provider = args.provider.provider()?;
	let document = args.provider.document()?;
	let yaml = show(&provider, &document)?;

	writer.write_all(yaml.as_bytes())?;
	writer.flush()?;
	Ok(())
}

/// Reconcile `document` and render the result.
pub fn show<P: Provider>(provider: &P, document: &Map<String, JsonValue>) -> Result<String> {
	let state = provider
		.reconcile(document)
		.context("reconciling evaluated configuration")?;
	let yaml = provider.fmt(&state)?;
	Ok(yaml)
}
