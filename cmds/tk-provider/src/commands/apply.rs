//! Apply command handler.
//!
//! Shows the diff against the cluster first and asks for confirmation
//! before handing the manifests to kubectl.

use std::io::{IsTerminal, Write};

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::instrument;

use super::util::{prompt_confirmation, ProviderArgs};
use crate::provider::Provider;

#[derive(Args)]
pub struct ApplyArgs {
	#[command(flatten)]
	pub provider: ProviderArgs,

	/// Skip interactive approval
	#[arg(long)]
	pub auto_approve: bool,
}

/// Run the apply command.
#[instrument(skip_all, fields(input = %args.provider.input))]
pub fn run<W: Write>(args: ApplyArgs, mut writer: W) -> Result<()> {
	let provider = args.provider.provider()?;
	let document = args.provider.document()?;

	let state = provider
		.reconcile(&document)
		.context("reconciling evaluated configuration")?;
	if state.is_empty() {
		eprintln!("No manifests found. Nothing to apply.");
		return Ok(());
	}

	let diff = provider.diff(&state)?;
	if diff.trim().is_empty() {
		eprintln!("No differences. Nothing to apply.");
		return Ok(());
	}
	writer.write_all(diff.as_bytes())?;
	writer.flush()?;

	if !args.auto_approve {
		if !std::io::stdin().is_terminal() {
			bail!(
				"cannot prompt for confirmation in non-interactive mode. \
				 Use --auto-approve to skip confirmation."
			);
		}
		if !prompt_confirmation("Apply these changes?")? {
			eprintln!("Apply cancelled.");
			return Ok(());
		}
	}

	let output = provider.apply(&state)?;
	writer.write_all(output.as_bytes())?;
	writer.flush()?;
	Ok(())
}
