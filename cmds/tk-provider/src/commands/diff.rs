//! Diff command handler.

use std::{io::Write, process::ExitCode};

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use super::util::ProviderArgs;
use crate::provider::Provider;

/// Exit status of `diff` when the cluster differs from the configuration.
pub const CHANGES_EXIT_CODE: u8 = 16;

#[derive(Args)]
pub struct DiffArgs {
	#[command(flatten)]
	pub provider: ProviderArgs,

	/// Exit with 0 even when differences are found
	#[arg(short = 'z', long)]
	pub exit_zero: bool,
}

/// Run the diff command.
pub fn run<W: Write>(args: DiffArgs, writer: W) -> Result<ExitCode> {
	let changed = diff(&args.provider, writer)?;
	if changed && !args.exit_zero {
		Ok(ExitCode::from(CHANGES_EXIT_CODE))
	} else {
		Ok(ExitCode::SUCCESS)
	}
}

/// Write the differences to `writer`; returns whether there were any.
pub fn diff<W: Write>(args: &ProviderArgs, mut writer: W) -> Result<bool> {
	let provider = args.provider()?;
	let document = args.document()?;

	let state = provider
		.reconcile(&document)
		.context("reconciling evaluated configuration")?;
	if state.is_empty() {
		eprintln!("No manifests found.");
		return Ok(false);
	}

	let diff = provider.diff(&state)?;
	if diff.trim().is_empty() {
		eprintln!("No differences.");
		return Ok(false);
	}

	writer.write_all(diff.as_bytes())?;
	writer.flush()?;
	info!(resources = state.len(), "cluster differs from configuration");
	Ok(true)
}
