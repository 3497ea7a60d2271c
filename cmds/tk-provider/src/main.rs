use std::process::ExitCode;

use anyhow::Result;
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use tk_provider::{
	commands::{self, util::BrokenPipeGuard},
	provider::Kubernetes,
	telemetry,
};
use tracing::Level;

#[cfg(all(
	target_os = "linux",
	feature = "mimalloc",
	not(feature = "system-alloc")
))]
#[global_allocator]
static GLOBAL: mimallocator::Mimalloc = mimallocator::Mimalloc;

#[derive(Parser)]
#[command(name = "tk-provider")]
#[command(about = "Ship evaluated Jsonnet to Kubernetes", long_about = None)]
#[command(version)]
struct Cli {
	/// Log level (possible values: error, warn, info, debug, trace)
	#[arg(long, global = true)]
	log_level: Option<Level>,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Print the manifests as YAML
	Show(commands::show::ShowArgs),

	/// Differences between the configuration and the cluster
	Diff(commands::diff::DiffArgs),

	/// Apply the configuration to the cluster
	Apply(commands::apply::ApplyArgs),
}

fn main() -> Result<ExitCode> {
	let matches = Cli::command()
		.subcommand(commands::provider::command(&Kubernetes::new()))
		.get_matches();

	let _telemetry = telemetry::init(matches.get_one::<Level>("log_level").copied())?;

	let stdout = BrokenPipeGuard::new(std::io::stdout());

	if let Some((commands::provider::NAME, sub)) = matches.subcommand() {
		commands::provider::run(sub, stdout)?;
		return Ok(ExitCode::SUCCESS);
	}

	let cli = Cli::from_arg_matches(&matches)?;
	match cli.command {
		Commands::Show(args) => commands::show::run(args, stdout)?,
		Commands::Diff(args) => return commands::diff::run(args, stdout),
		Commands::Apply(args) => commands::apply::run(args, stdout)?,
	}
	Ok(ExitCode::SUCCESS)
}
