//! Utilities for command handlers.

use std::{
	fs,
	io::{self, ErrorKind, Read, Write},
	path::PathBuf,
	time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::Args;
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::{
	config::ProviderConfig,
	kubectl::Kubectl,
	provider::{Kubernetes, Provider},
};

/// Arguments shared by every command that talks to the provider.
#[derive(Args, Debug, Clone)]
pub struct ProviderArgs {
	/// Evaluated configuration as JSON, or `-` to read it from stdin
	pub input: String,

	/// Environment spec.json (or YAML provider config) with apiServer and namespace
	#[arg(short = 'c', long)]
	pub config: Option<PathBuf>,

	/// Kubernetes API server address, overrides the config file
	#[arg(long, env = "TK_PROVIDER_SERVER")]
	pub server: Option<String>,

	/// Namespace for every manifest, overrides the config file
	#[arg(short = 'n', long)]
	pub namespace: Option<String>,

	/// kubectl executable
	#[arg(long, env = "TK_PROVIDER_KUBECTL", default_value = "kubectl")]
	pub kubectl: PathBuf,

	/// Kill kubectl when it runs longer than this many seconds
	#[arg(long)]
	pub timeout: Option<u64>,
}

impl ProviderArgs {
	/// Config file (if any) with command-line overrides applied.
	pub fn provider_config(&self) -> Result<ProviderConfig> {
		let config = match &self.config {
			Some(path) => ProviderConfig::load(path)?,
			None => ProviderConfig::default(),
		};
		Ok(config.with_overrides(self.server.clone(), self.namespace.clone()))
	}

	/// An initialized Kubernetes provider.
	pub fn provider(&self) -> Result<Kubernetes> {
		let mut kubectl = Kubectl::new().with_binary(&self.kubectl);
		if let Some(secs) = self.timeout {
			kubectl = kubectl.with_timeout(Duration::from_secs(secs));
		}

		let config = self.provider_config()?;
		debug!(?config, "initializing provider");

		let mut provider = Kubernetes::with_client(kubectl);
		provider.init(config)?;
		Ok(provider)
	}

	pub fn document(&self) -> Result<Map<String, JsonValue>> {
		read_document(&self.input)
	}
}

/// Read the evaluated configuration from `path` (`-` for stdin).
///
/// The top level must be an object.
pub fn read_document(path: &str) -> Result<Map<String, JsonValue>> {
	let content = if path == "-" {
		let mut buf = String::new();
		io::stdin()
			.read_to_string(&mut buf)
			.context("reading evaluated configuration from stdin")?;
		buf
	} else {
		fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?
	};

	let value: JsonValue = serde_json::from_str(&content)
		.with_context(|| format!("failed to parse {path} as JSON"))?;
	match value {
		JsonValue::Object(obj) => Ok(obj),
		other => bail!(
			"evaluated configuration must be an object, got {}",
			json_type_name(&other)
		),
	}
}

fn json_type_name(value: &JsonValue) -> &'static str {
	match value {
		JsonValue::Null => "null",
		JsonValue::Bool(_) => "boolean",
		JsonValue::Number(_) => "number",
		JsonValue::String(_) => "string",
		JsonValue::Array(_) => "array",
		JsonValue::Object(_) => "object",
	}
}

/// Ask on stderr whether to continue.
pub fn prompt_confirmation(question: &str) -> Result<bool> {
	eprint!("\n{question} [y/N]: ");
	io::stderr().flush()?;

	let mut input = String::new();
	io::stdin().read_line(&mut input)?;

	let input = input.trim().to_lowercase();
	Ok(input == "y" || input == "yes")
}

/// A writer wrapper that silently handles broken pipe errors.
///
/// Lets `tk-provider show ... | head -1` exit cleanly.
pub struct BrokenPipeGuard<W> {
	inner: W,
}

impl<W> BrokenPipeGuard<W> {
	pub fn new(inner: W) -> Self {
		Self { inner }
	}
}

impl<W: Write> Write for BrokenPipeGuard<W> {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		match self.inner.write(buf) {
			Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(buf.len()),
			other => other,
		}
	}

	fn flush(&mut self) -> io::Result<()> {
		match self.inner.flush() {
			Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
			other => other,
		}
	}
}

#[cfg(test)]
mod tests {
	use tempfile::NamedTempFile;

	use super::*;

	struct BrokenPipeWriter;

	impl Write for BrokenPipeWriter {
		fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
			Err(io::Error::new(ErrorKind::BrokenPipe, "broken pipe"))
		}

		fn flush(&mut self) -> io::Result<()> {
			Err(io::Error::new(ErrorKind::BrokenPipe, "broken pipe"))
		}
	}

	#[test]
	fn test_broken_pipe_is_swallowed() {
		let mut guard = BrokenPipeGuard::new(BrokenPipeWriter);
		assert!(guard.write_all(b"apiVersion: v1\n").is_ok());
		assert!(guard.flush().is_ok());
	}

	#[test]
	fn test_read_document_rejects_non_object() {
		let file = NamedTempFile::new().unwrap();
		fs::write(file.path(), "[1, 2]").unwrap();

		let err = read_document(file.path().to_str().unwrap()).unwrap_err();
		assert_eq!(
			err.to_string(),
			"evaluated configuration must be an object, got array"
		);
	}

	#[test]
	fn test_read_document_preserves_order() {
		let file = NamedTempFile::new().unwrap();
		fs::write(file.path(), r#"{"z": {}, "a": {}, "m": {}}"#).unwrap();

		let doc = read_document(file.path().to_str().unwrap()).unwrap();
		let keys: Vec<&String> = doc.keys().collect();
		assert_eq!(keys, vec!["z", "a", "m"]);
	}

	#[test]
	fn test_provider_config_overrides() {
		let args = ProviderArgs {
			input: "-".to_string(),
			config: None,
			server: Some("https://k8s".to_string()),
			namespace: Some("ns".to_string()),
			kubectl: PathBuf::from("kubectl"),
			timeout: None,
		};
		assert_eq!(
			args.provider_config().unwrap(),
			ProviderConfig::new("https://k8s", "ns")
		);
	}
}
