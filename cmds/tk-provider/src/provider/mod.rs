//! Pluggable deployment backends.
//!
//! A [`Provider`] turns the evaluated configuration into a backend-specific
//! state, and knows how to print, diff and apply that state. The state is
//! opaque to callers: it is only ever handed back to the provider instance
//! that produced it.
//!
//! # Supported Providers
//!
//! - [`Kubernetes`] - plain Kubernetes manifests, shipped with kubectl

mod kubernetes;

pub use kubernetes::{Kubernetes, Manifests};

use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use crate::{config::ProviderConfig, kubectl::ExternalToolError, yaml::SerializationError};

/// Errors reported by providers.
#[derive(Debug, Error)]
pub enum Error {
	#[error("provider used before init")]
	NotInitialized,

	#[error("provider is already initialized")]
	AlreadyInitialized,

	#[error("state was produced by a different provider instance")]
	ForeignState,

	#[error("formatting manifests")]
	Serialization(#[from] SerializationError),

	#[error("running kubectl")]
	ExternalTool(#[from] ExternalToolError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Contract shared by all deployment backends.
///
/// `init` must be called exactly once before anything else; every other
/// operation fails with [`Error::NotInitialized`] until then.
pub trait Provider {
	/// Backend-specific reconciled state.
	type State;

	/// Name of the provider, also used as its command name.
	fn name(&self) -> &'static str;

	/// Make the provider ready for use.
	fn init(&mut self, config: ProviderConfig) -> Result<()>;

	/// Turn the evaluated configuration into provider state.
	fn reconcile(&self, raw: &Map<String, JsonValue>) -> Result<Self::State>;

	/// Render the state for humans (and for the backend).
	fn fmt(&self, state: &Self::State) -> Result<String>;

	/// Submit the state to the target system.
	fn apply(&self, state: &Self::State) -> Result<String>;

	/// Compare the state with the target system.
	fn diff(&self, state: &Self::State) -> Result<String>;

	/// Provider-specific command group.
	fn command(&self) -> clap::Command {
		clap::Command::new(self.name())
	}
}
