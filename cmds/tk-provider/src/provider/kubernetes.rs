//! Kubernetes provider.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value as JsonValue};
use tracing::{info, instrument};

use super::{Error, Provider, Result};
use crate::{
	config::ProviderConfig,
	kubectl::{ClusterClient, Kubectl},
	manifest::{flatten_object, inject_namespace, Manifest, ResourceId},
	yaml,
};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Reconciled state of the [`Kubernetes`] provider: the flattened manifests,
/// tagged with the instance that produced them.
#[derive(Debug, Clone)]
pub struct Manifests {
	owner: u64,
	manifests: Vec<Manifest>,
}

impl Manifests {
	pub fn len(&self) -> usize {
		self.manifests.len()
	}

	pub fn is_empty(&self) -> bool {
		self.manifests.is_empty()
	}

	/// Identities of the manifests, in order.
	pub fn ids(&self) -> impl Iterator<Item = ResourceId> + '_ {
		self.manifests.iter().map(Manifest::id)
	}
}

/// Bridges evaluated Jsonnet to a Kubernetes cluster.
///
/// Every manifest found in the evaluated document is moved into the
/// configured namespace, then handed to the [`ClusterClient`] (kubectl by
/// default) as a single YAML stream.
#[derive(Debug)]
pub struct Kubernetes<C = Kubectl> {
	id: u64,
	client: C,
	config: Option<ProviderConfig>,
}

impl Kubernetes<Kubectl> {
	pub fn new() -> Self {
		Self::with_client(Kubectl::new())
	}
}

impl Default for Kubernetes<Kubectl> {
	fn default() -> Self {
		Self::new()
	}
}

impl<C: ClusterClient> Kubernetes<C> {
	/// Create an uninitialized provider talking to the cluster through `client`.
	pub fn with_client(client: C) -> Self {
		Self {
			id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
			client,
			config: None,
		}
	}

	pub fn client(&self) -> &C {
		&self.client
	}

	/// Configuration given to `init`, if it has happened.
	pub fn config(&self) -> Option<&ProviderConfig> {
		self.config.as_ref()
	}

	fn initialized(&self) -> Result<&ProviderConfig> {
		self.config.as_ref().ok_or(Error::NotInitialized)
	}

	/// Validate `state` and render it; shared by fmt, apply and diff.
	fn render(&self, state: &Manifests) -> Result<(&ProviderConfig, String)> {
		let config = self.initialized()?;
		if state.owner != self.id {
			return Err(Error::ForeignState);
		}
		let rendered = yaml::to_yaml_stream(&state.manifests)?;
		Ok((config, rendered))
	}
}

impl<C: ClusterClient> Provider for Kubernetes<C> {
	type State = Manifests;

	fn name(&self) -> &'static str {
		"kubernetes"
	}

	#[instrument(skip_all, fields(endpoint = %config.endpoint, namespace = %config.namespace))]
	fn init(&mut self, config: ProviderConfig) -> Result<()> {
		if self.config.is_some() {
			return Err(Error::AlreadyInitialized);
		}
		self.config = Some(config);
		Ok(())
	}

	#[instrument(skip_all)]
	fn reconcile(&self, raw: &Map<String, JsonValue>) -> Result<Manifests> {
		let config = self.initialized()?;
		let mut manifests = flatten_object(raw);
		inject_namespace(&mut manifests, &config.namespace);
		info!(
			count = manifests.len(),
			namespace = %config.namespace,
			"reconciled manifests"
		);
		Ok(Manifests {
			owner: self.id,
			manifests,
		})
	}

	#[instrument(skip_all, fields(count = state.len()))]
	fn fmt(&self, state: &Manifests) -> Result<String> {
		self.render(state).map(|(_, rendered)| rendered)
	}

	#[instrument(skip_all, fields(count = state.len()))]
	fn apply(&self, state: &Manifests) -> Result<String> {
		let (config, rendered) = self.render(state)?;
		Ok(self.client.apply(&config.endpoint, &rendered)?)
	}

	#[instrument(skip_all, fields(count = state.len()))]
	fn diff(&self, state: &Manifests) -> Result<String> {
		let (config, rendered) = self.render(state)?;
		Ok(self.client.diff(&config.endpoint, &rendered)?)
	}

	fn command(&self) -> clap::Command {
		clap::Command::new(self.name()).about("Kubernetes provider commands")
	}
}

#[cfg(test)]
mod tests {
	use std::cell::RefCell;

	use assert_matches::assert_matches;
	use serde_json::json;

	use super::*;
	use crate::kubectl::ExternalToolError;

	#[derive(Default)]
	struct FakeClient {
		calls: RefCell<Vec<(&'static str, String, String)>>,
	}

	impl ClusterClient for FakeClient {
		fn apply(
			&self,
			endpoint: &str,
			manifests: &str,
		) -> std::result::Result<String, ExternalToolError> {
			self.calls
				.borrow_mut()
				.push(("apply", endpoint.to_string(), manifests.to_string()));
			Ok("applied".to_string())
		}

		fn diff(
			&self,
			endpoint: &str,
			manifests: &str,
		) -> std::result::Result<String, ExternalToolError> {
			self.calls
				.borrow_mut()
				.push(("diff", endpoint.to_string(), manifests.to_string()));
			Ok(String::new())
		}
	}

	fn document() -> Map<String, JsonValue> {
		let JsonValue::Object(doc) = json!({
			"cm": { "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "x" } }
		}) else {
			unreachable!()
		};
		doc
	}

	fn initialized() -> Kubernetes<FakeClient> {
		let mut provider = Kubernetes::with_client(FakeClient::default());
		provider
			.init(ProviderConfig::new("https://k8s:6443", "ns1"))
			.unwrap();
		provider
	}

	#[test]
	fn test_reconcile_requires_init() {
		let provider = Kubernetes::with_client(FakeClient::default());
		assert_matches!(provider.reconcile(&document()), Err(Error::NotInitialized));
	}

	#[test]
	fn test_init_only_once() {
		let mut provider = initialized();
		assert_matches!(
			provider.init(ProviderConfig::default()),
			Err(Error::AlreadyInitialized)
		);
		assert_eq!(provider.config().unwrap().namespace, "ns1");
	}

	#[test]
	fn test_reconcile_injects_namespace() {
		let provider = initialized();
		let state = provider.reconcile(&document()).unwrap();
		let ids: Vec<String> = state.ids().map(|id| id.to_string()).collect();
		assert_eq!(ids, vec!["ConfigMap/ns1/x"]);
	}

	#[test]
	fn test_apply_passes_endpoint_and_yaml() {
		let provider = initialized();
		let state = provider.reconcile(&document()).unwrap();

		assert_eq!(provider.apply(&state).unwrap(), "applied");

		let calls = provider.client().calls.borrow();
		assert_eq!(calls.len(), 1);
		let (verb, endpoint, yaml) = &calls[0];
		assert_eq!(*verb, "apply");
		assert_eq!(endpoint, "https://k8s:6443");
		assert_eq!(yaml, &provider.fmt(&state).unwrap());
	}

	#[test]
	fn test_state_from_other_instance_rejected() {
		let first = initialized();
		let second = initialized();
		let state = first.reconcile(&document()).unwrap();

		assert_matches!(second.diff(&state), Err(Error::ForeignState));
		assert!(second.client().calls.borrow().is_empty());
	}

	#[test]
	fn test_command_name() {
		let provider = Kubernetes::new();
		assert_eq!(provider.command().get_name(), "kubernetes");
	}
}
