//! Extraction of Kubernetes manifests from evaluated Jsonnet.
//!
//! The evaluated document is an arbitrarily nested tree of objects. Every
//! object carrying both `apiVersion` and `kind` is a manifest; every other
//! object is a container that is searched further. Objects stored under
//! [`RESERVED_KEY`] hold ksonnet-internal metadata and are never searched.

use std::fmt;

use serde_json::{Map, Value as JsonValue};
use tracing::{debug, instrument, warn};

/// Key whose subtree is excluded from flattening, at any depth.
pub const RESERVED_KEY: &str = "__ksonnet";

/// Classification of a single node of the evaluated document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Node<'a> {
	/// A complete resource, not to be searched any deeper.
	Resource(&'a Map<String, JsonValue>),

	/// An object without a type header; its children may hold resources.
	Container(&'a Map<String, JsonValue>),

	/// Anything that is not an object. Can never be or contain a resource.
	Unrecognized,
}

impl<'a> Node<'a> {
	pub fn classify(value: &'a JsonValue) -> Self {
		match value {
			JsonValue::Object(obj) => Self::classify_object(obj),
			_ => Node::Unrecognized,
		}
	}

	/// Objects whose `apiVersion` or `kind` is missing, empty or not a
	/// string are containers.
	pub fn classify_object(obj: &'a Map<String, JsonValue>) -> Self {
		if has_type_header(obj) {
			Node::Resource(obj)
		} else {
			Node::Container(obj)
		}
	}
}

// Presence alone is not enough: `{"apiVersion": "v1", "kind": ""}` is a
// container, so a resource nested under it is still found.
fn has_type_header(obj: &Map<String, JsonValue>) -> bool {
	let non_empty = |key: &str| {
		obj.get(key)
			.and_then(JsonValue::as_str)
			.is_some_and(|s| !s.is_empty())
	};
	non_empty("apiVersion") && non_empty("kind")
}

/// Identity of a resource for display and diffing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
	pub kind: String,
	pub namespace: Option<String>,
	pub name: Option<String>,
}

impl fmt::Display for ResourceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.kind)?;
		if let Some(namespace) = &self.namespace {
			write!(f, "/{namespace}")?;
		}
		write!(f, "/{}", self.name.as_deref().unwrap_or(""))
	}
}

/// A single Kubernetes resource.
///
/// Always has a non-empty string `apiVersion` and `kind`: values are only
/// built from objects classified as [`Node::Resource`] (by [`flatten`]) or
/// checked by [`Manifest::from_object`]. The only mutation offered
/// afterwards touches `metadata`, so this holds for the lifetime of the
/// value.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest(Map<String, JsonValue>);

impl Manifest {
	/// Wrap an object, returning `None` unless it is a resource.
	pub fn from_object(obj: Map<String, JsonValue>) -> Option<Self> {
		has_type_header(&obj).then(|| Self(obj))
	}

	pub fn api_version(&self) -> &str {
		self.str_field("apiVersion")
	}

	pub fn kind(&self) -> &str {
		self.str_field("kind")
	}

	pub fn name(&self) -> Option<&str> {
		self.metadata_str("name")
	}

	pub fn namespace(&self) -> Option<&str> {
		self.metadata_str("namespace")
	}

	pub fn id(&self) -> ResourceId {
		ResourceId {
			kind: self.kind().to_string(),
			namespace: self.namespace().map(str::to_string),
			name: self.name().map(str::to_string),
		}
	}

	pub fn as_object(&self) -> &Map<String, JsonValue> {
		&self.0
	}

	pub fn into_value(self) -> JsonValue {
		JsonValue::Object(self.0)
	}

	/// Set `metadata.namespace`, replacing whatever was there.
	pub fn set_namespace(&mut self, namespace: &str) {
		if self.0.get("metadata").is_some_and(|m| !m.is_object()) {
			warn!(kind = %self.kind(), "metadata is not an object, replacing it");
			self.0
				.insert("metadata".to_string(), JsonValue::Object(Map::new()));
		}
		let metadata = self
			.0
			.entry("metadata")
			.or_insert_with(|| JsonValue::Object(Map::new()));
		if let JsonValue::Object(metadata) = metadata {
			metadata.insert(
				"namespace".to_string(),
				JsonValue::String(namespace.to_string()),
			);
		}
	}

	fn str_field(&self, key: &str) -> &str {
		self.0.get(key).and_then(JsonValue::as_str).unwrap_or_default()
	}

	fn metadata_str(&self, key: &str) -> Option<&str> {
		self.0.get("metadata")?.get(key)?.as_str()
	}
}

impl From<Manifest> for JsonValue {
	fn from(manifest: Manifest) -> Self {
		manifest.into_value()
	}
}

/// Collect every resource reachable in `document`, in depth-first pre-order.
///
/// A document that is itself a resource yields exactly that resource.
/// Resources are never searched for nested resources, and nothing under
/// [`RESERVED_KEY`] is collected. The walk is total: malformed nodes are
/// skipped, never reported.
#[instrument(skip_all)]
pub fn flatten(document: &JsonValue) -> Vec<Manifest> {
	let mut manifests = Vec::new();
	collect(Node::classify(document), &mut manifests);
	debug!(count = manifests.len(), "flattened manifests");
	manifests
}

/// [`flatten`] for a document already known to be an object.
#[instrument(skip_all)]
pub fn flatten_object(document: &Map<String, JsonValue>) -> Vec<Manifest> {
	let mut manifests = Vec::new();
	collect(Node::classify_object(document), &mut manifests);
	debug!(count = manifests.len(), "flattened manifests");
	manifests
}

fn collect(node: Node<'_>, manifests: &mut Vec<Manifest>) {
	match node {
		Node::Resource(obj) => {
			let manifest = Manifest(obj.clone());
			debug!(resource = %manifest.id(), "found resource");
			manifests.push(manifest);
		}
		Node::Container(obj) => {
			for (key, child) in obj {
				if key == RESERVED_KEY {
					continue;
				}
				collect(Node::classify(child), manifests);
			}
		}
		Node::Unrecognized => {}
	}
}

/// Force every manifest into `namespace`.
pub fn inject_namespace(manifests: &mut [Manifest], namespace: &str) {
	for manifest in manifests {
		manifest.set_namespace(namespace);
	}
}
