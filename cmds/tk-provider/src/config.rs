//! Provider configuration.
//!
//! The configuration is usually read from a Tanka environment's `spec.json`:
//!
//! ```json
//! {
//!   "apiVersion": "tanka.dev/v1alpha1",
//!   "kind": "Environment",
//!   "spec": { "apiServer": "https://127.0.0.1:6443", "namespace": "default" }
//! }
//! ```
//!
//! A bare `{"apiServer": ..., "namespace": ...}` object is accepted as well,
//! in JSON or YAML.

use std::{
	fs,
	path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file: {}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse config file: {}", path.display())]
	ParseJson {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("failed to parse config file: {}", path.display())]
	ParseYaml {
		path: PathBuf,
		#[source]
		source: serde_yaml_with_quirks::Error,
	},

	#[error("invalid provider config in {}", path.display())]
	Invalid {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},
}

/// Where the cluster lives and which namespace everything goes to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
	/// Kubernetes API server address.
	///
	/// `apiserver` and `endpoint` are aliases of `apiServer`; giving more
	/// than one of them is a duplicate field error.
	#[serde(default, rename = "apiServer", alias = "apiserver", alias = "endpoint")]
	pub endpoint: String,

	/// Namespace forced onto every manifest.
	#[serde(default)]
	pub namespace: String,
}

impl ProviderConfig {
	pub fn new(endpoint: impl Into<String>, namespace: impl Into<String>) -> Self {
		Self {
			endpoint: endpoint.into(),
			namespace: namespace.into(),
		}
	}

	/// Load from a JSON or YAML file (chosen by extension).
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;

		let is_yaml = path
			.extension()
			.is_some_and(|ext| ext == "yaml" || ext == "yml");
		let value: JsonValue = if is_yaml {
			serde_yaml_with_quirks::from_str(&content).map_err(|source| ConfigError::ParseYaml {
				path: path.to_path_buf(),
				source,
			})?
		} else {
			serde_json::from_str(&content).map_err(|source| ConfigError::ParseJson {
				path: path.to_path_buf(),
				source,
			})?
		};

		Self::from_value(value).map_err(|source| ConfigError::Invalid {
			path: path.to_path_buf(),
			source,
		})
	}

	/// Read the config out of an environment object, or a bare config object.
	pub fn from_value(mut value: JsonValue) -> Result<Self, serde_json::Error> {
		let is_environment = value.get("kind").and_then(JsonValue::as_str) == Some("Environment");
		if is_environment {
			value = value
				.get_mut("spec")
				.map(JsonValue::take)
				.unwrap_or(JsonValue::Null);
		}
		if value.is_null() {
			return Ok(Self::default());
		}
		serde_json::from_value(value)
	}

	/// Replace fields for which an override is given.
	pub fn with_overrides(mut self, endpoint: Option<String>, namespace: Option<String>) -> Self {
		if let Some(endpoint) = endpoint {
			self.endpoint = endpoint;
		}
		if let Some(namespace) = namespace {
			self.namespace = namespace;
		}
		self
	}
}

#[cfg(test)]
mod tests {
	use indoc::indoc;
	use serde_json::json;
	use tempfile::TempDir;

	use super::*;

	#[test]
	fn test_from_environment() {
		let config = ProviderConfig::from_value(json!({
			"apiVersion": "tanka.dev/v1alpha1",
			"kind": "Environment",
			"metadata": { "name": "default" },
			"spec": {
				"apiServer": "https://127.0.0.1:6443",
				"namespace": "monitoring"
			}
		}))
		.unwrap();
		assert_eq!(
			config,
			ProviderConfig::new("https://127.0.0.1:6443", "monitoring")
		);
	}

	#[test]
	fn test_from_bare_object_with_aliases() {
		let config =
			ProviderConfig::from_value(json!({ "apiserver": "https://k8s", "namespace": "a" }))
				.unwrap();
		assert_eq!(config.endpoint, "https://k8s");

		let config = ProviderConfig::from_value(json!({ "endpoint": "https://k8s" })).unwrap();
		assert_eq!(config, ProviderConfig::new("https://k8s", ""));
	}

	#[test]
	fn test_endpoint_given_twice() {
		let err = ProviderConfig::from_value(json!({
			"apiServer": "https://a",
			"endpoint": "https://b"
		}))
		.unwrap_err();
		assert!(err.to_string().contains("duplicate field"), "{err}");
	}

	#[test]
	fn test_environment_without_spec() {
		let config = ProviderConfig::from_value(json!({ "kind": "Environment" })).unwrap();
		assert_eq!(config, ProviderConfig::default());
	}

	#[test]
	fn test_invalid_field_type() {
		assert!(ProviderConfig::from_value(json!({ "namespace": 3 })).is_err());
	}

	#[test]
	fn test_overrides() {
		let config = ProviderConfig::new("https://a", "a")
			.with_overrides(None, Some("b".to_string()));
		assert_eq!(config, ProviderConfig::new("https://a", "b"));
	}

	#[test]
	fn test_load_yaml_and_json() {
		let temp = TempDir::new().unwrap();

		let yaml_path = temp.path().join("provider.yaml");
		fs::write(
			&yaml_path,
			indoc! {"
				apiServer: https://127.0.0.1:6443
				namespace: staging
			"},
		)
		.unwrap();
		assert_eq!(
			ProviderConfig::load(&yaml_path).unwrap(),
			ProviderConfig::new("https://127.0.0.1:6443", "staging")
		);

		let json_path = temp.path().join("spec.json");
		fs::write(
			&json_path,
			r#"{"apiVersion":"tanka.dev/v1alpha1","kind":"Environment","spec":{"namespace":"prod"}}"#,
		)
		.unwrap();
		assert_eq!(
			ProviderConfig::load(&json_path).unwrap(),
			ProviderConfig::new("", "prod")
		);
	}

	#[test]
	fn test_load_missing_file() {
		let err = ProviderConfig::load(Path::new("/nonexistent/spec.json")).unwrap_err();
		assert!(matches!(err, ConfigError::Read { .. }));
	}
}
