//! YAML rendering of manifests.
//!
//! Output follows what Tanka prints: object keys are ordered with the natural
//! sort of Go's yaml.v3, and multiple documents are separated by `---`.

use std::cmp::Ordering;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::instrument;

use crate::manifest::Manifest;

/// Separator placed between documents of a stream.
pub const DOCUMENT_SEPARATOR: &str = "---\n";

#[derive(Debug, Error)]
pub enum SerializationError {
	#[error("rendering {resource} as yaml")]
	Render {
		resource: String,
		#[source]
		source: serde_saphyr::ser_error::Error,
	},
}

/// Sort all JSON object keys recursively to match Go's yaml.v3 output order.
pub fn sort_json_keys(value: JsonValue) -> JsonValue {
	match value {
		JsonValue::Object(map) => {
			let mut entries: Vec<(String, JsonValue)> = map.into_iter().collect();
			entries.sort_by(|(a, _), (b, _)| yaml_v3_key_compare(a, b));
			JsonValue::Object(
				entries
					.into_iter()
					.map(|(k, v)| (k, sort_json_keys(v)))
					.collect(),
			)
		}
		JsonValue::Array(arr) => JsonValue::Array(arr.into_iter().map(sort_json_keys).collect()),
		other => other,
	}
}

/// go-yaml v3's key comparison (sorter.go).
///
/// Runs of digits compare numerically. Right after a digit, letters sort
/// before non-letters; elsewhere non-letters sort first.
fn yaml_v3_key_compare(a: &str, b: &str) -> Ordering {
	let ar: Vec<char> = a.chars().collect();
	let br: Vec<char> = b.chars().collect();
	let mut digits = false;

	for i in 0..ar.len().min(br.len()) {
		if ar[i] == br[i] {
			digits = ar[i].is_ascii_digit();
			continue;
		}

		let al = ar[i].is_alphabetic();
		let bl = br[i].is_alphabetic();

		if al && bl {
			return ar[i].cmp(&br[i]);
		}

		if al || bl {
			let letter_first = if al { Ordering::Less } else { Ordering::Greater };
			return if digits {
				letter_first
			} else {
				letter_first.reverse()
			};
		}

		// go-yaml accumulates into a machine int, so long runs wrap.
		let mut an: i64 = 0;
		let mut bn: i64 = 0;

		// A zero continuing a non-zero number is significant.
		if ar[i] == '0' || br[i] == '0' {
			let mut j = i;
			while j > 0 && ar[j - 1].is_ascii_digit() {
				j -= 1;
				if ar[j] != '0' {
					an = 1;
					bn = 1;
					break;
				}
			}
		}

		let mut ai = i;
		while ai < ar.len() && ar[ai].is_ascii_digit() {
			an = an.wrapping_mul(10).wrapping_add(digit_value(ar[ai]));
			ai += 1;
		}

		let mut bi = i;
		while bi < br.len() && br[bi].is_ascii_digit() {
			bn = bn.wrapping_mul(10).wrapping_add(digit_value(br[bi]));
			bi += 1;
		}

		if an != bn {
			return an.cmp(&bn);
		}
		if ai != bi {
			return ai.cmp(&bi);
		}
		return ar[i].cmp(&br[i]);
	}

	ar.len().cmp(&br.len())
}

fn digit_value(c: char) -> i64 {
	c.to_digit(10).map_or(0, i64::from)
}

fn serializer_options() -> serde_saphyr::SerializerOptions {
	serde_saphyr::SerializerOptions {
		indent_step: 2,
		indent_array: Some(0),
		prefer_block_scalars: true,
		empty_map_as_braces: true,
		empty_array_as_brackets: true,
		line_width: Some(80),
		scientific_notation_threshold: Some(1000000),
		scientific_notation_small_threshold: Some(0.0001),
		quote_ambiguous_keys: true,
		quote_numeric_strings: true,
		..Default::default()
	}
}

/// Render a single value as one YAML document, keys sorted.
pub fn to_yaml(value: &JsonValue) -> Result<String, serde_saphyr::ser_error::Error> {
	let sorted = sort_json_keys(value.clone());
	let mut output = String::new();
	serde_saphyr::to_fmt_writer_with_options(&mut output, &sorted, serializer_options())?;
	Ok(output)
}

/// Render manifests as a YAML stream, in order.
///
/// Documents are joined by [`DOCUMENT_SEPARATOR`]; there is no leading or
/// trailing separator, and no manifests render as an empty string.
#[instrument(skip_all, fields(count = manifests.len()))]
pub fn to_yaml_stream(manifests: &[Manifest]) -> Result<String, SerializationError> {
	let mut docs = Vec::with_capacity(manifests.len());
	for manifest in manifests {
		let value = JsonValue::Object(manifest.as_object().clone());
		let mut doc = to_yaml(&value).map_err(|source| SerializationError::Render {
			resource: manifest.id().to_string(),
			source,
		})?;
		if !doc.ends_with('\n') {
			doc.push('\n');
		}
		docs.push(doc);
	}
	Ok(docs.join(DOCUMENT_SEPARATOR))
}
