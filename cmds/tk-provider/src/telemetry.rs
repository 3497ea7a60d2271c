//! Logging and trace export.
//!
//! Logs always go to stderr: stdout is reserved for manifests and kubectl
//! output. Spans are additionally exported over OTLP (http/protobuf) when an
//! OTLP endpoint is configured through the standard `OTEL_*` variables.

use std::io::IsTerminal;

use anyhow::Result;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{
	Protocol, SpanExporter, WithExportConfig, OTEL_EXPORTER_OTLP_ENDPOINT,
	OTEL_EXPORTER_OTLP_PROTOCOL, OTEL_EXPORTER_OTLP_TRACES_ENDPOINT,
};
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use tracing::{warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const SERVICE_NAME: &str = "tk-provider";

/// Flushes exported spans when dropped; keep it alive for the whole run.
pub struct TelemetryGuard {
	tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
	fn drop(&mut self) {
		let Some(provider) = self.tracer_provider.take() else {
			return;
		};
		if let Err(e) = provider.shutdown() {
			eprintln!("failed to flush traces: {e}");
		}
	}
}

/// Span export requested through the environment.
#[derive(Debug, PartialEq, Eq)]
struct OtlpExport {
	/// `OTEL_EXPORTER_OTLP_PROTOCOL=grpc`; served over http/protobuf.
	grpc_requested: bool,
}

impl OtlpExport {
	fn from_env(var: impl Fn(&str) -> Option<String>) -> Option<Self> {
		let configured = [OTEL_EXPORTER_OTLP_ENDPOINT, OTEL_EXPORTER_OTLP_TRACES_ENDPOINT]
			.into_iter()
			.any(|name| var(name).is_some_and(|value| !value.is_empty()));
		configured.then(|| Self {
			grpc_requested: var(OTEL_EXPORTER_OTLP_PROTOCOL).as_deref() == Some("grpc"),
		})
	}

	fn tracer_provider(&self) -> Result<SdkTracerProvider> {
		let exporter = SpanExporter::builder()
			.with_http()
			.with_protocol(Protocol::HttpBinary)
			.build()?;

		// Resource::builder() already honours OTEL_SERVICE_NAME.
		let mut resource = Resource::builder();
		if std::env::var_os("OTEL_SERVICE_NAME").is_none() {
			resource = resource.with_service_name(SERVICE_NAME);
		}

		Ok(SdkTracerProvider::builder()
			.with_resource(resource.build())
			.with_batch_exporter(exporter)
			.build())
	}
}

/// Install the global subscriber.
///
/// `log_level` (from `--log-level`) wins over `RUST_LOG`; without either,
/// info and above is logged. Output is pretty on a terminal, JSON otherwise.
pub fn init(log_level: Option<Level>) -> Result<TelemetryGuard> {
	let filter = match log_level {
		Some(level) => EnvFilter::new(level.as_str()),
		None => EnvFilter::builder()
			.with_default_directive(Level::INFO.into())
			.from_env_lossy(),
	};

	let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
	let fmt = if std::io::stderr().is_terminal() {
		fmt.pretty().boxed()
	} else {
		fmt.json().boxed()
	};

	let export = OtlpExport::from_env(|name| std::env::var(name).ok());
	let tracer_provider = export
		.as_ref()
		.map(OtlpExport::tracer_provider)
		.transpose()?;
	let otel = tracer_provider.as_ref().map(|provider| {
		tracing_opentelemetry::layer()
			.with_error_records_to_exceptions(true)
			.with_tracer(provider.tracer(SERVICE_NAME))
	});

	tracing_subscriber::registry()
		.with(filter)
		.with(fmt)
		.with(otel)
		.init();

	if let Some(provider) = &tracer_provider {
		opentelemetry::global::set_tracer_provider(provider.clone());
	}
	if export.is_some_and(|export| export.grpc_requested) {
		warn!("OTLP over grpc is not supported, exporting spans over http/protobuf");
	}

	Ok(TelemetryGuard { tracer_provider })
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use rstest::rstest;

	use super::*;

	fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
		let vars: HashMap<&str, &str> = vars.iter().copied().collect();
		move |name: &str| vars.get(name).map(|value| value.to_string())
	}

	#[rstest]
	#[case::unset(&[], None)]
	#[case::empty_endpoint(&[(OTEL_EXPORTER_OTLP_ENDPOINT, "")], None)]
	#[case::protocol_alone(&[(OTEL_EXPORTER_OTLP_PROTOCOL, "grpc")], None)]
	#[case::endpoint(
		&[(OTEL_EXPORTER_OTLP_ENDPOINT, "http://collector:4318")],
		Some(OtlpExport { grpc_requested: false }),
	)]
	#[case::traces_endpoint(
		&[(OTEL_EXPORTER_OTLP_TRACES_ENDPOINT, "http://collector:4318/v1/traces")],
		Some(OtlpExport { grpc_requested: false }),
	)]
	#[case::grpc_falls_back(
		&[(OTEL_EXPORTER_OTLP_ENDPOINT, "http://collector:4317"), (OTEL_EXPORTER_OTLP_PROTOCOL, "grpc")],
		Some(OtlpExport { grpc_requested: true }),
	)]
	fn test_otlp_export_from_env(
		#[case] vars: &[(&str, &str)],
		#[case] expected: Option<OtlpExport>,
	) {
		assert_eq!(OtlpExport::from_env(lookup(vars)), expected);
	}
}
