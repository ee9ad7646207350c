//! Logging and optional trace export.
//!
//! Logs are JSON lines on stdout. Spans are exported over OTLP/gRPC only when
//! `OTEL_EXPORTER_OTLP_ENDPOINT` is set; `OTEL_EXPORTER_OTLP_HEADERS` adds
//! request metadata (`key=value,...`, keys ending in `-bin` carry base64).

use anyhow::{anyhow, Context, Result};
use base64ct::{Base64, Encoding};
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::{Compression, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
    Resource,
};
use std::{env::var, sync::OnceLock, time::Duration};
use tonic::{
    metadata::{Ascii, Binary, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{debug, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
use url::Url;

const ENV_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
const ENV_HEADERS: &str = "OTEL_EXPORTER_OTLP_HEADERS";
const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Where and how spans are shipped.
#[derive(Debug)]
struct Exporter {
    endpoint: String,
    tls_domain: Option<String>,
    metadata: MetadataMap,
}

impl Exporter {
    /// `None` when no collector endpoint is configured.
    fn from_env() -> Result<Option<Self>> {
        let Ok(endpoint) = var(ENV_ENDPOINT) else {
            return Ok(None);
        };
        let headers = var(ENV_HEADERS).unwrap_or_default();
        Self::new(&endpoint, &headers).map(Some)
    }

    fn new(endpoint: &str, headers: &str) -> Result<Self> {
        let endpoint = endpoint.trim().trim_end_matches('/');
        // A bare host:port is a TLS collector.
        let endpoint = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("https://{endpoint}")
        };
        let url = Url::parse(&endpoint).with_context(|| format!("invalid {ENV_ENDPOINT}"))?;
        let tls_domain = (url.scheme() == "https")
            .then(|| url.host_str().map(str::to_string))
            .flatten();

        Ok(Self {
            endpoint,
            tls_domain,
            metadata: metadata_from_headers(headers)?,
        })
    }

    fn install(self) -> Result<Tracer> {
        let mut builder = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&self.endpoint)
            .with_compression(Compression::Gzip)
            .with_timeout(EXPORT_TIMEOUT)
            .with_metadata(self.metadata);

        if let Some(domain) = self.tls_domain {
            builder = builder.with_tls_config(
                ClientTlsConfig::new()
                    .domain_name(domain)
                    .with_native_roots(),
            );
        }

        let provider = SdkTracerProvider::builder()
            .with_batch_exporter(builder.build()?)
            .with_resource(
                Resource::builder_empty()
                    .with_attributes([
                        KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
                        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                    ])
                    .build(),
            )
            .build();

        let _ = TRACER_PROVIDER.set(provider.clone());
        global::set_tracer_provider(provider.clone());
        global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]));

        Ok(provider.tracer(env!("CARGO_PKG_NAME")))
    }
}

/// Parse `key=value,...` into gRPC metadata. Pairs without `=` are skipped.
fn metadata_from_headers(headers: &str) -> Result<MetadataMap> {
    let mut metadata = MetadataMap::new();

    for (key, value) in headers.split(',').filter_map(|pair| pair.split_once('=')) {
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        if key.ends_with("-bin") {
            let bytes = Base64::decode_vec(value)
                .map_err(|e| anyhow!("header {key}: value is not base64: {e}"))?;
            let key = MetadataKey::<Binary>::from_bytes(key.as_bytes())
                .map_err(|e| anyhow!("header {key}: invalid key: {e}"))?;
            metadata.insert_bin(key, MetadataValue::from_bytes(&bytes));
        } else {
            let value: MetadataValue<Ascii> = value
                .parse()
                .map_err(|e| anyhow!("header {key}: invalid value: {e}"))?;
            let key = MetadataKey::<Ascii>::from_bytes(key.as_bytes())
                .map_err(|e| anyhow!("header {key}: invalid key: {e}"))?;
            metadata.insert(key, value);
        }
    }

    Ok(metadata)
}

fn env_filter(verbosity_level: Level) -> Result<EnvFilter> {
    Ok(EnvFilter::builder()
        .with_default_directive(verbosity_level.into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("tokio=error".parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?))
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the exporter settings are invalid or a global
/// subscriber is already installed.
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let fmt_layer = fmt::layer()
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_target(false);

    let otel_layer = match Exporter::from_env()? {
        Some(exporter) => Some(tracing_opentelemetry::layer().with_tracer(exporter.install()?)),
        None => None,
    };

    let subscriber = Registry::default()
        .with(env_filter(verbosity_level.unwrap_or(Level::ERROR))?)
        .with(fmt_layer)
        .with(otel_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

/// Flush pending spans. Does nothing when no exporter was installed.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(err) = provider.shutdown() {
            debug!("tracer provider shutdown failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_endpoint_is_tls() -> Result<()> {
        let exporter = Exporter::new("collector.example.com:4317/", "")?;
        assert_eq!(exporter.endpoint, "https://collector.example.com:4317");
        assert_eq!(exporter.tls_domain.as_deref(), Some("collector.example.com"));
        assert!(exporter.metadata.is_empty());
        Ok(())
    }

    #[test]
    fn plain_http_endpoint_has_no_tls() -> Result<()> {
        let exporter = Exporter::new("http://localhost:4317", "")?;
        assert_eq!(exporter.endpoint, "http://localhost:4317");
        assert!(exporter.tls_domain.is_none());
        Ok(())
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        assert!(Exporter::new("https://", "").is_err());
    }

    #[test]
    fn from_env_requires_endpoint() -> Result<()> {
        temp_env::with_vars(
            [
                (ENV_ENDPOINT, None::<&str>),
                (ENV_HEADERS, Some("authorization=Bearer t")),
            ],
            || {
                assert!(Exporter::from_env()?.is_none());
                Ok(())
            },
        )
    }

    #[test]
    fn from_env_reads_endpoint_and_headers() -> Result<()> {
        temp_env::with_vars(
            [
                (ENV_ENDPOINT, Some("https://otel.example.com")),
                (ENV_HEADERS, Some("x-team=puyo")),
            ],
            || {
                let exporter = Exporter::from_env()?.context("exporter expected")?;
                assert_eq!(exporter.endpoint, "https://otel.example.com");
                assert_eq!(
                    exporter.metadata.get("x-team").and_then(|v| v.to_str().ok()),
                    Some("puyo")
                );
                Ok(())
            },
        )
    }

    #[test]
    fn metadata_mixes_ascii_and_binary() -> Result<()> {
        // "binary data"
        let metadata =
            metadata_from_headers("Authorization = Bearer token123, custom-bin=YmluYXJ5IGRhdGE=")?;
        assert_eq!(metadata.len(), 2);
        assert_eq!(
            metadata.get("authorization").and_then(|v| v.to_str().ok()),
            Some("Bearer token123")
        );
        assert_eq!(
            metadata
                .get_bin("custom-bin")
                .and_then(|v| v.to_bytes().ok())
                .as_deref(),
            Some(&b"binary data"[..])
        );
        Ok(())
    }

    #[test]
    fn metadata_skips_pairs_without_value() -> Result<()> {
        let metadata = metadata_from_headers("malformed,key=a=b")?;
        assert_eq!(metadata.len(), 1);
        assert_eq!(
            metadata.get("key").and_then(|v| v.to_str().ok()),
            Some("a=b")
        );
        assert!(metadata_from_headers("")?.is_empty());
        Ok(())
    }

    #[test]
    fn metadata_rejects_bad_base64() {
        let err = metadata_from_headers("custom-bin=not-valid-base64!!!").err();
        assert!(err.is_some_and(|err| err.to_string().contains("not base64")));
    }

    #[test]
    fn env_filter_builds_for_every_level() {
        temp_env::with_var("RUST_LOG", None::<&str>, || {
            for level in [
                Level::ERROR,
                Level::WARN,
                Level::INFO,
                Level::DEBUG,
                Level::TRACE,
            ] {
                let rendered = env_filter(level).map(|f| f.to_string()).unwrap_or_default();
                assert!(rendered.contains("hyper=error"));
                assert!(rendered.contains("sqlx=warn"));
            }
        });
    }

    #[test]
    fn shutdown_without_exporter_is_noop() {
        shutdown_tracer();
    }
}
