use anyhow::Result;
use opentelemetry::{global, trace::TracerProvider as _};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::{error, Subscriber};
use tracing_subscriber::{
    filter::LevelFilter,
    layer::SubscriberExt,
    registry::LookupSpan,
    EnvFilter,
    Layer,
    Registry,
};

use crate::config::{ServerConfig, TelemetryConfig};

const TRACER_NAME: &str = "blobvault";

/// `RUST_LOG`, or `info` when unset.
pub fn get_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::INFO.into()))
}

pub fn get_log_layer<S>(config: &ServerConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = tracing_subscriber::fmt::layer();
    if config.structured_logging() {
        Box::new(
            layer
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false),
        )
    } else {
        Box::new(layer.compact())
    }
}

/// Exports the spans that pass the log filter through `provider`.
fn span_layer<S>(provider: &SdkTracerProvider) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    Box::new(
        tracing_opentelemetry::layer()
            .with_tracer(provider.tracer(TRACER_NAME))
            .with_filter(get_env_filter()),
    )
}

fn build_tracer_provider(telemetry: &TelemetryConfig) -> Result<SdkTracerProvider> {
    let mut exporter = SpanExporter::builder().with_tonic();
    if let Some(endpoint) = &telemetry.endpoint {
        exporter = exporter.with_endpoint(endpoint.clone());
    }
    Ok(SdkTracerProvider::builder()
        .with_simple_exporter(exporter.build()?)
        .build())
}

/// Installs the global subscriber. With `telemetry.enable_tracing` spans are
/// also exported over OTLP, and the returned provider must be flushed on
/// shutdown.
pub fn setup_tracing(config: &ServerConfig) -> Result<Option<SdkTracerProvider>> {
    let tracer_provider = if config.telemetry.enable_tracing {
        Some(build_tracer_provider(&config.telemetry)?)
    } else {
        None
    };

    let subscriber = Registry::default()
        .with(get_log_layer(config).with_filter(get_env_filter()))
        .with(tracer_provider.as_ref().map(|provider| span_layer(provider)));
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        error!("logger was already initiated, continuing: {:?}", e);
    }
    if let Some(provider) = &tracer_provider {
        global::set_tracer_provider(provider.clone());
    }
    Ok(tracer_provider)
}

#[cfg(test)]
mod tests {
    use opentelemetry_sdk::trace::InMemorySpanExporter;
    use tracing::info_span;

    use super::*;

    #[test]
    fn test_spans_reach_the_exporter() -> Result<()> {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let subscriber = Registry::default().with(span_layer(&provider));

        tracing::subscriber::with_default(subscriber, || {
            let sweep = info_span!("sweep", blob_store = "store");
            let _guard = sweep.enter();
            info_span!("hard_delete").in_scope(|| {});
        });
        provider.force_flush()?;

        let spans = exporter.get_finished_spans()?;
        let names: Vec<_> = spans.iter().map(|span| span.name.to_string()).collect();
        assert_eq!(names, vec!["hard_delete", "sweep"]);
        assert_eq!(spans[0].parent_span_id, spans[1].span_context.span_id());
        Ok(())
    }
}
