//! Everything that touches the OpenTelemetry SDK. Compiled only with the
//! `telemetry` feature.

use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::{
    Link, SamplingDecision, SamplingResult, SpanKind, TraceContextExt, TraceId, TraceState,
    TracerProvider as _,
};
use opentelemetry::{Context, KeyValue, global};
use opentelemetry_otlp::SpanExporter;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{Sampler, SdkTracer, SdkTracerProvider, ShouldSample};
use tracing_opentelemetry::{OpenTelemetryLayer, OpenTelemetrySpanExt};

use crate::{TRACEPARENT, TRACESTATE};

/// Flushes and shuts down the tracer provider when dropped. Hold it for the
/// life of the process.
pub struct OtelGuard {
    provider: SdkTracerProvider,
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        if let Err(e) = self.provider.shutdown() {
            eprintln!("hibi: flushing spans failed: {e}");
        }
    }
}

/// OTLP/gRPC export layer for `tracing_subscriber::registry()`.
///
/// Needs a running tokio runtime for the batch exporter. `None` if the
/// exporter can't be built; logging carries on without export.
pub fn otel_layer<S>(service_name: &str) -> Option<(OpenTelemetryLayer<S, SdkTracer>, OtelGuard)>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    let exporter = SpanExporter::builder()
        .with_tonic()
        .build()
        .map_err(|e| eprintln!("hibi: span export disabled: {e}"))
        .ok()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(CategorySampler)
        .with_resource(Resource::builder().with_service_name(service_name.to_string()).build())
        .build();
    global::set_tracer_provider(provider.clone());

    let layer = tracing_opentelemetry::layer().with_tracer(provider.tracer("hibi"));
    Some((layer, OtelGuard { provider }))
}

/// The two W3C headers as owned `(name, value)` pairs.
#[derive(Default)]
struct Headers(Vec<(&'static str, String)>);

impl Injector for Headers {
    fn set(&mut self, key: &str, value: String) {
        let name = match key {
            TRACEPARENT => TRACEPARENT,
            TRACESTATE => TRACESTATE,
            _ => return,
        };
        if !value.is_empty() {
            self.0.push((name, value));
        }
    }
}

impl Extractor for Headers {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(name, _)| *name == key).map(|(_, v)| v.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.iter().map(|(name, _)| *name).collect()
    }
}

/// Trace headers for the current span.
pub(crate) fn inject_headers() -> Vec<(&'static str, String)> {
    let mut headers = Headers::default();
    TraceContextPropagator::new().inject_context(&tracing::Span::current().context(), &mut headers);
    headers.0
}

/// Make `span` a child of the remote context in the request headers.
pub(crate) fn link_remote_parent(span: &tracing::Span, traceparent: Option<&str>, tracestate: Option<&str>) {
    let Some(traceparent) = traceparent.filter(|v| !v.is_empty()) else {
        return;
    };
    let mut headers = Headers(vec![(TRACEPARENT, traceparent.to_string())]);
    if let Some(state) = tracestate.filter(|v| !v.is_empty()) {
        headers.0.push((TRACESTATE, state.to_string()));
    }
    span.set_parent(TraceContextPropagator::new().extract(&headers));
}

/// Sample rate by span-name prefix. First match wins.
///
/// Writes and undo are rare and are what gets debugged; the event stream is
/// chatty.
const SAMPLE_RATES: &[(&str, f64)] = &[
    ("mutation.", 1.0),
    ("undo", 1.0),
    ("http.", 0.1),
    ("refetch", 0.1),
    ("stream.", 0.01),
];

const DEFAULT_RATE: f64 = 0.1;

fn rate_for(name: &str) -> f64 {
    SAMPLE_RATES
        .iter()
        .find(|(prefix, _)| name.starts_with(prefix))
        .map_or(DEFAULT_RATE, |(_, rate)| *rate)
}

fn is_failure(attributes: &[KeyValue]) -> bool {
    attributes.iter().any(|kv| match kv.key.as_str() {
        "otel.status_code" => kv.value.as_str() == "ERROR",
        "error" => kv.value.as_str() == "true",
        _ => false,
    })
}

fn keep(trace_state: TraceState) -> SamplingResult {
    SamplingResult { decision: SamplingDecision::RecordAndSample, attributes: Vec::new(), trace_state }
}

/// Follows a sampled parent, always keeps failures, otherwise samples by
/// [`SAMPLE_RATES`].
#[derive(Debug, Clone)]
struct CategorySampler;

impl ShouldSample for CategorySampler {
    fn should_sample(
        &self,
        parent_context: Option<&Context>,
        trace_id: TraceId,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
    ) -> SamplingResult {
        if let Some(parent) = parent_context.map(|cx| cx.span().span_context().clone()) {
            if parent.is_sampled() {
                return keep(parent.trace_state().clone());
            }
        }
        if is_failure(attributes) {
            return keep(TraceState::default());
        }
        Sampler::TraceIdRatioBased(rate_for(name))
            .should_sample(parent_context, trace_id, name, span_kind, attributes, links)
    }
}
