//! OpenTelemetry integration for hibi.
//!
//! Provides the OTel tracing layer setup, W3C Trace Context propagation across
//! the REST boundary (client injects `traceparent`/`tracestate` headers, server
//! extracts them into the request span), and a sampler with differentiated
//! rates by span category.
//!
//! Export is on when the server is built with `telemetry` and the usual OTel
//! variables point somewhere:
//!
//! ```bash
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 cargo run -p hibi-server
//! ```
//!
//! `OTEL_SDK_DISABLED=true` turns it back off. Without the feature every function here is a cheap no-op.

#[cfg(feature = "telemetry")]
mod otel;

#[cfg(feature = "telemetry")]
pub use otel::{OtelGuard, otel_layer};

/// Header carrying the W3C trace parent.
pub const TRACEPARENT: &str = "traceparent";
/// Header carrying vendor trace state.
pub const TRACESTATE: &str = "tracestate";

/// Whether the standard OTel environment asks for span export.
pub fn otel_enabled() -> bool {
    export_requested(|name| std::env::var(name).ok())
}

/// `OTEL_SDK_DISABLED=true` wins; otherwise an OTLP endpoint or a traces
/// exporter other than `none` turns export on.
fn export_requested(lookup: impl Fn(&str) -> Option<String>) -> bool {
    if lookup("OTEL_SDK_DISABLED").is_some_and(|v| v.eq_ignore_ascii_case("true")) {
        return false;
    }
    lookup("OTEL_EXPORTER_OTLP_ENDPOINT").is_some()
        || lookup("OTEL_TRACES_EXPORTER").is_some_and(|v| !v.eq_ignore_ascii_case("none"))
}

/// W3C Trace Context headers for the current tracing span.
///
/// Empty when the feature is off or no context is active; callers attach
/// whatever comes back to the outgoing request.
pub fn inject_trace_headers() -> Vec<(&'static str, String)> {
    #[cfg(feature = "telemetry")]
    {
        otel::inject_headers()
    }
    #[cfg(not(feature = "telemetry"))]
    {
        Vec::new()
    }
}

/// Create the server-side span for one HTTP request, linked to the remote
/// parent when `traceparent` is present.
pub fn request_span(
    method: &str,
    path: &str,
    traceparent: Option<&str>,
    tracestate: Option<&str>,
) -> tracing::Span {
    let span = tracing::info_span!("http.request", method = %method, path = %path);
    #[cfg(feature = "telemetry")]
    otel::link_remote_parent(&span, traceparent, tracestate);
    #[cfg(not(feature = "telemetry"))]
    let _ = (traceparent, tracestate);
    span
}
