//! W3C trace context on outbound harness calls.
//!
//! Token endpoints, the Cloud Controller, SCIM and the probes all receive the
//! `traceparent`/`tracestate` of the span the call is made from, so a probe
//! run lines up with the sample application's own traces.

use opentelemetry::trace::TraceContextExt as _;
use reqwest::RequestBuilder;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACESTATE_HEADER: &str = "tracestate";

/// `traceparent` and `tracestate` of the current span, empty outside a
/// sampled OpenTelemetry span.
pub fn trace_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    let context = Span::current().context();
    let span = context.span();
    let span_context = span.span_context();
    if !span_context.is_valid() {
        return headers;
    }

    let traceparent = format!(
        "00-{}-{}-{:02x}",
        span_context.trace_id(),
        span_context.span_id(),
        span_context.trace_flags().to_u8()
    );
    if let Ok(value) = HeaderValue::from_str(&traceparent) {
        headers.insert(TRACEPARENT_HEADER, value);
    }
    let state = span_context.trace_state().header();
    if !state.is_empty()
        && let Ok(value) = HeaderValue::from_str(&state)
    {
        headers.insert(TRACESTATE_HEADER, value);
    }
    headers
}

pub trait WithTraceContext {
    /// Adds the current trace headers; call right before `send()`.
    fn with_trace_context(self) -> Self;
}

impl WithTraceContext for RequestBuilder {
    fn with_trace_context(self) -> Self {
        self.headers(trace_headers())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_headers_outside_a_span() {
        assert!(trace_headers().is_empty());
    }

    #[test]
    fn request_keeps_its_own_headers() {
        let request = reqwest::Client::new()
            .get("http://localhost/health")
            .header("x-probe", "1")
            .with_trace_context()
            .build()
            .unwrap();
        assert_eq!(request.headers().get("x-probe").unwrap(), "1");
        assert!(request.headers().get(TRACEPARENT_HEADER).is_none());
    }
}
