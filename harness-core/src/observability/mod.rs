pub mod logging;
pub mod trace_context;

pub use logging::{init_test_tracing, init_tracing};
pub use trace_context::{TRACEPARENT_HEADER, TRACESTATE_HEADER, WithTraceContext, trace_headers};
