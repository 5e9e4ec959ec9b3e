//! Tracer configuration.

use std::env;

use crate::trace::StackTraceMode;

/// Default number of stack frames kept on a span.
const DEFAULT_STACK_TRACE_LENGTH: usize = 10;
/// Default capacity of the span buffer.
const DEFAULT_MAX_BUFFERED_SPANS: usize = 1_000;

/// Configuration for a [`Tracer`](crate::Tracer).
///
/// `TracerConfig::default()` reads overrides from the environment:
/// `TRACEKIT_SERVICE_NAME`, `TRACEKIT_STACK_TRACE_MODE` (`none`,
/// `error-only`, `all`), `TRACEKIT_STACK_TRACE_LENGTH` and
/// `TRACEKIT_MAX_BUFFERED_SPANS`.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct TracerConfig {
    /// Logical service name, tagged onto root spans.
    pub service_name: Option<String>,
    /// When call-site stacks are captured onto spans.
    pub stack_trace_mode: StackTraceMode,
    /// Maximum number of stack frames kept on a span.
    pub stack_trace_length: usize,
    /// Capacity of the span buffer before an inline flush is forced.
    pub max_buffered_spans: usize,
}

impl Default for TracerConfig {
    fn default() -> Self {
        let mut config = TracerConfig {
            service_name: None,
            stack_trace_mode: StackTraceMode::default(),
            stack_trace_length: DEFAULT_STACK_TRACE_LENGTH,
            max_buffered_spans: DEFAULT_MAX_BUFFERED_SPANS,
        };

        if let Ok(service_name) = env::var("TRACEKIT_SERVICE_NAME") {
            if !service_name.is_empty() {
                config.service_name = Some(service_name);
            }
        }

        if let Some(mode) = env::var("TRACEKIT_STACK_TRACE_MODE")
            .ok()
            .and_then(|mode| mode.parse().ok())
        {
            config.stack_trace_mode = mode;
        }

        if let Some(length) = env::var("TRACEKIT_STACK_TRACE_LENGTH")
            .ok()
            .and_then(|length| length.parse().ok())
        {
            config.stack_trace_length = length;
        }

        if let Some(capacity) = env::var("TRACEKIT_MAX_BUFFERED_SPANS")
            .ok()
            .and_then(|capacity| capacity.parse().ok())
        {
            config.max_buffered_spans = capacity;
        }

        config
    }
}

impl TracerConfig {
    /// Sets the logical service name tagged onto root spans.
    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    /// Sets when call-site stacks are captured.
    pub fn with_stack_trace_mode(mut self, mode: StackTraceMode) -> Self {
        self.stack_trace_mode = mode;
        self
    }

    /// Sets the maximum number of stack frames kept on a span.
    pub fn with_stack_trace_length(mut self, length: usize) -> Self {
        self.stack_trace_length = length;
        self
    }

    /// Sets the span buffer capacity.
    pub fn with_max_buffered_spans(mut self, capacity: usize) -> Self {
        self.max_buffered_spans = capacity;
        self
    }
}
