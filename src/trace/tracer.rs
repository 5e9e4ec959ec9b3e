use std::sync::Arc;

use crate::context;
use crate::propagation::IncomingTraceContext;
use crate::trace::ids::{generate_random_span_id, generate_random_trace_id};
use crate::trace::span::now_millis;
use crate::trace::{
    stack, OneTimeWarning, Span, SpanHandle, SpanKind, SpanSink, StackTraceMode, TracerConfig,
};
use serde_json::{Map, Value};

static NESTED_ENTRY_WARNING: OneTimeWarning = OneTimeWarning::new();

/// Creates spans inside the active [`Context`](crate::Context) and enforces
/// the lifecycle rules of the span state machine.
///
/// Cloning a `Tracer` is cheap; all clones share the same configuration and
/// sink.
#[derive(Clone, Debug)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

#[derive(Debug)]
struct TracerInner {
    config: TracerConfig,
    sink: Arc<dyn SpanSink>,
}

impl Tracer {
    /// Creates a tracer that hands finished spans to `sink`.
    pub fn new(config: TracerConfig, sink: Arc<dyn SpanSink>) -> Self {
        Tracer {
            inner: Arc::new(TracerInner { config, sink }),
        }
    }

    /// The tracer's configuration.
    pub fn config(&self) -> &TracerConfig {
        &self.inner.config
    }

    /// Flushes the underlying sink.
    pub fn flush(&self) -> Result<(), crate::Error> {
        self.inner.sink.force_flush()
    }

    /// Starts a span and registers it as the current span of the active
    /// context.
    ///
    /// If a span is active in the current context, the new span inherits its
    /// trace ID and becomes its child; otherwise a fresh trace is started.
    ///
    /// For [`SpanKind::Entry`], the call is refused with `None` when another
    /// span is already active in the context — silently nesting two
    /// unrelated entries would corrupt the trace topology, so the operation
    /// proceeds untraced instead, with a one-time warning. Other kinds
    /// always succeed.
    pub fn start_span(&self, name: &str, kind: SpanKind) -> Option<SpanHandle> {
        self.start_span_with_remote(name, kind, &IncomingTraceContext::default())
    }

    /// Starts a span continuing the trace described by `remote`, as read
    /// from an inbound carrier.
    ///
    /// Correlation info from `remote` is carried onto the span only when no
    /// parent span ID was supplied; anything else would attribute the
    /// client-side correlation to the wrong span.
    pub fn start_span_with_remote(
        &self,
        name: &str,
        kind: SpanKind,
        remote: &IncomingTraceContext,
    ) -> Option<SpanHandle> {
        if kind == SpanKind::Entry {
            if let Some(active) = context::current_span() {
                if active.is_open() {
                    NESTED_ENTRY_WARNING.fire(|| {
                        tracekit_warn!(
                            name: "Tracer.EntrySpanRefused",
                            span_name = name.to_owned(),
                            active_span_name = active.name().to_owned(),
                            active_span_id = active.span_id().to_owned()
                        );
                    });
                    return None;
                }
            }
        }

        let parent = context::current_span();
        let (trace_id, parent_span_id) = if let Some(remote_trace_id) = &remote.trace_id {
            (remote_trace_id.clone(), remote.parent_span_id.clone())
        } else if let Some(parent) = &parent {
            (
                parent.trace_id().to_owned(),
                Some(parent.span_id().to_owned()),
            )
        } else {
            (generate_random_trace_id(), None)
        };

        let mut data = Map::new();
        let (mut crid, mut crtp) = (None, None);
        if parent_span_id.is_none() {
            if let Some(service_name) = &self.inner.config.service_name {
                data.insert(
                    "service".to_owned(),
                    Value::String(service_name.clone()),
                );
            }
            if let Some(correlation) = &remote.correlation {
                crid = Some(correlation.correlation_id.clone());
                crtp = Some(correlation.correlation_type.clone());
            }
        }

        let stack = if self.inner.config.stack_trace_mode == StackTraceMode::All {
            stack::capture(self.inner.config.stack_trace_length)
        } else {
            Vec::new()
        };

        let record = Span {
            trace_id,
            span_id: generate_random_span_id(),
            parent_span_id,
            name: name.to_owned(),
            kind,
            timestamp: now_millis(),
            duration: 0,
            error_count: 0,
            crid,
            crtp,
            data,
            stack,
        };

        let span = SpanHandle::new(
            record,
            self.inner.sink.clone(),
            self.inner.config.stack_trace_mode,
            self.inner.config.stack_trace_length,
        );
        context::set_current_span(&span);
        Some(span)
    }

    /// Starts an entry span from an inbound carrier's trace context,
    /// applying its suppression signal to the active context first.
    ///
    /// Returns `None` without creating a span when tracing is suppressed;
    /// the suppression state remains on the context so outgoing propagation
    /// still forwards it.
    pub fn start_entry_span(
        &self,
        name: &str,
        incoming: &IncomingTraceContext,
    ) -> Option<SpanHandle> {
        if let Some(level) = incoming.level {
            context::set_tracing_level(level);
        }
        if context::tracing_suppressed() {
            return None;
        }
        self.start_span_with_remote(name, SpanKind::Entry, incoming)
    }
}
