//! Trace context propagation over HTTP headers.
//!
//! The carrier is a conventional header triple: trace ID, span ID, and the
//! tracing level. The level header may additionally carry client-side
//! correlation info appended by browser or mobile agents, for example
//! `1,correlationType=web;correlationId=a66cbb7e`.

use crate::propagation::{Correlation, Extractor, IncomingTraceContext, Injector};
use crate::trace::ids::is_valid_id;
use crate::trace::TracingLevel;
use crate::Context;

/// Header carrying the trace ID, 16 or 32 hex characters.
pub const TRACE_ID_HEADER: &str = "x-tracekit-t";
/// Header carrying the parent span ID, 16 hex characters.
pub const SPAN_ID_HEADER: &str = "x-tracekit-s";
/// Header carrying the tracing level and optional correlation info.
pub const TRACE_LEVEL_HEADER: &str = "x-tracekit-l";

const CORRELATION_TYPE_PREFIX: &str = "correlationType=";
const CORRELATION_ID_PREFIX: &str = "correlationId=";

/// Propagates trace context as an HTTP header triple.
///
/// Extraction never fails: malformed headers are ignored field by field and
/// the receiver starts a new trace from whatever remains.
#[derive(Clone, Debug, Default)]
pub struct HeaderPropagator {
    _private: (),
}

impl HeaderPropagator {
    /// Create a new `HeaderPropagator`.
    pub fn new() -> Self {
        HeaderPropagator { _private: () }
    }

    /// The header names this propagator reads and writes.
    pub fn fields(&self) -> &'static [&'static str] {
        &[TRACE_ID_HEADER, SPAN_ID_HEADER, TRACE_LEVEL_HEADER]
    }

    /// Reads trace context from inbound headers.
    ///
    /// Precedence rules: correlation info forces a new root (incoming IDs
    /// are ignored so the client correlation attaches to a fresh trace), and
    /// suppression discards both IDs and correlation.
    pub fn extract(&self, extractor: &dyn Extractor) -> IncomingTraceContext {
        let mut trace_id = extractor
            .get(TRACE_ID_HEADER)
            .map(|value| value.trim().to_owned())
            .filter(|value| is_valid_id(value));
        let mut parent_span_id = extractor
            .get(SPAN_ID_HEADER)
            .map(|value| value.trim().to_owned())
            .filter(|value| value.len() == 16 && is_valid_id(value));

        let (level, mut correlation) =
            read_level_and_correlation(extractor.get(TRACE_LEVEL_HEADER).as_deref());

        if correlation.is_some() {
            // Ignore incoming IDs and force a new root span when we received
            // correlation info.
            trace_id = None;
            parent_span_id = None;
        }

        if level == Some(TracingLevel::Suppressed) {
            trace_id = None;
            parent_span_id = None;
            correlation = None;
        }

        // A trace can only be continued with both IDs present.
        if trace_id.is_none() || parent_span_id.is_none() {
            trace_id = None;
            parent_span_id = None;
        }

        IncomingTraceContext {
            trace_id,
            parent_span_id,
            level,
            correlation,
        }
    }

    /// Writes the context's trace state into outgoing headers.
    ///
    /// When tracing is suppressed only the level header is written, so the
    /// whole downstream chain stays consistently untraced. Without an active
    /// span nothing is written.
    pub fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        if cx.tracing_suppressed() {
            injector.set(
                TRACE_LEVEL_HEADER,
                TracingLevel::Suppressed.as_wire_value().to_owned(),
            );
            return;
        }
        if let Some(span) = cx.span() {
            injector.set(TRACE_ID_HEADER, span.trace_id().to_owned());
            injector.set(SPAN_ID_HEADER, span.span_id().to_owned());
            injector.set(
                TRACE_LEVEL_HEADER,
                TracingLevel::Active.as_wire_value().to_owned(),
            );
        }
    }

    /// Like [`inject_context`](HeaderPropagator::inject_context) for the
    /// current context.
    pub fn inject(&self, injector: &mut dyn Injector) {
        Context::map_current(|cx| self.inject_context(cx, injector))
    }
}

fn read_level_and_correlation(value: Option<&str>) -> (Option<TracingLevel>, Option<Correlation>) {
    let value = match value {
        // Fast path for when we did not receive the header at all.
        None => return (None, None),
        Some(value) => value.trim(),
    };
    if value.len() <= 1 {
        // Fast path for a plain level value without correlation info;
        // anything invalid is ignored.
        return (TracingLevel::from_wire_value(value), None);
    }

    let level = TracingLevel::from_wire_value(value);

    let mut correlation = None;
    if let Some((_, correlation_part)) = value.split_once(',') {
        let correlation_type = correlation_part
            .find(CORRELATION_TYPE_PREFIX)
            .and_then(|idx| {
                let after = &correlation_part[idx + CORRELATION_TYPE_PREFIX.len()..];
                after.split_once(';').map(|(head, _)| head)
            })
            .map(str::trim)
            .filter(|part| !part.is_empty());
        let correlation_id = correlation_part
            .find(CORRELATION_ID_PREFIX)
            .map(|idx| correlation_part[idx + CORRELATION_ID_PREFIX.len()..].trim())
            .filter(|part| !part.is_empty());
        if let (Some(correlation_type), Some(correlation_id)) = (correlation_type, correlation_id)
        {
            correlation = Some(Correlation {
                correlation_type: correlation_type.to_owned(),
                correlation_id: correlation_id.to_owned(),
            });
        }
    }

    (level, correlation)
}
