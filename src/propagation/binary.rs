//! Trace context propagation over fixed-layout binary buffers.
//!
//! Native and low-level transports have no header map to write into; they
//! carry trace context as a fixed 24-byte buffer laid out big-endian as
//! `[8 bytes trace-id-high][8 bytes trace-id-low][8 bytes span-id]`. The
//! layout has no level field, so suppression cannot cross this boundary;
//! transports that need it carry the signal out of band.

use crate::propagation::IncomingTraceContext;
use crate::trace::ids::{read_trace_context_from_buffer, trace_context_to_buffer};
use crate::Context;

/// The size of the binary trace context layout.
pub const TRACE_CONTEXT_BUFFER_LENGTH: usize = 24;

/// Reads trace context from a received 24-byte buffer.
///
/// A buffer of the wrong length yields an empty context (logged once at the
/// codec layer); the receiver then starts a fresh trace.
pub fn extract(buffer: &[u8]) -> IncomingTraceContext {
    let binary = read_trace_context_from_buffer(buffer);
    if !binary.is_complete() {
        return IncomingTraceContext::default();
    }
    IncomingTraceContext {
        trace_id: Some(binary.t),
        parent_span_id: Some(binary.s),
        level: None,
        correlation: None,
    }
}

/// Encodes the context's current span into the 24-byte layout.
///
/// Returns `None` when no span is active or the span's IDs do not fit the
/// layout; the transport then sends without trace context.
pub fn inject_context(cx: &Context) -> Option<[u8; TRACE_CONTEXT_BUFFER_LENGTH]> {
    let span = cx.span()?;
    trace_context_to_buffer(span.trace_id(), span.span_id()).ok()
}

/// Like [`inject_context`] for the current context.
pub fn inject() -> Option<[u8; TRACE_CONTEXT_BUFFER_LENGTH]> {
    Context::map_current(inject_context)
}
