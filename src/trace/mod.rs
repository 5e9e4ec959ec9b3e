//! The span data model and lifecycle.
//!
//! A trace is a tree of spans. Entry spans represent inbound work (a request
//! received, a message dequeued), exit spans represent outbound work caused
//! by the current entry (an RPC, a query, a queue send), and intermediate
//! spans represent internal processing stages in between. The [`Tracer`]
//! creates spans inside the active [`Context`](crate::Context), enforcing
//! parent/child stitching and the one-active-entry-per-context invariant,
//! and hands every finished span to the configured [`SpanSink`] exactly
//! once.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicBool, Ordering};

mod config;
pub mod ids;
mod registry;
mod span;
mod span_buffer;
mod stack;
mod tracer;

pub use config::TracerConfig;
pub use registry::{Instrumentation, InstrumentationRegistry};
pub use span::{ErrorDetail, Span, SpanHandle};
pub use span_buffer::{InMemorySpanSink, SpanBuffer, SpanExporter, SpanSink};
pub use stack::{StackFrame, StackTraceMode};
pub use tracer::Tracer;

/// The role a span plays within its trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpanKind {
    /// Inbound work: a request received, a message dequeued, a job
    /// triggered. At most one entry span is active per context.
    Entry = 1,
    /// Outbound work caused by the current entry: an RPC, a database query,
    /// a queue send.
    Exit = 2,
    /// A traced sub-step between an entry and its exits.
    Intermediate = 3,
}

impl Serialize for SpanKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

/// The suppression state of a unit of work.
///
/// On the wire this is the `level` value: `"0"` means do not trace this
/// operation or anything causally downstream of it, `"1"` means trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TracingLevel {
    /// Do not trace; forward the suppression signal downstream.
    Suppressed,
    /// Trace normally.
    Active,
}

impl TracingLevel {
    /// The wire representation, `"0"` or `"1"`.
    pub fn as_wire_value(&self) -> &'static str {
        match self {
            TracingLevel::Suppressed => "0",
            TracingLevel::Active => "1",
        }
    }

    /// Parses a wire `level` value.
    ///
    /// Anything starting with `'0'` counts as suppressed (the value may
    /// carry trailing correlation segments), a plain leading `'1'` as
    /// active; other values are ignored.
    pub fn from_wire_value(value: &str) -> Option<TracingLevel> {
        match value.as_bytes().first() {
            Some(b'0') => Some(TracingLevel::Suppressed),
            Some(b'1') => Some(TracingLevel::Active),
            _ => None,
        }
    }
}

/// A warning that fires at most once per process.
///
/// Used for conditions that would otherwise flood the log on every message
/// or request (nested entry attempts, message-attribute capacity). Reset
/// only on process restart.
#[derive(Debug)]
pub(crate) struct OneTimeWarning(AtomicBool);

impl OneTimeWarning {
    pub(crate) const fn new() -> Self {
        OneTimeWarning(AtomicBool::new(false))
    }

    /// Runs `f` if this latch has not fired yet. Returns whether `f` ran.
    pub(crate) fn fire(&self, f: impl FnOnce()) -> bool {
        if self.0.swap(true, Ordering::Relaxed) {
            false
        } else {
            f();
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_level_wire_round_trip() {
        assert_eq!(TracingLevel::Suppressed.as_wire_value(), "0");
        assert_eq!(TracingLevel::Active.as_wire_value(), "1");
        assert_eq!(
            TracingLevel::from_wire_value("0"),
            Some(TracingLevel::Suppressed)
        );
        assert_eq!(
            TracingLevel::from_wire_value("1"),
            Some(TracingLevel::Active)
        );
        assert_eq!(
            TracingLevel::from_wire_value("0,correlationType=web;correlationId=abc"),
            Some(TracingLevel::Suppressed)
        );
        assert_eq!(TracingLevel::from_wire_value(""), None);
        assert_eq!(TracingLevel::from_wire_value("2"), None);
    }

    #[test]
    fn span_kind_serializes_as_number() {
        assert_eq!(serde_json::to_string(&SpanKind::Entry).unwrap(), "1");
        assert_eq!(serde_json::to_string(&SpanKind::Exit).unwrap(), "2");
        assert_eq!(serde_json::to_string(&SpanKind::Intermediate).unwrap(), "3");
    }

    #[test]
    fn one_time_warning_fires_exactly_once() {
        let latch = OneTimeWarning::new();
        let mut calls = 0;
        assert!(latch.fire(|| calls += 1));
        assert!(!latch.fire(|| calls += 1));
        assert!(!latch.fire(|| calls += 1));
        assert_eq!(calls, 1);
    }
}
