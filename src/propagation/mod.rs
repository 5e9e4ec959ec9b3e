//! Carrying trace context across process boundaries.
//!
//! The continuation context cannot span a process boundary; these modules
//! serialize the minimal `{trace ID, parent span ID, level}` triple into the
//! carriers a boundary offers: HTTP headers ([`http`]), queue message
//! attributes ([`queue`]), and fixed-layout binary buffers ([`binary`]).
//!
//! Suppression propagates symmetrically with trace context: even when no
//! span is created because tracing is suppressed, the "do not trace" signal
//! is still forwarded downstream so the entire causal chain stays
//! consistently untraced.

use std::borrow::Cow;
use std::collections::HashMap;

use crate::trace::TracingLevel;

pub mod binary;
pub mod http;
pub mod queue;

/// Injector provides an interface for adding fields to an underlying struct
/// like `HashMap`.
pub trait Injector {
    /// Add a key and value to the underlying data.
    fn set(&mut self, key: &str, value: String);
}

/// Extractor provides an interface for reading fields from an underlying
/// struct like `HashMap`.
pub trait Extractor {
    /// Get a value from a key from the underlying data.
    fn get(&self, key: &str) -> Option<Cow<'_, str>>;

    /// Collect all the keys from the underlying data.
    fn keys(&self) -> Vec<Cow<'_, str>>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    /// Set a key and value in the HashMap.
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    /// Get a value for a key from the HashMap.
    fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        self.get(&key.to_lowercase())
            .map(|value| Cow::Borrowed(value.as_str()))
    }

    /// Collect all the keys from the HashMap.
    fn keys(&self) -> Vec<Cow<'_, str>> {
        self.keys()
            .map(|key| Cow::Borrowed(key.as_str()))
            .collect::<Vec<_>>()
    }
}

/// Client-side correlation info attached by browser or mobile agents.
///
/// Carried only onto root entry spans; a span whose parent was supplied
/// externally silently drops it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Correlation {
    /// The correlation type, e.g. `"web"`.
    pub correlation_type: String,
    /// The correlation ID.
    pub correlation_id: String,
}

/// Trace context read from an inbound carrier.
///
/// The extraction rules of each carrier normalize conflicting signals into
/// this one shape: suppression discards IDs and correlation, correlation
/// discards IDs (the new entry span starts a fresh trace that is tied to the
/// client via `crid`/`crtp` instead of via parentage).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IncomingTraceContext {
    /// The trace to continue, 16 or 32 hex characters.
    pub trace_id: Option<String>,
    /// The span to attach to, 16 hex characters.
    pub parent_span_id: Option<String>,
    /// The suppression signal, when the carrier had one.
    pub level: Option<TracingLevel>,
    /// Client-side correlation info, when the carrier had any.
    pub correlation: Option<Correlation>,
}

impl IncomingTraceContext {
    /// Whether this context continues an existing trace.
    pub fn has_parent(&self) -> bool {
        self.trace_id.is_some() && self.parent_span_id.is_some()
    }

    /// Whether tracing is suppressed for this unit of work.
    pub fn is_suppressed(&self) -> bool {
        self.level == Some(TracingLevel::Suppressed)
    }
}
