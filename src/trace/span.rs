use serde::Serialize;
use serde_json::{Map, Value};
use std::error;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::trace::stack::{self, StackFrame, StackTraceMode};
use crate::trace::{SpanKind, SpanSink};

/// Error messages stored on spans are truncated to this many characters.
const MAX_ERROR_MESSAGE_LENGTH: usize = 200;

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// A timed record of one traced operation.
///
/// This is the in-memory shape handed to the [`SpanSink`] when the span
/// finishes; the field renames are the wire names of the span protocol.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Span {
    /// The trace this span belongs to, 16 or 32 hex characters. Immutable
    /// once assigned.
    #[serde(rename = "t")]
    pub trace_id: String,
    /// This span's own ID, 16 hex characters. Immutable once assigned.
    #[serde(rename = "s")]
    pub span_id: String,
    /// The parent span's ID; absent only for root entry spans.
    #[serde(rename = "p", skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    /// The instrumentation/technology that produced this span, for example
    /// `"mysql"` or `"sqs"`.
    #[serde(rename = "n")]
    pub name: String,
    /// The span's role within the trace.
    #[serde(rename = "k")]
    pub kind: SpanKind,
    /// Start time in milliseconds since the Unix epoch.
    #[serde(rename = "ts")]
    pub timestamp: u64,
    /// Duration in milliseconds, computed at finish time.
    #[serde(rename = "d")]
    pub duration: u64,
    /// How often the traced operation failed; 0 or 1 in practice.
    #[serde(rename = "ec")]
    pub error_count: u32,
    /// Client-side correlation ID, carried only on root entry spans.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crid: Option<String>,
    /// Client-side correlation type, carried only on root entry spans.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crtp: Option<String>,
    /// Technology-specific payload, mutated by the instrumentation while
    /// the span is open.
    pub data: Map<String, Value>,
    /// Call-site frames captured according to the configured
    /// [`StackTraceMode`].
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stack: Vec<StackFrame>,
}

/// Error information attached to a span when the traced operation fails.
///
/// Accepts either a plain message or anything implementing
/// [`std::error::Error`]; for the latter the innermost `source` in the chain
/// wins, since the root cause is more diagnostic than its wrappers.
#[derive(Clone, Copy)]
pub enum ErrorDetail<'a> {
    /// A plain error message.
    Message(&'a str),
    /// A full error value; the deepest source in its chain provides the
    /// message.
    Error(&'a (dyn error::Error + 'static)),
}

impl<'a> From<&'a str> for ErrorDetail<'a> {
    fn from(message: &'a str) -> Self {
        ErrorDetail::Message(message)
    }
}

impl<'a> From<&'a (dyn error::Error + 'static)> for ErrorDetail<'a> {
    fn from(error: &'a (dyn error::Error + 'static)) -> Self {
        ErrorDetail::Error(error)
    }
}

impl ErrorDetail<'_> {
    fn message(&self) -> String {
        match self {
            ErrorDetail::Message(message) => (*message).to_owned(),
            ErrorDetail::Error(error) => {
                let mut current: &(dyn error::Error + 'static) = *error;
                while let Some(source) = current.source() {
                    current = source;
                }
                current.to_string()
            }
        }
    }
}

impl fmt::Debug for ErrorDetail<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDetail::Message(message) => f.debug_tuple("Message").field(message).finish(),
            ErrorDetail::Error(error) => f.debug_tuple("Error").field(error).finish(),
        }
    }
}

#[derive(Debug)]
struct SpanState {
    /// `None` once the span has reached a terminal state (finished or
    /// canceled); taking the record out is what makes closing exactly-once.
    record: Option<Span>,
    manual_end: bool,
}

#[derive(Debug)]
struct SpanShared {
    trace_id: String,
    span_id: String,
    parent_span_id: Option<String>,
    name: String,
    kind: SpanKind,
    state: Mutex<SpanState>,
    sink: Arc<dyn SpanSink>,
    stack_mode: StackTraceMode,
    stack_length: usize,
}

/// A shared handle to an open span.
///
/// Handles are cheap to clone; all clones refer to the same span state, so
/// the handle stored in the [`Context`](crate::Context) and the handle held
/// by the instrumentation observe each other's mutations. Closing is
/// exactly-once: whichever of [`finish`], [`cancel`] or [`transmit_manual`]
/// runs first consumes the record, and everything after is a no-op.
///
/// [`finish`]: SpanHandle::finish
/// [`cancel`]: SpanHandle::cancel
/// [`transmit_manual`]: SpanHandle::transmit_manual
#[derive(Clone, Debug)]
pub struct SpanHandle {
    inner: Arc<SpanShared>,
}

impl SpanHandle {
    pub(crate) fn new(
        record: Span,
        sink: Arc<dyn SpanSink>,
        stack_mode: StackTraceMode,
        stack_length: usize,
    ) -> Self {
        SpanHandle {
            inner: Arc::new(SpanShared {
                trace_id: record.trace_id.clone(),
                span_id: record.span_id.clone(),
                parent_span_id: record.parent_span_id.clone(),
                name: record.name.clone(),
                kind: record.kind,
                state: Mutex::new(SpanState {
                    record: Some(record),
                    manual_end: false,
                }),
                sink,
                stack_mode,
                stack_length,
            }),
        }
    }

    /// The trace ID of this span.
    pub fn trace_id(&self) -> &str {
        &self.inner.trace_id
    }

    /// The span ID of this span.
    pub fn span_id(&self) -> &str {
        &self.inner.span_id
    }

    /// The parent span ID, absent for root entry spans.
    pub fn parent_span_id(&self) -> Option<&str> {
        self.inner.parent_span_id.as_deref()
    }

    /// The instrumentation/technology name of this span.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The span's role within the trace.
    pub fn kind(&self) -> SpanKind {
        self.inner.kind
    }

    /// Whether this span is an entry span.
    pub fn is_entry(&self) -> bool {
        self.inner.kind == SpanKind::Entry
    }

    /// Whether this span is an exit span.
    pub fn is_exit(&self) -> bool {
        self.inner.kind == SpanKind::Exit
    }

    /// Whether this span is an intermediate span.
    pub fn is_intermediate(&self) -> bool {
        self.inner.kind == SpanKind::Intermediate
    }

    /// Whether this span is still open (neither finished nor canceled).
    pub fn is_open(&self) -> bool {
        self.inner
            .state
            .lock()
            .map(|state| state.record.is_some())
            .unwrap_or(false)
    }

    fn with_record<T>(&self, f: impl FnOnce(&mut Span) -> T) -> Option<T> {
        self.inner
            .state
            .lock()
            .ok()
            .and_then(|mut state| state.record.as_mut().map(f))
    }

    /// Writes `value` into the span's technology-specific payload at a
    /// dot-separated path, for example `"http.status"`. Intermediate
    /// objects are created as needed; the last writer wins.
    ///
    /// No-op once the span has reached a terminal state.
    pub fn annotate(&self, path: &str, value: impl Into<Value>) {
        let value = value.into();
        self.with_record(|record| annotate_with_str(&mut record.data, path, value));
    }

    /// Like [`annotate`](SpanHandle::annotate), with the path given as
    /// segments instead of a dot-separated string, for keys that themselves
    /// contain dots.
    pub fn annotate_path(&self, path: &[&str], value: impl Into<Value>) {
        if path.is_empty() {
            return;
        }
        let value = value.into();
        self.with_record(|record| annotate_with_segments(&mut record.data, path, value));
    }

    /// Stores an error message at `path` (dot-separated) inside the span's
    /// payload, truncated to 200 characters. A message already present at
    /// that path is never overwritten; the first writer wins, because the
    /// error observed closest to its origin is the most diagnostic one.
    pub fn set_error_details(&self, detail: ErrorDetail<'_>, path: &str) {
        self.with_record(|record| set_error_details_on_map(&mut record.data, &detail, path));
    }

    /// Marks this span as incomplete with a reason code.
    ///
    /// Used when an instrumentation wrapped a function expected to return a
    /// promise-like value but received something else; the span is kept and
    /// flagged rather than risking a failure inside the host application.
    pub fn mark_incomplete(&self, reason: &str) {
        self.with_record(|record| {
            annotate_with_str(
                &mut record.data,
                "sdk.custom.tags.incomplete",
                Value::Bool(true),
            );
            annotate_with_str(
                &mut record.data,
                "sdk.custom.tags.incomplete_reason",
                Value::String(reason.to_owned()),
            );
        });
    }

    /// Switches the span into manual-end mode.
    ///
    /// Calls to [`finish`](SpanHandle::finish) as issued by automatic
    /// instrumentation will still update the span but no longer transmit it;
    /// completion must be signalled with [`end_manual`] or
    /// [`transmit_manual`]. Used where completion is detected asynchronously
    /// outside the normal call-return path, e.g. consumer-library callback
    /// batches.
    ///
    /// [`end_manual`]: SpanHandle::end_manual
    /// [`transmit_manual`]: SpanHandle::transmit_manual
    pub fn disable_auto_end(&self) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.manual_end = true;
        }
    }

    /// Closes the span: computes its duration, records the error if one is
    /// given, and hands it to the sink exactly once.
    ///
    /// With an error, the error count is incremented, a truncated message is
    /// stored under `<technology>.error` in the span payload, and — when the
    /// stack-trace mode allows — the span's stack is replaced with frames
    /// captured at the failure site, which are more diagnostic than the call
    /// site that opened the span.
    ///
    /// In manual-end mode the record is updated but not transmitted.
    pub fn finish(&self, error: Option<ErrorDetail<'_>>) {
        let finished = {
            let mut state = match self.inner.state.lock() {
                Ok(state) => state,
                Err(_) => return,
            };
            if let Some(record) = state.record.as_mut() {
                record.duration = now_millis().saturating_sub(record.timestamp);
                if let Some(detail) = &error {
                    record.error_count += 1;
                    let path = format!("{}.error", record.name);
                    set_error_details_on_map(&mut record.data, detail, &path);
                    if self.inner.stack_mode != StackTraceMode::None {
                        record.stack = stack::capture(self.inner.stack_length);
                    }
                }
            }
            if state.manual_end {
                None
            } else {
                state.record.take()
            }
        };
        if let Some(record) = finished {
            self.inner.sink.on_finish(record);
        }
    }

    /// Discards the span without transmission.
    ///
    /// Used when an operation turns out not to have produced meaningful
    /// work, e.g. a poll that returned no messages. A canceled span never
    /// reaches the sink.
    pub fn cancel(&self) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.record.take();
        }
    }

    /// Transmits a span that is in manual-end mode, recomputing its duration
    /// and setting the error count.
    pub fn end_manual(&self, error_count: u32) {
        let finished = {
            let mut state = match self.inner.state.lock() {
                Ok(state) => state,
                Err(_) => return,
            };
            if let Some(record) = state.record.as_mut() {
                record.duration = now_millis().saturating_sub(record.timestamp);
                record.error_count = error_count;
            }
            state.record.take()
        };
        if let Some(record) = finished {
            self.inner.sink.on_finish(record);
        }
    }

    /// Transmits the span as-is, ignoring manual-end mode.
    pub fn transmit_manual(&self) {
        let finished = self
            .inner
            .state
            .lock()
            .ok()
            .and_then(|mut state| state.record.take());
        if let Some(record) = finished {
            self.inner.sink.on_finish(record);
        }
    }

    /// Returns a clone of the current record, for inspection in tests.
    #[cfg(test)]
    pub(crate) fn record(&self) -> Option<Span> {
        self.inner
            .state
            .lock()
            .ok()
            .and_then(|state| state.record.clone())
    }
}

fn annotate_with_str(target: &mut Map<String, Value>, path: &str, value: Value) {
    // Trailing and leading dots are tolerated, they come in from sloppy
    // instrumentation code.
    if let Some(stripped) = path.strip_suffix('.') {
        return annotate_with_str(target, stripped, value);
    }
    match path.find('.') {
        Some(0) => annotate_with_str(target, &path[1..], value),
        Some(idx) => {
            let (head, tail) = (&path[..idx], &path[idx + 1..]);
            let nested = target
                .entry(head.to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            if !nested.is_object() {
                *nested = Value::Object(Map::new());
            }
            if let Some(nested) = nested.as_object_mut() {
                annotate_with_str(nested, tail, value);
            }
        }
        None => {
            target.insert(path.to_owned(), value);
        }
    }
}

fn annotate_with_segments(target: &mut Map<String, Value>, path: &[&str], value: Value) {
    match path {
        [] => {}
        [leaf] => annotate_with_str(target, leaf, value),
        [head, tail @ ..] => {
            let nested = target
                .entry((*head).to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            if !nested.is_object() {
                *nested = Value::Object(Map::new());
            }
            if let Some(nested) = nested.as_object_mut() {
                annotate_with_segments(nested, tail, value);
            }
        }
    }
}

fn value_at_path<'a>(target: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut current = target;
    let mut segments = path.split('.').filter(|segment| !segment.is_empty());
    let mut last = segments.next()?;
    for segment in segments {
        current = current.get(last)?.as_object()?;
        last = segment;
    }
    current.get(last)
}

fn set_error_details_on_map(target: &mut Map<String, Value>, detail: &ErrorDetail<'_>, path: &str) {
    if value_at_path(target, path).is_some() {
        return;
    }
    let mut message = detail.message();
    if message.chars().count() > MAX_ERROR_MESSAGE_LENGTH {
        message = message.chars().take(MAX_ERROR_MESSAGE_LENGTH).collect();
    }
    annotate_with_str(target, path, Value::String(message));
}
