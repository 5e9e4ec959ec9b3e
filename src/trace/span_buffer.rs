//! Sinks for finished spans.
//!
//! The [`Tracer`](crate::Tracer) hands every finished span to a [`SpanSink`]
//! exactly once. [`SpanBuffer`] is the production sink: it batches spans and
//! flushes them to a [`SpanExporter`], which owns the connection to the
//! local collection agent. [`InMemorySpanSink`] collects spans for tests.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::trace::{OneTimeWarning, Span};

/// Receives finished spans from the tracer.
///
/// The contract is: a span is handed over at most once, only after reaching
/// its terminal `finished` state, and canceled spans never arrive.
pub trait SpanSink: Send + Sync + fmt::Debug {
    /// Called with each finished span.
    fn on_finish(&self, span: Span);

    /// Forces buffered spans to be exported.
    fn force_flush(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Flushes and releases any resources held by the sink.
    fn shutdown(&self) -> Result<(), Error> {
        self.force_flush()
    }
}

/// Exports batches of finished spans to the downstream collection agent.
///
/// The wire protocol of the agent is out of scope here; implementations
/// typically serialize the batch and write it to a local socket.
pub trait SpanExporter: Send + fmt::Debug {
    /// Exports a batch of spans.
    fn export(&mut self, batch: Vec<Span>) -> Result<(), Error>;

    /// Releases any resources held by the exporter.
    fn shutdown(&mut self) {}
}

static EXPORT_FAILED_WARNING: OneTimeWarning = OneTimeWarning::new();

/// A bounded sink that batches finished spans and flushes them to a
/// [`SpanExporter`].
///
/// When the buffer reaches its capacity it flushes inline; a failing
/// exporter loses that batch and logs a one-time warning, never failing the
/// instrumented operation.
#[derive(Debug)]
pub struct SpanBuffer {
    exporter: Mutex<Box<dyn SpanExporter>>,
    queue: Mutex<Vec<Span>>,
    capacity: usize,
}

impl SpanBuffer {
    /// Creates a buffer flushing to `exporter` once `capacity` spans have
    /// accumulated.
    pub fn new(exporter: Box<dyn SpanExporter>, capacity: usize) -> Self {
        SpanBuffer {
            exporter: Mutex::new(exporter),
            queue: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    fn flush(&self) -> Result<(), Error> {
        let batch = match self.queue.lock() {
            Ok(mut queue) if !queue.is_empty() => std::mem::take(&mut *queue),
            _ => return Ok(()),
        };
        let batch_size = batch.len();
        let result = self
            .exporter
            .lock()
            .map_err(|_| Error::Export("exporter lock poisoned".to_owned()))
            .and_then(|mut exporter| exporter.export(batch));
        if let Err(error) = &result {
            EXPORT_FAILED_WARNING.fire(|| {
                tracekit_warn!(
                    name: "SpanBuffer.ExportFailed",
                    dropped_spans = batch_size,
                    error = error.to_string()
                );
            });
        }
        result
    }
}

impl SpanSink for SpanBuffer {
    fn on_finish(&self, span: Span) {
        let full = match self.queue.lock() {
            Ok(mut queue) => {
                queue.push(span);
                queue.len() >= self.capacity
            }
            Err(_) => return,
        };
        if full {
            let _ = self.flush();
        }
    }

    fn force_flush(&self) -> Result<(), Error> {
        self.flush()
    }

    fn shutdown(&self) -> Result<(), Error> {
        let result = self.flush();
        if let Ok(mut exporter) = self.exporter.lock() {
            exporter.shutdown();
        }
        result
    }
}

/// A sink that stores finished spans in memory.
///
/// Useful for tests and debugging; spans are retrieved with
/// [`finished_spans`](InMemorySpanSink::finished_spans).
#[derive(Clone, Debug, Default)]
pub struct InMemorySpanSink {
    spans: Arc<Mutex<Vec<Span>>>,
}

impl InMemorySpanSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        InMemorySpanSink::default()
    }

    /// Returns the spans finished so far.
    pub fn finished_spans(&self) -> Vec<Span> {
        self.spans
            .lock()
            .map(|spans| spans.clone())
            .unwrap_or_default()
    }

    /// Clears the recorded spans.
    pub fn reset(&self) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.clear();
        }
    }
}

impl SpanSink for InMemorySpanSink {
    fn on_finish(&self, span: Span) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.push(span);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::SpanKind;
    use serde_json::Map;

    fn span(name: &str) -> Span {
        Span {
            trace_id: "0000000000000001".to_owned(),
            span_id: "0000000000000002".to_owned(),
            parent_span_id: None,
            name: name.to_owned(),
            kind: SpanKind::Exit,
            timestamp: 0,
            duration: 0,
            error_count: 0,
            crid: None,
            crtp: None,
            data: Map::new(),
            stack: Vec::new(),
        }
    }

    #[derive(Debug, Default, Clone)]
    struct RecordingExporter {
        batches: Arc<Mutex<Vec<Vec<Span>>>>,
    }

    impl SpanExporter for RecordingExporter {
        fn export(&mut self, batch: Vec<Span>) -> Result<(), Error> {
            self.batches
                .lock()
                .map(|mut batches| batches.push(batch))
                .map_err(|_| Error::Export("poisoned".to_owned()))
        }
    }

    #[derive(Debug)]
    struct FailingExporter;

    impl SpanExporter for FailingExporter {
        fn export(&mut self, _batch: Vec<Span>) -> Result<(), Error> {
            Err(Error::Export("agent unreachable".to_owned()))
        }
    }

    #[test]
    fn flushes_inline_at_capacity() {
        let exporter = RecordingExporter::default();
        let buffer = SpanBuffer::new(Box::new(exporter.clone()), 2);

        buffer.on_finish(span("a"));
        assert!(exporter.batches.lock().unwrap().is_empty());

        buffer.on_finish(span("b"));
        let batches = exporter.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }

    #[test]
    fn force_flush_drains_partial_batches() {
        let exporter = RecordingExporter::default();
        let buffer = SpanBuffer::new(Box::new(exporter.clone()), 100);

        buffer.on_finish(span("a"));
        buffer.force_flush().unwrap();

        let batches = exporter.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].name, "a");
    }

    #[test]
    fn flush_of_empty_buffer_is_a_noop() {
        let exporter = RecordingExporter::default();
        let buffer = SpanBuffer::new(Box::new(exporter.clone()), 10);
        buffer.force_flush().unwrap();
        assert!(exporter.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn failing_exporter_does_not_panic() {
        let buffer = SpanBuffer::new(Box::new(FailingExporter), 1);
        buffer.on_finish(span("a"));
        assert!(buffer.force_flush().is_ok());
    }

    #[test]
    fn in_memory_sink_records_and_resets() {
        let sink = InMemorySpanSink::new();
        sink.on_finish(span("a"));
        sink.on_finish(span("b"));
        assert_eq!(sink.finished_spans().len(), 2);
        sink.reset();
        assert!(sink.finished_spans().is_empty());
    }
}
