//! Tracekit is the context-propagation and span-lifecycle engine used by
//! in-process tracing agents. It maintains an ambient, asynchronously
//! propagated "current span" across callback and future boundaries, manages
//! the lifecycle of entry/exit/intermediate spans, and carries trace context
//! across process boundaries via HTTP headers, queue message attributes, and
//! binary buffers.
//!
//! ## Getting started
//!
//! Spans are created through a [`Tracer`] inside a [`Context`]. The context
//! is copy-on-branch: every asynchronous continuation captures the context
//! that was active when it was scheduled, so interleaved work never observes
//! another unit of work's current span.
//!
//! ```
//! use std::sync::Arc;
//! use tracekit::trace::{InMemorySpanSink, SpanKind, Tracer, TracerConfig};
//! use tracekit::Context;
//!
//! let sink = Arc::new(InMemorySpanSink::default());
//! let tracer = Tracer::new(TracerConfig::default(), sink.clone());
//!
//! Context::run_and_return(|| {
//!     let entry = tracer.start_span("http", SpanKind::Entry).expect("no span is active");
//!     let exit = tracer.start_span("postgres", SpanKind::Exit).expect("entry is active");
//!     exit.finish(None);
//!     entry.finish(None);
//! });
//!
//! assert_eq!(sink.finished_spans().len(), 2);
//! ```
//!
//! ## Crate layout
//!
//! - [`mod@context`]: the continuation context — ambient state that follows
//!   the logical chain of execution rather than the thread.
//! - [`trace`]: span model, ID codec, span lifecycle, sinks, and the
//!   instrumentation registry.
//! - [`propagation`]: carriers for trace context crossing process
//!   boundaries.
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
mod internal_logging;

pub mod context;
mod error;
pub mod propagation;
pub mod trace;

pub use context::{Context, ContextGuard};
#[cfg(feature = "futures")]
pub use context::{FutureExt, WithContext};
pub use error::Error;
pub use trace::{SpanHandle, SpanKind, Tracer, TracingLevel};

#[doc(hidden)]
#[cfg(feature = "internal-logs")]
pub mod _private {
    pub use tracing::{debug, error, info, warn};
}
