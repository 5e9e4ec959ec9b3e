//! Execution-scoped context propagation.
//!
//! A [`Context`] is the ambient state of one logical unit of work: the
//! current span, the current entry span, and the tracing level. Contexts are
//! immutable values; branching into a new asynchronous continuation captures
//! a clone of the frame that was active at scheduling time, so interleaved
//! continuations from unrelated units of work can never observe or mutate
//! each other's state. This is the moral equivalent of thread-local storage,
//! keyed on the chain of continuations instead of the OS thread.

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;

use crate::trace::{SpanHandle, SpanKind, TracingLevel};

#[cfg(feature = "futures")]
mod future_ext;

#[cfg(feature = "futures")]
pub use future_ext::{FutureExt, WithContext};

thread_local! {
    static CURRENT_CONTEXT: RefCell<Context> = RefCell::new(Context::default());
}

/// An execution-scoped set of tracing state.
///
/// [`Context`]s are immutable: write operations return a new context carrying
/// the original values plus the change. The context that is "current" on the
/// calling thread is replaced with [`attach`] and restored when the returned
/// [`ContextGuard`] drops, which makes scopes nest naturally.
///
/// A `Context` value doubles as the async-correlation token of this engine:
/// capture it with [`Context::current`], hand it to wherever the work
/// continues, and resume it there with [`attach`], [`Context::bind`] or
/// [`FutureExt::with_context`].
///
/// [`attach`]: Context::attach()
///
/// # Examples
///
/// ```
/// use tracekit::{Context, TracingLevel};
///
/// let _outer = Context::current()
///     .with_tracing_level(TracingLevel::Suppressed)
///     .attach();
/// assert!(Context::current().tracing_suppressed());
///
/// {
///     let _inner = Context::current()
///         .with_tracing_level(TracingLevel::Active)
///         .attach();
///     assert!(!Context::current().tracing_suppressed());
/// }
///
/// // Dropping the inner guard restores the outer frame.
/// assert!(Context::current().tracing_suppressed());
/// ```
#[derive(Clone, Default)]
pub struct Context {
    pub(crate) span: Option<SpanHandle>,
    pub(crate) entry_span: Option<SpanHandle>,
    pub(crate) tracing_level: Option<TracingLevel>,
}

impl Context {
    /// Creates an empty root `Context`.
    pub fn new() -> Self {
        Context::default()
    }

    /// Returns an immutable snapshot of the current thread's context.
    pub fn current() -> Self {
        Context::map_current(|cx| cx.clone())
    }

    /// Applies a function to the current context, returning its value.
    ///
    /// This avoids the clone of [`Context::current`] when only a single
    /// field is needed.
    pub fn map_current<T>(f: impl FnOnce(&Context) -> T) -> T {
        CURRENT_CONTEXT.with(|cx| f(&cx.borrow()))
    }

    pub(crate) fn map_current_mut<T>(f: impl FnOnce(&mut Context) -> T) -> T {
        CURRENT_CONTEXT.with(|cx| f(&mut cx.borrow_mut()))
    }

    /// Returns a copy of this context with the given span as the current
    /// span. Entry spans are additionally tracked in the entry-span slot so
    /// they stay reachable while exit or intermediate spans are current.
    pub fn with_span(&self, span: SpanHandle) -> Self {
        Context {
            entry_span: if span.kind() == SpanKind::Entry {
                Some(span.clone())
            } else {
                self.entry_span.clone()
            },
            span: Some(span),
            ..self.clone()
        }
    }

    /// Returns a copy of this context with the given tracing level.
    pub fn with_tracing_level(&self, level: TracingLevel) -> Self {
        Context {
            tracing_level: Some(level),
            ..self.clone()
        }
    }

    /// The current span of this context, if any.
    pub fn span(&self) -> Option<&SpanHandle> {
        self.span.as_ref()
    }

    /// The entry span of this context, if any.
    ///
    /// This stays populated even while an exit or intermediate span is the
    /// current span, so entry-level instrumentations (HTTP frameworks and the
    /// like) can keep annotating the entry span at any point of the request.
    pub fn entry_span(&self) -> Option<&SpanHandle> {
        self.entry_span.as_ref()
    }

    /// The tracing level of this context, if one has been set.
    pub fn tracing_level(&self) -> Option<TracingLevel> {
        self.tracing_level
    }

    /// Whether tracing is suppressed for this unit of work.
    pub fn tracing_suppressed(&self) -> bool {
        self.tracing_level == Some(TracingLevel::Suppressed)
    }

    /// Replaces the current context on this thread with this context.
    ///
    /// Dropping the returned [`ContextGuard`] resets the current context to
    /// the previous value.
    pub fn attach(self) -> ContextGuard {
        let previous_cx = CURRENT_CONTEXT
            .try_with(|current| current.replace(self))
            .ok();

        ContextGuard {
            previous_cx,
            _marker: PhantomData,
        }
    }

    /// Executes `f` in a new child context derived from the currently active
    /// one (or a fresh root if none is active), returning `f`'s result.
    ///
    /// Spans created inside `f` belong to the child context and do not leak
    /// into the caller's frame.
    pub fn run_and_return<T>(f: impl FnOnce() -> T) -> T {
        let child = Context::current();
        let _guard = child.attach();
        f()
    }

    /// Wraps `f` so that, whenever it is later invoked, it runs inside this
    /// context instead of whatever context happens to be active at call
    /// time.
    ///
    /// This is the closure form of [`FutureExt::with_context`]; use it for
    /// callbacks handed to libraries that invoke them from unrelated
    /// execution chains.
    ///
    /// # Examples
    ///
    /// ```
    /// use tracekit::{Context, TracingLevel};
    ///
    /// let suppressed = Context::current().with_tracing_level(TracingLevel::Suppressed);
    /// let callback = suppressed.bind(|| Context::current().tracing_suppressed());
    ///
    /// // The binding context is restored at invocation time.
    /// assert!(callback());
    /// assert!(!Context::current().tracing_suppressed());
    /// ```
    pub fn bind<T, F>(self, f: F) -> impl FnOnce() -> T
    where
        F: FnOnce() -> T,
    {
        move || {
            let _guard = self.attach();
            f()
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("span", &self.span.as_ref().map(|s| s.span_id().to_owned()))
            .field(
                "entry_span",
                &self.entry_span.as_ref().map(|s| s.span_id().to_owned()),
            )
            .field("tracing_level", &self.tracing_level)
            .finish()
    }
}

/// A guard that resets the current context to the prior context when dropped.
#[allow(missing_debug_implementations)]
pub struct ContextGuard {
    previous_cx: Option<Context>,
    // ensure this type is !Send as it relies on thread locals
    _marker: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(previous_cx) = self.previous_cx.take() {
            let _ = CURRENT_CONTEXT.try_with(|current| current.replace(previous_cx));
        }
    }
}

/// Returns the current span of the active context, if any.
pub fn current_span() -> Option<SpanHandle> {
    Context::map_current(|cx| cx.span.clone())
}

/// Returns the entry span of the active context, if any.
pub fn current_entry_span() -> Option<SpanHandle> {
    Context::map_current(|cx| cx.entry_span.clone())
}

/// Registers `span` as the current span of the active context.
///
/// Only the active frame is mutated. Frames that were captured earlier via
/// [`Context::bind`], [`FutureExt::with_context`] or [`Context::current`]
/// are unaffected, which is what keeps sibling continuations isolated.
pub fn set_current_span(span: &SpanHandle) {
    Context::map_current_mut(|cx| {
        if span.kind() == SpanKind::Entry {
            cx.entry_span = Some(span.clone());
        }
        cx.span = Some(span.clone());
    })
}

/// Sets the tracing level of the active context.
pub fn set_tracing_level(level: TracingLevel) {
    Context::map_current_mut(|cx| cx.tracing_level = Some(level))
}

/// Whether tracing is suppressed in the active context.
///
/// Adapters consult this before building a span at all; suppressed traces
/// never allocate span state.
pub fn tracing_suppressed() -> bool {
    Context::map_current(|cx| cx.tracing_suppressed())
}

/// Whether a span is currently active in the active context.
pub fn is_tracing() -> bool {
    Context::map_current(|cx| cx.span.is_some())
}

/// Options for [`skip_exit_tracing`].
#[derive(Clone, Copy, Debug)]
pub struct SkipExitOptions {
    /// Whether the instrumentation asking is globally active.
    pub is_active: bool,
    /// Skips the active-parent check; used by instrumentations that trace
    /// technologies which can legitimately run outside an entry span.
    pub skip_parent_span_check: bool,
}

impl Default for SkipExitOptions {
    fn default() -> Self {
        SkipExitOptions {
            is_active: true,
            skip_parent_span_check: false,
        }
    }
}

/// The outcome of [`skip_exit_tracing`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SkipExitDecision {
    /// No exit span should be created for this operation.
    pub skip: bool,
    /// Tracing is suppressed. Even when no span is created, the caller must
    /// still forward the suppression signal downstream so the whole causal
    /// chain stays consistently untraced.
    pub suppressed: bool,
}

/// The combined pre-flight check used by exit-span instrumentations.
///
/// Returns `skip` when the instrumentation is inactive, no span is active in
/// the current context, the active span is itself an exit span (nested exits
/// are not traced as distinct spans), or tracing is suppressed.
pub fn skip_exit_tracing(options: SkipExitOptions) -> SkipExitDecision {
    Context::map_current(|cx| {
        let suppressed = cx.tracing_suppressed();
        let no_usable_parent = if options.skip_parent_span_check {
            false
        } else {
            match cx.span() {
                None => true,
                Some(span) => span.is_exit(),
            }
        };
        SkipExitDecision {
            skip: !options.is_active || no_usable_parent || suppressed,
            suppressed,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_contexts() {
        let _outer_guard = Context::current()
            .with_tracing_level(TracingLevel::Suppressed)
            .attach();

        assert!(Context::current().tracing_suppressed());

        {
            let _inner_guard = Context::current()
                .with_tracing_level(TracingLevel::Active)
                .attach();
            assert!(!Context::current().tracing_suppressed());

            assert!(Context::map_current(|cx| {
                assert_eq!(cx.tracing_level(), Some(TracingLevel::Active));
                true
            }));
        }

        // Resets to the suppressed frame when the inner guard is dropped.
        assert!(Context::current().tracing_suppressed());
    }

    #[test]
    fn bind_restores_binding_context_at_call_time() {
        let bound = Context::current()
            .with_tracing_level(TracingLevel::Suppressed)
            .bind(tracing_suppressed);

        // An unrelated frame is active when the callback finally runs.
        let _guard = Context::current()
            .with_tracing_level(TracingLevel::Active)
            .attach();

        assert!(bound());
        assert!(!tracing_suppressed());
    }

    #[test]
    fn run_and_return_isolates_child_state() {
        let result = Context::run_and_return(|| {
            set_tracing_level(TracingLevel::Suppressed);
            tracing_suppressed()
        });

        assert!(result);
        // The child frame's mutation did not leak into the caller's frame.
        assert!(!tracing_suppressed());
    }

    #[test]
    fn run_and_return_inherits_from_active_frame() {
        let _guard = Context::current()
            .with_tracing_level(TracingLevel::Suppressed)
            .attach();

        assert!(Context::run_and_return(tracing_suppressed));
    }

    #[test]
    fn skip_exit_tracing_without_active_span() {
        let decision = skip_exit_tracing(SkipExitOptions::default());
        assert!(decision.skip);
        assert!(!decision.suppressed);
    }

    #[test]
    fn skip_exit_tracing_inactive_instrumentation() {
        let decision = skip_exit_tracing(SkipExitOptions {
            is_active: false,
            skip_parent_span_check: true,
        });
        assert!(decision.skip);
    }

    #[test]
    fn skip_exit_tracing_reports_suppression() {
        let _guard = Context::current()
            .with_tracing_level(TracingLevel::Suppressed)
            .attach();

        let decision = skip_exit_tracing(SkipExitOptions {
            is_active: true,
            skip_parent_span_check: true,
        });
        assert!(decision.skip);
        assert!(decision.suppressed);
    }
}
