use crate::Context;
use futures_core::Stream;
use futures_sink::Sink;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::Context as TaskContext;
use std::task::Poll;

impl<T: Sized> FutureExt for T {}

pin_project! {
    /// A future, stream, or sink that has an associated context.
    ///
    /// The captured context is re-attached for the duration of every poll,
    /// so the wrapped work always observes the context that was active when
    /// it was scheduled, no matter which unrelated continuations ran in
    /// between.
    #[derive(Clone, Debug)]
    pub struct WithContext<T> {
        #[pin]
        inner: T,
        cx: Context,
    }
}

impl<T: std::future::Future> std::future::Future for WithContext<T> {
    type Output = T::Output;

    fn poll(self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _guard = this.cx.clone().attach();

        this.inner.poll(task_cx)
    }
}

impl<T: Stream> Stream for WithContext<T> {
    type Item = T::Item;

    fn poll_next(self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let _guard = this.cx.clone().attach();
        T::poll_next(this.inner, task_cx)
    }
}

impl<I, T: Sink<I>> Sink<I> for WithContext<T> {
    type Error = T::Error;

    fn poll_ready(
        self: Pin<&mut Self>,
        task_cx: &mut TaskContext<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        let _guard = this.cx.clone().attach();
        T::poll_ready(this.inner, task_cx)
    }

    fn start_send(self: Pin<&mut Self>, item: I) -> Result<(), Self::Error> {
        let this = self.project();
        let _guard = this.cx.clone().attach();
        T::start_send(this.inner, item)
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        task_cx: &mut TaskContext<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        let _guard = this.cx.clone().attach();
        T::poll_flush(this.inner, task_cx)
    }

    fn poll_close(
        self: Pin<&mut Self>,
        task_cx: &mut TaskContext<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        let _enter = this.cx.clone().attach();
        T::poll_close(this.inner, task_cx)
    }
}

/// Extension trait allowing futures, streams, and sinks to carry a context.
pub trait FutureExt: Sized {
    /// Attaches the provided [`Context`] to this type, returning a
    /// [`WithContext`] wrapper.
    ///
    /// When the wrapped type is a future, stream, or sink, the attached
    /// context will be set as current while it is being polled.
    fn with_context(self, cx: Context) -> WithContext<Self> {
        WithContext { inner: self, cx }
    }

    /// Attaches the current [`Context`] to this type, returning a
    /// [`WithContext`] wrapper.
    fn with_current_context(self) -> WithContext<Self> {
        let cx = Context::current();
        self.with_context(cx)
    }

    /// Attaches the current [`Context`] to this type with tracing
    /// suppressed, returning a [`WithContext`] wrapper.
    ///
    /// Used by instrumentations whose own outbound calls (exporter flushes,
    /// agent announcements) must never be traced.
    fn with_current_context_suppressed(self) -> WithContext<Self> {
        let cx = Context::current().with_tracing_level(crate::trace::TracingLevel::Suppressed);
        self.with_context(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{set_tracing_level, tracing_suppressed};
    use crate::trace::TracingLevel;
    use futures_executor::block_on;
    use std::future::Future;
    use std::task::{Context as TaskContext, Poll};

    /// Yields once before completing, so the future is polled twice and the
    /// second poll happens after unrelated work ran on the same thread.
    struct YieldOnce {
        yielded: bool,
    }

    impl Future for YieldOnce {
        type Output = bool;

        fn poll(mut self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<bool> {
            if self.yielded {
                Poll::Ready(tracing_suppressed())
            } else {
                self.yielded = true;
                task_cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }

    #[test]
    fn with_context_restores_captured_frame_on_every_poll() {
        let suppressed_cx = Context::current().with_tracing_level(TracingLevel::Suppressed);
        let fut = YieldOnce { yielded: false }.with_context(suppressed_cx);

        // Unrelated state on the executing thread between polls.
        set_tracing_level(TracingLevel::Active);

        assert!(block_on(fut));
        assert!(!tracing_suppressed());
    }

    #[test]
    fn with_current_context_suppressed_marks_future() {
        let fut = YieldOnce { yielded: false }.with_current_context_suppressed();
        assert!(block_on(fut));
    }

    #[test]
    fn interleaved_futures_do_not_share_state() {
        let suppressed = YieldOnce { yielded: false }
            .with_context(Context::current().with_tracing_level(TracingLevel::Suppressed));
        let active = YieldOnce { yielded: false }
            .with_context(Context::current().with_tracing_level(TracingLevel::Active));

        let (a, b) = block_on(async { (suppressed.await, active.await) });
        assert!(a);
        assert!(!b);
    }
}
