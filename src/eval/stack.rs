//! Native stack growth for the recursive evaluator.
//!
//! Every level of subtag nesting adds several poll frames (statement walk, call,
//! middleware, subtag) to the thread that polls the execution. [`GrowStack`] checks the
//! remaining stack each time a statement future is polled and moves the poll onto a
//! freshly allocated segment when the red zone is reached, so nesting up to the
//! configured depth limit runs on ordinary runtime worker threads.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// If less than this remains, the next poll runs on a new segment.
const RED_ZONE: usize = 256 * 1024;

/// Size of each new segment.
const STACK_PER_RECURSION: usize = 2 * 1024 * 1024;

#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

#[inline]
#[cfg(target_arch = "wasm32")]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}

/// A boxed future whose every poll is guarded by [`ensure_sufficient_stack`].
pub struct GrowStack<'a, T> {
    inner: Pin<Box<dyn Future<Output = T> + Send + 'a>>,
}

impl<'a, T> GrowStack<'a, T> {
    pub fn new(inner: Pin<Box<dyn Future<Output = T> + Send + 'a>>) -> Self {
        Self { inner }
    }
}

impl<T> Future for GrowStack<'_, T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let inner = self.inner.as_mut();
        ensure_sufficient_stack(|| inner.poll(cx))
    }
}
