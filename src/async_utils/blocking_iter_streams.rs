//! Wrapper which converts blocking iterators to async streams.
//!
//! Page extraction reads rasterized pages from disk one at a time, which would
//! stall the executor that is also running our translation requests. This
//! moves each `next()` call onto Tokio's blocking pool.

use std::{
    panic,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{FutureExt as _, Stream};

use super::BoxedFuture;
use crate::prelude::*;

/// A [`BlockingIterStream`] either holds its iterator, or is waiting for a
/// background `next()` call to hand it back.
enum BlockingIterStreamState<I, T>
where
    I: Iterator<Item = Result<T>> + Send + Unpin + 'static,
    T: Send + 'static,
{
    /// We have an iterator which we can ask for the next value.
    Iter(I),

    /// We are waiting on a future to complete.
    Waiting(BoxedFuture<(Option<Result<T>>, I)>),
}

/// A [`Stream`] wrapping a blocking iterator.
pub struct BlockingIterStream<I, T>
where
    I: Iterator<Item = Result<T>> + Send + Unpin + 'static,
    T: Send + 'static,
{
    state: Option<BlockingIterStreamState<I, T>>,
}

impl<I, T> BlockingIterStream<I, T>
where
    I: Iterator<Item = Result<T>> + Send + Unpin + 'static,
    T: Send + 'static,
{
    /// Create a new [`BlockingIterStream`] from an iterator.
    pub fn new(iter: I) -> Self {
        Self {
            state: Some(BlockingIterStreamState::Iter(iter)),
        }
    }
}

impl<I, T> Stream for BlockingIterStream<I, T>
where
    I: Iterator<Item = Result<T>> + Send + Unpin + 'static,
    T: Send + 'static,
{
    type Item = I::Item;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        // Extract our state. We _must_ put this back before we return.
        let mut this = self.as_mut();
        let state = this
            .state
            .take()
            .expect("should always have state on entry to BlockingIterStream::poll_next");

        // Either create a new future to wait on, or use the existing one.
        let mut future = match state {
            BlockingIterStreamState::Iter(mut iter) => {
                // Run `iter.next()` on a background worker thread, to avoid
                // blocking the executor. This takes ownership of `iter`, but
                // we'll need to give it back later. Async Rust is fun!
                spawn_blocking_propagating_panics(move || {
                    let next = iter.next();
                    (next, iter)
                })
                .boxed()
            }
            BlockingIterStreamState::Waiting(future) => future,
        };

        // Poll our future, and replace our state.
        match Pin::new(&mut future).poll(cx) {
            Poll::Ready((next, iter)) => {
                this.state = Some(BlockingIterStreamState::Iter(iter));
                Poll::Ready(next)
            }
            Poll::Pending => {
                this.state = Some(BlockingIterStreamState::Waiting(future));
                Poll::Pending
            }
        }
    }
}

/// Wrapper around [`tokio::task::spawn_blocking`] that propagates panics from
/// the background task.
pub async fn spawn_blocking_propagating_panics<F, T>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => value,
        Err(err) => panic::resume_unwind(err.into_panic()),
    }
}
