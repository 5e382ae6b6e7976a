//! Cold asynchronous sequences.
//!
//! A [`Flux`] describes how to produce zero or more values; nothing runs
//! until [`Flux::subscribe`], and every subscription re-runs the producer
//! as a fresh execution unit on the non-blocking pool. A [`Mono`] is a flux
//! constrained to at most one value.
//!
//! Items are `Result<T, Error>`; the first `Err` terminates the sequence.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::guard;
use crate::scheduler::{SchedulerHandle, UnitHandle};

type Producer<T> = Arc<dyn Fn() -> BoxStream<'static, Result<T>> + Send + Sync>;

/// Event delivered to a subscriber.
#[derive(Debug)]
pub enum Signal<T> {
    Next(T),
    Complete,
    Error(Error),
}

/// Cold sequence of zero or more values.
pub struct Flux<T> {
    scheduler: SchedulerHandle,
    producer: Producer<T>,
}

impl<T> Clone for Flux<T> {
    fn clone(&self) -> Self {
        Self {
            scheduler: self.scheduler.clone(),
            producer: Arc::clone(&self.producer),
        }
    }
}

impl<T> fmt::Debug for Flux<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flux").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Flux<T> {
    /// Builds a flux whose every subscription calls `factory` for a new stream.
    pub fn from_stream<F, S>(scheduler: &SchedulerHandle, factory: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = Result<T>> + Send + 'static,
    {
        Self {
            scheduler: scheduler.clone(),
            producer: Arc::new(move || factory().boxed()),
        }
    }

    pub fn from_iter<I>(scheduler: &SchedulerHandle, items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Clone + Sync,
    {
        let items: Arc<Vec<T>> = Arc::new(items.into_iter().collect());
        Self::from_stream(scheduler, move || {
            let items = Arc::clone(&items);
            stream::iter((0..items.len()).map(move |i| Ok(items[i].clone())))
        })
    }

    pub fn empty(scheduler: &SchedulerHandle) -> Self {
        Self::from_stream(scheduler, stream::empty)
    }

    pub fn error(scheduler: &SchedulerHandle, error: Error) -> Self {
        Self::from_stream(scheduler, move || stream::once(future::ready(Err(error.clone()))))
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    pub fn map<U, F>(self, f: F) -> Flux<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let upstream = self.producer;
        let f = Arc::new(f);
        Flux {
            scheduler: self.scheduler,
            producer: Arc::new(move || {
                let f = Arc::clone(&f);
                upstream().map(move |item| item.map(|value| f(value))).boxed()
            }),
        }
    }

    /// Maps every value to a [`Mono`] and merges their values as they arrive.
    ///
    /// Inner sequences run concurrently; the merged order is unspecified.
    pub fn flat_map<U, F>(self, f: F) -> Flux<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Mono<U> + Send + Sync + 'static,
    {
        let upstream = self.producer;
        let f = Arc::new(f);
        Flux {
            scheduler: self.scheduler,
            producer: Arc::new(move || {
                let f = Arc::clone(&f);
                upstream()
                    .flat_map_unordered(None, move |item| match item {
                        Ok(value) => f(value).flux.source(),
                        Err(err) => stream::once(future::ready(Err(err))).boxed(),
                    })
                    .boxed()
            }),
        }
    }

    fn source(&self) -> BoxStream<'static, Result<T>> {
        (self.producer)()
    }

    /// Starts the producer as a new execution unit on the non-blocking pool.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(self.scheduler.prefetch());
        let producer = Arc::clone(&self.producer);
        let unit = self.scheduler.spawn(async move {
            let mut source = producer();
            while let Some(item) = source.next().await {
                let terminal = item.is_err();
                if tx.send(item).await.is_err() {
                    tracing::trace!("Subscriber went away, cancelling producer");
                    return;
                }
                if terminal {
                    return;
                }
            }
        });
        tracing::trace!(unit = unit.unit_id(), "Subscribed");
        Subscription {
            rx,
            unit: Some(unit),
            scheduler: self.scheduler.clone(),
            terminated: false,
        }
    }

    /// Subscribes and gathers every value.
    pub async fn collect_all(&self) -> Result<Vec<T>> {
        let mut subscription = self.subscribe();
        let mut values = Vec::new();
        loop {
            match subscription.next_signal().await {
                Signal::Next(value) => values.push(value),
                Signal::Complete => return Ok(values),
                Signal::Error(err) => return Err(err),
            }
        }
    }

    /// Blocks until the sequence completes and returns every value.
    pub fn block_collect(&self, timeout: Duration) -> Result<Vec<T>> {
        guard::enforce("Flux::block_collect");
        self.scheduler
            .runtime()
            .block_on(async {
                tokio::time::timeout(timeout, self.collect_all())
                    .await
                    .map_err(|_| Error::Aborted(format!("sequence did not complete within {:?}", timeout)))
            })?
    }

    /// Blocks until the sequence completes and returns its last value.
    pub fn block_last(&self, timeout: Duration) -> Result<Option<T>> {
        Ok(self.block_collect(timeout)?.pop())
    }
}

/// Cold sequence of at most one value.
pub struct Mono<T> {
    flux: Flux<T>,
}

impl<T> Clone for Mono<T> {
    fn clone(&self) -> Self {
        Self {
            flux: self.flux.clone(),
        }
    }
}

impl<T> fmt::Debug for Mono<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mono").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Mono<T> {
    /// Builds a mono whose every subscription awaits a new future from `factory`.
    pub fn from_future<F, Fut>(scheduler: &SchedulerHandle, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            flux: Flux::from_stream(scheduler, move || stream::once(factory())),
        }
    }

    pub fn just(scheduler: &SchedulerHandle, value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self {
            flux: Flux::from_iter(scheduler, [value]),
        }
    }

    pub fn error(scheduler: &SchedulerHandle, error: Error) -> Self {
        Self {
            flux: Flux::error(scheduler, error),
        }
    }

    pub fn map<U, F>(self, f: F) -> Mono<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        Mono {
            flux: self.flux.map(f),
        }
    }

    /// Runs this mono to completion, discarding its value, then continues
    /// with `next`. An error ends the sequence before `next` is subscribed.
    pub fn then_many<U: Send + 'static>(self, next: Flux<U>) -> Flux<U> {
        let upstream = self.flux.producer;
        let next = next.producer;
        Flux {
            scheduler: self.flux.scheduler,
            producer: Arc::new(move || {
                let mut upstream = upstream();
                let next = Arc::clone(&next);
                stream::once(async move {
                    while let Some(item) = upstream.next().await {
                        if let Err(err) = item {
                            return stream::once(future::ready(Err(err))).boxed();
                        }
                    }
                    next()
                })
                .flatten()
                .boxed()
            }),
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        self.flux.subscribe()
    }

    pub fn into_flux(self) -> Flux<T> {
        self.flux
    }

    /// Subscribes and awaits the value, `None` when the mono completes empty.
    pub async fn await_single(&self) -> Result<Option<T>> {
        match self.subscribe().next_signal().await {
            Signal::Next(value) => Ok(Some(value)),
            Signal::Complete => Ok(None),
            Signal::Error(err) => Err(err),
        }
    }

    /// Blocks until the mono terminates.
    pub fn block(&self, timeout: Duration) -> Result<Option<T>> {
        self.flux.block_last(timeout)
    }
}

impl Mono<()> {
    /// A mono that completes without a value once the future resolves.
    pub fn completion<F, Fut>(scheduler: &SchedulerHandle, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            flux: Flux::from_stream(scheduler, move || {
                stream::once(factory()).filter_map(|result| future::ready(result.err().map(Err)))
            }),
        }
    }
}

impl<T> From<Mono<T>> for Flux<T> {
    fn from(mono: Mono<T>) -> Self {
        mono.flux
    }
}

/// One active subscription; a [`Stream`] of the sequence's items.
///
/// Dropping it cancels the producing execution unit.
pub struct Subscription<T> {
    rx: mpsc::Receiver<Result<T>>,
    unit: Option<UnitHandle<()>>,
    scheduler: SchedulerHandle,
    terminated: bool,
}

impl<T: Send + 'static> Subscription<T> {
    /// Awaits the next signal. After a terminal signal only `Complete` follows.
    pub async fn next_signal(&mut self) -> Signal<T> {
        match self.next().await {
            Some(Ok(value)) => Signal::Next(value),
            Some(Err(err)) => Signal::Error(err),
            None => Signal::Complete,
        }
    }

    /// Blocks for the next signal; `None` when `timeout` elapses first.
    pub fn blocking_next(&mut self, timeout: Duration) -> Option<Signal<T>> {
        guard::enforce("Subscription::blocking_next");
        let runtime = self.scheduler.runtime().clone();
        runtime
            .block_on(async { tokio::time::timeout(timeout, self.next_signal()).await })
            .ok()
    }

    /// Cancels the producer and drops any buffered items.
    pub fn cancel(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(unit) = self.unit.take() {
            unit.cancel();
        }
        self.rx.close();
    }
}

impl<T: Send + 'static> Stream for Subscription<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.terminated {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(item)) => {
                if item.is_err() {
                    self.terminated = true;
                }
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                // The producer is gone; a unit aborted by the guard must not
                // look like a clean completion.
                if let Some(unit) = self.unit.as_mut() {
                    match unit.poll_outcome(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(outcome) => {
                            self.unit = None;
                            self.terminated = true;
                            if let Err(err) = outcome {
                                return Poll::Ready(Some(Err(err.into())));
                            }
                        }
                    }
                }
                self.terminated = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(unit) = self.unit.take() {
            unit.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use crate::ErrorKind;
    use ntest::timeout;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WAIT: Duration = Duration::from_secs(5);

    #[timeout(10000)]
    #[test]
    fn test_each_subscription_reruns_producer() {
        let scheduler = test_support::scheduler();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mono = Mono::from_future(&scheduler.handle(), move || {
            let counter = Arc::clone(&counter);
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst)) }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(mono.block(WAIT).unwrap(), Some(0));
        assert_eq!(mono.block(WAIT).unwrap(), Some(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[timeout(10000)]
    #[test]
    fn test_error_terminates_sequence() {
        let scheduler = test_support::scheduler();
        let flux = Flux::from_stream(&scheduler.handle(), || {
            stream::iter(vec![
                Ok(1),
                Err(Error::Transport("reset".to_string())),
                Ok(3),
            ])
        });

        let mut subscription = flux.subscribe();
        assert!(matches!(subscription.blocking_next(WAIT), Some(Signal::Next(1))));
        match subscription.blocking_next(WAIT) {
            Some(Signal::Error(err)) => assert_eq!(err.kind(), ErrorKind::Transport),
            other => panic!("expected error, got {:?}", other),
        }
        assert!(matches!(subscription.blocking_next(WAIT), Some(Signal::Complete)));
    }

    #[timeout(10000)]
    #[test]
    fn test_then_many_and_flat_map() {
        let scheduler = test_support::scheduler();
        let handle = scheduler.handle();
        let deleted = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&deleted);
        let cleanup = Mono::completion(&handle, move || {
            let flag = Arc::clone(&flag);
            async move {
                flag.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let inner = handle.clone();

        let flux = cleanup
            .then_many(Flux::from_iter(&handle, vec![1, 2, 3]))
            .flat_map(move |n| Mono::just(&inner, n * 10));

        let mut values = flux.block_collect(WAIT).unwrap();
        values.sort();
        assert_eq!(values, vec![10, 20, 30]);
        assert_eq!(deleted.load(Ordering::SeqCst), 1);
    }

    #[timeout(10000)]
    #[test]
    fn test_then_many_stops_on_error() {
        let scheduler = test_support::scheduler();
        let handle = scheduler.handle();
        let failing: Mono<()> = Mono::error(&handle, Error::Store {
            status: 503,
            message: "unavailable".to_string(),
        });

        let err = failing
            .then_many(Flux::from_iter(&handle, vec![1]))
            .block_collect(WAIT)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Store);
    }

    #[timeout(10000)]
    #[test]
    fn test_violation_in_producer_surfaces_as_error() {
        let scheduler = test_support::scheduler();
        let flux = Flux::from_stream(&scheduler.handle(), || {
            stream::once(async {
                guard::sleep(Duration::ZERO);
                Ok(1)
            })
        });

        let err = flux.block_collect(WAIT).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BlockingOperationDetected);
        assert_eq!(
            err.violation().map(|v| v.call_site.as_str()),
            Some("std::thread::sleep")
        );
    }

    #[timeout(10000)]
    #[test]
    fn test_dropping_subscription_cancels_producer() {
        let scheduler = test_support::scheduler();
        let produced = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&produced);
        let flux = Flux::from_stream(&scheduler.handle(), move || {
            let counter = Arc::clone(&counter);
            stream::unfold(0u64, move |n| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    Some((Ok(n), n + 1))
                }
            })
        });

        let mut subscription = flux.subscribe();
        assert!(matches!(subscription.blocking_next(WAIT), Some(Signal::Next(0))));
        subscription.cancel();
        std::thread::sleep(Duration::from_millis(50));
        let after_cancel = produced.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(produced.load(Ordering::SeqCst), after_cancel);
    }

    #[timeout(10000)]
    #[test]
    fn test_completion_emits_nothing() {
        let scheduler = test_support::scheduler();
        let done = Mono::completion(&scheduler.handle(), || async { Ok(()) });
        assert_eq!(done.block(WAIT).unwrap(), None);
    }
}
