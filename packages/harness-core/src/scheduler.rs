//! Two-pool scheduler.
//!
//! A fixed-size non-blocking worker pool plus a bounded pool that is allowed
//! to block, both backed by one tokio runtime. Every submitted piece of work
//! becomes an execution unit tagged with its pool class so the guard can
//! tell which threads must not block.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::{Handle, Runtime};
use tokio::task::{JoinError, JoinHandle};

use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::guard::{self, PoolClass, UnitTag, Violation};

/// Owner of the worker pools. Dropping it shuts both pools down.
pub struct Scheduler {
    runtime: Option<Runtime>,
    handle: SchedulerHandle,
    shutdown_timeout: Duration,
}

impl Scheduler {
    /// Builds the pools described by `config`.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.non_blocking_workers.max(1))
            .max_blocking_threads(config.max_blocking_threads.max(1))
            .thread_name("harness-worker")
            .enable_all()
            .build()
            .map_err(|e| Error::IoError(format!("Failed to build scheduler runtime: {}", e)))?;

        tracing::debug!(
            workers = config.non_blocking_workers,
            blocking = config.max_blocking_threads,
            "Scheduler started"
        );

        let handle = SchedulerHandle {
            runtime: runtime.handle().clone(),
            prefetch: config.prefetch.max(1),
        };
        Ok(Self {
            runtime: Some(runtime),
            handle,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(self.shutdown_timeout);
        }
    }
}

/// Cheap, cloneable submission handle.
#[derive(Clone)]
pub struct SchedulerHandle {
    runtime: Handle,
    prefetch: usize,
}

impl SchedulerHandle {
    /// Submits a future to the non-blocking pool.
    pub fn spawn<F>(&self, future: F) -> UnitHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let tag = UnitTag::next(PoolClass::NonBlocking);
        tracing::trace!(unit = tag.id, "Non-blocking unit submitted");
        let join = self.runtime.spawn(Tagged {
            tag,
            inner: Box::pin(future),
        });
        UnitHandle::new(tag, join, self.runtime.clone())
    }

    /// Submits a closure to the non-blocking pool.
    pub fn schedule<F, T>(&self, task: F) -> UnitHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.spawn(async move { task() })
    }

    /// Submits a closure to the blocking-allowed pool.
    pub fn spawn_blocking<F, T>(&self, task: F) -> UnitHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let tag = UnitTag::next(PoolClass::BlockingAllowed);
        tracing::trace!(unit = tag.id, "Blocking-allowed unit submitted");
        let join = self.runtime.spawn_blocking(move || {
            let _scope = guard::enter(tag);
            task()
        });
        UnitHandle::new(tag, join, self.runtime.clone())
    }

    /// Blocks the calling thread until `future` resolves.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        guard::enforce("SchedulerHandle::block_on");
        self.runtime.block_on(future)
    }

    /// Subscription buffer size.
    pub fn prefetch(&self) -> usize {
        self.prefetch
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }
}

/// Marks the worker thread with the unit's tag for the duration of each poll.
struct Tagged<F> {
    tag: UnitTag,
    inner: Pin<Box<F>>,
}

impl<F: Future> Future for Tagged<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let _scope = guard::enter(self.tag);
        self.inner.as_mut().poll(cx)
    }
}

/// Why an execution unit produced no value.
#[derive(Error, Debug)]
pub enum UnitError {
    /// Aborted by the guard
    #[error("Execution unit aborted: {0}")]
    Blocking(#[source] Violation),

    #[error("Execution unit panicked: {0}")]
    Panicked(String),

    #[error("Execution unit cancelled")]
    Cancelled,

    #[error("Execution unit did not finish within {0:?}")]
    Timeout(Duration),
}

impl UnitError {
    /// The guard violation that caused the failure, if any.
    pub fn violation(&self) -> Option<&Violation> {
        match self {
            UnitError::Blocking(violation) => Some(violation),
            _ => None,
        }
    }
}

impl From<UnitError> for Error {
    fn from(err: UnitError) -> Self {
        match err {
            UnitError::Blocking(violation) => Error::BlockingOperationDetected(violation),
            other => Error::Aborted(other.to_string()),
        }
    }
}

/// Awaitable result of an execution unit.
pub struct UnitHandle<T> {
    tag: UnitTag,
    join: JoinHandle<T>,
    runtime: Handle,
}

impl<T: Send + 'static> UnitHandle<T> {
    fn new(tag: UnitTag, join: JoinHandle<T>, runtime: Handle) -> Self {
        Self { tag, join, runtime }
    }

    pub fn unit_id(&self) -> u64 {
        self.tag.id
    }

    pub fn pool_class(&self) -> PoolClass {
        self.tag.class
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Requests cancellation. Blocking-allowed units run to completion.
    pub fn cancel(&self) {
        self.join.abort();
    }

    /// Waits for the unit without blocking the thread.
    pub async fn join(self) -> std::result::Result<T, UnitError> {
        outcome(self.join.await)
    }

    /// Blocks the calling thread until the unit finishes or `timeout`
    /// elapses. A unit still running at the deadline is cancelled.
    pub fn get(self, timeout: Duration) -> std::result::Result<T, UnitError> {
        guard::enforce("UnitHandle::get");
        let abort = self.join.abort_handle();
        let join = self.join;
        self.runtime.block_on(async move {
            match tokio::time::timeout(timeout, join).await {
                Ok(result) => outcome(result),
                Err(_) => {
                    abort.abort();
                    Err(UnitError::Timeout(timeout))
                }
            }
        })
    }

    pub(crate) fn poll_outcome(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<std::result::Result<T, UnitError>> {
        Pin::new(&mut self.join).poll(cx).map(outcome)
    }
}

fn outcome<T>(result: std::result::Result<T, JoinError>) -> std::result::Result<T, UnitError> {
    let err = match result {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };
    if err.is_cancelled() {
        return Err(UnitError::Cancelled);
    }
    match err.try_into_panic() {
        Ok(payload) => match payload.downcast::<Violation>() {
            Ok(violation) => Err(UnitError::Blocking(*violation)),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                Err(UnitError::Panicked(message))
            }
        },
        Err(err) => Err(UnitError::Panicked(err.to_string())),
    }
}
