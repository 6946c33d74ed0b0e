//! Pipe, a minimal promise-compatible streaming primitive.
//!
//! A [`Pipe`] carries three kinds of [`Signal`]: PUSH (a streamed value),
//! RESOLVE (terminal success) and REJECT (terminal failure). Producers emit
//! signals through an [`Emitter`]; consumers attach exactly one operator,
//! which consumes the pipe and returns a new downstream pipe.
//!
//! # Buffering
//!
//! Signals emitted before an operator is attached are buffered. Attaching
//! flushes the buffer in arrival order; later signals are delivered as they
//! arrive. A pipe that never gets an operator keeps its buffer until it is
//! dropped.
//!
//! # Reentrancy
//!
//! Delivery never holds a lock while calling into an operator. A signal
//! emitted from inside an operator, or from another thread while delivery is
//! in progress, is queued and delivered by the active flush loop, so order
//! is preserved.
//!
//! # Example
//!
//! ```rust,ignore
//! use teth_core::Pipe;
//!
//! let total = Pipe::new(|emit| {
//!     for n in 1..=9 {
//!         emit.push(n);
//!     }
//!     emit.resolve(0);
//! })
//! .map(|n| n * 2)
//! .reduce(|sum, n| sum + n, 0)
//! .await?;
//!
//! assert_eq!(total, 90);
//! ```

mod combinators;
mod operators;
mod reply;

use std::collections::VecDeque;
use std::fmt;
use std::future::IntoFuture;
use std::sync::Arc;

use futures::channel::{mpsc, oneshot};
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use tracing::warn;

use crate::error::Error;

pub use combinators::Completion;
pub use reply::{IntoReply, Reply};

/// A message flowing through a [`Pipe`].
#[derive(Debug, Clone)]
pub enum Signal<T> {
    /// A streamed value.
    Push(T),
    /// Terminal success.
    Resolve(T),
    /// Terminal failure.
    Reject(Error),
}

impl<T> Signal<T> {
    /// Returns `true` for RESOLVE and REJECT.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Push(_))
    }
}

type Operator<T> = Box<dyn FnMut(Signal<T>) + Send>;

struct State<T> {
    buffer: VecDeque<Signal<T>>,
    /// Taken out of the state while it runs.
    operator: Option<Operator<T>>,
    attached: bool,
    flushing: bool,
}

impl<T> Drop for State<T> {
    fn drop(&mut self) {
        if self.attached {
            return;
        }
        for signal in &self.buffer {
            if let Signal::Reject(error) = signal {
                warn!(%error, "Pipe rejected without a consumer");
            }
        }
    }
}

struct Shared<T> {
    state: Mutex<State<T>>,
}

impl<T> Shared<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(State {
                buffer: VecDeque::new(),
                operator: None,
                attached: false,
                flushing: false,
            }),
        }
    }

    fn emit(&self, signal: Signal<T>) {
        if self.enqueue(signal) {
            self.flush();
        }
    }

    /// Buffers `signal`. Returns `true` if the caller now owns the flush.
    fn enqueue(&self, signal: Signal<T>) -> bool {
        let mut state = self.state.lock();
        state.buffer.push_back(signal);
        if !state.attached || state.flushing {
            return false;
        }
        state.flushing = true;
        true
    }

    fn attach(&self, operator: Operator<T>) {
        {
            let mut state = self.state.lock();
            state.operator = Some(operator);
            state.attached = true;
            if state.flushing || state.buffer.is_empty() {
                return;
            }
            state.flushing = true;
        }
        self.flush();
    }

    /// Delivers buffered signals until the buffer is empty.
    ///
    /// Must only be entered by the caller that set `flushing`.
    fn flush(&self) {
        loop {
            let (signal, mut operator) = {
                let mut state = self.state.lock();
                let Some(signal) = state.buffer.pop_front() else {
                    state.flushing = false;
                    return;
                };
                let Some(operator) = state.operator.take() else {
                    state.buffer.push_front(signal);
                    state.flushing = false;
                    return;
                };
                (signal, operator)
            };

            operator(signal);
            self.state.lock().operator = Some(operator);
        }
    }
}

// =============================================================================
// Emitter
// =============================================================================

/// The producer side of a [`Pipe`].
///
/// Emitters are cheap to clone and may be moved into timers, tasks or
/// callbacks. The PUSH* then RESOLVE|REJECT discipline is up to the producer;
/// signals emitted after a terminal one are still delivered.
pub struct Emitter<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Emitter<T> {
    /// Emits a PUSH signal.
    pub fn push(&self, value: T) {
        self.shared.emit(Signal::Push(value));
    }

    /// Emits a RESOLVE signal.
    pub fn resolve(&self, value: T) {
        self.shared.emit(Signal::Resolve(value));
    }

    /// Emits a REJECT signal.
    pub fn reject(&self, error: Error) {
        self.shared.emit(Signal::Reject(error));
    }

    /// Emits an arbitrary signal.
    pub fn emit(&self, signal: Signal<T>) {
        self.shared.emit(signal);
    }

    /// Buffers `signal` without delivering it.
    ///
    /// Returns `true` when the caller must call [`Emitter::flush`] once it
    /// has released its own locks. Lets an operator fix the order of several
    /// signals under one lock and deliver them outside of it.
    pub(crate) fn enqueue(&self, signal: Signal<T>) -> bool {
        self.shared.enqueue(signal)
    }

    pub(crate) fn flush(&self) {
        self.shared.flush();
    }
}

impl<T> fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter").finish_non_exhaustive()
    }
}

// =============================================================================
// Pipe
// =============================================================================

/// A one-shot or streaming asynchronous value.
///
/// Every operator consumes the pipe, so a pipe has at most one consumer.
#[must_use = "a pipe buffers its signals until an operator is attached"]
pub struct Pipe<T> {
    shared: Arc<Shared<T>>,
}

impl<T> fmt::Debug for Pipe<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Pipe")
            .field("buffered", &state.buffer.len())
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Pipe<T> {
    /// Creates a pipe and runs `generator` immediately, exactly once.
    pub fn new<G>(generator: G) -> Self
    where
        G: FnOnce(Emitter<T>),
    {
        let (pipe, emitter) = Self::channel();
        generator(emitter);
        pipe
    }

    /// Creates a pipe together with its emitter.
    pub fn channel() -> (Self, Emitter<T>) {
        let shared = Arc::new(Shared::new());
        let emitter = Emitter {
            shared: Arc::clone(&shared),
        };
        (Self { shared }, emitter)
    }

    /// A pipe that has already resolved with `value`.
    pub fn resolve(value: T) -> Self {
        Self::new(|emit| emit.resolve(value))
    }

    /// A pipe that has already rejected with `error`.
    pub fn reject(error: Error) -> Self {
        Self::new(|emit| emit.reject(error))
    }

    /// Number of signals waiting for an operator.
    pub fn buffered(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }

    /// Attaches `operator` and flushes the buffer through it.
    pub fn attach<F>(self, operator: F)
    where
        F: FnMut(Signal<T>) + Send + 'static,
    {
        self.shared.attach(Box::new(operator));
    }

    /// Terminal consumer for the first RESOLVE or REJECT. PUSH is ignored.
    pub fn on_settle<F>(self, f: F)
    where
        F: FnOnce(Result<T, Error>) + Send + 'static,
    {
        let mut f = Some(f);
        self.attach(move |signal| {
            let outcome = match signal {
                Signal::Push(_) => return,
                Signal::Resolve(value) => Ok(value),
                Signal::Reject(error) => Err(error),
            };
            if let Some(f) = f.take() {
                f(outcome);
            }
        });
    }

    /// Terminal consumer for REJECT signals.
    pub fn catch_error<F>(self, mut f: F)
    where
        F: FnMut(Error) + Send + 'static,
    {
        self.attach(move |signal| {
            if let Signal::Reject(error) = signal {
                f(error);
            }
        });
    }

    /// Observes every signal as a stream that ends after the first terminal one.
    pub fn into_stream(self) -> BoxStream<'static, Signal<T>> {
        let (tx, rx) = mpsc::unbounded();
        let mut tx = Some(tx);
        self.attach(move |signal| {
            let terminal = signal.is_terminal();
            if let Some(sender) = &tx {
                let _ = sender.unbounded_send(signal);
            }
            if terminal {
                tx = None;
            }
        });
        rx.boxed()
    }
}

impl<T: Send + 'static> IntoFuture for Pipe<T> {
    type Output = Result<T, Error>;
    type IntoFuture = BoxFuture<'static, Result<T, Error>>;

    fn into_future(self) -> Self::IntoFuture {
        let (tx, rx) = oneshot::channel();
        self.on_settle(move |outcome| {
            let _ = tx.send(outcome);
        });
        Box::pin(async move { rx.await.unwrap_or(Err(Error::Abandoned)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_resolve_and_reject() {
        assert_eq!(Pipe::resolve(7).await.unwrap(), 7);
        let err = Pipe::<i32>::reject(Error::custom("nope")).await.unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }

    #[tokio::test]
    async fn test_generator_runs_eagerly_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let pipe = Pipe::new(move |emit| {
            counter.fetch_add(1, Ordering::SeqCst);
            emit.push(1);
            emit.push(2);
            emit.resolve(3);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(pipe.buffered(), 3);
        assert_eq!(pipe.await.unwrap(), 3);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unconsumed_pipe_keeps_buffer() {
        let pipe = Pipe::new(|emit| {
            for n in 0..1000 {
                emit.push(n);
            }
        });
        assert_eq!(pipe.buffered(), 1000);
        drop(pipe);
    }

    #[tokio::test]
    async fn test_signals_after_attach_are_delivered_in_order() {
        let (pipe, emitter) = Pipe::channel();
        emitter.push(1);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        pipe.attach(move |signal| {
            if let Signal::Push(n) = signal {
                sink.lock().push(n);
            }
        });
        emitter.push(2);
        emitter.push(3);
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_abandoned_pipe() {
        let (pipe, emitter) = Pipe::<i32>::channel();
        emitter.push(1);
        drop(emitter);
        assert!(matches!(pipe.await, Err(Error::Abandoned)));
    }

    #[tokio::test]
    async fn test_settles_from_spawned_task() {
        let pipe = Pipe::new(|emit| {
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                emit.resolve("late");
            });
        });
        assert_eq!(pipe.await.unwrap(), "late");
    }

    #[tokio::test]
    async fn test_into_stream_stops_after_terminal() {
        let signals: Vec<_> = Pipe::new(|emit| {
            emit.push(1);
            emit.push(2);
            emit.resolve(3);
            emit.push(4);
        })
        .into_stream()
        .collect()
        .await;

        assert_eq!(signals.len(), 3);
        assert!(matches!(signals[0], Signal::Push(1)));
        assert!(matches!(signals[2], Signal::Resolve(3)));
    }

    #[tokio::test]
    async fn test_catch_error_sees_rejections_only() {
        let caught = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&caught);
        Pipe::new(|emit| {
            emit.push(1);
            emit.reject(Error::custom("first"));
        })
        .catch_error(move |error| sink.lock().push(error.to_string()));
        assert_eq!(*caught.lock(), vec!["first".to_string()]);
    }
}
