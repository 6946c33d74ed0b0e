//! Chainable pipe operators.
//!
//! Each operator consumes the upstream pipe, attaches to it (flushing its
//! buffer) and returns a new downstream pipe.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::trace;

use super::{Emitter, IntoReply, Pipe, Reply, Signal};
use crate::error::Error;

/// Forwards every signal of `pipe` to `emit`.
fn forward<T: Send + 'static>(pipe: Pipe<T>, emit: Emitter<T>) {
    pipe.attach(move |signal| emit.emit(signal));
}

impl<T: Send + 'static> Pipe<T> {
    /// Calls `f` for every PUSH and consumes it.
    ///
    /// Only terminal signals reach the downstream pipe; an `Err` from `f`
    /// becomes a REJECT there.
    pub fn for_each<F>(self, mut f: F) -> Pipe<T>
    where
        F: FnMut(&T) -> Result<(), Error> + Send + 'static,
    {
        let (downstream, emit) = Pipe::channel();
        self.attach(move |signal| match signal {
            Signal::Push(value) => {
                if let Err(error) = f(&value) {
                    emit.reject(error);
                }
            }
            other => emit.emit(other),
        });
        downstream
    }

    /// Replaces every carried value with the result of `f`.
    ///
    /// PUSH values and the RESOLVE value both go through `f` and keep their
    /// signal kind; REJECT passes through. A deferred result is emitted once
    /// its pipe settles, so mapped values may arrive out of order.
    pub fn map<U, F, R>(self, mut f: F) -> Pipe<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> R + Send + 'static,
        R: IntoReply<U>,
    {
        let (downstream, emit) = Pipe::channel();
        self.attach(move |signal| {
            let (value, kind): (T, fn(U) -> Signal<U>) = match signal {
                Signal::Push(value) => (value, Signal::Push),
                Signal::Resolve(value) => (value, Signal::Resolve),
                Signal::Reject(error) => return emit.reject(error),
            };
            match f(value).into_reply() {
                Ok(Reply::Value(mapped)) => emit.emit(kind(mapped)),
                Ok(Reply::Deferred(pipe)) => {
                    let emit = emit.clone();
                    pipe.on_settle(move |outcome| match outcome {
                        Ok(mapped) => emit.emit(kind(mapped)),
                        Err(error) => emit.reject(error),
                    });
                }
                Err(error) => emit.reject(error),
            }
        });
        downstream
    }

    /// Forwards a PUSH only when `f` returns `true` for it.
    pub fn filter<F, R>(self, mut f: F) -> Pipe<T>
    where
        F: FnMut(&T) -> R + Send + 'static,
        R: IntoReply<bool>,
    {
        let (downstream, emit) = Pipe::channel();
        self.attach(move |signal| match signal {
            Signal::Push(value) => match f(&value).into_reply() {
                Ok(Reply::Value(keep)) => {
                    if keep {
                        emit.push(value);
                    }
                }
                Ok(Reply::Deferred(pipe)) => {
                    let emit = emit.clone();
                    pipe.on_settle(move |outcome| match outcome {
                        Ok(true) => emit.push(value),
                        Ok(false) => {}
                        Err(error) => emit.reject(error),
                    });
                }
                Err(error) => emit.reject(error),
            },
            other => emit.emit(other),
        });
        downstream
    }

    /// Promise-style continuation on RESOLVE.
    ///
    /// The result of `f` becomes the new resolution. A deferred result is
    /// forwarded as a whole, including its pushes. REJECT passes through and
    /// PUSH values are converted with [`From`].
    pub fn then<U, F, R>(self, mut f: F) -> Pipe<U>
    where
        U: From<T> + Send + 'static,
        F: FnMut(T) -> R + Send + 'static,
        R: IntoReply<U>,
    {
        let (downstream, emit) = Pipe::channel();
        self.attach(move |signal| match signal {
            Signal::Push(value) => emit.push(U::from(value)),
            Signal::Resolve(value) => match f(value).into_reply() {
                Ok(Reply::Value(next)) => emit.resolve(next),
                Ok(Reply::Deferred(pipe)) => forward(pipe, emit.clone()),
                Err(error) => emit.reject(error),
            },
            Signal::Reject(error) => emit.reject(error),
        });
        downstream
    }

    /// Coalesces bursts of PUSH signals.
    ///
    /// Each PUSH restarts a `delay` timer and only the last one is forwarded
    /// when it fires. RESOLVE flushes a still pending PUSH first. Timers run
    /// on the current tokio runtime; without one the downstream rejects with
    /// [`Error::Runtime`].
    pub fn debounce(self, delay: Duration) -> Pipe<T> {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(err) => return Pipe::reject(Error::Runtime(err.to_string())),
        };

        let (downstream, emit) = Pipe::channel();
        let state = Arc::new(Mutex::new(Debounce {
            pending: None,
            generation: 0,
            timer: None,
        }));

        // Signals are queued under the state lock and delivered after it is
        // released. A timer PUSH always lands before a RESOLVE that cancels it.
        self.attach(move |signal| {
            let flush = match signal {
                Signal::Push(value) => {
                    let mut guard = state.lock();
                    guard.generation += 1;
                    guard.pending = Some(value);
                    if let Some(timer) = guard.timer.take() {
                        timer.abort();
                    }

                    let generation = guard.generation;
                    let state = Arc::clone(&state);
                    let emit = emit.clone();
                    guard.timer = Some(handle.spawn(async move {
                        tokio::time::sleep(delay).await;
                        let flush = {
                            let mut guard = state.lock();
                            if guard.generation != generation {
                                return;
                            }
                            guard.timer = None;
                            guard
                                .pending
                                .take()
                                .is_some_and(|value| emit.enqueue(Signal::Push(value)))
                        };
                        if flush {
                            emit.flush();
                        }
                    }));
                    false
                }
                terminal => {
                    let mut guard = state.lock();
                    let mut flush = false;
                    if let Some(last) = guard.cancel()
                        && matches!(terminal, Signal::Resolve(_))
                    {
                        flush |= emit.enqueue(Signal::Push(last));
                    }
                    flush |= emit.enqueue(terminal);
                    flush
                }
            };
            if flush {
                emit.flush();
            }
        });
        downstream
    }
}

struct Debounce<T> {
    pending: Option<T>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl<T> Debounce<T> {
    fn cancel(&mut self) -> Option<T> {
        self.generation += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.pending.take()
    }
}

// =============================================================================
// Reduce
// =============================================================================

impl<T: Clone + Send + 'static> Pipe<T> {
    /// Folds every PUSH into an accumulator.
    ///
    /// Steps run one at a time, so an asynchronous step finishes before the
    /// next PUSH is folded in. On RESOLVE the accumulator is resolved
    /// downstream and reset to `initial`.
    pub fn reduce<F, R>(self, step: F, initial: T) -> Pipe<T>
    where
        F: Fn(T, T) -> R + Send + Sync + 'static,
        R: IntoReply<T>,
    {
        let (downstream, emit) = Pipe::channel();
        let reducer = Arc::new(Reducer {
            step,
            state: Mutex::new(ReduceState {
                acc: initial.clone(),
                initial,
                busy: false,
                jobs: VecDeque::new(),
            }),
            emit,
        });
        self.attach(move |signal| reducer.enqueue(signal));
        downstream
    }
}

struct ReduceState<T> {
    acc: T,
    initial: T,
    busy: bool,
    jobs: VecDeque<Signal<T>>,
}

struct Reducer<T, F> {
    step: F,
    emit: Emitter<T>,
    state: Mutex<ReduceState<T>>,
}

impl<T, F, R> Reducer<T, F>
where
    T: Clone + Send + 'static,
    F: Fn(T, T) -> R + Send + Sync + 'static,
    R: IntoReply<T>,
{
    fn enqueue(self: &Arc<Self>, signal: Signal<T>) {
        {
            let mut state = self.state.lock();
            state.jobs.push_back(signal);
            if state.busy {
                return;
            }
            state.busy = true;
        }
        self.drain();
    }

    /// Runs queued jobs until the queue is empty or a step is deferred.
    fn drain(self: &Arc<Self>) {
        loop {
            let (job, acc) = {
                let mut state = self.state.lock();
                let Some(job) = state.jobs.pop_front() else {
                    state.busy = false;
                    return;
                };
                let acc = match job {
                    Signal::Resolve(_) => {
                        let initial = state.initial.clone();
                        std::mem::replace(&mut state.acc, initial)
                    }
                    _ => state.acc.clone(),
                };
                (job, acc)
            };

            match job {
                Signal::Push(value) => match (self.step)(acc, value).into_reply() {
                    Ok(Reply::Value(next)) => self.state.lock().acc = next,
                    Ok(Reply::Deferred(pipe)) => {
                        trace!("reduce step deferred");
                        let this = Arc::clone(self);
                        pipe.on_settle(move |outcome| {
                            match outcome {
                                Ok(next) => this.state.lock().acc = next,
                                Err(error) => this.emit.reject(error),
                            }
                            this.drain();
                        });
                        return;
                    }
                    Err(error) => self.emit.reject(error),
                },
                Signal::Resolve(_) => self.emit.resolve(acc),
                Signal::Reject(error) => self.emit.reject(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::{Value, json};
    use std::future::IntoFuture;
    use tokio::time::{Instant, sleep};

    fn numbers() -> Pipe<i64> {
        Pipe::new(|emit| {
            for n in 1..=9 {
                emit.push(n);
            }
            emit.resolve(0);
        })
    }

    fn delayed<T: Send + 'static>(value: T, ms: u64) -> Pipe<T> {
        Pipe::new(|emit| {
            tokio::spawn(async move {
                sleep(Duration::from_millis(ms)).await;
                emit.resolve(value);
            });
        })
    }

    fn pushed<T>(signals: Vec<Signal<T>>) -> Vec<T> {
        signals
            .into_iter()
            .filter_map(|signal| match signal {
                Signal::Push(value) => Some(value),
                _ => None,
            })
            .collect()
    }

    // =========================================================================
    // reduce
    // =========================================================================

    #[tokio::test]
    async fn test_reduce_sums() {
        let sum = numbers().reduce(|acc, n| acc + n, 0).await.unwrap();
        assert_eq!(sum, 45);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reduce_serializes_async_steps() {
        let sum = numbers()
            .reduce(|acc, n| delayed(acc + n, (10 - n) as u64), 0)
            .await
            .unwrap();
        assert_eq!(sum, 45);
    }

    #[tokio::test]
    async fn test_reduce_resets_after_resolve() {
        let (pipe, emit) = Pipe::channel();
        let mut results = pipe.reduce(|acc, n| acc + n, 100).into_stream();

        emit.push(1);
        emit.push(2);
        emit.resolve(0);

        let first = results.next().await;
        assert!(matches!(first, Some(Signal::Resolve(103))));
    }

    #[tokio::test]
    async fn test_reduce_forwards_upstream_rejection() {
        let err = Pipe::new(|emit| {
            emit.push(1);
            emit.push(2);
            emit.reject(Error::custom("upstream"));
            emit.resolve(0);
        })
        .reduce(|acc: i64, n| acc + n, 0)
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "upstream");
    }

    // =========================================================================
    // for_each, map, filter, then
    // =========================================================================

    #[tokio::test]
    async fn test_for_each_consumes_pushes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sum = Pipe::from_sequence(vec![1, 2, 3])
            .for_each(move |n| {
                sink.lock().push(*n);
                Ok(())
            })
            .reduce(|acc, n| acc + n, 0)
            .await
            .unwrap();

        assert_eq!(sum, 0);
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_for_each_error_rejects() {
        let err = numbers()
            .for_each(|n| {
                if *n == 3 {
                    Err(Error::custom("three"))
                } else {
                    Ok(())
                }
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "three");
    }

    #[tokio::test]
    async fn test_map_and_filter() {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&collected);
        numbers()
            .filter(|n| n % 2 == 1)
            .map(|n| n * 10)
            .for_each(move |n| {
                sink.lock().push(*n);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(*collected.lock(), vec![10, 30, 50, 70, 90]);
    }

    #[tokio::test]
    async fn test_map_changes_value_type() {
        let signals: Vec<_> = Pipe::from_sequence(vec![1, 2, 3])
            .map(|n: i64| n.to_string())
            .into_stream()
            .collect()
            .await;

        assert_eq!(signals.len(), 4);
        assert!(matches!(&signals[3], Signal::Resolve(zero) if zero == "0"));
        assert_eq!(pushed(signals), vec!["1", "2", "3"]);

        let resolved = Pipe::resolve(21).map(|n: i64| json!(n * 2)).await.unwrap();
        assert_eq!(resolved, json!(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_map() {
        let values: Vec<_> = Pipe::new(|emit| {
            emit.push(json!(1));
            emit.push(json!(2));
        })
        .map(|v: Value| {
            let n = v.as_i64().unwrap_or(0);
            delayed(json!(n * 2), n as u64 * 5)
        })
        .into_stream()
        .take(2)
        .collect()
        .await;

        assert_eq!(pushed(values), vec![json!(2), json!(4)]);
    }

    #[tokio::test]
    async fn test_map_propagates_rejected_pipe() {
        let signals: Vec<_> = Pipe::new(|emit| {
            emit.push(1);
            emit.push(2);
            emit.push(3);
        })
        .map(|n: i64| {
            if n == 2 {
                Pipe::reject(Error::custom("two"))
            } else {
                Pipe::resolve(n)
            }
        })
        .into_stream()
        .collect()
        .await;

        assert_eq!(signals.len(), 2);
        assert!(matches!(signals[0], Signal::Push(1)));
        assert!(matches!(&signals[1], Signal::Reject(error) if error.to_string() == "two"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_with_deferred_predicate() {
        let signals: Vec<_> = Pipe::new(|emit| {
            for n in 1..=6_i64 {
                emit.push(n);
            }
        })
        .filter(|n| delayed(n % 2 == 0, *n as u64))
        .into_stream()
        .take(3)
        .collect()
        .await;

        assert_eq!(pushed(signals), vec![2, 4, 6]);
    }

    #[tokio::test]
    async fn test_filter_error_rejects() {
        let err = numbers()
            .filter(|n| {
                if *n == 4 {
                    Err(Error::custom("four"))
                } else {
                    Ok(true)
                }
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "four");
    }

    #[tokio::test]
    async fn test_then_chains_plain_and_deferred() {
        let value = Pipe::resolve(json!(1))
            .then(|v| json!(v.as_i64().unwrap_or(0) + 1))
            .then(|v| Pipe::resolve(json!([v])))
            .await
            .unwrap();
        assert_eq!(value, json!([2]));

        let number = Pipe::resolve(1_i64).then(|n| n + 1).await.unwrap();
        assert_eq!(number, 2);
    }

    #[tokio::test]
    async fn test_then_converts_pushes() {
        let signals: Vec<_> = Pipe::new(|emit| {
            emit.push(7_i64);
            emit.resolve(8);
        })
        .then(|n| json!({ "last": n }))
        .into_stream()
        .collect()
        .await;

        assert_eq!(signals.len(), 2);
        assert!(matches!(&signals[0], Signal::Push(v) if *v == json!(7)));
        assert!(matches!(&signals[1], Signal::Resolve(v) if *v == json!({ "last": 8 })));
    }

    #[tokio::test]
    async fn test_then_skips_rejection() {
        let err = Pipe::<Value>::reject(Error::custom("early"))
            .then(|_| Err::<Value, _>(Error::custom("unreachable")))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "early");
    }

    // =========================================================================
    // debounce
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_bursts() {
        const INTERVALS: [u64; 13] = [1, 1, 2, 3, 5, 8, 13, 21, 34, 55, 89, 144, 233];
        let window = Duration::from_millis(15);

        let (pipe, emit) = Pipe::channel();
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&stamps);
        let done = pipe.debounce(window).for_each(move |_| {
            sink.lock().push(Instant::now());
            Ok(())
        });

        for ms in INTERVALS {
            emit.push(ms);
            sleep(Duration::from_millis(ms)).await;
        }
        emit.resolve(0);
        done.await.unwrap();

        let stamps = stamps.lock();
        assert!(!stamps.is_empty());
        assert!(stamps.len() < INTERVALS.len());
        assert!(stamps.windows(2).all(|pair| pair[1] - pair[0] >= window));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_flushes_on_resolve() {
        let signals: Vec<_> = Pipe::new(|emit| {
            emit.push(1);
            emit.push(2);
            emit.resolve(3);
        })
        .debounce(Duration::from_millis(50))
        .into_stream()
        .collect()
        .await;

        assert_eq!(signals.len(), 2);
        assert!(matches!(signals[0], Signal::Push(2)));
        assert!(matches!(signals[1], Signal::Resolve(3)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_debounce_push_precedes_racing_resolve() {
        for round in 0..200_u64 {
            let (pipe, emit) = Pipe::channel();
            let stream = pipe.debounce(Duration::from_millis(1)).into_stream();

            emit.push(round);
            std::thread::sleep(Duration::from_millis(1));
            emit.resolve(0);

            let signals: Vec<_> = stream.collect().await;
            assert_eq!(signals.len(), 2, "round {round}");
            assert!(matches!(signals[0], Signal::Push(n) if n == round));
            assert!(matches!(signals[1], Signal::Resolve(0)));
        }
    }

    #[test]
    fn test_debounce_without_runtime() {
        let pipe = Pipe::resolve(1).debounce(Duration::from_millis(5));
        let err = futures::executor::block_on(pipe.into_future()).unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
    }
}
