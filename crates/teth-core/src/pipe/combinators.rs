//! Static pipe constructors and combinators.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use super::{Emitter, Pipe, Reply};
use crate::error::Error;

struct All<T> {
    state: Mutex<AllState<T>>,
    emit: Emitter<Vec<T>>,
}

struct AllState<T> {
    slots: Vec<Option<T>>,
    remaining: usize,
    done: bool,
}

impl<T: Send + 'static> All<T> {
    fn settle(&self, index: usize, outcome: Result<T, Error>) {
        let mut state = self.state.lock();
        if state.done {
            return;
        }
        match outcome {
            Ok(value) => {
                state.slots[index] = Some(value);
                state.remaining -= 1;
                if state.remaining > 0 {
                    return;
                }
                state.done = true;
                let values = state.slots.drain(..).flatten().collect();
                drop(state);
                self.emit.resolve(values);
            }
            Err(error) => {
                state.done = true;
                drop(state);
                self.emit.reject(error);
            }
        }
    }
}

impl<T: Send + 'static> Pipe<T> {
    /// Resolves with every item's value, in input order, once all of them
    /// resolve. The first rejection wins and later settlements are ignored.
    ///
    /// An empty input resolves with an empty vector.
    pub fn all<I>(items: I) -> Pipe<Vec<T>>
    where
        I: IntoIterator<Item = Reply<T>>,
    {
        let items: Vec<Reply<T>> = items.into_iter().collect();
        let (pipe, emit) = Pipe::channel();
        if items.is_empty() {
            emit.resolve(Vec::new());
            return pipe;
        }

        let all = Arc::new(All {
            state: Mutex::new(AllState {
                slots: items.iter().map(|_| None).collect(),
                remaining: items.len(),
                done: false,
            }),
            emit,
        });

        for (index, item) in items.into_iter().enumerate() {
            match item {
                Reply::Value(value) => all.settle(index, Ok(value)),
                Reply::Deferred(pending) => {
                    let all = Arc::clone(&all);
                    pending.on_settle(move |outcome| all.settle(index, outcome));
                }
            }
        }
        pipe
    }

    /// Settles like whichever item settles first.
    ///
    /// Immediate values settle in input order before any deferred item. An
    /// empty input has no producer, so awaiting it yields
    /// [`Error::Abandoned`].
    pub fn race<I>(items: I) -> Pipe<T>
    where
        I: IntoIterator<Item = Reply<T>>,
    {
        let (pipe, emit) = Pipe::channel();
        let winner = Arc::new(Mutex::new(Some(emit)));

        for item in items {
            match item {
                Reply::Value(value) => {
                    if let Some(emit) = winner.lock().take() {
                        emit.resolve(value);
                    }
                }
                Reply::Deferred(pending) => {
                    let winner = Arc::clone(&winner);
                    pending.on_settle(move |outcome| {
                        let Some(emit) = winner.lock().take() else {
                            return;
                        };
                        match outcome {
                            Ok(value) => emit.resolve(value),
                            Err(error) => emit.reject(error),
                        }
                    });
                }
            }
        }
        pipe
    }
}

impl<T: Default + Send + 'static> Pipe<T> {
    /// Pushes every element of `sequence`, then resolves with `T::default()`.
    pub fn from_sequence<I>(sequence: I) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        Self::new(|emit| {
            for item in sequence {
                emit.push(item);
            }
            emit.resolve(T::default());
        })
    }
}

impl<T: Default + Send + 'static> FromIterator<T> for Pipe<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_sequence(iter)
    }
}

// =============================================================================
// Callback adaptation
// =============================================================================

/// Completion callback handed to a worker adapted by [`Pipe::wrap`].
pub struct Completion {
    emit: Emitter<Value>,
}

impl Completion {
    /// Settles the pipe: rejects with `error` if present, otherwise resolves
    /// with the single result, or with all results as an array.
    pub fn complete(self, error: Option<Error>, mut results: Vec<Value>) {
        if let Some(error) = error {
            self.emit.reject(error);
        } else if results.len() == 1 {
            self.emit.resolve(results.remove(0));
        } else {
            self.emit.resolve(Value::Array(results));
        }
    }

    /// Resolves with a single result.
    pub fn ok(self, value: impl Into<Value>) {
        self.complete(None, vec![value.into()]);
    }

    /// Rejects with `error`.
    pub fn fail(self, error: Error) {
        self.complete(Some(error), Vec::new());
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}

impl Pipe<Value> {
    /// Adapts a callback-style worker into a function returning a pipe.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let read = Pipe::wrap(|path: String, done: Completion| {
    ///     std::thread::spawn(move || match std::fs::read_to_string(&path) {
    ///         Ok(text) => done.ok(text),
    ///         Err(err) => done.fail(Error::custom(err.to_string())),
    ///     });
    /// });
    /// let text = read("Cargo.toml".into()).await?;
    /// ```
    pub fn wrap<A, W>(worker: W) -> impl Fn(A) -> Pipe<Value> + Send + Sync + 'static
    where
        A: 'static,
        W: Fn(A, Completion) + Send + Sync + 'static,
    {
        move |args| Pipe::new(|emit| worker(args, Completion { emit }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::Signal;
    use futures::StreamExt;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::sleep;

    fn delayed<T: Send + 'static>(value: T, ms: u64) -> Reply<T> {
        Reply::Deferred(Pipe::new(|emit| {
            tokio::spawn(async move {
                sleep(Duration::from_millis(ms)).await;
                emit.resolve(value);
            });
        }))
    }

    fn rejected_after<T: Send + 'static>(reason: &'static str, ms: u64) -> Reply<T> {
        Reply::Deferred(Pipe::new(|emit| {
            tokio::spawn(async move {
                sleep(Duration::from_millis(ms)).await;
                emit.reject(Error::custom(reason));
            });
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_preserves_input_order() {
        let values = Pipe::all([
            Reply::Value(json!(111)),
            delayed(json!(222), 20),
            Reply::Value(json!(333)),
        ])
        .await
        .unwrap();
        assert_eq!(values, vec![json!(111), json!(222), json!(333)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_first_rejection_wins() {
        let err = Pipe::all([
            delayed(1, 5),
            rejected_after("second", 20),
            rejected_after("first", 10),
        ])
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "first");
    }

    #[tokio::test]
    async fn test_all_empty() {
        let values = Pipe::<i32>::all(Vec::new()).await.unwrap();
        assert!(values.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_picks_fastest() {
        let value = Pipe::race([
            delayed("slow", 33),
            delayed("medium", 22),
            delayed("fast", 11),
        ])
        .await
        .unwrap();
        assert_eq!(value, "fast");
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_as_timeout() {
        let err = Pipe::race([delayed(json!("reply"), 100), rejected_after("timeout", 30)])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "timeout");
    }

    #[tokio::test]
    async fn test_from_sequence() {
        let signals: Vec<_> = Pipe::from_sequence(vec![1, 2, 3]).into_stream().collect().await;
        assert_eq!(signals.len(), 4);
        assert!(matches!(signals[3], Signal::Resolve(0)));

        let total = [4, 5, 6]
            .into_iter()
            .collect::<Pipe<i32>>()
            .reduce(|acc, n| acc + n, 0)
            .await
            .unwrap();
        assert_eq!(total, 15);
    }

    #[tokio::test]
    async fn test_wrap() {
        let divide = Pipe::wrap(|(a, b): (i64, i64), done: Completion| {
            if b == 0 {
                done.fail(Error::custom("division by zero"));
            } else {
                done.complete(None, vec![json!(a / b), json!(a % b)]);
            }
        });

        assert_eq!(divide((7, 2)).await.unwrap(), json!([3, 1]));
        assert_eq!(
            divide((1, 0)).await.unwrap_err().to_string(),
            "division by zero"
        );

        let single = Pipe::wrap(|n: i64, done: Completion| done.ok(n * 2));
        assert_eq!(single(21).await.unwrap(), json!(42));
    }
}
