//! Single-assignment promise with callback registration and blocking wait

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Returned by [`Deferred::resolve`] and [`Deferred::reject`] when the
/// promise has already been settled. The stored settlement is not altered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("promise has already been settled")]
pub struct AlreadySettled;

/// Returned by [`Promise::wait_safely_for`] when the deadline elapses before
/// settlement. The promise itself is untouched; in-flight work keeps running
/// and may still settle it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("wait for promise settlement was interrupted")]
pub struct WaitInterrupted;

/// The outcome of a settled promise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement<T, E> {
    Resolved(T),
    Rejected(E),
}

impl<T, E> Settlement<T, E> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Settlement::Resolved(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Settlement::Rejected(_))
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            Settlement::Resolved(value) => Ok(value),
            Settlement::Rejected(error) => Err(error),
        }
    }
}

enum Callback<T, E> {
    Done(Box<dyn FnOnce(&T) + Send>),
    Fail(Box<dyn FnOnce(&E) + Send>),
    Always(Box<dyn FnOnce(&Settlement<T, E>) + Send>),
}

impl<T, E> Callback<T, E> {
    fn fire(self, outcome: &Settlement<T, E>) {
        match (self, outcome) {
            (Callback::Done(callback), Settlement::Resolved(value)) => callback(value),
            (Callback::Fail(callback), Settlement::Rejected(error)) => callback(error),
            (Callback::Always(callback), outcome) => callback(outcome),
            _ => {}
        }
    }
}

enum State<T, E> {
    Pending(Vec<Callback<T, E>>),
    Settled(Settlement<T, E>),
}

struct Inner<T, E> {
    state: Mutex<State<T, E>>,
    settled: Condvar,
}

/// Write side of a promise. Settles it exactly once via [`Deferred::resolve`]
/// or [`Deferred::reject`]; clones share the same underlying promise.
pub struct Deferred<T, E> {
    inner: Arc<Inner<T, E>>,
}

/// Read side of a promise: callback registration, chaining and waiting.
/// Cheap to clone.
pub struct Promise<T, E> {
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> Default for Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Creates an unsettled promise.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Pending(Vec::new())),
                settled: Condvar::new(),
            }),
        }
    }

    /// Returns the read side of this promise.
    pub fn promise(&self) -> Promise<T, E> {
        Promise {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn resolve(&self, value: T) -> Result<(), AlreadySettled> {
        self.complete(Settlement::Resolved(value))
    }

    pub fn reject(&self, error: E) -> Result<(), AlreadySettled> {
        self.complete(Settlement::Rejected(error))
    }

    /// Settles the promise with an already-built outcome. Queued callbacks
    /// fire on the calling thread, in registration order, after the lock is
    /// released so they may register further callbacks.
    pub(crate) fn complete(&self, outcome: Settlement<T, E>) -> Result<(), AlreadySettled> {
        let callbacks = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                State::Settled(_) => return Err(AlreadySettled),
                State::Pending(callbacks) => {
                    let callbacks = std::mem::take(callbacks);
                    *state = State::Settled(outcome.clone());
                    callbacks
                }
            }
        };

        self.inner.settled.notify_all();
        for callback in callbacks {
            callback.fire(&outcome);
        }

        Ok(())
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// A promise settled with `value` from the start.
    pub fn resolved(value: T) -> Self {
        let deferred = Deferred::new();
        let _ = deferred.resolve(value);
        deferred.promise()
    }

    /// A promise rejected with `error` from the start.
    pub fn rejected(error: E) -> Self {
        let deferred = Deferred::new();
        let _ = deferred.reject(error);
        deferred.promise()
    }

    fn register(&self, callback: Callback<T, E>) {
        let mut state = self.inner.state.lock();
        match &mut *state {
            State::Pending(callbacks) => callbacks.push(callback),
            State::Settled(outcome) => {
                // Already settled: fire immediately on the calling thread.
                let outcome = outcome.clone();
                drop(state);
                callback.fire(&outcome);
            }
        }
    }

    /// Registers a callback fired once if/when the promise resolves.
    pub fn on_done<F>(&self, callback: F) -> Promise<T, E>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.register(Callback::Done(Box::new(callback)));
        self.clone()
    }

    /// Registers a callback fired once if/when the promise rejects.
    pub fn on_fail<F>(&self, callback: F) -> Promise<T, E>
    where
        F: FnOnce(&E) + Send + 'static,
    {
        self.register(Callback::Fail(Box::new(callback)));
        self.clone()
    }

    /// Registers a callback fired once on settlement, whichever way it goes.
    pub fn on_always<F>(&self, callback: F) -> Promise<T, E>
    where
        F: FnOnce(&Settlement<T, E>) + Send + 'static,
    {
        self.register(Callback::Always(Box::new(callback)));
        self.clone()
    }

    /// Chains a dependent step: `next` runs with the resolved value and its
    /// promise becomes the result. A rejection skips `next` and flows
    /// through unchanged.
    pub fn pipe_done<U, F>(&self, next: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U, E> + Send + 'static,
    {
        let deferred: Deferred<U, E> = Deferred::new();
        let piped = deferred.promise();
        self.on_always(move |outcome| match outcome {
            Settlement::Resolved(value) => {
                next(value.clone()).on_always(move |outcome| {
                    let _ = deferred.complete(outcome.clone());
                });
            }
            Settlement::Rejected(error) => {
                let _ = deferred.reject(error.clone());
            }
        });
        piped
    }

    /// Gives a rejection a second chance: `handler` may substitute a value
    /// (late resolution) or a replacement error. Resolutions pass through.
    pub fn recover<F>(&self, handler: F) -> Promise<T, E>
    where
        F: FnOnce(E) -> Result<T, E> + Send + 'static,
    {
        let deferred: Deferred<T, E> = Deferred::new();
        let recovered = deferred.promise();
        self.on_always(move |outcome| {
            let outcome = match outcome {
                Settlement::Resolved(value) => Settlement::Resolved(value.clone()),
                Settlement::Rejected(error) => match handler(error.clone()) {
                    Ok(value) => Settlement::Resolved(value),
                    Err(error) => Settlement::Rejected(error),
                },
            };
            let _ = deferred.complete(outcome);
        });
        recovered
    }

    /// Blocks the calling thread until the promise settles.
    pub fn wait_safely(&self) -> Settlement<T, E> {
        let mut state = self.inner.state.lock();
        loop {
            if let State::Settled(outcome) = &*state {
                return outcome.clone();
            }
            self.inner.settled.wait(&mut state);
        }
    }

    /// Blocks until the promise settles or the timeout elapses. An elapsed
    /// timeout interrupts only the wait: the promise keeps its state and can
    /// still settle afterwards.
    pub fn wait_safely_for(&self, timeout: Duration) -> Result<Settlement<T, E>, WaitInterrupted> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            if let State::Settled(outcome) = &*state {
                return Ok(outcome.clone());
            }
            if self.inner.settled.wait_until(&mut state, deadline).timed_out() {
                if let State::Settled(outcome) = &*state {
                    return Ok(outcome.clone());
                }
                return Err(WaitInterrupted);
            }
        }
    }

    /// Snapshot of the current settlement, if any.
    pub fn settlement(&self) -> Option<Settlement<T, E>> {
        match &*self.inner.state.lock() {
            State::Pending(_) => None,
            State::Settled(outcome) => Some(outcome.clone()),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.settlement().is_some()
    }
}
