//! Combinators joining many promises into one settlement event

use crate::deferred::{Deferred, Promise, Settlement};
use parking_lot::Mutex;
use std::sync::Arc;

/// Aggregate of N input settlements, in settlement order. Each entry carries
/// the index the promise had in the input vector.
#[derive(Debug, PartialEq, Eq)]
pub struct Joined<T, E> {
    pub resolved: Vec<(usize, T)>,
    pub rejected: Vec<(usize, E)>,
}

impl<T, E> Joined<T, E> {
    pub fn is_success(&self) -> bool {
        self.rejected.is_empty()
    }

    pub fn len(&self) -> usize {
        self.resolved.len() + self.rejected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty() && self.rejected.is_empty()
    }
}

impl<T: Clone, E: Clone> Clone for Joined<T, E> {
    fn clone(&self) -> Self {
        Self {
            resolved: self.resolved.clone(),
            rejected: self.rejected.clone(),
        }
    }
}

impl<T, E> Default for Joined<T, E> {
    fn default() -> Self {
        Self {
            resolved: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

struct Gather<T, E> {
    joined: Joined<T, E>,
    remaining: usize,
}

/// Joins `promises` into a promise that resolves with the full [`Joined`]
/// aggregate once all inputs resolve. If any input rejects, the joined
/// promise rejects with the first rejection in settlement order, but only
/// after every input has settled, so no sibling is cancelled or skipped.
/// An empty input resolves immediately.
pub fn when<T, E>(promises: Vec<Promise<T, E>>) -> Promise<Joined<T, E>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    join(promises, false)
}

/// The result-collecting form of [`when`]: always resolves with the full
/// [`Joined`] aggregate, rejections included. Use it wherever partial
/// failure must not hide the data of siblings that succeeded.
pub fn when_settled<T, E>(promises: Vec<Promise<T, E>>) -> Promise<Joined<T, E>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    join(promises, true)
}

fn join<T, E>(promises: Vec<Promise<T, E>>, collect_only: bool) -> Promise<Joined<T, E>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let deferred: Deferred<Joined<T, E>, E> = Deferred::new();
    let joined = deferred.promise();

    if promises.is_empty() {
        let _ = deferred.resolve(Joined::default());
        return joined;
    }

    let gather = Arc::new(Mutex::new(Gather {
        joined: Joined::default(),
        remaining: promises.len(),
    }));

    for (index, promise) in promises.into_iter().enumerate() {
        let gather = Arc::clone(&gather);
        let deferred = deferred.clone();
        promise.on_always(move |outcome| {
            let mut gather = gather.lock();
            match outcome {
                Settlement::Resolved(value) => gather.joined.resolved.push((index, value.clone())),
                Settlement::Rejected(error) => gather.joined.rejected.push((index, error.clone())),
            }
            gather.remaining -= 1;
            if gather.remaining > 0 {
                return;
            }

            let joined = std::mem::take(&mut gather.joined);
            drop(gather);
            let outcome = if collect_only || joined.rejected.is_empty() {
                Settlement::Resolved(joined)
            } else {
                Settlement::Rejected(joined.rejected[0].1.clone())
            };
            let _ = deferred.complete(outcome);
        });
    }

    joined
}
