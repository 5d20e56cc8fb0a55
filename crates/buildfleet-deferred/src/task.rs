//! Bridges provider futures to promise settlement

use crate::deferred::{Deferred, Promise};
use std::future::Future;
use tokio::runtime::Handle;

/// Spawns `future` on the runtime behind `handle` and returns a promise
/// settled from its output. One future, one settlement attempt: an `Ok`
/// resolves, an `Err` rejects, and the task never retries.
pub fn spawn_deferred<T, E, F>(handle: &Handle, future: F) -> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    F: Future<Output = Result<T, E>> + Send + 'static,
{
    let deferred: Deferred<T, E> = Deferred::new();
    let promise = deferred.promise();
    handle.spawn(async move {
        match future.await {
            Ok(value) => {
                let _ = deferred.resolve(value);
            }
            Err(error) => {
                let _ = deferred.reject(error);
            }
        }
    });
    promise
}
