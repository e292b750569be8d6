//! Combinators over sets of promises.

use std::sync::Arc;

use crate::{sync::Mutex, Error, Promise};

/// Bookkeeping of [`Promise::all`]: one result slot per input, and how many are filled.
struct Join<T> {
    results: Vec<Option<T>>,
    completed: usize,
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Waits for every promise in `promises` to be fulfilled.
    ///
    /// The returned promise is fulfilled with all values, in the order of the input (not in the
    /// order the inputs were fulfilled in). As soon as any input is rejected, it is rejected with
    /// that error, and values of inputs fulfilled after that are ignored.
    ///
    /// An empty input is fulfilled immediately with an empty [`Vec`].
    ///
    /// ```
    /// use pledge::{promise, Promise};
    ///
    /// let (first, a) = promise();
    /// let (second, b) = promise();
    /// let both = Promise::all([a, b]);
    ///
    /// second.resolve("b");
    /// first.resolve("a");
    /// assert_eq!(both.block().unwrap(), ["a", "b"]);
    /// ```
    pub fn all<I>(promises: I) -> Promise<Vec<T>>
    where
        I: IntoIterator<Item = Promise<T>>,
    {
        let promises: Vec<_> = promises.into_iter().collect();
        Promise::new(move |resolver| {
            let count = promises.len();
            if count == 0 {
                resolver.resolve(Vec::new());
                return Ok(());
            }

            let join = Arc::new(Mutex::new(Join {
                results: (0..count).map(|_| None).collect(),
                completed: 0,
            }));
            for (index, promise) in promises.into_iter().enumerate() {
                let join = join.clone();
                let on_value = resolver.clone();
                promise.then(move |value| {
                    let mut join = join.lock();
                    join.results[index] = Some(value);
                    join.completed += 1;
                    if join.completed == count {
                        let results = join.results.drain(..).flatten().collect();
                        drop(join);
                        on_value.resolve(results);
                    }
                });
                let on_error = resolver.clone();
                promise.catch(move |error: Error| on_error.reject(error));
            }
            Ok(())
        })
    }

    /// Settles like whichever promise in `promises` settles first.
    ///
    /// Later settlements of the other inputs are ignored.
    ///
    /// If `promises` is empty, nothing can ever settle the returned promise, so it is rejected
    /// right away with an [`ErrorKind::Abandoned`] error.
    ///
    /// [`ErrorKind::Abandoned`]: crate::ErrorKind::Abandoned
    pub fn race<I>(promises: I) -> Promise<T>
    where
        I: IntoIterator<Item = Promise<T>>,
    {
        let promises: Vec<_> = promises.into_iter().collect();
        Promise::new(move |resolver| {
            for promise in promises {
                promise.forward(resolver.clone());
            }
            Ok(())
        })
    }
}
