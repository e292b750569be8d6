//! Listener registration and chaining.

use std::panic::{self, AssertUnwindSafe};

use crate::{promise::Listener, Error, Promise};

impl<T: Clone + Send + 'static> Promise<T> {
    /// Calls `f` with the value once the promise is fulfilled.
    ///
    /// `f` runs at most once, and never if the promise is rejected. If the promise is already
    /// fulfilled, `f` runs immediately.
    ///
    /// Returns the same promise, so that more listeners can be attached to it. To run a step that
    /// depends on the value and produces a new promise, use [`Promise::and_then`] instead.
    pub fn then<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.register(Listener::Fulfilled(Box::new(f)));
        self.clone()
    }

    /// Chains an asynchronous step onto this promise.
    ///
    /// Once this promise is fulfilled, `f` is called with the value and the returned promise is
    /// settled like the promise returned by `f`. If this promise is rejected, `f` is never called
    /// and the error is passed through unchanged. If `f` panics, the returned promise is rejected
    /// with the panic.
    ///
    /// ```
    /// use pledge::Promise;
    ///
    /// let total = Promise::resolved(2)
    ///     .and_then(|n| Promise::resolved(n * 10))
    ///     .and_then(|n| Promise::resolved(n + 1));
    /// assert_eq!(total.block().unwrap(), 21);
    /// ```
    pub fn and_then<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        let source = self.clone();
        Promise::new(move |resolver| {
            let on_error = resolver.clone();
            source.register(Listener::Fulfilled(Box::new(move |value: T| {
                match panic::catch_unwind(AssertUnwindSafe(move || f(value))) {
                    Ok(next) => next.forward(resolver),
                    Err(payload) => resolver.reject(Error::from_panic(payload)),
                }
            })));
            source.register(Listener::Rejected(Box::new(move |error: Error| {
                on_error.reject(error)
            })));
            Ok(())
        })
    }

    /// Transforms the value of this promise with `f`.
    ///
    /// Rejections pass through unchanged; a panic in `f` rejects the returned promise.
    pub fn map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.and_then(move |value| Promise::resolved(f(value)))
    }

    /// Calls `handler` with the error once the promise is rejected.
    ///
    /// If the promise is already rejected, `handler` runs immediately. It never runs if the
    /// promise is fulfilled.
    ///
    /// Attaching a handler does not consume the error: every handler attached to the same promise
    /// sees it. Returns the same promise.
    pub fn catch<F>(&self, handler: F) -> Promise<T>
    where
        F: FnOnce(Error) + Send + 'static,
    {
        self.register(Listener::Rejected(Box::new(handler)));
        self.clone()
    }

    /// Calls `f` once the promise is settled, whatever the outcome.
    ///
    /// `f` runs after the [`then`] or [`catch`] listeners registered for the same settlement.
    /// Returns the same promise.
    ///
    /// [`then`]: Promise::then
    /// [`catch`]: Promise::catch
    pub fn finally<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce() + Send + 'static,
    {
        self.register(Listener::Settled {
            callback: Box::new(move |_: &Result<T, Error>| f()),
            observes: false,
        });
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use crate::{promise, test::Journal, ErrorKind, State};

    use super::*;

    #[test]
    fn then_returns_the_same_promise() {
        let journal = Journal::new();
        let (resolver, p) = promise::<i32>();
        let j1 = journal.clone();
        let j2 = journal.clone();
        let same = p
            .then(move |v| j1.push(format!("a {v}")))
            .then(move |v| j2.push(format!("b {v}")));
        resolver.resolve(9);
        assert_eq!(journal.entries(), ["a 9", "b 9"]);
        assert_eq!(same.block().unwrap(), 9);
    }

    #[test]
    fn then_skips_rejection() {
        let journal = Journal::new();
        let j = journal.clone();
        Promise::<i32>::rejected("bad")
            .then(move |v| j.push(format!("then {v}")))
            .catch(|_| {});
        assert!(journal.entries().is_empty());
    }

    #[test]
    fn and_then_sequences_steps() {
        let journal = Journal::new();
        let (first, p) = promise::<i32>();
        let (second, step2) = promise::<String>();
        let j = journal.clone();
        let chained = p.and_then(move |v| {
            j.push(format!("step 2 got {v}"));
            step2
        });
        assert_eq!(chained.state(), State::Pending);
        assert!(journal.entries().is_empty());

        first.resolve(1);
        assert_eq!(journal.entries(), ["step 2 got 1"]);
        assert_eq!(chained.state(), State::Pending);

        second.resolve("two".into());
        assert_eq!(chained.block().unwrap(), "two");
    }

    #[test]
    fn flattened_chain_short_circuits() {
        let journal = Journal::new();
        let j2 = journal.clone();
        let j3 = journal.clone();
        let jh = journal.clone();
        let (resolver, source) = promise::<i32>();

        source
            .and_then(move |v| {
                j2.push(format!("step2 {v}"));
                Promise::<i32>::rejected("step2 failed")
            })
            .and_then(move |v| {
                j3.push(format!("step3 {v}"));
                Promise::resolved(v)
            })
            .catch(move |e| jh.push(format!("handler {e}")));

        resolver.resolve(1);
        assert_eq!(journal.entries(), ["step2 1", "handler step2 failed"]);
    }

    #[test]
    fn and_then_forwards_the_original_error() {
        let source = Promise::<i32>::rejected("root cause");
        let root = source.block().unwrap_err();
        let chained = source.and_then(|v| Promise::resolved(v + 1)).map(|v| v * 2);
        let err = chained.block().unwrap_err();
        assert!(err.same_as(&root));
    }

    #[test]
    fn and_then_continuation_panic_rejects() {
        let chained =
            Promise::resolved(1).and_then(|_| -> Promise<i32> { panic!("step blew up") });
        let err = chained.block().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Panicked);
        assert_eq!(err.to_string(), "panicked: step blew up");
    }

    #[test]
    fn map_transforms_values() {
        let p = Promise::resolved("21").map(|s| s.parse::<i32>().unwrap() * 2);
        assert_eq!(p.block().unwrap(), 42);
    }

    #[test]
    fn catch_fans_out() {
        let journal = Journal::new();
        let (resolver, p) = promise::<()>();
        for i in 0..3 {
            let j = journal.clone();
            p.catch(move |e| j.push(format!("catch {i}: {e}")));
        }
        resolver.reject("shared");
        assert_eq!(
            journal.entries(),
            ["catch 0: shared", "catch 1: shared", "catch 2: shared"]
        );
    }

    #[test]
    fn finally_runs_after_outcome_listeners() {
        for fulfill in [true, false] {
            let journal = Journal::new();
            let (resolver, p) = promise::<i32>();
            let j = journal.clone();
            p.finally(move || j.push("finally"));
            let j = journal.clone();
            p.then(move |_| j.push("then"));
            let j = journal.clone();
            p.catch(move |_| j.push("catch"));

            if fulfill {
                resolver.resolve(0);
                assert_eq!(journal.entries(), ["then", "finally"]);
            } else {
                resolver.reject("x");
                assert_eq!(journal.entries(), ["catch", "finally"]);
            }
        }
    }

    #[test]
    fn chain_across_threads() {
        let (resolver, p) = promise::<u32>();
        let chained = p
            .and_then(|v| {
                let (next, p) = promise();
                std::thread::spawn(move || next.resolve(v + 1));
                p
            })
            .map(|v| v * 100);
        std::thread::spawn(move || resolver.resolve(1));
        assert_eq!(chained.block().unwrap(), 200);
    }
}
