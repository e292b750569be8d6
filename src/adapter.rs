//! `async` interop.
//!
//! A [`Promise`] can be `.await`ed directly (via [`IntoFuture`]), or through
//! [`Promise::wait`] when the caller wants to keep its handle. Either way the promise is driven by
//! a [`PromiseFuture`], which resolves to `Ok(value)` or `Err(error)` and therefore composes with
//! `?`.
//!
//! ```
//! use pledge::{Error, Promise};
//!
//! async fn fetch_all() -> Result<String, Error> {
//!     let first = Promise::resolved("example.com").await?;
//!     let second = Promise::resolved(format!("{first}/about")).await?;
//!     Promise::<String>::rejected(format!("{second}: connection refused")).await
//! }
//! # let _fut = fetch_all();
//! ```
//!
//! [`PromiseFuture`] does not depend on any particular executor: it stores the [`Waker`] of the
//! task polling it, and wakes it from whichever thread settles the promise.

use std::{
    fmt,
    future::{Future, IntoFuture},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
};

use crate::{sync::Mutex, Error, Promise};

/// A [`Future`] that completes when a [`Promise`] is settled.
///
/// Besides being pollable, it exposes the three operations an awaiter needs directly:
/// [`PromiseFuture::is_complete`], [`PromiseFuture::on_complete`] and [`PromiseFuture::result`].
pub struct PromiseFuture<T> {
    promise: Promise<T>,
    slot: Arc<Mutex<Slot<T>>>,
}

/// The adapter's own copy of the outcome, filled in by its subscription to the promise.
struct Slot<T> {
    outcome: Option<Result<T, Error>>,
    waker: Option<Waker>,
    subscribed: bool,
}

impl<T: Clone + Send + 'static> PromiseFuture<T> {
    fn new(promise: Promise<T>) -> Self {
        Self {
            promise,
            slot: Arc::new(Mutex::new(Slot {
                outcome: None,
                waker: None,
                subscribed: false,
            })),
        }
    }

    /// Returns `true` if the promise has been settled.
    ///
    /// This never blocks.
    pub fn is_complete(&self) -> bool {
        self.slot.lock().outcome.is_some() || !self.promise.is_pending()
    }

    /// Registers `continuation` to run once the promise is settled.
    ///
    /// The outcome is stored before `continuation` runs, so [`PromiseFuture::result`] called from
    /// within it returns [`Some`]. If the promise is already settled, `continuation` runs
    /// immediately.
    pub fn on_complete<F>(&self, continuation: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let slot = self.slot.clone();
        self.promise.subscribe(move |outcome| {
            slot.lock().outcome = Some(outcome);
            continuation();
        });
    }

    /// Returns the outcome of the promise, or [`None`] if it is still pending.
    ///
    /// A rejected promise always yields `Some(Err(..))`.
    pub fn result(&self) -> Option<Result<T, Error>> {
        if let Some(outcome) = &self.slot.lock().outcome {
            return Some(outcome.clone());
        }
        self.promise.outcome()
    }
}

impl<T: Clone + Send + 'static> Future for PromiseFuture<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        {
            let mut slot = this.slot.lock();
            if let Some(outcome) = &slot.outcome {
                return Poll::Ready(outcome.clone());
            }
            let stale = !matches!(&slot.waker, Some(waker) if waker.will_wake(cx.waker()));
            if stale {
                slot.waker = Some(cx.waker().clone());
            }
            if slot.subscribed {
                return Poll::Pending;
            }
            slot.subscribed = true;
        }

        let slot = this.slot.clone();
        this.promise.subscribe(move |outcome| {
            let waker = {
                let mut slot = slot.lock();
                slot.outcome = Some(outcome);
                slot.waker.take()
            };
            if let Some(waker) = waker {
                waker.wake();
            }
        });

        // The subscription has already run if the promise was settled.
        match &this.slot.lock().outcome {
            Some(outcome) => Poll::Ready(outcome.clone()),
            None => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for PromiseFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseFuture")
            .field("promise", &self.promise)
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + 'static> IntoFuture for Promise<T> {
    type Output = Result<T, Error>;
    type IntoFuture = PromiseFuture<T>;

    fn into_future(self) -> PromiseFuture<T> {
        PromiseFuture::new(self)
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Returns a [`Future`] that completes with the outcome of this promise.
    ///
    /// Unlike `.await`ing the promise itself, this keeps `self` usable afterwards.
    pub fn wait(&self) -> PromiseFuture<T> {
        PromiseFuture::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::{pin::pin, thread};

    use crate::{
        promise,
        test::{block_on, poll_once, Journal},
        ErrorKind,
    };

    use super::*;

    #[test]
    fn await_settled_promise() {
        assert_eq!(block_on(Promise::resolved(5).into_future()).unwrap(), 5);
        let err = block_on(Promise::<i32>::rejected("nope").into_future()).unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }

    #[test]
    fn await_resolution_from_another_thread() {
        let (resolver, promise) = promise::<String>();
        let bg = thread::spawn(move || resolver.resolve("done".into()));
        assert_eq!(block_on(promise.wait()).unwrap(), "done");
        bg.join().unwrap();
    }

    #[test]
    fn sequential_awaits_propagate_errors() {
        async fn three_steps(fail_second: bool) -> Result<Vec<u32>, Error> {
            let mut responses = Vec::new();
            responses.push(Promise::resolved(1).await?);
            let second = if fail_second {
                Promise::rejected("second request failed")
            } else {
                Promise::resolved(2)
            };
            responses.push(second.await?);
            responses.push(Promise::resolved(3).await?);
            Ok(responses)
        }

        assert_eq!(block_on(three_steps(false)).unwrap(), [1, 2, 3]);
        let err = block_on(three_steps(true)).unwrap_err();
        assert_eq!(err.to_string(), "second request failed");
    }

    #[test]
    fn pending_until_settled() {
        let (resolver, promise) = promise::<i32>();
        let mut fut = pin!(promise.wait());
        let (poll, wakes) = poll_once(&mut fut);
        assert!(poll.is_pending());
        assert_eq!(wakes.get(), 0);

        resolver.resolve(11);
        assert_eq!(wakes.get(), 1);
        let (poll, _) = poll_once(&mut fut);
        assert_eq!(poll.map(Result::unwrap), Poll::Ready(11));
    }

    #[test]
    fn wakes_latest_waker() {
        let (resolver, promise) = promise::<i32>();
        let mut fut = pin!(promise.wait());
        let (_, first) = poll_once(&mut fut);
        let (_, second) = poll_once(&mut fut);

        resolver.reject("gone");
        assert_eq!(first.get(), 0);
        assert_eq!(second.get(), 1);
        let (poll, _) = poll_once(&mut fut);
        match poll {
            Poll::Ready(Err(e)) => assert_eq!(e.to_string(), "gone"),
            other => panic!("expected a rejection, got {other:?}"),
        }
    }

    #[test]
    fn awaiter_protocol() {
        let journal = Journal::new();
        let (resolver, promise) = promise::<&str>();
        let awaiter = promise.wait();
        assert!(!awaiter.is_complete());
        assert!(awaiter.result().is_none());

        let j = journal.clone();
        let slot = awaiter.slot.clone();
        awaiter.on_complete(move || {
            let seen = slot.lock().outcome.clone();
            j.push(format!("continuation saw {seen:?}"));
        });
        assert!(journal.entries().is_empty());

        resolver.resolve("value");
        assert!(awaiter.is_complete());
        assert_eq!(journal.entries(), [r#"continuation saw Some(Ok("value"))"#]);
        assert_eq!(awaiter.result().unwrap().unwrap(), "value");
    }

    #[test]
    fn extraction_surfaces_rejection() {
        let promise = Promise::<u8>::rejected("bad gateway");
        let awaiter = promise.wait();
        assert!(awaiter.is_complete());
        let err = awaiter.result().unwrap().unwrap_err();
        assert_eq!(err.to_string(), "bad gateway");

        let abandoned = Promise::<u8>::new(|_| Ok(())).wait();
        assert_eq!(
            abandoned.result().unwrap().unwrap_err().kind(),
            ErrorKind::Abandoned
        );
    }

    #[test]
    fn late_continuation_runs_immediately() {
        let journal = Journal::new();
        let awaiter = Promise::resolved(1).wait();
        let j = journal.clone();
        awaiter.on_complete(move || j.push("ran"));
        assert_eq!(journal.entries(), ["ran"]);
    }
}
