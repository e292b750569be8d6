//! Running a list of dependent asynchronous steps one after another.
//!
//! [`Promise::and_then`] already sequences steps, but only hands the last value to the end of
//! the chain. [`Sequence`] runs the same kind of chain while collecting the value of every step.
//!
//! ```
//! use pledge::{Promise, Sequence};
//!
//! let pages = Sequence::new(Promise::resolved(String::from("index")))
//!     .step(|prev| Promise::resolved(format!("{prev} > about")))
//!     .step(|prev| Promise::resolved(format!("{prev} > contact")))
//!     .run();
//!
//! assert_eq!(
//!     pages.block().unwrap(),
//!     ["index", "index > about", "index > about > contact"],
//! );
//! ```

use std::{
    panic::{self, AssertUnwindSafe},
    vec,
};

use crate::{Error, Promise, Resolver};

type Step<T> = Box<dyn FnOnce(T) -> Promise<T> + Send>;

/// A list of asynchronous steps, each started with the value of the previous one.
///
/// Created with [`Sequence::new`], extended with [`Sequence::step`], and started with
/// [`Sequence::run`].
pub struct Sequence<T> {
    first: Promise<T>,
    steps: Vec<Step<T>>,
}

impl<T: Clone + Send + 'static> Sequence<T> {
    /// Creates a sequence whose first value comes from `first`.
    pub fn new(first: Promise<T>) -> Self {
        Self {
            first,
            steps: Vec::new(),
        }
    }

    /// Appends a step, which is started with the value of the step before it.
    pub fn step<F>(mut self, f: F) -> Self
    where
        F: FnOnce(T) -> Promise<T> + Send + 'static,
    {
        self.steps.push(Box::new(f));
        self
    }

    /// Starts the sequence.
    ///
    /// The returned promise is fulfilled with the values of the first promise and of every step,
    /// in order. If any of them is rejected (or a step panics), it is rejected with that error and
    /// no further steps are started.
    pub fn run(self) -> Promise<Vec<T>> {
        let Sequence { first, steps } = self;
        Promise::new(move |resolver| {
            Sequencer {
                step: 0,
                results: Vec::with_capacity(steps.len() + 1),
                remaining: steps.into_iter(),
                resolver,
            }
            .wait_for(first);
            Ok(())
        })
    }
}

/// The running state of a [`Sequence`].
///
/// Owned by the listener of whichever promise is currently being waited on, and handed to the
/// next one when that promise is fulfilled.
struct Sequencer<T> {
    /// Index of the step currently being waited on (0 is the initial promise).
    step: usize,
    results: Vec<T>,
    remaining: vec::IntoIter<Step<T>>,
    resolver: Resolver<Vec<T>>,
}

impl<T: Clone + Send + 'static> Sequencer<T> {
    fn wait_for(self, current: Promise<T>) {
        let step = self.step;
        let on_error = self.resolver.clone();
        current.then(move |value| self.advance(value));
        current.catch(move |error: Error| {
            log::trace!("sequence step {step} rejected: {error}");
            on_error.reject(error);
        });
    }

    fn advance(mut self, value: T) {
        log::trace!("sequence step {} fulfilled", self.step);
        let next = match self.remaining.next() {
            Some(next) => next,
            None => {
                self.results.push(value);
                self.resolver.resolve(self.results);
                return;
            }
        };
        self.results.push(value.clone());
        self.step += 1;
        match panic::catch_unwind(AssertUnwindSafe(move || next(value))) {
            Ok(promise) => self.wait_for(promise),
            Err(payload) => self.resolver.reject(Error::from_panic(payload)),
        }
    }
}
