//! Single-assignment promises with callback chaining, join combinators and `async` interop.
//!
//! (this library does not run anything in the background by itself: it provides the
//! bookkeeping for *results*, and leaves it to the producers to decide which thread, event loop
//! or completion callback they come from)
//!
//! # Overview
//!
//! The central type is [`Promise`], a container that starts out empty and is settled exactly
//! once, either *fulfilled* with a value or *rejected* with an [`Error`]. The code computing the
//! result settles the promise through its [`Resolver`]; the code interested in the result attaches
//! listeners to the [`Promise`].
//!
//! ## Settling
//!
//! [`Promise::new`] runs a *producer* closure right away and hands it the [`Resolver`]. The
//! producer can settle the promise directly, or move the [`Resolver`] to wherever the result will
//! eventually be available (another thread, an I/O completion callback). Only the first call to
//! [`Resolver::resolve`] or [`Resolver::reject`] has any effect.
//!
//! A producer that returns an error or panics rejects its promise. A promise whose [`Resolver`]s
//! have all been dropped without settling it is rejected too, so nobody waits on it forever.
//!
//! ## Listening
//!
//! [`Promise::then`], [`Promise::catch`] and [`Promise::finally`] attach listeners. They are
//! called in the order they were attached, on the thread that settles the promise; `finally`
//! listeners always run after the `then`/`catch` listeners of the same settlement. Listeners
//! attached to an already settled promise run immediately.
//!
//! ## Combining
//!
//! - [`Promise::and_then`] and [`Promise::map`] chain dependent steps; a rejection skips every
//!   following step until it reaches a `catch`.
//! - [`Promise::all`] waits for a set of promises and keeps their values in input order.
//! - [`Promise::race`] settles like the first of a set of promises to settle.
//! - [`Sequence`] runs a list of dependent steps and collects every intermediate value.
//!
//! ## Waiting
//!
//! A [`Promise`] can be `.await`ed from any executor (see [`PromiseFuture`]), or blocked on from
//! synchronous code with [`Promise::block`].
//!
//! # Usage
//!
//! A producer settling its promise from a background thread:
//!
//! ```
//! use std::thread;
//! use pledge::Promise;
//!
//! let promise = Promise::new(|resolver| {
//!     thread::spawn(move || {
//!         println!("Doing heavy task...");
//!         resolver.resolve(6 * 7);
//!     });
//!     Ok(())
//! });
//!
//! promise
//!     .then(|value| println!("got {value}"))
//!     .catch(|error| println!("failed: {error}"));
//!
//! assert_eq!(promise.block().unwrap(), 42);
//! ```
//!
//! Dependent steps, where each one only starts once the previous one succeeded:
//!
//! ```
//! use pledge::{promise, Promise};
//!
//! let (resolver, page) = promise::<String>();
//!
//! let length = page
//!     .and_then(|body| Promise::resolved(body.len()))
//!     .map(|len| len * 2);
//!
//! resolver.resolve("<html></html>".into());
//! assert_eq!(length.block().unwrap(), 26);
//! ```
//!
//! # Diagnostics
//!
//! This crate logs through the [`log`] facade. Promises created with a name (see
//! [`Promise::builder`]) log their settlement at `trace` level. A rejected promise that is dropped
//! without anything ever having observed its error is reported at `warn` level, and panics in
//! listeners are reported at `error` level.
//!
//! [`log`]: https://crates.io/crates/log

mod adapter;
mod chain;
mod combinator;
mod error;
mod promise;
mod sequence;
mod sync;

pub use adapter::PromiseFuture;
pub use error::{Error, ErrorKind};
pub use promise::{promise, Promise, PromiseBuilder, Resolver, State};
pub use sequence::Sequence;
