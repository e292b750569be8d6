use std::{
    convert::Infallible,
    fmt, mem,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, ThreadId},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::{
    sync::{Mutex, MutexGuard},
    Error,
};

/// Creates a connected pair of [`Resolver`] and [`Promise`].
///
/// This is the counterpart of [`Promise::new`] for producers that do not fit into a closure, such
/// as a completion callback registered with some external event source.
pub fn promise<T>() -> (Resolver<T>, Promise<T>) {
    let shared = Shared::new(None, true);
    (Resolver::new(shared.clone()), Promise { shared })
}

/// Which phase of its lifecycle a [`Promise`] is in.
///
/// A promise only ever moves from [`State::Pending`] to one of the two settled states, and never
/// changes again after that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Pending,
    Fulfilled,
    Rejected,
}

pub(crate) enum Listener<T> {
    Fulfilled(Box<dyn FnOnce(T) + Send>),
    Rejected(Box<dyn FnOnce(Error) + Send>),
    Settled {
        callback: Box<dyn FnOnce(&Result<T, Error>) + Send>,
        /// Whether this listener counts as having observed a rejection.
        observes: bool,
    },
}

impl<T> Listener<T> {
    fn observes_rejection(&self) -> bool {
        match self {
            Listener::Fulfilled(_) => false,
            Listener::Rejected(_) => true,
            Listener::Settled { observes, .. } => *observes,
        }
    }
}

struct Queues<T> {
    on_fulfilled: Vec<Box<dyn FnOnce(T) + Send>>,
    on_rejected: Vec<Box<dyn FnOnce(Error) + Send>>,
    on_settled: Vec<Box<dyn FnOnce(&Result<T, Error>) + Send>>,
}

impl<T> Queues<T> {
    fn new() -> Self {
        Self {
            on_fulfilled: Vec::new(),
            on_rejected: Vec::new(),
            on_settled: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.on_fulfilled.is_empty() && self.on_rejected.is_empty() && self.on_settled.is_empty()
    }

    fn push(&mut self, listener: Listener<T>) {
        match listener {
            Listener::Fulfilled(cb) => self.on_fulfilled.push(cb),
            Listener::Rejected(cb) => self.on_rejected.push(cb),
            Listener::Settled { callback, .. } => self.on_settled.push(callback),
        }
    }

    /// Invokes the failure listeners in registration order, then the settled listeners.
    fn deliver_error(self, error: &Error, name: Option<&str>) {
        let Queues {
            on_fulfilled,
            on_rejected,
            on_settled,
        } = self;
        drop(on_fulfilled);
        for cb in on_rejected {
            let error = error.clone();
            invoke(name, move || cb(error));
        }
        let outcome = Err(error.clone());
        for cb in on_settled {
            invoke(name, || cb(&outcome));
        }
    }
}

impl<T: Clone> Queues<T> {
    /// Invokes the listeners matching `outcome` in registration order, then the settled
    /// listeners.
    fn deliver(self, outcome: &Result<T, Error>, name: Option<&str>) {
        let value = match outcome {
            Ok(value) => value,
            Err(error) => return self.deliver_error(error, name),
        };
        let Queues {
            on_fulfilled,
            on_rejected,
            on_settled,
        } = self;
        drop(on_rejected);
        for cb in on_fulfilled {
            let value = value.clone();
            invoke(name, move || cb(value));
        }
        for cb in on_settled {
            invoke(name, || cb(outcome));
        }
    }
}

/// Runs a listener, keeping its panic from unwinding into whoever triggered it.
fn invoke(name: Option<&str>, f: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        let error = Error::from_panic(payload);
        match name {
            Some(name) => log::error!("listener of promise '{name}' {error}"),
            None => log::error!("promise listener {error}"),
        }
    }
}

enum Slot<T> {
    Pending,
    Fulfilled(T),
    Rejected(Error),
}

struct Inner<T> {
    slot: Slot<T>,
    /// Listeners that have not run yet.
    queues: Queues<T>,
    /// The thread running the listeners of this promise, while it does so.
    delivering: Option<ThreadId>,
    /// Dropped once every listener queued by the settling thread has run, which disconnects
    /// [`Shared::delivered`].
    signal: Option<Sender<Infallible>>,
    /// Set once anything has looked at the rejection path of this promise.
    handled: bool,
}

impl<T> Inner<T> {
    /// Whether listeners registered by the current thread have to be queued.
    ///
    /// That is the case while pending, and while another thread is still running listeners,
    /// which has to see them in registration order. Only the delivering thread itself (a listener
    /// registering more listeners) and later callers run them directly.
    fn must_queue(&self) -> bool {
        match self.slot {
            Slot::Pending => true,
            Slot::Fulfilled(_) | Slot::Rejected(_) => {
                matches!(self.delivering, Some(id) if id != thread::current().id())
            }
        }
    }
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    /// Never receives anything. It disconnects once the promise is settled and its listeners
    /// have run, which is what the blocking waits wait for.
    delivered: Receiver<Infallible>,
    /// Number of live [`Resolver`]s. When it drops to 0 while pending, the promise is abandoned.
    resolvers: AtomicUsize,
    name: Option<String>,
    report_unobserved: bool,
}

impl<T> Shared<T> {
    fn new(name: Option<String>, report_unobserved: bool) -> Arc<Self> {
        let (signal, delivered) = crossbeam_channel::bounded(0);
        Arc::new(Self {
            inner: Mutex::new(Inner {
                slot: Slot::Pending,
                queues: Queues::new(),
                delivering: None,
                signal: Some(signal),
                handled: false,
            }),
            delivered,
            resolvers: AtomicUsize::new(0),
            name,
            report_unobserved,
        })
    }

    /// Moves a pending promise to `settled`, making the current thread the delivering one.
    ///
    /// Returns `None` if the promise was already settled.
    fn transition(&self, settled: Slot<T>) -> Option<MutexGuard<'_, Inner<T>>> {
        let mut inner = self.inner.lock();
        if !matches!(inner.slot, Slot::Pending) {
            return None;
        }
        inner.slot = settled;
        inner.delivering = Some(thread::current().id());
        Some(inner)
    }

    /// Runs queued listeners with the lock released, until no more have been queued.
    ///
    /// Listeners registered from other threads in the meantime are queued behind the ones
    /// already there, so this keeps going until the queues stay empty.
    fn drain<'a>(&'a self, mut inner: MutexGuard<'a, Inner<T>>, deliver: impl Fn(Queues<T>)) {
        loop {
            let queues = mem::replace(&mut inner.queues, Queues::new());
            if queues.is_empty() {
                inner.delivering = None;
                inner.signal = None;
                return;
            }
            drop(inner);
            deliver(queues);
            inner = self.inner.lock();
        }
    }

    /// Whether a blocking wait on this promise can return right away.
    fn is_delivered(&self) -> bool {
        let inner = self.inner.lock();
        !matches!(inner.slot, Slot::Pending) && !inner.must_queue()
    }
}

impl<T: Clone> Shared<T> {
    fn settle(&self, outcome: Result<T, Error>) {
        let settled = match &outcome {
            Ok(value) => Slot::Fulfilled(value.clone()),
            Err(error) => Slot::Rejected(error.clone()),
        };
        let Some(inner) = self.transition(settled) else {
            if let Some(name) = &self.name {
                log::trace!("promise '{name}' is already settled, ignoring new outcome");
            }
            return;
        };

        if let Some(name) = &self.name {
            match &outcome {
                Ok(_) => log::trace!("promise '{name}' fulfilled"),
                Err(error) => log::trace!("promise '{name}' rejected: {error}"),
            }
        }
        let name = self.name.as_deref();
        self.drain(inner, |queues| queues.deliver(&outcome, name));
    }

    fn register(&self, listener: Listener<T>) {
        let mut inner = self.inner.lock();
        if listener.observes_rejection() {
            inner.handled = true;
        }
        if inner.must_queue() {
            inner.queues.push(listener);
            return;
        }
        let outcome = match &inner.slot {
            Slot::Fulfilled(value) => Ok(value.clone()),
            Slot::Rejected(error) => Err(error.clone()),
            Slot::Pending => unreachable!(),
        };
        drop(inner);

        let name = self.name.as_deref();
        match (listener, outcome) {
            (Listener::Fulfilled(cb), Ok(value)) => invoke(name, move || cb(value)),
            (Listener::Rejected(cb), Err(error)) => invoke(name, move || cb(error)),
            (Listener::Settled { callback, .. }, outcome) => {
                invoke(name, move || callback(&outcome))
            }
            (Listener::Fulfilled(_), Err(_)) | (Listener::Rejected(_), Ok(_)) => {}
        }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let report = self.report_unobserved;
        let inner = self.inner.get_mut();
        if let Slot::Rejected(error) = &inner.slot {
            if report && !inner.handled {
                match &self.name {
                    Some(name) => log::warn!(
                        "promise '{name}' was rejected, but nothing observed the error: {error}"
                    ),
                    None => {
                        log::warn!("promise was rejected, but nothing observed the error: {error}")
                    }
                }
            }
        }
    }
}

/// The settling side of a [`Promise`].
///
/// A [`Resolver`] is handed to the producer passed to [`Promise::new`], or returned by
/// [`promise`]. It can be cloned and sent to other threads; whichever clone settles the promise
/// first wins, and every later call is silently ignored.
///
/// If every [`Resolver`] of a promise is dropped while the promise is still pending, nothing could
/// ever settle it, so it is rejected with an [`ErrorKind::Abandoned`] error instead.
///
/// [`ErrorKind::Abandoned`]: crate::ErrorKind::Abandoned
pub struct Resolver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Resolver<T> {
    fn new(shared: Arc<Shared<T>>) -> Self {
        shared.resolvers.fetch_add(1, Ordering::Relaxed);
        Self { shared }
    }

    /// Returns `true` while the promise has not been settled yet.
    ///
    /// Producers can use this to skip work whose result would be ignored anyway.
    pub fn is_pending(&self) -> bool {
        matches!(self.shared.inner.lock().slot, Slot::Pending)
    }
}

impl<T: Clone> Resolver<T> {
    /// Fulfills the promise with `value`, unless it was already settled.
    pub fn resolve(&self, value: T) {
        self.shared.settle(Ok(value));
    }

    /// Rejects the promise with `error`, unless it was already settled.
    pub fn reject(&self, error: impl Into<Error>) {
        self.shared.settle(Err(error.into()));
    }

    /// Settles the promise with either outcome, unless it was already settled.
    pub fn settle(&self, outcome: Result<T, Error>) {
        self.shared.settle(outcome);
    }
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Resolver::new(self.shared.clone())
    }
}

impl<T> Drop for Resolver<T> {
    fn drop(&mut self) {
        if self.shared.resolvers.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        // Last one out: settle without a `T: Clone` bound, since there is no value to store.
        let error = Error::abandoned();
        let Some(inner) = self.shared.transition(Slot::Rejected(error.clone())) else {
            return;
        };

        match &self.shared.name {
            Some(name) => log::debug!("promise '{name}' abandoned: all resolvers were dropped"),
            None => log::debug!("promise abandoned: all resolvers were dropped"),
        }
        let name = self.shared.name.as_deref();
        self.shared.drain(inner, |queues| queues.deliver_error(&error, name));
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("name", &self.shared.name)
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// A single-assignment container for the eventual outcome of a computation.
///
/// A [`Promise`] starts out pending and is settled exactly once, either fulfilled with a `T` or
/// rejected with an [`Error`]. Listeners attached via [`Promise::then`], [`Promise::catch`] and
/// [`Promise::finally`] run when that happens, on the thread that settles the promise. Listeners
/// attached after that thread has finished running them execute immediately, on the thread
/// attaching them.
///
/// [`Promise`] is a handle to shared state: cloning it is cheap, and all clones observe the same
/// outcome.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl Promise<()> {
    /// Returns a builder that can be used to configure and create a [`Promise`].
    #[inline]
    pub fn builder() -> PromiseBuilder {
        PromiseBuilder {
            name: None,
            report_unobserved: true,
        }
    }
}

impl<T> Promise<T> {
    /// Returns the current [`State`] of the promise.
    pub fn state(&self) -> State {
        match self.shared.inner.lock().slot {
            Slot::Pending => State::Pending,
            Slot::Fulfilled(_) => State::Fulfilled,
            Slot::Rejected(_) => State::Rejected,
        }
    }

    /// Returns `true` if the promise has not been settled yet.
    ///
    /// If this returns `false`, [`Promise::block`] will return immediately.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.state() == State::Pending
    }

    /// Returns the name given to this promise via [`PromiseBuilder::name`].
    pub fn name(&self) -> Option<&str> {
        self.shared.name.as_deref()
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Creates a promise and runs `producer` to settle it.
    ///
    /// `producer` is invoked right away, on the calling thread, with the [`Resolver`] for the new
    /// promise. It may settle the promise directly, or move the [`Resolver`] somewhere that will
    /// settle it later (another thread, a completion callback).
    ///
    /// If `producer` returns an error or panics, the promise is rejected with that error (unless
    /// the producer already settled it).
    pub fn new<F>(producer: F) -> Self
    where
        F: FnOnce(Resolver<T>) -> Result<(), Error>,
    {
        Self::with_shared(Shared::new(None, true), producer)
    }

    fn with_shared<F>(shared: Arc<Shared<T>>, producer: F) -> Self
    where
        F: FnOnce(Resolver<T>) -> Result<(), Error>,
    {
        // Hold our own resolver for the duration of the call, so that a producer dropping its
        // resolver and then failing reports the failure rather than abandonment.
        let resolver = Resolver::new(shared.clone());
        let handle = resolver.clone();
        match panic::catch_unwind(AssertUnwindSafe(move || producer(handle))) {
            Ok(Ok(())) => {}
            Ok(Err(error)) => resolver.reject(error),
            Err(payload) => resolver.reject(Error::from_panic(payload)),
        }
        Promise { shared }
    }

    /// Creates a promise that is already fulfilled with `value`.
    pub fn resolved(value: T) -> Self {
        Self::new(move |resolver| {
            resolver.resolve(value);
            Ok(())
        })
    }

    /// Creates a promise that is already rejected with `error`.
    pub fn rejected(error: impl Into<Error>) -> Self {
        let error = error.into();
        Self::new(move |resolver| {
            resolver.reject(error);
            Ok(())
        })
    }

    pub(crate) fn register(&self, listener: Listener<T>) {
        self.shared.register(listener);
    }

    /// Calls `f` with the outcome once the promise settles.
    ///
    /// The async adapter and the combinators that need "value or error" are built on this. It
    /// counts as observing a rejection.
    pub(crate) fn subscribe<F>(&self, f: F)
    where
        F: FnOnce(Result<T, Error>) + Send + 'static,
    {
        self.register(Listener::Settled {
            callback: Box::new(move |outcome: &Result<T, Error>| f(outcome.clone())),
            observes: true,
        });
    }

    /// Forwards the outcome of this promise to `resolver`.
    pub(crate) fn forward(&self, resolver: Resolver<T>) {
        self.subscribe(move |outcome| resolver.settle(outcome));
    }

    /// Returns the outcome if the promise is settled, marking a rejection as observed.
    pub(crate) fn outcome(&self) -> Option<Result<T, Error>> {
        let mut inner = self.shared.inner.lock();
        let outcome = match &inner.slot {
            Slot::Pending => None,
            Slot::Fulfilled(value) => Some(Ok(value.clone())),
            Slot::Rejected(error) => Some(Err(error.clone())),
        };
        if let Some(Err(_)) = outcome {
            inner.handled = true;
        }
        outcome
    }

    /// Blocks the calling thread until the promise is settled, and returns its outcome.
    ///
    /// Listeners attached before settlement have all run by the time this returns. Called from
    /// within one of those listeners, it returns right away.
    ///
    /// If the promise can no longer be settled because its producer went away, this returns an
    /// [`ErrorKind::Abandoned`] error rather than blocking forever.
    ///
    /// [`ErrorKind::Abandoned`]: crate::ErrorKind::Abandoned
    pub fn block(&self) -> Result<T, Error> {
        if !self.shared.is_delivered() {
            // Nothing is ever sent; this returns once the sender is dropped.
            let _ = self.shared.delivered.recv();
        }
        self.outcome().unwrap_or_else(|| Err(Error::abandoned()))
    }

    /// Like [`Promise::block`], but gives up after `timeout`.
    ///
    /// Returns [`None`] if the promise is still pending when `timeout` elapses.
    pub fn block_timeout(&self, timeout: Duration) -> Option<Result<T, Error>> {
        if !self.shared.is_delivered() {
            match self.shared.delivered.recv_timeout(timeout) {
                Ok(never) => match never {},
                Err(RecvTimeoutError::Timeout) => return None,
                Err(RecvTimeoutError::Disconnected) => {}
            }
        }
        self.outcome()
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

/// A builder object that can be used to configure and create a [`Promise`].
#[derive(Debug, Clone)]
pub struct PromiseBuilder {
    name: Option<String>,
    report_unobserved: bool,
}

impl PromiseBuilder {
    /// Sets the name of the [`Promise`].
    ///
    /// Named promises log their settlement at `trace` level, and the name shows up in every other
    /// diagnostic concerning them.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Sets whether a warning is logged when the [`Promise`] is rejected and then dropped without
    /// anything having observed the error.
    ///
    /// Enabled by default. Failure listeners, [`Promise::block`], `.await` and any combinator
    /// consuming the promise all count as observing it; [`Promise::finally`] does not.
    #[inline]
    pub fn report_unobserved(self, report_unobserved: bool) -> Self {
        Self {
            report_unobserved,
            ..self
        }
    }

    /// Creates the [`Promise`], running `producer` to settle it.
    ///
    /// See [`Promise::new`] for how `producer` is invoked.
    pub fn run<T, F>(self, producer: F) -> Promise<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(Resolver<T>) -> Result<(), Error>,
    {
        Promise::with_shared(Shared::new(self.name, self.report_unobserved), producer)
    }
}
