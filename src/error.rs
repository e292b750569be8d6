//! The error channel shared by every rejected [`Promise`][crate::Promise].

use std::{any::Any, error::Error as StdError, fmt, io, sync::Arc};

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// The reason a [`Promise`][crate::Promise] was rejected.
///
/// There is only one error type: failures reported by a producer, panics inside producers or
/// continuations, and errors forwarded from upstream promises all travel through it. Cloning an
/// [`Error`] is cheap, so every `catch` handler on the same promise sees the same error.
#[derive(Clone)]
pub struct Error {
    repr: Arc<Repr>,
}

enum Repr {
    Failed(BoxError),
    Panicked(String),
    Abandoned,
}

/// Classifies an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A producer or continuation reported an error.
    Failed,
    /// A producer or continuation panicked.
    Panicked,
    /// Every [`Resolver`][crate::Resolver] was dropped while the promise was still pending.
    Abandoned,
}

impl Error {
    /// Wraps an arbitrary error (or a message, since `&str` and [`String`] convert too).
    pub fn new<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self {
            repr: Arc::new(Repr::Failed(error.into())),
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(s) => *s,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(s) => (*s).to_string(),
                Err(_) => "Box<dyn Any>".to_string(),
            },
        };
        Self {
            repr: Arc::new(Repr::Panicked(message)),
        }
    }

    pub(crate) fn abandoned() -> Self {
        Self {
            repr: Arc::new(Repr::Abandoned),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match &*self.repr {
            Repr::Failed(_) => ErrorKind::Failed,
            Repr::Panicked(_) => ErrorKind::Panicked,
            Repr::Abandoned => ErrorKind::Abandoned,
        }
    }

    /// Returns the wrapped error, if this is an [`ErrorKind::Failed`] error.
    pub fn get_ref(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match &*self.repr {
            Repr::Failed(inner) => Some(&**inner),
            Repr::Panicked(_) | Repr::Abandoned => None,
        }
    }

    /// Attempts to downcast the wrapped error to a concrete type.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.get_ref()?.downcast_ref()
    }

    /// Returns `true` if both values refer to the very same error.
    ///
    /// Forwarding an error down a chain never copies it, so this can be used to check that an
    /// error observed downstream originates from a specific rejection.
    pub fn same_as(&self, other: &Error) -> bool {
        Arc::ptr_eq(&self.repr, &other.repr)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.repr {
            Repr::Failed(inner) => f.debug_tuple("Failed").field(inner).finish(),
            Repr::Panicked(message) => f.debug_tuple("Panicked").field(message).finish(),
            Repr::Abandoned => f.write_str("Abandoned"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.repr {
            Repr::Failed(inner) => fmt::Display::fmt(inner, f),
            Repr::Panicked(message) => write!(f, "panicked: {message}"),
            Repr::Abandoned => {
                f.write_str("promise was abandoned: every resolver was dropped before settling it")
            }
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match &*self.repr {
            Repr::Failed(inner) => inner.source(),
            Repr::Panicked(_) | Repr::Abandoned => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::new(error)
    }
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Error::new(message)
    }
}

impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Error::new(message)
    }
}

#[cfg(test)]
mod tests {
    use std::panic::catch_unwind;

    use super::*;

    #[test]
    fn wraps_messages() {
        let err = Error::new("connection reset");
        assert_eq!(err.kind(), ErrorKind::Failed);
        assert_eq!(err.to_string(), "connection reset");
        assert!(err.get_ref().is_some());
    }

    #[test]
    fn downcasts_to_the_wrapped_error() {
        let err = Error::from(io::Error::new(io::ErrorKind::TimedOut, "too slow"));
        let inner = err.downcast_ref::<io::Error>().unwrap();
        assert_eq!(inner.kind(), io::ErrorKind::TimedOut);
        assert!(err.downcast_ref::<fmt::Error>().is_none());
    }

    #[test]
    fn panic_payloads() {
        let payload = catch_unwind(|| panic!("with {}", "formatting")).unwrap_err();
        let err = Error::from_panic(payload);
        assert_eq!(err.kind(), ErrorKind::Panicked);
        assert_eq!(err.to_string(), "panicked: with formatting");

        let payload = catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(Error::from_panic(payload).to_string(), "panicked: static");

        let err = Error::from_panic(Box::new(17u8));
        assert_eq!(err.to_string(), "panicked: Box<dyn Any>");
        assert!(err.get_ref().is_none());
    }

    #[test]
    fn clones_share_identity() {
        let err = Error::new("boom");
        assert!(err.same_as(&err.clone()));
        assert!(!err.same_as(&Error::new("boom")));
        assert_eq!(Error::abandoned().kind(), ErrorKind::Abandoned);
    }
}
