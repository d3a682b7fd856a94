// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types surfaced by coalesced calls.

use std::{fmt, sync::Arc};

/// The failure a caller observes from a coalesced call.
///
/// `E` is the error type of the unit of work. Execution failures are captured once by the
/// leader and handed to every caller attached to the same round as the same [`Arc`], so all
/// of them observe one failure value rather than independently constructed copies.
#[derive(Debug)]
pub enum Error<E> {
    /// The unit of work failed. Every caller of the round receives this same value.
    Execution(Arc<E>),

    /// The leader was cancelled or panicked before it published an outcome.
    ///
    /// Shared by every caller attached to the round, like [`Error::Execution`].
    Abandoned,

    /// This caller stopped waiting before the round published its outcome.
    ///
    /// Local to the caller that gave up; other callers of the round are unaffected.
    Cancelled,

    /// A coalescing key could not be derived from the call arguments.
    Key(KeyError),
}

impl<E> Error<E> {
    /// Returns the shared execution failure, if this is one.
    #[must_use]
    pub fn execution(&self) -> Option<&Arc<E>> {
        match self {
            Self::Execution(e) => Some(e),
            _ => None,
        }
    }

    /// Returns `true` if this caller's own wait was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` if the round's leader went away without an outcome.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        matches!(self, Self::Abandoned)
    }
}

impl<E: fmt::Display> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Execution(e) => write!(f, "coalesced call failed: {e}"),
            Self::Abandoned => f.write_str("coalesced call abandoned by its leader"),
            Self::Cancelled => f.write_str("wait for coalesced call cancelled"),
            Self::Key(e) => write!(f, "{e}"),
        }
    }
}

impl<E> std::error::Error for Error<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Execution(e) => Some(e.as_ref()),
            Self::Key(e) => Some(e),
            Self::Abandoned | Self::Cancelled => None,
        }
    }
}

impl<E> From<KeyError> for Error<E> {
    fn from(error: KeyError) -> Self {
        Self::Key(error)
    }
}

/// The arguments of a call could not be encoded into a coalescing key.
#[ohno::error]
#[display("failed to derive coalescing key for {identity}")]
pub struct KeyError {
    identity: String,
}

impl KeyError {
    /// The identity of the unit of work whose key could not be derived.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

/// The outcome stored in a round once its leader publishes.
pub(crate) type Outcome<T, E> = Result<T, Failure<E>>;

/// The failure half of a published outcome.
#[derive(Debug)]
pub(crate) enum Failure<E> {
    Execution(Arc<E>),
    Abandoned,
}

impl<E> Clone for Failure<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Execution(e) => Self::Execution(Arc::clone(e)),
            Self::Abandoned => Self::Abandoned,
        }
    }
}

impl<E> From<Failure<E>> for Error<E> {
    fn from(failure: Failure<E>) -> Self {
        match failure {
            Failure::Execution(e) => Self::Execution(e),
            Failure::Abandoned => Self::Abandoned,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[derive(Debug)]
    struct Boom;

    impl fmt::Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("boom")
        }
    }

    impl std::error::Error for Boom {}

    #[test]
    fn execution_display_contains_cause() {
        let error = Error::Execution(Arc::new(Boom));
        assert_eq!(error.to_string(), "coalesced call failed: boom");
        assert!(error.source().is_some());
    }

    #[test]
    fn failure_clone_shares_the_same_error() {
        let failure = Failure::Execution(Arc::new(Boom));
        let cloned = failure.clone();

        let (Failure::Execution(a), Failure::Execution(b)) = (&failure, &cloned) else {
            panic!("expected execution failures");
        };
        assert!(Arc::ptr_eq(a, b));
    }

    #[test]
    fn abandoned_and_cancelled_have_no_source() {
        let abandoned: Error<Boom> = Failure::Abandoned.into();
        assert!(abandoned.is_abandoned());
        assert!(abandoned.source().is_none());

        let cancelled: Error<Boom> = Error::Cancelled;
        assert!(cancelled.is_cancelled());
        assert!(cancelled.execution().is_none());
    }

    #[test]
    fn key_error_mentions_identity_and_cause() {
        let error = KeyError::caused_by("app::load_user".to_string(), "key must be a string");
        assert_eq!(error.identity(), "app::load_user");

        let display = format!("{error}");
        assert!(display.contains("app::load_user"), "got: {display}");
        assert!(display.contains("key must be a string"), "got: {display}");

        let wrapped: Error<Boom> = error.into();
        assert!(wrapped.source().is_some());
    }
}
