//! Fault and error types.
//!
//! A [`Fault`] is the single root-cause error carried by a faulted chain. It is
//! shared (cheap to clone) and remembers the concrete type it was built from, so
//! retry filters can select on the runtime type of the failure.

use std::any::{Any, TypeId};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Result type returned by step bodies.
///
/// Any `E: std::error::Error` converts into a [`Fault`], so `?` works inside steps.
pub type StepResult<T = ()> = Result<T, Fault>;

/// Errors raised by the chain engine itself.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ChainError {
    /// The chain was canceled before it could complete.
    #[error("chain was canceled")]
    Canceled,

    /// The chain faulted with the given root cause.
    #[error("{0}")]
    Faulted(Fault),

    /// A step body, compensation handler or finalizer panicked.
    #[error("step panicked: {message}")]
    Panicked {
        /// The panic message, if it was a string.
        message: String,
    },

    /// A delay was requested with a negative duration other than "infinite" (-1).
    #[error("delay must be non-negative or -1 (infinite), got {millis}ms")]
    InvalidDelay {
        /// The rejected delay in milliseconds.
        millis: i64,
    },

    /// A repeat interval or initial delay was negative.
    #[error("interval must be non-negative, got {millis}ms")]
    InvalidInterval {
        /// The rejected interval in milliseconds.
        millis: i64,
    },
}

impl From<Fault> for ChainError {
    fn from(fault: Fault) -> Self {
        if fault.is_cancellation() {
            ChainError::Canceled
        } else {
            ChainError::Faulted(fault)
        }
    }
}

/// Identity of a concrete error type, used by retry filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaultType {
    id: TypeId,
    name: &'static str,
}

impl FaultType {
    /// The fault type of `E`.
    pub fn of<E: 'static>() -> Self {
        Self {
            id: TypeId::of::<E>(),
            name: std::any::type_name::<E>(),
        }
    }

    /// Fully qualified name of the error type.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// The root-cause error of a faulted chain.
///
/// `Fault` does not implement `std::error::Error`, so every error type
/// converts into it with `?`.
#[derive(Clone)]
pub struct Fault {
    inner: Arc<dyn StdError + Send + Sync + 'static>,
    kind: FaultType,
}

impl Fault {
    /// Wrap an error.
    ///
    /// A `ChainError::Faulted` is unwrapped to the fault it carries instead of
    /// being nested.
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        if let Some(ChainError::Faulted(fault)) = (&error as &dyn Any).downcast_ref::<ChainError>()
        {
            return fault.clone();
        }

        Self {
            inner: Arc::new(error),
            kind: FaultType::of::<E>(),
        }
    }

    /// A fault signalling cooperative cancellation.
    pub fn canceled() -> Self {
        Self::new(ChainError::Canceled)
    }

    /// A fault built from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Message(message.into()))
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::new(ChainError::Panicked { message })
    }

    /// The concrete type this fault was built from.
    pub fn fault_type(&self) -> FaultType {
        self.kind
    }

    /// Returns `true` if the fault was built from an `E`.
    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.kind.id == TypeId::of::<E>()
    }

    /// Borrow the underlying error as `E`.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    /// Returns `true` if this fault represents cancellation rather than failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self.downcast_ref::<ChainError>(), Some(ChainError::Canceled))
    }

    /// The innermost error of the `source()` chain.
    pub fn root_cause(&self) -> &(dyn StdError + 'static) {
        let mut current: &(dyn StdError + 'static) = &*self.inner;
        while let Some(next) = current.source() {
            current = next;
        }
        current
    }

    /// Borrow the wrapped error.
    pub fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.inner
    }

    /// Returns `true` if both faults share the same underlying error instance.
    pub fn ptr_eq(&self, other: &Fault) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<E> From<E> for Fault
where
    E: StdError + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Fault::new(error)
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fault")
            .field("type", &self.kind.name)
            .field("error", &self.inner)
            .finish()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

#[derive(thiserror::Error, Debug)]
#[error("{0}")]
struct Message(String);
