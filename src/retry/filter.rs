//! Exception filters decide which faults a retry policy may retry.

use std::error::Error as StdError;
use std::sync::Arc;

use crate::fault::{Fault, FaultType};

/// Selects the faults a retry policy is allowed to retry.
///
/// Filters are plain values; build them with the constructors below and hand
/// them to a policy with one of the schedule methods (`immediate`, `interval`,
/// ...), or with [`RetryPolicy::with_filter`](super::RetryPolicy::with_filter).
#[derive(Clone, Default)]
pub enum ExceptionFilter {
    /// Retry every fault.
    #[default]
    All,
    /// Retry only faults of one of these types.
    Selected(Vec<FaultType>),
    /// Retry every fault except those of these types.
    Except(Vec<FaultType>),
    /// Retry faults accepted by the predicate.
    Predicate(Arc<dyn Fn(&Fault) -> bool + Send + Sync>),
}

impl ExceptionFilter {
    /// Retry every fault.
    pub fn all() -> Self {
        Self::All
    }

    /// Retry only faults of type `E`.
    pub fn selected<E: StdError + 'static>() -> Self {
        Self::Selected(vec![FaultType::of::<E>()])
    }

    /// Retry every fault except those of type `E`.
    pub fn except<E: StdError + 'static>() -> Self {
        Self::Except(vec![FaultType::of::<E>()])
    }

    /// Add `E` to a `Selected` or `Except` list.
    ///
    /// Has no effect on `All` or `Predicate` filters.
    pub fn or<E: StdError + 'static>(mut self) -> Self {
        if let Self::Selected(types) | Self::Except(types) = &mut self {
            types.push(FaultType::of::<E>());
        }
        self
    }

    /// Retry faults of type `E` for which `predicate` returns `true`.
    ///
    /// Faults of any other type are not retried.
    pub fn filter<E, P>(predicate: P) -> Self
    where
        E: StdError + 'static,
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(move |fault: &Fault| {
            fault.downcast_ref::<E>().is_some_and(&predicate)
        }))
    }

    /// Retry faults for which `predicate` returns `true`.
    pub fn predicate<P>(predicate: P) -> Self
    where
        P: Fn(&Fault) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(predicate))
    }

    /// Returns `true` if `fault` may be retried.
    pub fn can_retry(&self, fault: &Fault) -> bool {
        match self {
            Self::All => true,
            Self::Selected(types) => types.contains(&fault.fault_type()),
            Self::Except(types) => !types.contains(&fault.fault_type()),
            Self::Predicate(predicate) => predicate(fault),
        }
    }
}

impl std::fmt::Debug for ExceptionFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str("All"),
            Self::Selected(types) => f
                .debug_tuple("Selected")
                .field(&types.iter().map(FaultType::name).collect::<Vec<_>>())
                .finish(),
            Self::Except(types) => f
                .debug_tuple("Except")
                .field(&types.iter().map(FaultType::name).collect::<Vec<_>>())
                .finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}
