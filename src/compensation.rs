//! Compensation context and dispositions.
//!
//! When a chain's tail is faulted, a compensation handler receives a
//! [`Compensation`] and decides what happens next by returning a [`Disposition`].
//! The engine turns the disposition into the new tail.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::chain::{compose, Chain};
use crate::completion::{ChainFuture, Completion};
use crate::fault::{Fault, StepResult};

/// The decision made by a compensation handler.
#[must_use = "a disposition must be returned from the compensation handler"]
pub enum Disposition<T> {
    /// The fault was absorbed; continue with this payload.
    Handled(T),
    /// Run this future; its outcome becomes the new tail.
    Replace(ChainFuture<T>),
    /// Re-raise the original fault.
    Rethrow(Fault),
    /// Raise a different fault instead of the original.
    Throw(Fault),
}

impl<T> Disposition<T> {
    /// Convert the disposition into the new tail.
    pub fn into_future(self) -> ChainFuture<T> {
        match self {
            Self::Handled(payload) => ChainFuture::succeeded(payload),
            Self::Replace(future) => future,
            Self::Rethrow(fault) | Self::Throw(fault) => ChainFuture::ready(Completion::Faulted(fault)),
        }
    }

    /// A short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Handled(_) => "handled",
            Self::Replace(_) => "replace",
            Self::Rethrow(_) => "rethrow",
            Self::Throw(_) => "throw",
        }
    }
}

impl<T> std::fmt::Debug for Disposition<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Context handed to a compensation handler when the tail is faulted.
pub struct Compensation<T> {
    fault: Fault,
    payload: T,
    token: CancellationToken,
}

impl<T> Compensation<T>
where
    T: Clone + Send + 'static,
{
    pub(crate) fn new(fault: Fault, payload: T, token: CancellationToken) -> Self {
        Self {
            fault,
            payload,
            token,
        }
    }

    /// The root-cause fault that triggered the compensation.
    pub fn fault(&self) -> &Fault {
        &self.fault
    }

    /// The seed payload the chain was created with, not the latest payload.
    ///
    /// A faulted tail carries no payload, so mutations made by steps before
    /// the fault are not visible here. Carry state that compensation needs in
    /// the error, or in shared state captured by the handler.
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// The cancellation token shared by the chain.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// The faulted tail being compensated, as an already faulted future.
    pub fn faulted(&self) -> ChainFuture<T> {
        ChainFuture::ready(Completion::Faulted(self.fault.clone()))
    }

    /// Absorb the fault and resume with the seed payload.
    pub fn handled(self) -> Disposition<T> {
        Disposition::Handled(self.payload)
    }

    /// Absorb the fault and resume with a replacement payload.
    pub fn handled_with(self, payload: T) -> Disposition<T> {
        Disposition::Handled(payload)
    }

    /// Replace the tail with the given future.
    pub fn task(self, future: ChainFuture<T>) -> Disposition<T> {
        Disposition::Replace(future)
    }

    /// Replace the tail with an asynchronous step.
    pub fn task_async<F>(self, future: F) -> Disposition<T>
    where
        F: Future<Output = StepResult<T>> + Send + 'static,
    {
        Disposition::Replace(ChainFuture::from_step(future))
    }

    /// Replace the tail with a nested chain seeded from the seed payload.
    pub fn compose<F>(self, callback: F) -> Disposition<T>
    where
        F: FnOnce(&mut Chain<T>),
    {
        Disposition::Replace(compose(self.payload, self.token, callback))
    }

    /// Re-raise the original fault.
    pub fn throw(self) -> Disposition<T> {
        Disposition::Rethrow(self.fault)
    }

    /// Raise a different fault.
    pub fn throw_new(self, fault: impl Into<Fault>) -> Disposition<T> {
        Disposition::Throw(fault.into())
    }
}
