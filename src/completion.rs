//! Terminal outcomes and the tail future of a chain.
//!
//! Every step boundary is expressed as a [`Completion`]: the payload on success,
//! the root-cause [`Fault`] on failure, or cancellation. A [`ChainFuture`] is
//! either already complete (the fast path) or a boxed future that will produce
//! a completion when driven.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::fault::{ChainError, Fault, StepResult};

/// The terminal status of a step or a whole chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// The step ran to completion.
    Succeeded,
    /// The step failed.
    Faulted,
    /// The step was skipped or interrupted by cancellation.
    Canceled,
}

/// Controls whether a step may run inline when its predecessor is already complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecuteOptions {
    /// Always defer the step until the chain is driven.
    #[default]
    None,
    /// Run the step immediately if the tail is already complete.
    RunSynchronously,
}

impl ExecuteOptions {
    /// Returns `true` if inline execution is allowed.
    pub fn runs_synchronously(self) -> bool {
        self == Self::RunSynchronously
    }
}

/// Outcome of a completed step.
#[derive(Debug, Clone)]
pub enum Completion<T> {
    /// Completed with a payload.
    Succeeded(T),
    /// Completed with a root-cause fault.
    Faulted(Fault),
    /// Canceled.
    Canceled,
}

impl<T> Completion<T> {
    /// Convert a step result, mapping cancellation faults to `Canceled`.
    pub fn from_step_result(result: StepResult<T>) -> Self {
        match result {
            Ok(payload) => Self::Succeeded(payload),
            Err(fault) if fault.is_cancellation() => Self::Canceled,
            Err(fault) => Self::Faulted(fault),
        }
    }

    /// The status of this completion.
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Succeeded(_) => TaskStatus::Succeeded,
            Self::Faulted(_) => TaskStatus::Faulted,
            Self::Canceled => TaskStatus::Canceled,
        }
    }

    /// Returns `true` on success.
    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    /// Returns `true` if faulted.
    pub fn is_faulted(&self) -> bool {
        matches!(self, Self::Faulted(_))
    }

    /// Returns `true` if canceled.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// The payload, if succeeded.
    pub fn payload(&self) -> Option<&T> {
        match self {
            Self::Succeeded(payload) => Some(payload),
            _ => None,
        }
    }

    /// The fault, if faulted.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Self::Faulted(fault) => Some(fault),
            _ => None,
        }
    }

    /// Surface the outcome as a single error or the payload.
    pub fn into_result(self) -> Result<T, ChainError> {
        match self {
            Self::Succeeded(payload) => Ok(payload),
            Self::Faulted(fault) => Err(ChainError::Faulted(fault)),
            Self::Canceled => Err(ChainError::Canceled),
        }
    }

    /// Convert back into a step result; cancellation becomes a cancellation fault.
    pub fn into_step_result(self) -> StepResult<T> {
        match self {
            Self::Succeeded(payload) => Ok(payload),
            Self::Faulted(fault) => Err(fault),
            Self::Canceled => Err(Fault::canceled()),
        }
    }
}

type Continuation<T> = Box<dyn FnOnce(Completion<T>) -> ChainFuture<T> + Send>;

/// A head future plus the continuations queued behind it.
///
/// Appending to a pending tail pushes onto `queue` instead of wrapping the
/// head, so the tail stays one level deep however many steps are appended.
struct Pending<T> {
    head: BoxFuture<'static, Completion<T>>,
    queue: VecDeque<Continuation<T>>,
}

enum Tail<T> {
    Ready(Completion<T>),
    Pending(Pending<T>),
    Taken,
}

/// The tail of a chain: a completion that is either available now or later.
#[must_use = "a chain future does nothing unless awaited or spawned"]
pub struct ChainFuture<T> {
    tail: Tail<T>,
}

// The payload is only ever moved out, never pinned.
impl<T> Unpin for ChainFuture<T> {}

impl<T> ChainFuture<T> {
    /// An already completed future.
    pub fn ready(completion: Completion<T>) -> Self {
        Self {
            tail: Tail::Ready(completion),
        }
    }

    /// An already succeeded future.
    pub fn succeeded(payload: T) -> Self {
        Self::ready(Completion::Succeeded(payload))
    }

    /// An already faulted future.
    pub fn faulted(fault: impl Into<Fault>) -> Self {
        Self::ready(Completion::Faulted(fault.into()))
    }

    /// An already canceled future.
    pub fn canceled() -> Self {
        Self::ready(Completion::Canceled)
    }

    /// Wrap a future that produces a completion.
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Completion<T>> + Send + 'static,
    {
        Self {
            tail: Tail::Pending(Pending {
                head: Box::pin(future),
                queue: VecDeque::new(),
            }),
        }
    }

    /// Wrap a step future, catching panics and mapping cancellation faults.
    pub fn from_step<F>(future: F) -> Self
    where
        F: Future<Output = StepResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        Self::pending(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => Completion::from_step_result(result),
                Err(panic) => Completion::Faulted(Fault::from_panic(panic)),
            }
        })
    }

    /// Queue `continuation` to run on this future's completion.
    ///
    /// The result is always pending, even if this future is ready; the
    /// continuation runs when the returned future is driven.
    pub(crate) fn then<C>(self, continuation: C) -> Self
    where
        C: FnOnce(Completion<T>) -> ChainFuture<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut pending = match self.tail {
            Tail::Pending(pending) => pending,
            Tail::Ready(completion) => Pending {
                head: Box::pin(futures::future::ready(completion)),
                queue: VecDeque::new(),
            },
            Tail::Taken => return Self { tail: Tail::Taken },
        };
        pending.queue.push_back(Box::new(continuation));
        Self {
            tail: Tail::Pending(pending),
        }
    }

    /// The status if the future has already completed.
    pub fn status(&self) -> Option<TaskStatus> {
        match &self.tail {
            Tail::Ready(completion) => Some(completion.status()),
            _ => None,
        }
    }

    /// Returns `true` if the completion is available without polling.
    pub fn is_completed(&self) -> bool {
        matches!(self.tail, Tail::Ready(_))
    }

    /// Take the completion if it is ready, otherwise give the future back.
    pub fn into_ready(self) -> Result<Completion<T>, Self> {
        match self.tail {
            Tail::Ready(completion) => Ok(completion),
            tail => Err(Self { tail }),
        }
    }

    /// Await the chain and surface a single error.
    pub async fn into_result(self) -> Result<T, ChainError>
    where
        T: Send + 'static,
    {
        self.await.into_result()
    }

    /// Drive the future on the tokio runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<Completion<T>>
    where
        T: Send + 'static,
    {
        tokio::spawn(self)
    }
}

impl<T> Future for ChainFuture<T> {
    type Output = Completion<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut pending = match std::mem::replace(&mut this.tail, Tail::Taken) {
            Tail::Pending(pending) => pending,
            Tail::Ready(completion) => return Poll::Ready(completion),
            Tail::Taken => panic!("ChainFuture polled after completion"),
        };

        // Drive the queue iteratively. Continuations that complete inline are
        // chained in this loop; a pending one becomes the new head and its own
        // queue is spliced in front of ours.
        loop {
            let mut completion = match pending.head.as_mut().poll(cx) {
                Poll::Ready(completion) => completion,
                Poll::Pending => {
                    this.tail = Tail::Pending(pending);
                    return Poll::Pending;
                }
            };

            loop {
                let Some(continuation) = pending.queue.pop_front() else {
                    return Poll::Ready(completion);
                };
                match continuation(completion).tail {
                    Tail::Ready(next) => completion = next,
                    Tail::Pending(inner) => {
                        pending.head = inner.head;
                        for queued in inner.queue.into_iter().rev() {
                            pending.queue.push_front(queued);
                        }
                        break;
                    }
                    Tail::Taken => panic!("continuation returned a completed ChainFuture"),
                }
            }
        }
    }
}

impl<T> std::fmt::Debug for ChainFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainFuture")
            .field("status", &self.status())
            .finish()
    }
}
