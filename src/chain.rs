//! The chain engine.
//!
//! A [`Chain`] threads a payload through a sequence of steps. Each append
//! replaces the chain's tail with a new [`ChainFuture`] that depends on the old
//! one. When the tail is already complete and the caller asks for it, a step
//! runs inline instead of being deferred.
//!
//! # Outcomes
//!
//! - A faulted tail skips every step until a [`Chain::compensate`] handles it.
//! - A canceled tail (or a cancelled token) skips every step; compensation never
//!   fires for cancellation.
//! - [`Chain::finally`] runs on every outcome and keeps the outcome unless the
//!   finalizer itself fails.

use std::future::{Future, IntoFuture};
use std::panic::{catch_unwind, AssertUnwindSafe};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::compensation::{Compensation, Disposition};
use crate::completion::{ChainFuture, Completion, ExecuteOptions, TaskStatus};
use crate::fault::{Fault, StepResult};

/// Unique identifier for a chain, used to correlate log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainId(pub Uuid);

impl ChainId {
    /// Create a new random chain ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ChainId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reusable asynchronous step.
///
/// Implement this for named units of work that are appended to many chains.
/// One-off steps are usually closures passed to [`Chain::execute`] or
/// [`Chain::execute_async`].
#[async_trait::async_trait]
pub trait Step<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    /// Run the step, returning the payload for the next step.
    async fn execute(&self, payload: T, token: CancellationToken) -> StepResult<T>;

    /// Name used in log events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Build a chain with `callback` and return its tail.
pub fn compose<T, F>(payload: T, token: CancellationToken, callback: F) -> ChainFuture<T>
where
    T: Clone + Send + 'static,
    F: FnOnce(&mut Chain<T>),
{
    let mut chain = Chain::new(payload, token);
    callback(&mut chain);
    chain.task()
}

/// A sequential chain of steps over a payload of type `T`.
pub struct Chain<T> {
    id: ChainId,
    payload: T,
    token: CancellationToken,
    tail: ChainFuture<T>,
}

impl<T> Chain<T>
where
    T: Clone + Send + 'static,
{
    /// Create a chain seeded with `payload`.
    ///
    /// If `token` is already cancelled the tail starts out canceled.
    pub fn new(payload: T, token: CancellationToken) -> Self {
        let tail = if token.is_cancelled() {
            ChainFuture::canceled()
        } else {
            ChainFuture::succeeded(payload.clone())
        };
        let id = ChainId::new();

        #[cfg(feature = "tracing")]
        tracing::debug!(chain = %id, canceled = token.is_cancelled(), "chain.created");

        Self {
            id,
            payload,
            token,
            tail,
        }
    }

    /// The chain's identifier.
    pub fn id(&self) -> ChainId {
        self.id
    }

    /// The payload the chain was seeded with.
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// The cancellation token shared by every step of the chain.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// The tail's status, if it has already completed.
    pub fn status(&self) -> Option<TaskStatus> {
        self.tail.status()
    }

    /// Consume the chain and return its tail.
    pub fn task(self) -> ChainFuture<T> {
        self.tail
    }

    /// Consume the chain and drive it on the tokio runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<Completion<T>> {
        self.tail.spawn()
    }

    /// Append a synchronous step that may mutate the payload in place.
    pub fn execute<F>(&mut self, step: F, options: ExecuteOptions) -> &mut Self
    where
        F: FnOnce(&mut T) -> StepResult + Send + 'static,
    {
        self.then(options, move |mut payload| match step(&mut payload) {
            Ok(()) => ChainFuture::succeeded(payload),
            Err(fault) => ChainFuture::ready(Completion::from_step_result(Err(fault))),
        })
    }

    /// Append an asynchronous step that returns the next payload.
    pub fn execute_async<F, Fut>(&mut self, step: F, options: ExecuteOptions) -> &mut Self
    where
        F: FnOnce(T, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = StepResult<T>> + Send + 'static,
    {
        let token = self.token.clone();
        self.then(options, move |payload| {
            ChainFuture::from_step(step(payload, token))
        })
    }

    /// Append a reusable [`Step`].
    pub fn step<S>(&mut self, step: S, options: ExecuteOptions) -> &mut Self
    where
        S: Step<T>,
    {
        #[cfg(feature = "tracing")]
        let id = self.id;

        self.execute_async(
            move |payload, token| async move {
                #[cfg(feature = "tracing")]
                tracing::info!(chain = %id, step = step.name(), "step.start");

                let result = step.execute(payload, token).await;

                #[cfg(feature = "tracing")]
                tracing::info!(chain = %id, step = step.name(), ok = result.is_ok(), "step.end");

                result
            },
            options,
        )
    }

    /// Append a compensation handler for a faulted tail.
    ///
    /// Does nothing if the tail has already succeeded. A canceled tail passes
    /// through without invoking the handler. The handler's
    /// [`Compensation::payload`] is the seed payload, not the latest one.
    pub fn compensate<H>(&mut self, handler: H) -> &mut Self
    where
        H: FnOnce(Compensation<T>) -> Disposition<T> + Send + 'static,
    {
        if self.tail.status() == Some(TaskStatus::Succeeded) {
            return self;
        }

        let id = self.id;
        let payload = self.payload.clone();
        let token = self.token.clone();

        self.tail = match self.take_tail().into_ready() {
            Ok(completion) => recover(id, completion, payload, token, handler),
            Err(pending) => pending
                .then(move |completion| recover(id, completion, payload, token, handler)),
        };
        self
    }

    /// Append a finalizer that runs on every outcome.
    ///
    /// The finalizer sees the latest payload on success. On fault or
    /// cancellation it sees the seed payload, not the latest one, since a
    /// faulted or canceled tail carries no payload. The original outcome is
    /// kept unless the finalizer fails, in which case its fault replaces the
    /// outcome.
    pub fn finally<F>(&mut self, continuation: F, options: ExecuteOptions) -> &mut Self
    where
        F: FnOnce(&T, TaskStatus) -> StepResult + Send + 'static,
    {
        let id = self.id;
        let seed = self.payload.clone();

        self.tail = match self.take_tail().into_ready() {
            Ok(completion) if options.runs_synchronously() => {
                ChainFuture::ready(finalize(id, completion, seed, continuation))
            }
            tail => deferred(tail).then(move |completion| {
                ChainFuture::ready(finalize(id, completion, seed, continuation))
            }),
        };
        self
    }

    /// Append a step that faults the chain with `fault`.
    pub fn fault(&mut self, fault: impl Into<Fault>) -> &mut Self {
        let fault = fault.into();
        self.then(ExecuteOptions::None, move |_| ChainFuture::faulted(fault))
    }

    /// Append a nested chain built by `callback` as a single step.
    ///
    /// The nested chain shares this chain's cancellation token and is built
    /// when the step runs.
    pub fn compose<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnOnce(&mut Chain<T>) + Send + 'static,
    {
        self.execute_async(
            move |payload, token| compose(payload, token, callback).map(Completion::into_step_result),
            ExecuteOptions::None,
        )
    }

    /// Append a nested chain over a payload projected from this one.
    ///
    /// The nested chain's outcome is propagated; on success this chain keeps
    /// its own payload.
    pub fn compose_with<U, P, F>(&mut self, project: P, callback: F) -> &mut Self
    where
        U: Clone + Send + 'static,
        P: FnOnce(&T) -> U + Send + 'static,
        F: FnOnce(&mut Chain<U>) + Send + 'static,
    {
        self.execute_async(
            move |payload, token| {
                let nested = compose(project(&payload), token, callback);
                async move { nested.await.into_step_result().map(|_| payload) }
            },
            ExecuteOptions::None,
        )
    }

    fn take_tail(&mut self) -> ChainFuture<T> {
        std::mem::replace(&mut self.tail, ChainFuture::canceled())
    }

    fn then<C>(&mut self, options: ExecuteOptions, continuation: C) -> &mut Self
    where
        C: FnOnce(T) -> ChainFuture<T> + Send + 'static,
    {
        let token = self.token.clone();

        self.tail = match self.take_tail().into_ready() {
            Ok(completion) if options.runs_synchronously() => {
                advance(completion, &token, continuation)
            }
            tail => deferred(tail)
                .then(move |completion| advance(completion, &token, continuation)),
        };
        self
    }
}

impl<T> IntoFuture for Chain<T>
where
    T: Clone + Send + 'static,
{
    type Output = Completion<T>;
    type IntoFuture = ChainFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.task()
    }
}

impl<T> std::fmt::Debug for Chain<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("id", &self.id)
            .field("tail", &self.tail)
            .finish()
    }
}

fn deferred<T>(tail: Result<Completion<T>, ChainFuture<T>>) -> ChainFuture<T> {
    tail.map_or_else(|pending| pending, ChainFuture::ready)
}

fn guarded<T>(f: impl FnOnce() -> ChainFuture<T>) -> ChainFuture<T> {
    catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|panic| ChainFuture::ready(Completion::Faulted(Fault::from_panic(panic))))
}

fn advance<T, C>(completion: Completion<T>, token: &CancellationToken, continuation: C) -> ChainFuture<T>
where
    C: FnOnce(T) -> ChainFuture<T>,
{
    match completion {
        Completion::Succeeded(_) if token.is_cancelled() => ChainFuture::canceled(),
        Completion::Succeeded(payload) => guarded(move || continuation(payload)),
        Completion::Faulted(fault) => ChainFuture::ready(Completion::Faulted(fault)),
        Completion::Canceled => ChainFuture::canceled(),
    }
}

#[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
fn recover<T, H>(
    id: ChainId,
    completion: Completion<T>,
    payload: T,
    token: CancellationToken,
    handler: H,
) -> ChainFuture<T>
where
    T: Clone + Send + 'static,
    H: FnOnce(Compensation<T>) -> Disposition<T>,
{
    let fault = match completion {
        Completion::Faulted(fault) => fault,
        other => return ChainFuture::ready(other),
    };

    #[cfg(feature = "tracing")]
    tracing::info!(chain = %id, fault = %fault, "compensate.start");

    guarded(move || {
        let disposition = handler(Compensation::new(fault, payload, token));

        #[cfg(feature = "tracing")]
        tracing::info!(chain = %id, disposition = disposition.label(), "compensate.end");

        disposition.into_future()
    })
}

#[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
fn finalize<T, F>(id: ChainId, completion: Completion<T>, seed: T, continuation: F) -> Completion<T>
where
    F: FnOnce(&T, TaskStatus) -> StepResult,
{
    let status = completion.status();
    let payload = completion.payload().unwrap_or(&seed);

    let fault = match catch_unwind(AssertUnwindSafe(|| continuation(payload, status))) {
        Ok(Ok(())) => return completion,
        Ok(Err(fault)) => fault,
        Err(panic) => Fault::from_panic(panic),
    };

    #[cfg(feature = "tracing")]
    match completion.fault() {
        Some(original) => tracing::warn!(
            chain = %id,
            original = %original,
            fault = %fault,
            "finally.superseded"
        ),
        None => tracing::warn!(chain = %id, ?status, fault = %fault, "finally.failed"),
    }

    Completion::from_step_result(Err(fault))
}
