//! Repeating a nested chain until told to stop.
//!
//! Each iteration builds a fresh nested chain from the latest payload. The
//! controller is a loop, not recursion, so long-lived polling chains never
//! grow the stack.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::chain::{compose, Chain, ChainId};
use crate::completion::ExecuteOptions;
use crate::delay::sleep;
use crate::fault::{ChainError, StepResult};

/// When a repeat step stops iterating.
#[derive(Debug, Clone)]
pub enum RepeatLimit {
    /// Iterate until the token is cancelled. At least one iteration always runs.
    Until(CancellationToken),
    /// Iterate exactly this many times.
    Times(usize),
}

impl RepeatLimit {
    fn reached(&self, iterations: usize) -> bool {
        match self {
            Self::Until(stop) => stop.is_cancelled(),
            Self::Times(count) => iterations >= *count,
        }
    }

    /// Wait out the interval between iterations.
    ///
    /// Returns `true` if the stop token fired while waiting.
    async fn pause(&self, interval: Duration, token: &CancellationToken) -> StepResult<bool> {
        if interval.is_zero() {
            tokio::task::yield_now().await;
            return Ok(self.reached(0));
        }

        match self {
            Self::Until(stop) => tokio::select! {
                result = sleep(interval, token) => result.map(|()| false),
                _ = stop.cancelled() => Ok(true),
            },
            Self::Times(_) => sleep(interval, token).await.map(|()| false),
        }
    }
}

impl<T> Chain<T>
where
    T: Clone + Send + 'static,
{
    /// Append a step that repeats the nested chain built by `callback` until
    /// `stop` is cancelled, waiting `interval` between iterations.
    ///
    /// A faulted or canceled iteration ends the repetition with that outcome.
    pub fn repeat<F>(&mut self, interval: Duration, stop: CancellationToken, callback: F) -> &mut Self
    where
        F: Fn(&mut Chain<T>) + Send + Sync + 'static,
    {
        self.repeat_after(Duration::ZERO, interval, stop, callback)
    }

    /// Like [`repeat`](Self::repeat), waiting `initial_delay` before the first iteration.
    pub fn repeat_after<F>(
        &mut self,
        initial_delay: Duration,
        interval: Duration,
        stop: CancellationToken,
        callback: F,
    ) -> &mut Self
    where
        F: Fn(&mut Chain<T>) + Send + Sync + 'static,
    {
        self.repeat_with(initial_delay, interval, RepeatLimit::Until(stop), callback)
    }

    /// Append a step that runs the nested chain `count` times.
    pub fn repeat_times<F>(&mut self, count: usize, interval: Duration, callback: F) -> &mut Self
    where
        F: Fn(&mut Chain<T>) + Send + Sync + 'static,
    {
        self.repeat_with(Duration::ZERO, interval, RepeatLimit::Times(count), callback)
    }

    /// Like [`repeat`](Self::repeat), with the interval in milliseconds.
    ///
    /// Negative intervals are rejected.
    pub fn repeat_millis<F>(
        &mut self,
        interval_millis: i64,
        stop: CancellationToken,
        callback: F,
    ) -> Result<&mut Self, ChainError>
    where
        F: Fn(&mut Chain<T>) + Send + Sync + 'static,
    {
        let interval = u64::try_from(interval_millis)
            .map(Duration::from_millis)
            .map_err(|_| ChainError::InvalidInterval {
                millis: interval_millis,
            })?;
        Ok(self.repeat(interval, stop, callback))
    }

    /// Append a repeat step with an explicit limit.
    pub fn repeat_with<F>(
        &mut self,
        initial_delay: Duration,
        interval: Duration,
        limit: RepeatLimit,
        callback: F,
    ) -> &mut Self
    where
        F: Fn(&mut Chain<T>) + Send + Sync + 'static,
    {
        let id = self.id();
        self.execute_async(
            move |payload, token| iterate(id, payload, token, initial_delay, interval, limit, callback),
            ExecuteOptions::None,
        )
    }
}

#[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
async fn iterate<T, F>(
    id: ChainId,
    mut payload: T,
    token: CancellationToken,
    initial_delay: Duration,
    interval: Duration,
    limit: RepeatLimit,
    callback: F,
) -> StepResult<T>
where
    T: Clone + Send + 'static,
    F: Fn(&mut Chain<T>),
{
    if matches!(limit, RepeatLimit::Times(0)) {
        return Ok(payload);
    }

    sleep(initial_delay, &token).await?;

    let mut iterations = 0;
    loop {
        payload = compose(payload, token.clone(), &callback)
            .await
            .into_step_result()?;
        iterations += 1;

        #[cfg(feature = "tracing")]
        tracing::debug!(chain = %id, iteration = iterations, "repeat.iteration");

        if limit.reached(iterations) || limit.pause(interval, &token).await? {
            #[cfg(feature = "tracing")]
            tracing::info!(chain = %id, iterations, "repeat.stopped");

            return Ok(payload);
        }
    }
}
