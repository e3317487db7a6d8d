//! Retry policies and the retry combinator.
//!
//! A [`RetryPolicy`] pairs an [`ExceptionFilter`] with a [`RetrySchedule`].
//! [`Chain::retry`] builds the inner chain once per attempt; when an attempt
//! faults it asks the cycle's [`RetryContext`] for the next delay and either
//! tries again or gives up with the attempt's fault. The context is finalized
//! exactly once by a finalizer on the outer chain.

mod backoff;
mod context;
mod filter;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::chain::{compose, Chain, ChainId};
use crate::completion::{Completion, ExecuteOptions, TaskStatus};
use crate::delay::sleep;
use crate::fault::StepResult;

pub use backoff::{ExponentialBackoff, JitterSource, RetrySchedule, ThreadRngJitter};
pub use context::{CompletionHook, RetryContext};
pub use filter::ExceptionFilter;

/// Immutable retry configuration.
#[derive(Clone)]
pub struct RetryPolicy {
    filter: ExceptionFilter,
    schedule: RetrySchedule,
    jitter: Arc<dyn JitterSource>,
    on_complete: Option<CompletionHook>,
}

impl RetryPolicy {
    /// Build a policy from a schedule, retrying every fault.
    pub fn from_schedule(schedule: RetrySchedule) -> Self {
        Self {
            filter: ExceptionFilter::All,
            schedule,
            jitter: Arc::new(ThreadRngJitter),
            on_complete: None,
        }
    }

    /// `limit` retries with no delay between attempts.
    pub fn immediate(limit: usize) -> Self {
        Self::from_schedule(RetrySchedule::Immediate { limit })
    }

    /// One retry per interval, waiting the interval before each.
    pub fn intervals(intervals: impl IntoIterator<Item = Duration>) -> Self {
        Self::from_schedule(RetrySchedule::Intervals {
            intervals: intervals.into_iter().collect(),
        })
    }

    /// Like [`intervals`](Self::intervals), with intervals in milliseconds.
    pub fn intervals_millis(intervals: impl IntoIterator<Item = u64>) -> Self {
        Self::intervals(intervals.into_iter().map(Duration::from_millis))
    }

    /// `count` retries at a fixed interval.
    pub fn interval(count: usize, interval: Duration) -> Self {
        Self::intervals(std::iter::repeat(interval).take(count))
    }

    /// `limit` retries with jittered exponential backoff.
    pub fn exponential(
        limit: usize,
        min_interval: Duration,
        max_interval: Duration,
        delta: Duration,
    ) -> Self {
        Self::from_schedule(RetrySchedule::Exponential(ExponentialBackoff::new(
            limit,
            min_interval,
            max_interval,
            delta,
        )))
    }

    /// `limit` retries with a linearly growing interval.
    pub fn incremental(limit: usize, initial: Duration, increment: Duration) -> Self {
        Self::from_schedule(RetrySchedule::Incremental {
            limit,
            initial,
            increment,
        })
    }

    /// Replace the exception filter.
    pub fn with_filter(mut self, filter: ExceptionFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Replace the source of jitter.
    pub fn with_jitter_source(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Run `hook` once with the terminal status whenever a retry cycle built
    /// from this policy is finalized.
    pub fn on_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn(TaskStatus) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(hook));
        self
    }

    /// The exception filter.
    pub fn filter(&self) -> &ExceptionFilter {
        &self.filter
    }

    /// The retry schedule.
    pub fn schedule(&self) -> &RetrySchedule {
        &self.schedule
    }

    /// Start a new retry cycle.
    pub fn context(&self) -> RetryContext {
        RetryContext::new(
            self.filter.clone(),
            self.schedule.clone(),
            self.jitter.clone(),
            self.on_complete.clone(),
        )
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("filter", &self.filter)
            .field("schedule", &self.schedule)
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

impl ExceptionFilter {
    /// An immediate policy using this filter.
    pub fn immediate(self, limit: usize) -> RetryPolicy {
        RetryPolicy::immediate(limit).with_filter(self)
    }

    /// An interval-list policy using this filter.
    pub fn intervals(self, intervals: impl IntoIterator<Item = Duration>) -> RetryPolicy {
        RetryPolicy::intervals(intervals).with_filter(self)
    }

    /// A fixed-interval policy using this filter.
    pub fn interval(self, count: usize, interval: Duration) -> RetryPolicy {
        RetryPolicy::interval(count, interval).with_filter(self)
    }

    /// An exponential policy using this filter.
    pub fn exponential(
        self,
        limit: usize,
        min_interval: Duration,
        max_interval: Duration,
        delta: Duration,
    ) -> RetryPolicy {
        RetryPolicy::exponential(limit, min_interval, max_interval, delta).with_filter(self)
    }

    /// An incremental policy using this filter.
    pub fn incremental(self, limit: usize, initial: Duration, increment: Duration) -> RetryPolicy {
        RetryPolicy::incremental(limit, initial, increment).with_filter(self)
    }
}

type SharedContext = Arc<Mutex<Option<RetryContext>>>;

impl<T> Chain<T>
where
    T: Clone + Send + 'static,
{
    /// Append a step that builds a nested chain with `callback` and retries it
    /// according to `policy`.
    ///
    /// Every attempt starts from the payload the step received. The retry
    /// context is finalized once when this chain's tail completes.
    pub fn retry<F>(&mut self, policy: RetryPolicy, callback: F) -> &mut Self
    where
        F: Fn(&mut Chain<T>) + Send + Sync + 'static,
    {
        let id = self.id();
        let shared: SharedContext = Arc::default();
        let cycle = shared.clone();

        self.execute_async(
            move |payload, token| {
                *cycle.lock() = Some(policy.context());
                attempt(id, payload, token, cycle, callback)
            },
            ExecuteOptions::None,
        );

        self.finally(
            move |_, status| {
                let context = shared.lock().take();
                if let Some(mut context) = context {
                    if context.complete(status) {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(
                            chain = %id,
                            ?status,
                            retries = context.attempt(),
                            "retry.complete"
                        );
                    }
                }
                Ok(())
            },
            ExecuteOptions::RunSynchronously,
        )
    }
}

#[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
async fn attempt<T, F>(
    id: ChainId,
    payload: T,
    token: CancellationToken,
    context: SharedContext,
    callback: F,
) -> StepResult<T>
where
    T: Clone + Send + 'static,
    F: Fn(&mut Chain<T>),
{
    loop {
        let fault = match compose(payload.clone(), token.clone(), &callback).await {
            Completion::Faulted(fault) => fault,
            other => return other.into_step_result(),
        };

        let delay = context
            .lock()
            .as_mut()
            .and_then(|context| context.next_delay(&fault));

        let Some(delay) = delay else {
            #[cfg(feature = "tracing")]
            tracing::error!(chain = %id, fault = %fault, "retry.exhausted");

            return Err(fault);
        };

        #[cfg(feature = "tracing")]
        tracing::warn!(chain = %id, fault = %fault, ?delay, "retry.attempt");

        sleep(delay, &token).await?;
    }
}
