//! Per-cycle retry state.

use std::sync::Arc;
use std::time::Duration;

use crate::completion::TaskStatus;
use crate::fault::Fault;

use super::backoff::{JitterSource, RetrySchedule};
use super::filter::ExceptionFilter;

/// Callback invoked once when a retry cycle is finalized.
pub type CompletionHook = Arc<dyn Fn(TaskStatus) + Send + Sync>;

/// A one-shot, forward-only cursor over the retries a policy allows.
///
/// Created by [`RetryPolicy::context`](super::RetryPolicy::context) once per
/// retry cycle and finalized with [`complete`](Self::complete) when the cycle
/// ends, whatever the outcome. Finalizing runs the policy's completion hook,
/// if any, so policies holding resources can release them.
pub struct RetryContext {
    filter: ExceptionFilter,
    schedule: RetrySchedule,
    jitter: Arc<dyn JitterSource>,
    on_complete: Option<CompletionHook>,
    attempt: usize,
    completed: Option<TaskStatus>,
}

impl RetryContext {
    pub(crate) fn new(
        filter: ExceptionFilter,
        schedule: RetrySchedule,
        jitter: Arc<dyn JitterSource>,
        on_complete: Option<CompletionHook>,
    ) -> Self {
        Self {
            filter,
            schedule,
            jitter,
            on_complete,
            attempt: 0,
            completed: None,
        }
    }

    /// Number of retries granted so far.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// Decide whether `fault` may be retried, returning the delay before the
    /// next attempt.
    ///
    /// A fault rejected by the filter ends the cycle regardless of how many
    /// attempts remain.
    pub fn next_delay(&mut self, fault: &Fault) -> Option<Duration> {
        if self.completed.is_some() || !self.filter.can_retry(fault) {
            return None;
        }
        let delay = self.schedule.delay(self.attempt, self.jitter.as_ref())?;
        self.attempt += 1;
        Some(delay)
    }

    /// Finalize the cycle with the chain's terminal status.
    ///
    /// Returns `true` only for the call that actually finalized the context;
    /// the completion hook runs on that call and never again.
    pub fn complete(&mut self, status: TaskStatus) -> bool {
        if self.completed.is_some() {
            return false;
        }
        self.completed = Some(status);
        if let Some(hook) = self.on_complete.take() {
            hook(status);
        }
        true
    }

    /// The status the context was finalized with, if any.
    pub fn completed(&self) -> Option<TaskStatus> {
        self.completed
    }
}

impl std::fmt::Debug for RetryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryContext")
            .field("filter", &self.filter)
            .field("schedule", &self.schedule)
            .field("on_complete", &self.on_complete.is_some())
            .field("attempt", &self.attempt)
            .field("completed", &self.completed)
            .finish()
    }
}
