//! Timed delays between steps.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::chain::Chain;
use crate::completion::ExecuteOptions;
use crate::fault::{ChainError, Fault, StepResult};

/// How long a delay step waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delay {
    /// Wait for a fixed duration.
    For(Duration),
    /// Wait until the chain is cancelled.
    Infinite,
}

impl Delay {
    /// Interpret a millisecond count, where `-1` means infinite.
    pub fn from_millis(millis: i64) -> Result<Self, ChainError> {
        match millis {
            -1 => Ok(Self::Infinite),
            m if m < 0 => Err(ChainError::InvalidDelay { millis }),
            m => Ok(Self::For(Duration::from_millis(m as u64))),
        }
    }

    /// Wait for the delay, or fail with a cancellation fault if `token` fires first.
    pub async fn wait(self, token: &CancellationToken) -> StepResult {
        match self {
            Self::For(duration) => sleep(duration, token).await,
            Self::Infinite => {
                token.cancelled().await;
                Err(Fault::canceled())
            }
        }
    }
}

impl From<Duration> for Delay {
    fn from(duration: Duration) -> Self {
        Self::For(duration)
    }
}

/// Sleep for `duration` unless `token` is cancelled first.
pub(crate) async fn sleep(duration: Duration, token: &CancellationToken) -> StepResult {
    if token.is_cancelled() {
        return Err(Fault::canceled());
    }
    if duration.is_zero() {
        return Ok(());
    }

    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = token.cancelled() => Err(Fault::canceled()),
    }
}

impl<T> Chain<T>
where
    T: Clone + Send + 'static,
{
    /// Append a delay; the payload passes through unchanged.
    ///
    /// Cancelling the chain during the delay resolves the tail to canceled.
    pub fn delay(&mut self, delay: impl Into<Delay>) -> &mut Self {
        let delay = delay.into();
        self.execute_async(
            move |payload, token| async move { delay.wait(&token).await.map(|()| payload) },
            ExecuteOptions::None,
        )
    }

    /// Append a delay given in milliseconds; `-1` waits until cancellation.
    ///
    /// Any other negative value is rejected.
    pub fn delay_millis(&mut self, millis: i64) -> Result<&mut Self, ChainError> {
        let delay = Delay::from_millis(millis)?;
        Ok(self.delay(delay))
    }
}
