#![deny(missing_docs)]

//! Stepchain — sequential async step chains with compensation, retry and repeat.
//!
//! # Design Goals
//!
//! - **Structured control flow over futures**: try/catch/finally mapped onto a
//!   chain of steps, with exactly-once finalizers
//! - **Single root cause**: a faulted chain carries one [`Fault`], never an
//!   aggregate of nested errors
//! - **Cancellation is not failure**: a cancelled chain skips its remaining
//!   steps and compensation, but still runs its finalizers
//!
//! # Core Concepts
//!
//! - [`Chain`]: the engine; each append replaces the chain's tail
//! - [`ChainFuture`]: the tail, either already complete or pending
//! - [`Compensation`] / [`Disposition`]: the decision point for a faulted tail
//! - [`RetryPolicy`]: exception filter plus retry schedule
//!
//! # Example
//!
//! ```
//! use stepchain::{Chain, ExecuteOptions, RetryPolicy};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut chain = Chain::new(1u32, CancellationToken::new());
//! chain
//!     .execute(|n| { *n += 1; Ok(()) }, ExecuteOptions::RunSynchronously)
//!     .retry(RetryPolicy::immediate(3), |inner| {
//!         inner.execute(|n| { *n *= 10; Ok(()) }, ExecuteOptions::None);
//!     })
//!     .finally(|_, status| { println!("{status:?}"); Ok(()) }, ExecuteOptions::None);
//!
//! assert_eq!(chain.await.into_result().unwrap(), 20);
//! # }
//! ```

pub mod chain;
pub mod compensation;
pub mod completion;
pub mod delay;
pub mod fault;
pub mod repeat;
pub mod retry;

// Re-exports for convenience
pub use chain::{compose, Chain, ChainId, Step};
pub use compensation::{Compensation, Disposition};
pub use completion::{ChainFuture, Completion, ExecuteOptions, TaskStatus};
pub use delay::Delay;
pub use fault::{ChainError, Fault, FaultType, StepResult};
pub use repeat::RepeatLimit;
pub use retry::{
    CompletionHook, ExceptionFilter, ExponentialBackoff, JitterSource, RetryContext, RetryPolicy,
    RetrySchedule, ThreadRngJitter,
};

#[cfg(test)]
mod tests;
