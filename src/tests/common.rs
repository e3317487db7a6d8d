//! Common types and step builders for tests.
//!
//! This module contains:
//! - `MathContext`: The payload threaded through every test chain
//! - `MathError`: Error types for math operations
//! - Step builders: `add`, `sub`, `Flaky`
//! - `Counter`: a shared counter for observing how often closures run

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{Chain, StepResult};

// ============================================================================
// Error Type
// ============================================================================

/// Errors that can occur during Math chains.
#[derive(thiserror::Error, Clone, Debug, PartialEq)]
pub enum MathError {
    /// Arithmetic overflow during addition.
    #[error("Overflow")]
    Overflow,

    /// Arithmetic underflow during subtraction.
    #[error("Underflow")]
    Underflow,

    /// Transient error that may succeed on retry.
    #[error("Transient")]
    Transient,
}

/// An error type unrelated to `MathError`, for filter tests.
#[derive(thiserror::Error, Clone, Debug, PartialEq)]
#[error("rejected: {0}")]
pub struct Rejected(pub &'static str);

// ============================================================================
// Context Type
// ============================================================================

/// The payload for Math chains.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct MathContext {
    /// Named registers storing computed values.
    pub r: BTreeMap<&'static str, u8>,
}

impl MathContext {
    /// The value of a register, if set.
    pub fn get(&self, name: &str) -> Option<u8> {
        self.r.get(name).copied()
    }
}

/// A fresh chain over an empty context.
pub fn math_chain() -> Chain<MathContext> {
    Chain::new(MathContext::default(), CancellationToken::new())
}

// ============================================================================
// Step Builders
// ============================================================================

/// Computes `a + b` into register `name`.
pub fn add(name: &'static str, a: u8, b: u8) -> impl FnOnce(&mut MathContext) -> StepResult + Send {
    move |ctx| {
        let x = a.checked_add(b).ok_or(MathError::Overflow)?;
        ctx.r.insert(name, x);
        Ok(())
    }
}

/// Computes `a - b` into register `name`.
pub fn sub(name: &'static str, a: u8, b: u8) -> impl FnOnce(&mut MathContext) -> StepResult + Send {
    move |ctx| {
        let x = a.checked_sub(b).ok_or(MathError::Underflow)?;
        ctx.r.insert(name, x);
        Ok(())
    }
}

/// Increments register `name`, saturating at `u8::MAX`.
pub fn bump(name: &'static str) -> impl FnOnce(&mut MathContext) -> StepResult + Send {
    move |ctx| {
        let entry = ctx.r.entry(name).or_default();
        *entry = entry.saturating_add(1);
        Ok(())
    }
}

// ============================================================================
// Counters
// ============================================================================

/// A shared invocation counter.
#[derive(Clone, Default, Debug)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    /// Record one invocation and return the new count.
    pub fn hit(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Number of recorded invocations.
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Flaky step: fails with `error` for the first `failures` invocations.
///
/// Every invocation is recorded on `calls`; on success the step writes the
/// attempt number into register `name`.
#[derive(Clone)]
pub struct Flaky {
    pub name: &'static str,
    pub failures: usize,
    pub error: MathError,
    pub calls: Counter,
}

impl Flaky {
    /// A step failing `failures` times with `MathError::Transient`.
    pub fn new(name: &'static str, failures: usize) -> Self {
        Self {
            name,
            failures,
            error: MathError::Transient,
            calls: Counter::default(),
        }
    }

    /// Fail with a different error.
    pub fn with_error(mut self, error: MathError) -> Self {
        self.error = error;
        self
    }

    /// Run one attempt against `ctx`.
    pub fn attempt(&self, ctx: &mut MathContext) -> StepResult {
        let call = self.calls.hit();
        if call <= self.failures {
            return Err(self.error.clone().into());
        }
        ctx.r.insert(self.name, u8::try_from(call).unwrap_or(u8::MAX));
        Ok(())
    }
}

#[async_trait::async_trait]
impl crate::Step<MathContext> for Flaky {
    async fn execute(&self, mut payload: MathContext, _token: CancellationToken) -> StepResult<MathContext> {
        self.attempt(&mut payload)?;
        Ok(payload)
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}
