//! Tests for stepchain chains.
//!
//! ## Test Organization
//!
//! - `common`: Shared context, errors, step builders and counters
//! - `execute`: Sequential execution and the synchronous fast path
//! - `compensate`: Compensation dispositions
//! - `finally`: Finalizers on every outcome
//! - `cancel`: Cooperative cancellation at step boundaries
//! - `retry`: Retry policies, filters and context finalization
//! - `repeat`: Repetition with a stop token or a fixed count
//! - `delay`: Delays and their interaction with cancellation
//! - `compose`: Nested chains and reusable steps
//!
//! ## Test Programs
//!
//! All tests use a "Math" domain: steps add or subtract into named registers
//! of a `MathContext`, failing with `MathError` on overflow or underflow.

mod common;

mod repeat;
