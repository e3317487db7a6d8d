//! Repeat tests.
//!
//! Tests for repetition bounded by a stop token or a fixed count.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::{Chain, ChainError, ExecuteOptions, TaskStatus};

use super::common::{bump, math_chain, sub, MathContext, Counter};

/// Test that stopping after the k-th iteration runs exactly k iterations.
///
/// Verifies:
/// - Each iteration sees the payload of the previous one
/// - No iteration starts after the stop token fires
#[tokio::test]
async fn stop_after_k_iterations() {
    let stop = CancellationToken::new();
    let iterations = Counter::default();
    let (seen, trigger) = (iterations.clone(), stop.clone());

    let mut chain = math_chain();
    chain.repeat(Duration::ZERO, stop, move |inner| {
        let (seen, trigger) = (seen.clone(), trigger.clone());
        inner.execute(bump("n"), ExecuteOptions::None).execute(
            move |_| {
                if seen.hit() == 4 {
                    trigger.cancel();
                }
                Ok(())
            },
            ExecuteOptions::None,
        );
    });

    let ctx = chain.await.into_result().unwrap();
    assert_eq!(iterations.count(), 4);
    assert_eq!(ctx.get("n"), Some(4));
}

/// Test that the first iteration always runs, even if already stopped.
#[tokio::test]
async fn first_iteration_always_runs() {
    let stop = CancellationToken::new();
    stop.cancel();

    let mut chain = math_chain();
    chain.repeat(Duration::from_millis(10), stop, |inner| {
        inner.execute(bump("n"), ExecuteOptions::None);
    });

    assert_eq!(chain.await.into_result().unwrap().get("n"), Some(1));
}

/// Test that a fixed count runs exactly that many iterations.
#[tokio::test(start_paused = true)]
async fn repeat_times_runs_count_iterations() {
    let start = tokio::time::Instant::now();

    let mut chain = math_chain();
    chain.repeat_times(3, Duration::from_millis(100), |inner| {
        inner.execute(bump("n"), ExecuteOptions::None);
    });

    assert_eq!(chain.await.into_result().unwrap().get("n"), Some(3));
    // Intervals only separate iterations.
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert!(start.elapsed() < Duration::from_millis(300));
}

/// Test that zero iterations leaves the payload untouched.
#[tokio::test]
async fn repeat_zero_times_is_a_pass_through() {
    let mut chain = math_chain();
    chain.repeat_times(0, Duration::ZERO, |inner| {
        inner.execute(bump("n"), ExecuteOptions::None);
    });

    assert_eq!(chain.await.into_result().unwrap(), MathContext::default());
}

/// Test that the stop token interrupts the interval between iterations.
#[tokio::test(start_paused = true)]
async fn stop_interrupts_interval() {
    let stop = CancellationToken::new();
    let iterations = Counter::default();
    let seen = iterations.clone();

    let mut chain = math_chain();
    chain.repeat(Duration::from_secs(3600), stop.clone(), move |inner| {
        let seen = seen.clone();
        inner.execute(
            move |_| {
                seen.hit();
                Ok(())
            },
            ExecuteOptions::None,
        );
    });

    let handle = chain.spawn();
    tokio::time::sleep(Duration::from_secs(1)).await;
    stop.cancel();

    assert!(handle.await.unwrap().is_succeeded());
    assert_eq!(iterations.count(), 1);
}

/// Test that a faulted iteration ends the repetition with its fault.
#[tokio::test]
async fn faulted_iteration_stops_repeat() {
    let stop = CancellationToken::new();
    let iterations = Counter::default();
    let seen = iterations.clone();

    let mut chain = math_chain();
    chain.repeat(Duration::ZERO, stop, move |inner| {
        let seen = seen.clone();
        inner.execute(
            move |ctx| {
                if seen.hit() == 2 {
                    return sub("n", 0, 1)(ctx);
                }
                Ok(())
            },
            ExecuteOptions::None,
        );
    });

    assert_eq!(chain.await.status(), TaskStatus::Faulted);
    assert_eq!(iterations.count(), 2);
}

/// Test that cancelling the chain ends the repetition as canceled.
#[tokio::test(start_paused = true)]
async fn chain_cancellation_cancels_repeat() {
    let token = CancellationToken::new();

    let mut chain = Chain::new(MathContext::default(), token.clone());
    chain.repeat(Duration::from_millis(10), CancellationToken::new(), |inner| {
        inner.execute(bump("n"), ExecuteOptions::None);
    });

    let handle = chain.spawn();
    tokio::time::sleep(Duration::from_millis(55)).await;
    token.cancel();

    assert!(handle.await.unwrap().is_canceled());
}

/// Test that the initial delay postpones the first iteration.
#[tokio::test(start_paused = true)]
async fn repeat_after_waits_initial_delay() {
    let stop = CancellationToken::new();
    stop.cancel();
    let start = tokio::time::Instant::now();

    let mut chain = math_chain();
    chain.repeat_after(Duration::from_millis(250), Duration::ZERO, stop, |inner| {
        inner.execute(bump("n"), ExecuteOptions::None);
    });

    assert_eq!(chain.await.into_result().unwrap().get("n"), Some(1));
    assert!(start.elapsed() >= Duration::from_millis(250));
}

/// Test that negative millisecond intervals are rejected up front.
#[test]
fn negative_interval_is_rejected() {
    let mut chain = math_chain();
    let result = chain
        .repeat_millis(-5, CancellationToken::new(), |_| {})
        .map(|_| ());
    assert!(matches!(
        result,
        Err(ChainError::InvalidInterval { millis: -5 })
    ));
}
