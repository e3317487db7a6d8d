//! Retry schedules and jittered backoff.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Source of randomness for jittered backoff.
///
/// Queried once per retry attempt.
pub trait JitterSource: Send + Sync {
    /// A value uniformly distributed in `[low, high]`.
    fn sample(&self, low: Duration, high: Duration) -> Duration;
}

/// Jitter drawn from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn sample(&self, low: Duration, high: Duration) -> Duration {
        if high <= low {
            return low;
        }
        let secs = rand::thread_rng().gen_range(low.as_secs_f64()..=high.as_secs_f64());
        saturating_secs(secs).clamp(low, high)
    }
}

/// Seconds to a duration, saturating at zero and at `Duration::MAX`.
///
/// NaN counts as zero.
fn saturating_secs(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

fn default_jitter() -> (f64, f64) {
    (0.8, 1.2)
}

fn default_factor() -> f64 {
    2.0
}

/// Exponential backoff with a jitter band.
///
/// For attempt `i` (0-based) the delay is
/// `min(max_interval, min_interval + factor^i * uniform(delta * jitter.0, delta * jitter.1))`.
///
/// Parameters are not validated. Negative or NaN multipliers and factors count
/// as zero, and products too large for a [`Duration`] saturate to
/// `max_interval`, so a delay never falls outside
/// `[min(min_interval, max_interval), max_interval]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExponentialBackoff {
    /// Number of retries.
    pub limit: usize,
    /// Delay floor added to every attempt.
    pub min_interval: Duration,
    /// Delay cap.
    pub max_interval: Duration,
    /// Base increment scaled by the factor.
    pub delta: Duration,
    /// Lower and upper multipliers of `delta`.
    #[serde(default = "default_jitter")]
    pub jitter: (f64, f64),
    /// Growth factor per attempt.
    #[serde(default = "default_factor")]
    pub factor: f64,
}

impl ExponentialBackoff {
    /// Backoff with the default `0.8..1.2` jitter band and a factor of 2.
    pub fn new(limit: usize, min_interval: Duration, max_interval: Duration, delta: Duration) -> Self {
        Self {
            limit,
            min_interval,
            max_interval,
            delta,
            jitter: default_jitter(),
            factor: default_factor(),
        }
    }

    /// Override the jitter band.
    pub fn with_jitter(mut self, low: f64, high: f64) -> Self {
        self.jitter = (low, high);
        self
    }

    /// Override the growth factor.
    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    /// The smallest and largest delay attempt `attempt` can produce.
    pub fn bounds(&self, attempt: usize) -> (Duration, Duration) {
        let (low, high) = self.band();
        (self.scaled(attempt, low), self.scaled(attempt, high))
    }

    /// The delay before retry `attempt`, drawing fresh jitter.
    pub fn delay(&self, attempt: usize, jitter: &dyn JitterSource) -> Duration {
        let (low, high) = self.band();
        self.scaled(attempt, jitter.sample(low, high))
    }

    fn band(&self) -> (Duration, Duration) {
        let delta = self.delta.as_secs_f64();
        let low = saturating_secs(delta * self.jitter.0.max(0.0));
        let high = saturating_secs(delta * self.jitter.1.max(0.0));
        (low, high.max(low))
    }

    fn scaled(&self, attempt: usize, sample: Duration) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let growth = sample.as_secs_f64() * self.factor.max(0.0).powi(exponent);
        self.min_interval
            .saturating_add(saturating_secs(growth))
            .min(self.max_interval)
    }
}

/// The sequence of delays a retry policy walks through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetrySchedule {
    /// `limit` retries with no delay.
    Immediate {
        /// Number of retries.
        limit: usize,
    },
    /// One retry per listed interval.
    Intervals {
        /// Delay before each retry.
        intervals: Vec<Duration>,
    },
    /// Jittered exponential backoff.
    Exponential(ExponentialBackoff),
    /// `initial`, `initial + increment`, `initial + 2 * increment`, ...
    Incremental {
        /// Number of retries.
        limit: usize,
        /// Delay before the first retry.
        initial: Duration,
        /// Added to the delay for each subsequent retry.
        increment: Duration,
    },
}

impl RetrySchedule {
    /// Maximum number of retries (not counting the first attempt).
    pub fn limit(&self) -> usize {
        match self {
            Self::Immediate { limit } => *limit,
            Self::Intervals { intervals } => intervals.len(),
            Self::Exponential(backoff) => backoff.limit,
            Self::Incremental { limit, .. } => *limit,
        }
    }

    /// The delay before retry `attempt`, or `None` once the schedule is exhausted.
    pub fn delay(&self, attempt: usize, jitter: &dyn JitterSource) -> Option<Duration> {
        if attempt >= self.limit() {
            return None;
        }
        let delay = match self {
            Self::Immediate { .. } => Duration::ZERO,
            Self::Intervals { intervals } => intervals[attempt],
            Self::Exponential(backoff) => backoff.delay(attempt, jitter),
            Self::Incremental {
                initial, increment, ..
            } => {
                let steps = u32::try_from(attempt).unwrap_or(u32::MAX);
                initial.saturating_add(increment.saturating_mul(steps))
            }
        };
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(f64);

    impl JitterSource for Fixed {
        fn sample(&self, low: Duration, high: Duration) -> Duration {
            low + (high - low).mul_f64(self.0)
        }
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn exponential_delays_stay_in_band() {
        let backoff = ExponentialBackoff::new(10, ms(100), ms(60_000), ms(500));

        for attempt in 0..10 {
            let scale = 2f64.powi(attempt as i32);
            let low = ms(100) + ms(500).mul_f64(0.8 * scale);
            let high = (ms(100) + ms(500).mul_f64(1.2 * scale)).min(ms(60_000));

            for _ in 0..20 {
                let delay = backoff.delay(attempt, &ThreadRngJitter);
                assert!(
                    delay >= low.min(ms(60_000)) && delay <= high,
                    "attempt {attempt}: {delay:?} not in [{low:?}, {high:?}]"
                );
            }
        }
    }

    #[test]
    fn exponential_is_capped() {
        let backoff = ExponentialBackoff::new(64, ms(100), ms(5_000), ms(500));
        assert_eq!(backoff.delay(63, &Fixed(1.0)), ms(5_000));
        assert_eq!(backoff.bounds(63), (ms(5_000), ms(5_000)));
    }

    #[test]
    fn exponential_parameters_are_configurable() {
        let backoff = ExponentialBackoff::new(5, ms(0), ms(60_000), ms(100))
            .with_jitter(1.0, 1.0)
            .with_factor(3.0);
        assert_eq!(backoff.delay(0, &Fixed(0.5)), ms(100));
        assert_eq!(backoff.delay(2, &Fixed(0.5)), ms(900));
    }

    #[test]
    fn huge_jitter_saturates_to_the_cap() {
        let backoff =
            ExponentialBackoff::new(5, ms(100), ms(5_000), ms(500)).with_jitter(1e30, 1e30);
        assert_eq!(backoff.delay(0, &Fixed(0.5)), ms(5_000));
        assert_eq!(backoff.delay(0, &ThreadRngJitter), ms(5_000));
        assert_eq!(backoff.bounds(4), (ms(5_000), ms(5_000)));
    }

    #[test]
    fn infinite_jitter_band_does_not_panic() {
        let backoff = ExponentialBackoff::new(5, ms(100), ms(5_000), ms(500))
            .with_jitter(0.5, f64::INFINITY);
        let (low, high) = backoff.bounds(0);
        assert_eq!(low, ms(350));
        assert_eq!(high, ms(5_000));

        let delay = backoff.delay(0, &ThreadRngJitter);
        assert!(delay >= low && delay <= high, "{delay:?} not in [{low:?}, {high:?}]");
    }

    #[test]
    fn negative_parameters_fall_back_to_the_floor() {
        let backoff = ExponentialBackoff::new(5, ms(10), ms(5_000), ms(100))
            .with_jitter(1.0, 1.0)
            .with_factor(-2.0);
        assert_eq!(backoff.delay(0, &Fixed(0.5)), ms(110));
        assert_eq!(backoff.delay(1, &Fixed(0.5)), ms(10));
        assert_eq!(backoff.delay(2, &Fixed(0.5)), ms(10));

        let backoff =
            ExponentialBackoff::new(5, ms(10), ms(5_000), ms(100)).with_jitter(-1.0, -0.5);
        assert_eq!(backoff.bounds(3), (ms(10), ms(10)));

        let backoff =
            ExponentialBackoff::new(5, ms(10), ms(5_000), ms(100)).with_factor(f64::NAN);
        assert_eq!(backoff.bounds(1), (ms(10), ms(10)));
    }

    #[test]
    fn extreme_config_stays_in_range() {
        let json = r#"{
            "kind": "exponential",
            "limit": 3,
            "min_interval": { "secs": 1, "nanos": 0 },
            "max_interval": { "secs": 30, "nanos": 0 },
            "delta": { "secs": 1, "nanos": 0 },
            "jitter": [0.0, 1e30],
            "factor": 1e300
        }"#;
        let schedule: RetrySchedule = serde_json::from_str(json).expect("should deserialize");
        for attempt in 0..3 {
            let delay = schedule.delay(attempt, &ThreadRngJitter).unwrap();
            assert!(
                delay >= Duration::from_secs(1) && delay <= Duration::from_secs(30),
                "attempt {attempt}: {delay:?}"
            );
        }
        assert_eq!(schedule.delay(3, &ThreadRngJitter), None);
    }

    #[test]
    fn incremental_adds_increment_per_attempt() {
        let schedule = RetrySchedule::Incremental {
            limit: 3,
            initial: ms(10),
            increment: ms(5),
        };
        let delays: Vec<_> = (0..4).map(|i| schedule.delay(i, &ThreadRngJitter)).collect();
        assert_eq!(delays, vec![Some(ms(10)), Some(ms(15)), Some(ms(20)), None]);
    }

    #[test]
    fn intervals_are_walked_in_order() {
        let schedule = RetrySchedule::Intervals {
            intervals: vec![ms(10), ms(50), ms(500)],
        };
        assert_eq!(schedule.limit(), 3);
        assert_eq!(schedule.delay(1, &ThreadRngJitter), Some(ms(50)));
        assert_eq!(schedule.delay(3, &ThreadRngJitter), None);
    }

    #[test]
    fn schedule_loads_from_config() {
        let json = r#"{
            "kind": "exponential",
            "limit": 4,
            "min_interval": { "secs": 0, "nanos": 100000000 },
            "max_interval": { "secs": 30, "nanos": 0 },
            "delta": { "secs": 1, "nanos": 0 }
        }"#;
        let schedule: RetrySchedule = serde_json::from_str(json).expect("should deserialize");
        match schedule {
            RetrySchedule::Exponential(backoff) => {
                assert_eq!(backoff.limit, 4);
                assert_eq!(backoff.jitter, (0.8, 1.2));
                assert_eq!(backoff.factor, 2.0);
            }
            other => panic!("Expected Exponential, got {:?}", other),
        }
    }
}
