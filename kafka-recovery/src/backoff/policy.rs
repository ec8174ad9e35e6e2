use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

/// A delay-computing rule. Each failure episode gets its own execution from [`BackOff::start`].
pub trait BackOff: fmt::Debug + Send + Sync {
    fn start(&self) -> Box<dyn BackOffExecution>;
}

/// Stateful delay generator for one failure episode.
pub trait BackOffExecution: Send {
    /// The next delay, or `None` to stop retrying
    fn next_backoff(&mut self) -> Option<Duration>;
}

/// The back-off shapes the recovery engine understands.
///
/// Adding a new shape means adding a variant here; the schedule generator matches on it.
#[derive(Clone, Debug, Default)]
pub enum BackOffPolicy {
    /// Zero delay between attempts
    #[default]
    NoBackoff,
    /// Any delay generator, simulated into a schedule up front
    Sleeping(Arc<dyn BackOff>),
}

impl BackOffPolicy {
    pub fn sleeping(backoff: impl BackOff + 'static) -> Self {
        Self::Sleeping(Arc::new(backoff))
    }

    pub fn fixed(interval: Duration) -> Self {
        Self::sleeping(FixedBackOff::new(interval))
    }

    pub fn exponential(initial_interval: Duration, multiplier: f64, max_interval: Duration) -> Self {
        Self::sleeping(ExponentialBackOff::new(
            initial_interval,
            multiplier,
            max_interval,
        ))
    }
}

/// Same delay every time, optionally for a bounded number of attempts
#[derive(Debug, Clone, Copy)]
pub struct FixedBackOff {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
}

impl FixedBackOff {
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl BackOff for FixedBackOff {
    fn start(&self) -> Box<dyn BackOffExecution> {
        Box::new(FixedExecution {
            interval: self.interval,
            remaining: self.max_attempts,
        })
    }
}

struct FixedExecution {
    interval: Duration,
    remaining: Option<u32>,
}

impl BackOffExecution for FixedExecution {
    fn next_backoff(&mut self) -> Option<Duration> {
        match self.remaining.as_mut() {
            Some(0) => None,
            Some(remaining) => {
                *remaining -= 1;
                Some(self.interval)
            }
            None => Some(self.interval),
        }
    }
}

/// Exponential backoff policy.
///
/// - initial_interval: delay for the first retry
/// - multiplier: factor by which delay grows each attempt (>= 1.0)
/// - max_interval: cap for the computed delay
/// - max_elapsed: once the summed delays would exceed this, stop
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackOff {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    pub max_elapsed: Option<Duration>,
}

impl ExponentialBackOff {
    pub const fn new(initial_interval: Duration, multiplier: f64, max_interval: Duration) -> Self {
        Self {
            initial_interval,
            multiplier,
            max_interval,
            max_elapsed: None,
        }
    }

    pub const fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = Some(max_elapsed);
        self
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let pow = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let scaled = if pow.is_finite() {
            self.initial_interval.mul_f64(pow)
        } else {
            self.max_interval
        };
        scaled.min(self.max_interval)
    }
}

impl BackOff for ExponentialBackOff {
    fn start(&self) -> Box<dyn BackOffExecution> {
        Box::new(ExponentialExecution {
            policy: *self,
            jitter: false,
            attempt: 0,
            elapsed: Duration::ZERO,
        })
    }
}

/// [`ExponentialBackOff`] where each delay is stretched by a random factor in
/// `[1, multiplier)`, still capped at `max_interval`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialRandomBackOff(pub ExponentialBackOff);

impl BackOff for ExponentialRandomBackOff {
    fn start(&self) -> Box<dyn BackOffExecution> {
        Box::new(ExponentialExecution {
            policy: self.0,
            jitter: true,
            attempt: 0,
            elapsed: Duration::ZERO,
        })
    }
}

struct ExponentialExecution {
    policy: ExponentialBackOff,
    jitter: bool,
    attempt: u32,
    elapsed: Duration,
}

impl BackOffExecution for ExponentialExecution {
    fn next_backoff(&mut self) -> Option<Duration> {
        let base = self.policy.delay_for(self.attempt);
        let delay = if self.jitter && self.policy.multiplier > 1.0 {
            let stretch = rand::thread_rng().gen_range(1.0..self.policy.multiplier);
            base.mul_f64(stretch).min(self.policy.max_interval)
        } else {
            base
        };

        let elapsed = self.elapsed.saturating_add(delay);
        if matches!(self.policy.max_elapsed, Some(max) if elapsed > max) {
            return None;
        }

        self.attempt = self.attempt.saturating_add(1);
        self.elapsed = elapsed;
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(execution: &mut dyn BackOffExecution, limit: usize) -> Vec<Option<Duration>> {
        (0..limit).map(|_| execution.next_backoff()).collect()
    }

    #[test]
    fn test_fixed_unbounded_repeats_interval() {
        let mut execution = FixedBackOff::new(Duration::from_millis(250)).start();
        for _ in 0..100 {
            assert_eq!(execution.next_backoff(), Some(Duration::from_millis(250)));
        }
    }

    #[test]
    fn test_fixed_bounded_stops() {
        let mut execution = FixedBackOff::new(Duration::from_secs(1))
            .with_max_attempts(2)
            .start();

        assert_eq!(
            drain(execution.as_mut(), 4),
            vec![
                Some(Duration::from_secs(1)),
                Some(Duration::from_secs(1)),
                None,
                None
            ]
        );
    }

    #[test]
    fn test_exponential_progression_and_cap() {
        let p = ExponentialBackOff::new(Duration::from_secs(5), 3.0, Duration::from_secs(70));
        let cases = vec![
            (0, 5),  // 5
            (1, 15), // 5*3
            (2, 45), // 5*9
            (3, 70), // 5*27=135 -> cap 70
            (4, 70),
            (400, 70),
        ];
        for (attempt, expected_secs) in cases {
            assert_eq!(p.delay_for(attempt).as_secs(), expected_secs, "attempt {attempt}");
        }
    }

    #[test]
    fn test_exponential_execution_matches_delay_for() {
        let p = ExponentialBackOff::new(Duration::from_millis(100), 2.0, Duration::from_secs(1));
        let mut execution = p.start();
        for attempt in 0..8 {
            assert_eq!(execution.next_backoff(), Some(p.delay_for(attempt)));
        }
    }

    #[test]
    fn test_exponential_max_elapsed_stops() {
        let p = ExponentialBackOff::new(Duration::from_secs(1), 2.0, Duration::from_secs(60))
            .with_max_elapsed(Duration::from_secs(7));
        let mut execution = p.start();

        // 1 + 2 + 4 = 7, the next delay (8) would overshoot
        assert_eq!(
            drain(execution.as_mut(), 4),
            vec![
                Some(Duration::from_secs(1)),
                Some(Duration::from_secs(2)),
                Some(Duration::from_secs(4)),
                None
            ]
        );
    }

    #[test]
    fn test_random_stays_within_bounds() {
        let p = ExponentialBackOff::new(Duration::from_millis(100), 2.0, Duration::from_secs(2));
        let mut execution = ExponentialRandomBackOff(p).start();

        for attempt in 0..10 {
            let delay = execution.next_backoff().unwrap();
            let base = p.delay_for(attempt);
            // float rounding in mul_f64 can land a nanosecond under the base
            assert!(
                delay + Duration::from_micros(1) >= base,
                "attempt {attempt}: {delay:?} < {base:?}"
            );
            assert!(delay <= (base * 2).min(p.max_interval));
        }
    }
}
