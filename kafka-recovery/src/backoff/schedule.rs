use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::backoff::policy::BackOffPolicy;
use crate::error::ConfigurationError;

/// Delivery attempts used when the caller leaves max attempts unset
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Sentinel for "max attempts not set"
pub const NOT_SET: i32 = -1;

/// Upper bound on max attempts; every attempt costs a schedule entry
pub const MAX_ATTEMPTS_LIMIT: u32 = 10_000;

/// Precomputed retry delays for one (policy, max attempts) pair.
///
/// Entry `n - 1` is the delay before redelivery after the `n`th failure; once a record has
/// failed more times than there are entries it is recovered. Cloning shares the underlying
/// slice, so one schedule can serve every partition of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackOffSchedule {
    delays: Arc<[Duration]>,
}

impl BackOffSchedule {
    /// Simulate `policy` for `max_attempts - 1` retries without waiting.
    ///
    /// A sleeping policy that stops early yields a shorter schedule.
    pub fn generate(max_attempts: i32, policy: &BackOffPolicy) -> Result<Self, ConfigurationError> {
        let retries = resolve_max_attempts(max_attempts)? - 1;

        let delays: Vec<Duration> = match policy {
            BackOffPolicy::NoBackoff => vec![Duration::ZERO; retries as usize],
            BackOffPolicy::Sleeping(backoff) => {
                let mut execution = backoff.start();
                let mut delays = Vec::with_capacity(retries as usize);
                for _ in 0..retries {
                    match execution.next_backoff() {
                        Some(delay) => delays.push(delay),
                        None => break,
                    }
                }
                delays
            }
        };

        debug!(
            max_attempts = retries + 1,
            retries = delays.len(),
            policy = ?policy,
            "Generated back-off schedule"
        );

        Ok(Self {
            delays: delays.into(),
        })
    }

    pub fn from_delays(delays: Vec<Duration>) -> Self {
        Self {
            delays: delays.into(),
        }
    }

    /// Number of retries, i.e. max attempts - 1
    pub fn len(&self) -> usize {
        self.delays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }

    /// Delay before the retry that follows failure number `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        let index = usize::try_from(attempt).ok()?.checked_sub(1)?;
        self.delays.get(index).copied()
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

/// Map the "not set" sentinel to the default and reject anything outside `1..=MAX_ATTEMPTS_LIMIT`.
pub fn resolve_max_attempts(provided: i32) -> Result<u32, ConfigurationError> {
    let max_attempts = if provided == NOT_SET {
        DEFAULT_MAX_ATTEMPTS
    } else {
        provided
    };

    u32::try_from(max_attempts)
        .ok()
        .filter(|attempts| (1..=MAX_ATTEMPTS_LIMIT).contains(attempts))
        .ok_or(ConfigurationError::InvalidMaxAttempts {
            max_attempts: provided,
        })
}
