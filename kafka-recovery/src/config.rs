use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;
use tracing::Level;

use crate::backoff::{
    resolve_max_attempts, BackOffPolicy, BackOffSchedule, ExponentialBackOff,
    ExponentialRandomBackOff, FixedBackOff, NOT_SET,
};
use crate::consumer::CommitMode;
use crate::error::ConfigurationError;

/// How a retry delay is realized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackOffMode {
    /// Pause the failed partition until the delay has passed; the poll loop keeps running
    #[default]
    Pause,
    /// Sleep the container thread, waking early if the container stops
    Sleep,
}

impl FromStr for BackOffMode {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pause" => Ok(Self::Pause),
            "sleep" => Ok(Self::Sleep),
            _ => Err(ConfigurationError::UnsupportedBackOffMode {
                mode: s.to_string(),
            }),
        }
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct RecoveryConfig {
    // Total delivery attempts per record, -1 means "not set" (default 3)
    #[envconfig(default = "-1")]
    pub recovery_max_attempts: i32,

    // none, fixed, exponential, exponential_random
    #[envconfig(default = "none")]
    pub recovery_backoff_policy: String,

    #[envconfig(default = "1000")]
    pub recovery_backoff_initial_ms: u64,

    #[envconfig(default = "2.0")]
    pub recovery_backoff_multiplier: f64,

    #[envconfig(default = "30000")]
    pub recovery_backoff_max_ms: u64,

    // pause, sleep
    #[envconfig(default = "pause")]
    pub recovery_backoff_mode: String,

    #[envconfig(default = "false")]
    pub recovery_commit_recovered: bool,

    #[envconfig(default = "true")]
    pub recovery_sync_commits: bool,

    #[envconfig(default = "true")]
    pub recovery_reset_state_on_recovery_failure: bool,

    // When the blocking fallback runs out of retries: recover every record instead of
    // seeking the batch back for redelivery
    #[envconfig(default = "false")]
    pub recovery_fallback_recover_after_retries: bool,

    // Level the default recoverer logs dropped records at
    #[envconfig(default = "error")]
    pub recovery_log_level: String,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            recovery_max_attempts: NOT_SET,
            recovery_backoff_policy: "none".to_string(),
            recovery_backoff_initial_ms: 1000,
            recovery_backoff_multiplier: 2.0,
            recovery_backoff_max_ms: 30000,
            recovery_backoff_mode: "pause".to_string(),
            recovery_commit_recovered: false,
            recovery_sync_commits: true,
            recovery_reset_state_on_recovery_failure: true,
            recovery_fallback_recover_after_retries: false,
            recovery_log_level: "error".to_string(),
        }
    }
}

impl RecoveryConfig {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        RecoveryConfig::init_from_env()
    }

    pub fn max_attempts(&self) -> Result<u32, ConfigurationError> {
        resolve_max_attempts(self.recovery_max_attempts)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.recovery_backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.recovery_backoff_max_ms)
    }

    /// Build the configured back-off policy, rejecting unknown policy names
    pub fn backoff_policy(&self) -> Result<BackOffPolicy, ConfigurationError> {
        let name = self.recovery_backoff_policy.trim().to_ascii_lowercase();
        match name.as_str() {
            "none" => Ok(BackOffPolicy::NoBackoff),
            "fixed" => Ok(BackOffPolicy::sleeping(FixedBackOff::new(
                self.backoff_initial(),
            ))),
            "exponential" => Ok(BackOffPolicy::sleeping(self.exponential()?)),
            "exponential_random" => Ok(BackOffPolicy::sleeping(ExponentialRandomBackOff(
                self.exponential()?,
            ))),
            _ => Err(ConfigurationError::UnsupportedBackOffPolicy {
                policy: self.recovery_backoff_policy.clone(),
            }),
        }
    }

    fn exponential(&self) -> Result<ExponentialBackOff, ConfigurationError> {
        let multiplier = self.recovery_backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigurationError::InvalidBackOffParameter {
                name: "multiplier",
                value: multiplier.to_string(),
            });
        }
        Ok(ExponentialBackOff::new(
            self.backoff_initial(),
            multiplier,
            self.backoff_max(),
        ))
    }

    /// Precompute the retry schedule for the configured policy and attempts
    pub fn schedule(&self) -> Result<BackOffSchedule, ConfigurationError> {
        BackOffSchedule::generate(self.recovery_max_attempts, &self.backoff_policy()?)
    }

    pub fn backoff_mode(&self) -> Result<BackOffMode, ConfigurationError> {
        self.recovery_backoff_mode.parse()
    }

    pub fn commit_mode(&self) -> CommitMode {
        CommitMode::from_sync_commits(self.recovery_sync_commits)
    }

    pub fn log_level(&self) -> Result<Level, ConfigurationError> {
        self.recovery_log_level
            .trim()
            .parse::<Level>()
            .map_err(|_| ConfigurationError::InvalidLogLevel {
                level: self.recovery_log_level.clone(),
            })
    }
}
