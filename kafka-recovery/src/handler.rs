//! The default error handler: entry point the listener container calls whenever a listener fails.
//!
//! The handler itself is immutable configuration and can be shared between container threads.
//! Everything that changes while failures are handled lives in a [`RetryState`] owned by one
//! container thread and passed in by exclusive reference on every call.
//!
//! Flow for a failure:
//! 1. classify it ([`crate::classifier`]),
//! 2. count the failure against the record's partition ([`PartitionRetryTracker`]),
//! 3. ask [`decide`] for a verdict against the precomputed [`BackOffSchedule`],
//! 4. either reposition the consumer for redelivery or hand the record to the recoverer and move
//!    past it.
//!
//! Failures that cannot be pinned on a record go to the blocking [`RetryingBatchHandler`], except
//! deserialization failures, which are fatal: redelivering bytes that cannot be decoded never helps.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::backoff::BackOffSchedule;
use crate::classifier::{classify_batch, classify_record, FailedRecordInfo, FailureClassification};
use crate::config::{BackOffMode, RecoveryConfig};
use crate::consumer::{CommitMode, ConsumerControl};
use crate::container::{stoppable_sleep, ListenerContainer};
use crate::decision::{decide, next_offsets, seek_to_first, Verdict};
use crate::error::{ConfigurationError, ConsumerError, ListenerError, RecoveryError};
use crate::fallback::RetryingBatchHandler;
use crate::metrics_consts::{
    BACKOFF_DELAY_HISTOGRAM, FAILED_DELIVERIES_COUNTER, FATAL_ERRORS_COUNTER, RECOVERED_COUNTER,
    RECOVERY_FAILURES_COUNTER, RETRIES_COUNTER,
};
use crate::pause::PausedPartitions;
use crate::recoverer::{ConsumerRecordRecoverer, LoggingRecoverer};
use crate::retry_listener::RetryListener;
use crate::tracker::PartitionRetryTracker;
use crate::types::{ConsumerRecord, Partition, TopicPartitionOffset};

/// What the handler did with a failure that it could deal with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The failed record and everything after it will be delivered again
    Retry {
        record: TopicPartitionOffset,
        attempt: u32,
        delay: Duration,
    },
    /// The failed record went to the recoverer and its partition moves past it
    Recovered {
        record: TopicPartitionOffset,
        attempt: u32,
    },
    /// The blocking fallback re-ran the batch successfully
    FallbackSucceeded { attempts: u32 },
    /// The blocking fallback ran out of retries and seeked the batch back
    BatchRedelivered { attempts: u32 },
    /// The blocking fallback ran out of retries and recovered every record
    BatchRecovered { records: usize },
    /// The container stopped during the blocking fallback
    FallbackInterrupted { attempts: u32 },
}

/// Per-container-thread state: failure counts and partitions paused for back-off
#[derive(Debug, Default)]
pub struct RetryState {
    tracker: PartitionRetryTracker,
    paused: PausedPartitions,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracker(&self) -> &PartitionRetryTracker {
        &self.tracker
    }

    pub fn paused(&self) -> &PausedPartitions {
        &self.paused
    }

    /// Forget everything about partitions this container no longer owns
    pub fn on_partitions_revoked(&mut self, partitions: &[Partition]) {
        for partition in partitions {
            self.tracker.clear_partition(partition);
            self.paused.forget(partition);
        }
    }

    pub fn clear(&mut self) {
        self.tracker.clear_all();
        self.paused.clear();
    }
}

pub struct DefaultErrorHandler {
    schedule: BackOffSchedule,
    recoverer: Arc<dyn ConsumerRecordRecoverer>,
    retry_listeners: Vec<Arc<dyn RetryListener>>,
    backoff_mode: BackOffMode,
    commit_recovered: bool,
    commit_mode: CommitMode,
    reset_state_on_recovery_failure: bool,
    fallback_recover_after_retries: bool,
}

impl DefaultErrorHandler {
    /// Handler with the given schedule, logging recoverer and default settings
    pub fn new(schedule: BackOffSchedule) -> Self {
        Self {
            schedule,
            recoverer: Arc::new(LoggingRecoverer::default()),
            retry_listeners: vec![],
            backoff_mode: BackOffMode::default(),
            commit_recovered: false,
            commit_mode: CommitMode::Sync,
            reset_state_on_recovery_failure: true,
            fallback_recover_after_retries: false,
        }
    }

    pub fn from_config(config: &RecoveryConfig) -> Result<Self, ConfigurationError> {
        Ok(Self::new(config.schedule()?)
            .with_recoverer(Arc::new(LoggingRecoverer::new(config.log_level()?)))
            .with_backoff_mode(config.backoff_mode()?)
            .with_commit_recovered(config.recovery_commit_recovered)
            .with_commit_mode(config.commit_mode())
            .with_reset_state_on_recovery_failure(config.recovery_reset_state_on_recovery_failure)
            .with_fallback_recover_after_retries(config.recovery_fallback_recover_after_retries))
    }

    pub fn with_recoverer(mut self, recoverer: Arc<dyn ConsumerRecordRecoverer>) -> Self {
        self.recoverer = recoverer;
        self
    }

    pub fn with_retry_listener(mut self, listener: Arc<dyn RetryListener>) -> Self {
        self.retry_listeners.push(listener);
        self
    }

    pub fn with_backoff_mode(mut self, backoff_mode: BackOffMode) -> Self {
        self.backoff_mode = backoff_mode;
        self
    }

    pub fn with_commit_recovered(mut self, commit_recovered: bool) -> Self {
        self.commit_recovered = commit_recovered;
        self
    }

    pub fn with_commit_mode(mut self, commit_mode: CommitMode) -> Self {
        self.commit_mode = commit_mode;
        self
    }

    pub fn with_reset_state_on_recovery_failure(mut self, reset: bool) -> Self {
        self.reset_state_on_recovery_failure = reset;
        self
    }

    pub fn with_fallback_recover_after_retries(mut self, recover: bool) -> Self {
        self.fallback_recover_after_retries = recover;
        self
    }

    pub fn schedule(&self) -> &BackOffSchedule {
        &self.schedule
    }

    pub fn backoff_mode(&self) -> BackOffMode {
        self.backoff_mode
    }

    /// A record listener failed. `remaining` starts with the failed record and holds every record
    /// of the poll that has not been processed yet.
    pub fn handle_record(
        &self,
        state: &mut RetryState,
        error: ListenerError,
        remaining: &[ConsumerRecord],
        consumer: &dyn ConsumerControl,
        container: &dyn ListenerContainer,
    ) -> Result<HandleOutcome, RecoveryError> {
        let deserialization = match classify_record(&error, remaining) {
            FailureClassification::AttributedRecord(info)
            | FailureClassification::AttributedBatchPosition(info) => {
                return self.seek_or_recover(state, info, remaining, consumer, container);
            }
            FailureClassification::NonRetryableKind => true,
            FailureClassification::Unattributable => false,
        };
        Err(self.fatal(error, deserialization, container))
    }

    /// A batch listener failed on `records`. `invoke_listener` re-runs the listener with the same
    /// batch and is only used when the failure cannot be pinned on a record.
    pub fn handle_batch(
        &self,
        state: &mut RetryState,
        error: ListenerError,
        records: &[ConsumerRecord],
        consumer: &dyn ConsumerControl,
        container: &dyn ListenerContainer,
        invoke_listener: &mut dyn FnMut() -> Result<(), ListenerError>,
    ) -> Result<HandleOutcome, RecoveryError> {
        let deserialization = match classify_batch(&error, records) {
            FailureClassification::AttributedRecord(info)
            | FailureClassification::AttributedBatchPosition(info) => {
                self.commit_processed(&records[..info.index], consumer)?;
                return self.seek_or_recover(state, info, records, consumer, container);
            }
            FailureClassification::NonRetryableKind => true,
            FailureClassification::Unattributable => false,
        };

        if deserialization {
            return Err(self.fatal(error, true, container));
        }
        let outcome = self
            .fallback()
            .handle(error, records, consumer, container, invoke_listener)?;
        // The whole batch is done with, so are any episodes left from earlier attributed failures
        if matches!(
            outcome,
            HandleOutcome::FallbackSucceeded { .. } | HandleOutcome::BatchRecovered { .. }
        ) {
            self.batch_succeeded(state, records);
        }
        Ok(outcome)
    }

    /// A failure outside listener invocation (polling, deserializing before dispatch, ...).
    /// There is no record to retry or recover, so it is always fatal.
    pub fn handle_other(
        &self,
        error: ListenerError,
        container: &dyn ListenerContainer,
    ) -> RecoveryError {
        let deserialization = matches!(error, ListenerError::Deserialization { .. });
        self.fatal(error, deserialization, container)
    }

    /// The listener processed `record`; its failure episode, if any, is over
    pub fn record_succeeded(&self, state: &mut RetryState, record: &ConsumerRecord) {
        if state.tracker.reset(&record.tpo()) {
            debug!(record = %record.tpo(), "Record succeeded after redelivery");
        }
    }

    pub fn batch_succeeded(&self, state: &mut RetryState, records: &[ConsumerRecord]) {
        for record in records {
            self.record_succeeded(state, record);
        }
    }

    /// Resume partitions whose back-off has elapsed. Call before every poll.
    pub fn resume_due_partitions(
        &self,
        state: &mut RetryState,
        consumer: &dyn ConsumerControl,
    ) -> Result<Vec<Partition>, ConsumerError> {
        state.paused.resume_due(consumer, Instant::now())
    }

    /// 1-based delivery attempt of the next delivery of `key`
    pub fn delivery_attempt(&self, state: &RetryState, key: &TopicPartitionOffset) -> u32 {
        state.tracker.delivery_attempt(key)
    }

    fn fallback(&self) -> RetryingBatchHandler {
        RetryingBatchHandler::new(self.schedule.clone(), self.recoverer.clone())
            .with_retry_listeners(self.retry_listeners.clone())
            .with_recover_after_retries(self.fallback_recover_after_retries)
            .with_commit_recovered(self.commit_recovered, self.commit_mode)
    }

    fn seek_or_recover(
        &self,
        state: &mut RetryState,
        info: FailedRecordInfo<'_>,
        records: &[ConsumerRecord],
        consumer: &dyn ConsumerControl,
        container: &dyn ListenerContainer,
    ) -> Result<HandleOutcome, RecoveryError> {
        let key = info.record.tpo();
        let attempt = state.tracker.on_failure(&key);

        metrics::counter!(
            FAILED_DELIVERIES_COUNTER,
            "topic" => key.topic().to_string(),
            "partition" => key.partition_number().to_string(),
        )
        .increment(1);
        for listener in &self.retry_listeners {
            listener.failed_delivery(info.record, info.error, attempt);
        }

        let verdict = if info.is_retryable() {
            decide(&key, attempt, &self.schedule)
        } else {
            Verdict::Recover
        };

        match verdict {
            Verdict::Retry { delay } => {
                warn!(
                    listener = container.listener_id(),
                    topic = key.topic(),
                    partition = key.partition_number(),
                    offset = key.offset(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = ?info.error,
                    "Record processing failed, seeking for redelivery"
                );
                self.retry(state, &key, delay, &records[info.index..], consumer, container)?;
                Ok(HandleOutcome::Retry {
                    record: key,
                    attempt,
                    delay,
                })
            }
            Verdict::Recover => {
                self.recover(state, info, &key, records, consumer)?;
                // The failed partition resumes after the recovered record, others where they were
                seek_to_first(consumer, &records[info.index + 1..])?;
                Ok(HandleOutcome::Recovered {
                    record: key,
                    attempt,
                })
            }
        }
    }

    fn retry(
        &self,
        state: &mut RetryState,
        key: &TopicPartitionOffset,
        delay: Duration,
        remaining: &[ConsumerRecord],
        consumer: &dyn ConsumerControl,
        container: &dyn ListenerContainer,
    ) -> Result<(), RecoveryError> {
        metrics::counter!(
            RETRIES_COUNTER,
            "topic" => key.topic().to_string(),
            "partition" => key.partition_number().to_string(),
        )
        .increment(1);
        metrics::histogram!(BACKOFF_DELAY_HISTOGRAM).record(delay.as_millis() as f64);

        if delay.is_zero() {
            seek_to_first(consumer, remaining)?;
            return Ok(());
        }

        match self.backoff_mode {
            BackOffMode::Sleep => {
                if !stoppable_sleep(container, delay) {
                    info!(
                        listener = container.listener_id(),
                        record = %key,
                        "Container stopping, back-off cut short"
                    );
                }
                seek_to_first(consumer, remaining)?;
            }
            BackOffMode::Pause => {
                seek_to_first(consumer, remaining)?;
                state
                    .paused
                    .pause(consumer, key.partition(), delay, Instant::now())?;
            }
        }
        Ok(())
    }

    fn recover(
        &self,
        state: &mut RetryState,
        info: FailedRecordInfo<'_>,
        key: &TopicPartitionOffset,
        records: &[ConsumerRecord],
        consumer: &dyn ConsumerControl,
    ) -> Result<(), RecoveryError> {
        let labels = [
            ("topic", key.topic().to_string()),
            ("partition", key.partition_number().to_string()),
        ];

        if let Err(source) = self.recoverer.recover(info.record, info.error) {
            error!(
                record = %key,
                error = ?source,
                original_error = ?info.error,
                "Recoverer failed, record will be redelivered"
            );
            metrics::counter!(RECOVERY_FAILURES_COUNTER, &labels).increment(1);
            for listener in &self.retry_listeners {
                listener.recovery_failed(info.record, info.error, &source);
            }
            if self.reset_state_on_recovery_failure {
                state.tracker.reset(key);
            }
            if let Err(e) = seek_to_first(consumer, &records[info.index..]) {
                error!(record = %key, error = ?e, "Failed to seek back after recoverer failure");
            }
            return Err(RecoveryError::Recoverer {
                record: key.clone(),
                source,
            });
        }

        state.tracker.reset(key);
        metrics::counter!(RECOVERED_COUNTER, &labels).increment(1);
        for listener in &self.retry_listeners {
            listener.recovered(info.record, info.error);
        }
        info!(record = %key, error_kind = info.error.kind(), "Recovered failed record");

        if self.commit_recovered {
            let offsets = BTreeMap::from([(key.partition().clone(), key.offset() + 1)]);
            consumer.commit(&offsets, self.commit_mode)?;
        }
        Ok(())
    }

    /// Records of a batch ahead of the failure point were processed, commit past them
    fn commit_processed(
        &self,
        processed: &[ConsumerRecord],
        consumer: &dyn ConsumerControl,
    ) -> Result<(), ConsumerError> {
        if processed.is_empty() {
            return Ok(());
        }
        let offsets = next_offsets(processed);
        consumer.commit(&offsets, self.commit_mode)?;
        debug!(
            records = processed.len(),
            partitions = offsets.len(),
            "Committed records ahead of the failed record"
        );
        Ok(())
    }

    fn fatal(
        &self,
        error: ListenerError,
        deserialization: bool,
        container: &dyn ListenerContainer,
    ) -> RecoveryError {
        let kind = error.kind();
        metrics::counter!(FATAL_ERRORS_COUNTER, "kind" => kind).increment(1);
        error!(
            listener = container.listener_id(),
            kind,
            error = ?error,
            "Listener failure cannot be retried or recovered"
        );
        if deserialization {
            RecoveryError::Deserialization(error)
        } else {
            RecoveryError::NoRecordInformation {
                kind,
                source: error,
            }
        }
    }
}
