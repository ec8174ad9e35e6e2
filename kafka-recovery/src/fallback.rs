use std::sync::Arc;

use tracing::{error, info, warn};

use crate::backoff::BackOffSchedule;
use crate::consumer::{CommitMode, ConsumerControl};
use crate::container::{stoppable_sleep, ListenerContainer};
use crate::decision::{next_offsets, seek_to_first};
use crate::error::{ListenerError, RecoveryError};
use crate::handler::HandleOutcome;
use crate::metrics_consts::{
    FALLBACK_ATTEMPTS_COUNTER, RECOVERED_COUNTER, RECOVERY_FAILURES_COUNTER,
};
use crate::recoverer::ConsumerRecordRecoverer;
use crate::retry_listener::RetryListener;
use crate::types::ConsumerRecord;

/// Blocking fallback for batch failures that cannot be pinned on a record.
///
/// Re-invokes the listener with the whole batch on the container thread, sleeping the
/// schedule's delays in between. Each sleep wakes early when the container stops. Once the
/// schedule is used up the batch is either seeked back for redelivery on the next poll, which
/// keeps retrying across poll cycles, or handed record by record to the recoverer. If the
/// recoverer fails part way, the failed record and the rest of the batch are seeked back.
pub struct RetryingBatchHandler {
    schedule: BackOffSchedule,
    recoverer: Arc<dyn ConsumerRecordRecoverer>,
    retry_listeners: Vec<Arc<dyn RetryListener>>,
    recover_after_retries: bool,
    commit_recovered: bool,
    commit_mode: CommitMode,
}

impl RetryingBatchHandler {
    pub fn new(schedule: BackOffSchedule, recoverer: Arc<dyn ConsumerRecordRecoverer>) -> Self {
        Self {
            schedule,
            recoverer,
            retry_listeners: vec![],
            recover_after_retries: false,
            commit_recovered: false,
            commit_mode: CommitMode::Sync,
        }
    }

    pub fn with_recover_after_retries(mut self, recover_after_retries: bool) -> Self {
        self.recover_after_retries = recover_after_retries;
        self
    }

    pub fn with_retry_listeners(mut self, listeners: Vec<Arc<dyn RetryListener>>) -> Self {
        self.retry_listeners = listeners;
        self
    }

    pub fn with_commit_recovered(mut self, commit_recovered: bool, commit_mode: CommitMode) -> Self {
        self.commit_recovered = commit_recovered;
        self.commit_mode = commit_mode;
        self
    }

    pub fn handle(
        &self,
        error: ListenerError,
        records: &[ConsumerRecord],
        consumer: &dyn ConsumerControl,
        container: &dyn ListenerContainer,
        invoke_listener: &mut dyn FnMut() -> Result<(), ListenerError>,
    ) -> Result<HandleOutcome, RecoveryError> {
        let listener = container.listener_id();
        warn!(
            listener,
            batch_size = records.len(),
            retries = self.schedule.len(),
            error = ?error,
            "Batch failed without record information, retrying the whole batch"
        );

        let mut last_error = error;
        for (i, delay) in self.schedule.delays().iter().enumerate() {
            let attempt = i as u32 + 1;

            if !stoppable_sleep(container, *delay) {
                info!(
                    listener,
                    attempts = attempt - 1,
                    "Container stopping during batch retries, seeking batch back for redelivery"
                );
                seek_to_first(consumer, records)?;
                return Ok(HandleOutcome::FallbackInterrupted {
                    attempts: attempt - 1,
                });
            }

            metrics::counter!(FALLBACK_ATTEMPTS_COUNTER).increment(1);
            match invoke_listener() {
                Ok(()) => {
                    info!(listener, attempt, "Batch retry succeeded");
                    return Ok(HandleOutcome::FallbackSucceeded { attempts: attempt });
                }
                Err(e) => {
                    warn!(listener, attempt, error = ?e, "Batch retry failed");
                    last_error = e;
                }
            }
        }

        let attempts = self.schedule.len() as u32;
        if self.recover_after_retries {
            self.recover_batch(records, &last_error, consumer)?;
            info!(listener, records = records.len(), "Recovered batch after retries");
            return Ok(HandleOutcome::BatchRecovered {
                records: records.len(),
            });
        }

        seek_to_first(consumer, records)?;
        warn!(
            listener,
            attempts,
            error = ?last_error,
            "Batch retries exhausted, batch will be redelivered on the next poll"
        );
        Ok(HandleOutcome::BatchRedelivered { attempts })
    }

    fn recover_batch(
        &self,
        records: &[ConsumerRecord],
        last_error: &ListenerError,
        consumer: &dyn ConsumerControl,
    ) -> Result<(), RecoveryError> {
        for (index, record) in records.iter().enumerate() {
            let key = record.tpo();
            let labels = [
                ("topic", key.topic().to_string()),
                ("partition", key.partition_number().to_string()),
            ];

            if let Err(source) = self.recoverer.recover(record, last_error) {
                error!(
                    record = %key,
                    error = ?source,
                    original_error = ?last_error,
                    "Recoverer failed during batch recovery, rest of batch will be redelivered"
                );
                metrics::counter!(RECOVERY_FAILURES_COUNTER, &labels).increment(1);
                for listener in &self.retry_listeners {
                    listener.recovery_failed(record, last_error, &source);
                }
                if self.commit_recovered && index > 0 {
                    let recovered = next_offsets(&records[..index]);
                    if let Err(e) = consumer.commit(&recovered, self.commit_mode) {
                        error!(record = %key, error = ?e, "Failed to commit recovered records");
                    }
                }
                if let Err(e) = seek_to_first(consumer, &records[index..]) {
                    error!(record = %key, error = ?e, "Failed to seek back after recoverer failure");
                }
                return Err(RecoveryError::Recoverer {
                    record: key,
                    source,
                });
            }

            metrics::counter!(RECOVERED_COUNTER, &labels).increment(1);
            for listener in &self.retry_listeners {
                listener.recovered(record, last_error);
            }
        }

        if self.commit_recovered && !records.is_empty() {
            consumer.commit(&next_offsets(records), self.commit_mode)?;
        }
        Ok(())
    }
}
