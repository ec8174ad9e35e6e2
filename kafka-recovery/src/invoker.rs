use std::sync::Arc;

use tracing::debug;

use crate::consumer::ConsumerControl;
use crate::container::ListenerContainer;
use crate::error::{ListenerError, RecoveryError};
use crate::handler::{DefaultErrorHandler, HandleOutcome, RetryState};
use crate::interceptor::{log_hook_result, BatchInterceptor};
use crate::types::{ConsumerRecord, Partition};

/// Processes records one at a time
pub trait RecordListener {
    fn on_record(&mut self, record: &ConsumerRecord) -> Result<(), ListenerError>;
}

impl<F> RecordListener for F
where
    F: FnMut(&ConsumerRecord) -> Result<(), ListenerError>,
{
    fn on_record(&mut self, record: &ConsumerRecord) -> Result<(), ListenerError> {
        self(record)
    }
}

/// Processes a whole poll at once
pub trait BatchListener {
    fn on_batch(&mut self, records: &[ConsumerRecord]) -> Result<(), ListenerError>;
}

impl<F> BatchListener for F
where
    F: FnMut(&[ConsumerRecord]) -> Result<(), ListenerError>,
{
    fn on_batch(&mut self, records: &[ConsumerRecord]) -> Result<(), ListenerError> {
        self(records)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The interceptor vetoed the poll, or there was nothing to process
    Skipped,
    /// The listener processed every record
    Processed { records: usize },
    /// The listener failed and the error handler dealt with it
    Handled(HandleOutcome),
}

/// Drives the listener for one container thread.
///
/// Owns the thread's [`RetryState`]; the error handler is shared configuration. The container
/// loop calls [`ListenerInvoker::before_poll`], polls the consumer itself, and hands the polled
/// records to one of the `invoke_*` methods. An `Err` is fatal for the cycle and should stop the
/// container.
pub struct ListenerInvoker {
    handler: Arc<DefaultErrorHandler>,
    state: RetryState,
    interceptor: Option<Box<dyn BatchInterceptor>>,
}

impl ListenerInvoker {
    pub fn new(handler: Arc<DefaultErrorHandler>) -> Self {
        Self {
            handler,
            state: RetryState::new(),
            interceptor: None,
        }
    }

    pub fn with_interceptor(mut self, interceptor: impl BatchInterceptor + 'static) -> Self {
        self.interceptor = Some(Box::new(interceptor));
        self
    }

    pub fn state(&self) -> &RetryState {
        &self.state
    }

    pub fn handler(&self) -> &DefaultErrorHandler {
        &self.handler
    }

    pub fn on_partitions_revoked(&mut self, partitions: &[Partition]) {
        self.state.on_partitions_revoked(partitions);
    }

    /// Resume partitions whose back-off is over, then run the before-poll hook
    pub fn before_poll(&mut self, consumer: &dyn ConsumerControl) -> Result<(), RecoveryError> {
        let resumed = self.handler.resume_due_partitions(&mut self.state, consumer)?;
        if !resumed.is_empty() {
            debug!(partitions = resumed.len(), "Resumed partitions before poll");
        }
        if let Some(interceptor) = &self.interceptor {
            log_hook_result("before_poll", interceptor.before_poll(consumer));
        }
        Ok(())
    }

    pub fn invoke_record_listener(
        &mut self,
        records: Vec<ConsumerRecord>,
        listener: &mut dyn RecordListener,
        consumer: &dyn ConsumerControl,
        container: &dyn ListenerContainer,
    ) -> Result<CycleOutcome, RecoveryError> {
        let Some(records) = self.intercept(records, consumer) else {
            self.after_records_processed(consumer);
            return Ok(CycleOutcome::Skipped);
        };

        for (index, record) in records.iter().enumerate() {
            if let Err(error) = listener.on_record(record) {
                let remaining = &records[index..];
                if let Some(interceptor) = &self.interceptor {
                    log_hook_result("failure", interceptor.failure(remaining, &error, consumer));
                }
                let result = self.handler.handle_record(
                    &mut self.state,
                    error,
                    remaining,
                    consumer,
                    container,
                );
                self.after_records_processed(consumer);
                return result.map(CycleOutcome::Handled);
            }
            self.handler.record_succeeded(&mut self.state, record);
        }

        if let Some(interceptor) = &self.interceptor {
            log_hook_result("success", interceptor.success(&records, consumer));
        }
        self.after_records_processed(consumer);
        Ok(CycleOutcome::Processed {
            records: records.len(),
        })
    }

    pub fn invoke_batch_listener(
        &mut self,
        records: Vec<ConsumerRecord>,
        listener: &mut dyn BatchListener,
        consumer: &dyn ConsumerControl,
        container: &dyn ListenerContainer,
    ) -> Result<CycleOutcome, RecoveryError> {
        let Some(records) = self.intercept(records, consumer) else {
            self.after_records_processed(consumer);
            return Ok(CycleOutcome::Skipped);
        };

        let result = match listener.on_batch(&records) {
            Ok(()) => {
                self.handler.batch_succeeded(&mut self.state, &records);
                if let Some(interceptor) = &self.interceptor {
                    log_hook_result("success", interceptor.success(&records, consumer));
                }
                Ok(CycleOutcome::Processed {
                    records: records.len(),
                })
            }
            Err(error) => {
                if let Some(interceptor) = &self.interceptor {
                    log_hook_result("failure", interceptor.failure(&records, &error, consumer));
                }
                let outcome = self.handler.handle_batch(
                    &mut self.state,
                    error,
                    &records,
                    consumer,
                    container,
                    &mut || listener.on_batch(&records),
                );
                if let (Ok(HandleOutcome::FallbackSucceeded { .. }), Some(interceptor)) =
                    (&outcome, &self.interceptor)
                {
                    log_hook_result("success", interceptor.success(&records, consumer));
                }
                outcome.map(CycleOutcome::Handled)
            }
        };

        self.after_records_processed(consumer);
        result
    }

    fn intercept(
        &self,
        records: Vec<ConsumerRecord>,
        consumer: &dyn ConsumerControl,
    ) -> Option<Vec<ConsumerRecord>> {
        let records = match &self.interceptor {
            Some(interceptor) => interceptor.intercept(records, consumer)?,
            None => records,
        };
        if records.is_empty() {
            debug!("No records left to process, skipping cycle");
            return None;
        }
        Some(records)
    }

    fn after_records_processed(&self, consumer: &dyn ConsumerControl) {
        if let Some(interceptor) = &self.interceptor {
            log_hook_result(
                "after_records_processed",
                interceptor.after_records_processed(consumer),
            );
        }
    }
}
