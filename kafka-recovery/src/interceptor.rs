use tracing::warn;

use crate::consumer::ConsumerControl;
use crate::error::ListenerError;
use crate::metrics_consts::INTERCEPTOR_ERRORS_COUNTER;
use crate::types::ConsumerRecord;

/// Lifecycle hooks around each poll cycle.
///
/// Hooks observe or reshape the records handed to the listener; they never take part in the
/// retry decision. An `Err` from a hook is logged and the cycle carries on.
pub trait BatchInterceptor: Send + Sync {
    /// Called before the consumer is polled
    fn before_poll(&self, _consumer: &dyn ConsumerControl) -> anyhow::Result<()> {
        Ok(())
    }

    /// Replace or veto the polled records before the listener sees them.
    /// `None` (or an empty result) skips the cycle.
    fn intercept(
        &self,
        records: Vec<ConsumerRecord>,
        _consumer: &dyn ConsumerControl,
    ) -> Option<Vec<ConsumerRecord>> {
        Some(records)
    }

    /// Called after the listener returned normally
    fn success(
        &self,
        _records: &[ConsumerRecord],
        _consumer: &dyn ConsumerControl,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called after the listener failed, before the error handler runs
    fn failure(
        &self,
        _records: &[ConsumerRecord],
        _error: &ListenerError,
        _consumer: &dyn ConsumerControl,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Last call of every cycle, after the listener and the error handler
    fn after_records_processed(&self, _consumer: &dyn ConsumerControl) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Log and count a failed hook; hook failures never stop a cycle
pub fn log_hook_result(hook: &'static str, result: anyhow::Result<()>) {
    if let Err(e) = result {
        warn!(hook, error = ?e, "Batch interceptor hook failed, continuing");
        metrics::counter!(INTERCEPTOR_ERRORS_COUNTER, "hook" => hook).increment(1);
    }
}

/// Runs several interceptors in registration order
#[derive(Default)]
pub struct CompositeBatchInterceptor {
    interceptors: Vec<Box<dyn BatchInterceptor>>,
}

impl CompositeBatchInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, interceptor: impl BatchInterceptor + 'static) -> Self {
        self.interceptors.push(Box::new(interceptor));
        self
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

impl BatchInterceptor for CompositeBatchInterceptor {
    fn before_poll(&self, consumer: &dyn ConsumerControl) -> anyhow::Result<()> {
        for interceptor in &self.interceptors {
            log_hook_result("before_poll", interceptor.before_poll(consumer));
        }
        Ok(())
    }

    fn intercept(
        &self,
        records: Vec<ConsumerRecord>,
        consumer: &dyn ConsumerControl,
    ) -> Option<Vec<ConsumerRecord>> {
        let mut records = records;
        for interceptor in &self.interceptors {
            records = interceptor.intercept(records, consumer)?;
        }
        Some(records)
    }

    fn success(
        &self,
        records: &[ConsumerRecord],
        consumer: &dyn ConsumerControl,
    ) -> anyhow::Result<()> {
        for interceptor in &self.interceptors {
            log_hook_result("success", interceptor.success(records, consumer));
        }
        Ok(())
    }

    fn failure(
        &self,
        records: &[ConsumerRecord],
        error: &ListenerError,
        consumer: &dyn ConsumerControl,
    ) -> anyhow::Result<()> {
        for interceptor in &self.interceptors {
            log_hook_result("failure", interceptor.failure(records, error, consumer));
        }
        Ok(())
    }

    fn after_records_processed(&self, consumer: &dyn ConsumerControl) -> anyhow::Result<()> {
        for interceptor in &self.interceptors {
            log_hook_result(
                "after_records_processed",
                interceptor.after_records_processed(consumer),
            );
        }
        Ok(())
    }
}
