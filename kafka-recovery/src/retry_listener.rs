use crate::error::ListenerError;
use crate::types::ConsumerRecord;

/// Observer of the retry engine. Every method defaults to a no-op.
///
/// Listeners see each decision after it is made and cannot influence it.
pub trait RetryListener: Send + Sync {
    /// A delivery of `record` failed; `attempt` is the failure count so far
    fn failed_delivery(&self, _record: &ConsumerRecord, _error: &ListenerError, _attempt: u32) {}

    /// The recoverer accepted `record`
    fn recovered(&self, _record: &ConsumerRecord, _error: &ListenerError) {}

    /// The recoverer itself failed on `record`
    fn recovery_failed(
        &self,
        _record: &ConsumerRecord,
        _original: &ListenerError,
        _failure: &anyhow::Error,
    ) {
    }
}
