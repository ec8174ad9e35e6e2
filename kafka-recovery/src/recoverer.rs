use tracing::{debug, error, info, trace, warn, Level};

use crate::error::ListenerError;
use crate::types::ConsumerRecord;

/// Terminal action for a record whose retries are exhausted.
///
/// Called synchronously on the container thread. An `Err` is fatal for the poll cycle: the
/// engine propagates it and never retries the recovery itself.
pub trait ConsumerRecordRecoverer: Send + Sync {
    fn recover(&self, record: &ConsumerRecord, error: &ListenerError) -> anyhow::Result<()>;
}

impl<F> ConsumerRecordRecoverer for F
where
    F: Fn(&ConsumerRecord, &ListenerError) -> anyhow::Result<()> + Send + Sync,
{
    fn recover(&self, record: &ConsumerRecord, error: &ListenerError) -> anyhow::Result<()> {
        self(record, error)
    }
}

/// Default recoverer: log the record and drop it
#[derive(Debug, Clone, Copy)]
pub struct LoggingRecoverer {
    level: Level,
}

impl LoggingRecoverer {
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    pub fn level(&self) -> Level {
        self.level
    }
}

impl Default for LoggingRecoverer {
    fn default() -> Self {
        Self::new(Level::ERROR)
    }
}

impl ConsumerRecordRecoverer for LoggingRecoverer {
    fn recover(&self, record: &ConsumerRecord, error: &ListenerError) -> anyhow::Result<()> {
        let topic = record.topic();
        let partition = record.partition_number();
        let offset = record.offset();

        // tracing needs the level at compile time
        if self.level == Level::ERROR {
            error!(topic, partition, offset, error = ?error, "Backoff exhausted, dropping record");
        } else if self.level == Level::WARN {
            warn!(topic, partition, offset, error = ?error, "Backoff exhausted, dropping record");
        } else if self.level == Level::INFO {
            info!(topic, partition, offset, error = ?error, "Backoff exhausted, dropping record");
        } else if self.level == Level::DEBUG {
            debug!(topic, partition, offset, error = ?error, "Backoff exhausted, dropping record");
        } else {
            trace!(topic, partition, offset, error = ?error, "Backoff exhausted, dropping record");
        }
        Ok(())
    }
}
