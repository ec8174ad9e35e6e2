use thiserror::Error;

use crate::types::{Partition, TopicPartitionOffset};

/// Where, inside a batch, a batch listener says it failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailedRecordPointer {
    Record(TopicPartitionOffset),
    Index(usize),
}

/// Failure returned by a record or batch listener.
///
/// The variant tells the error handler how much it knows about the failure site.
#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("record processing failed: {0}")]
    Record(#[source] anyhow::Error),

    #[error("record processing failed and cannot be retried: {0}")]
    NotRetryable(#[source] anyhow::Error),

    #[error("batch listener failed at {pointer:?}: {source}")]
    BatchFailed {
        pointer: FailedRecordPointer,
        source: anyhow::Error,
    },

    #[error("failed to deserialize record {record:?}: {source}")]
    Deserialization {
        record: Option<TopicPartitionOffset>,
        source: anyhow::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ListenerError {
    pub fn batch_failed_at_record(record: TopicPartitionOffset, source: anyhow::Error) -> Self {
        Self::BatchFailed {
            pointer: FailedRecordPointer::Record(record),
            source,
        }
    }

    pub fn batch_failed_at_index(index: usize, source: anyhow::Error) -> Self {
        Self::BatchFailed {
            pointer: FailedRecordPointer::Index(index),
            source,
        }
    }

    /// Short label used in logs and metric tags
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Record(_) => "record",
            Self::NotRetryable(_) => "not_retryable",
            Self::BatchFailed { .. } => "batch_failed",
            Self::Deserialization { .. } => "deserialization",
            Self::Other(_) => "other",
        }
    }

    /// Failures that redelivery can never fix
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotRetryable(_) | Self::Deserialization { .. })
    }
}

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error(
        "either a sleeping back-off policy or no back-off must be provided; provided back-off policy: {policy}"
    )]
    UnsupportedBackOffPolicy { policy: String },

    #[error("unsupported back-off mode '{mode}', expected 'pause' or 'sleep'")]
    UnsupportedBackOffMode { mode: String },

    #[error(
        "max attempts must be between 1 and {limit} (or -1 for the default), got {max_attempts}",
        limit = crate::backoff::schedule::MAX_ATTEMPTS_LIMIT
    )]
    InvalidMaxAttempts { max_attempts: i32 },

    #[error("invalid back-off parameter {name}: {value}")]
    InvalidBackOffParameter { name: &'static str, value: String },

    #[error("invalid log level '{level}'")]
    InvalidLogLevel { level: String },
}

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("failed to seek {partition} to offset {offset}: {source}")]
    Seek {
        partition: Partition,
        offset: i64,
        source: anyhow::Error,
    },

    #[error("failed to commit offsets: {0}")]
    Commit(#[source] anyhow::Error),

    #[error("failed to pause partitions: {0}")]
    Pause(#[source] anyhow::Error),

    #[error("failed to resume partitions: {0}")]
    Resume(#[source] anyhow::Error),
}

/// Errors the recovery engine surfaces to the listener container.
///
/// Every variant is fatal for the current poll cycle; retryable listener failures are
/// handled inside the engine and never show up here.
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(
        "this error handler cannot process deserialization errors directly; please consider configuring an error-handling deserializer for the key and/or value"
    )]
    Deserialization(#[source] ListenerError),

    #[error("this error handler cannot process '{kind}' errors; no record information is available")]
    NoRecordInformation {
        kind: &'static str,
        source: ListenerError,
    },

    #[error("recoverer failed for record {record}: {source}")]
    Recoverer {
        record: TopicPartitionOffset,
        source: anyhow::Error,
    },

    #[error(transparent)]
    Consumer(#[from] ConsumerError),
}
