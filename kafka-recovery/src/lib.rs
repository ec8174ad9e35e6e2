//! Failure recovery for Kafka consumers.
//!
//! When a listener fails, the [`DefaultErrorHandler`] decides whether the failed record is
//! delivered again (by seeking the consumer back, optionally after a back-off) or handed to a
//! [`ConsumerRecordRecoverer`] once its retries are used up. Per-partition ordering and
//! at-least-once delivery hold throughout: nothing after a failed record is committed before the
//! failed record itself is resolved.
//!
//! ## Error logging (anyhow)
//!
//! When logging `anyhow::Error` or other error types that implement `std::error::Error` with
//! a cause chain, use formats that include the full chain so root causes are visible in logs:
//!
//! - **Inline format:** `{e:#}` gives the full chain on one line (`outer: middle: root cause`).
//! - **Structured field:** `error = ?e` gives the full chain with `Caused by:` sections (Debug).
//!
//! Avoid `{}` / `%e` (Display) for errors: they only show the top-level message and hide the chain.

pub mod backoff;
pub mod classifier;
pub mod config;
pub mod consumer;
pub mod container;
pub mod decision;
pub mod error;
pub mod fallback;
pub mod handler;
pub mod interceptor;
pub mod invoker;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod metrics_consts;
pub mod pause;
pub mod recoverer;
pub mod retry_listener;
pub mod test_utils;
pub mod tracker;
pub mod types;

// Re-export commonly used types for convenience
pub use backoff::{BackOffPolicy, BackOffSchedule};
pub use config::{BackOffMode, RecoveryConfig};
pub use consumer::{CommitMode, ConsumerControl};
pub use container::{ContainerState, ListenerContainer};
pub use error::{ListenerError, RecoveryError};
pub use handler::{DefaultErrorHandler, HandleOutcome, RetryState};
pub use invoker::{BatchListener, CycleOutcome, ListenerInvoker, RecordListener};
pub use recoverer::{ConsumerRecordRecoverer, LoggingRecoverer};
pub use types::{ConsumerRecord, Partition, TopicPartitionOffset};
