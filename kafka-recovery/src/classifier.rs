//! Failure classification: work out which record, if any, a listener failure belongs to.
//!
//! Every path through the error handler starts here, so the handler switches on a single
//! [`FailureClassification`] instead of poking at error variants in several places.

use tracing::warn;

use crate::error::{FailedRecordPointer, ListenerError};
use crate::types::ConsumerRecord;

/// The record a failure was pinned on
#[derive(Debug, Clone, Copy)]
pub struct FailedRecordInfo<'a> {
    pub record: &'a ConsumerRecord,
    /// Position of the record within the records handed to the handler
    pub index: usize,
    pub error: &'a ListenerError,
}

impl FailedRecordInfo<'_> {
    pub fn is_retryable(&self) -> bool {
        self.error.is_retryable()
    }
}

#[derive(Debug)]
pub enum FailureClassification<'a> {
    /// A record listener failed on the first of the remaining records
    AttributedRecord(FailedRecordInfo<'a>),
    /// A batch listener pointed at one record of its batch
    AttributedBatchPosition(FailedRecordInfo<'a>),
    /// Nothing ties the failure to a record; the whole batch is suspect
    Unattributable,
    /// A failure kind redelivery cannot fix and no record to recover
    NonRetryableKind,
}

/// Classify a record listener failure. `remaining` starts with the record that failed.
pub fn classify_record<'a>(
    error: &'a ListenerError,
    remaining: &'a [ConsumerRecord],
) -> FailureClassification<'a> {
    match remaining.first() {
        Some(record) => FailureClassification::AttributedRecord(FailedRecordInfo {
            record,
            index: 0,
            error,
        }),
        None => unattributed(error),
    }
}

/// Classify a batch listener failure against the batch it was invoked with.
pub fn classify_batch<'a>(
    error: &'a ListenerError,
    records: &'a [ConsumerRecord],
) -> FailureClassification<'a> {
    let index = match error {
        ListenerError::BatchFailed { pointer, .. } => match pointer {
            FailedRecordPointer::Index(index) if *index < records.len() => Some(*index),
            FailedRecordPointer::Index(index) => {
                warn!(
                    index,
                    batch_size = records.len(),
                    "Failed record index is outside the batch"
                );
                None
            }
            FailedRecordPointer::Record(key) => {
                let position = records.iter().position(|r| r.is_at(key));
                if position.is_none() {
                    warn!(record = %key, "Failed record is not part of the batch");
                }
                position
            }
        },
        ListenerError::Deserialization {
            record: Some(key), ..
        } => records.iter().position(|r| r.is_at(key)),
        _ => None,
    };

    match index {
        Some(index) => FailureClassification::AttributedBatchPosition(FailedRecordInfo {
            record: &records[index],
            index,
            error,
        }),
        None => unattributed(error),
    }
}

fn unattributed(error: &ListenerError) -> FailureClassification<'_> {
    match error {
        ListenerError::Deserialization { .. } => FailureClassification::NonRetryableKind,
        _ => FailureClassification::Unattributable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Partition, TopicPartitionOffset};
    use anyhow::anyhow;

    fn batch() -> Vec<ConsumerRecord> {
        (10..13)
            .map(|offset| ConsumerRecord::new(Partition::new("events", 0), offset))
            .collect()
    }

    fn tpo(offset: i64) -> TopicPartitionOffset {
        TopicPartitionOffset::new(Partition::new("events", 0), offset)
    }

    #[test]
    fn test_record_listener_failure_is_first_remaining_record() {
        let records = batch();
        let err = ListenerError::Record(anyhow!("boom"));

        match classify_record(&err, &records) {
            FailureClassification::AttributedRecord(info) => {
                assert_eq!(info.index, 0);
                assert_eq!(info.record.offset(), 10);
                assert!(info.is_retryable());
            }
            other => panic!("unexpected classification {other:?}"),
        }
    }

    #[test]
    fn test_record_listener_not_retryable_is_still_attributed() {
        let records = batch();
        let err = ListenerError::NotRetryable(anyhow!("poison"));

        match classify_record(&err, &records) {
            FailureClassification::AttributedRecord(info) => assert!(!info.is_retryable()),
            other => panic!("unexpected classification {other:?}"),
        }
    }

    #[test]
    fn test_batch_pointer_by_record() {
        let records = batch();
        let err = ListenerError::batch_failed_at_record(tpo(11), anyhow!("boom"));

        match classify_batch(&err, &records) {
            FailureClassification::AttributedBatchPosition(info) => {
                assert_eq!(info.index, 1);
                assert_eq!(info.record.offset(), 11);
            }
            other => panic!("unexpected classification {other:?}"),
        }
    }

    #[test]
    fn test_batch_pointer_by_index() {
        let records = batch();
        let err = ListenerError::batch_failed_at_index(2, anyhow!("boom"));

        assert!(matches!(
            classify_batch(&err, &records),
            FailureClassification::AttributedBatchPosition(FailedRecordInfo { index: 2, .. })
        ));
    }

    #[test]
    fn test_batch_pointer_outside_batch_is_unattributable() {
        let records = batch();

        let err = ListenerError::batch_failed_at_index(3, anyhow!("boom"));
        assert!(matches!(
            classify_batch(&err, &records),
            FailureClassification::Unattributable
        ));

        let err = ListenerError::batch_failed_at_record(tpo(99), anyhow!("boom"));
        assert!(matches!(
            classify_batch(&err, &records),
            FailureClassification::Unattributable
        ));
    }

    #[test]
    fn test_plain_batch_error_is_unattributable() {
        let records = batch();
        let err = ListenerError::Other(anyhow!("database down"));

        assert!(matches!(
            classify_batch(&err, &records),
            FailureClassification::Unattributable
        ));
    }

    #[test]
    fn test_deserialization_without_record_is_non_retryable_kind() {
        let records = batch();
        let err = ListenerError::Deserialization {
            record: None,
            source: anyhow!("bad magic byte"),
        };

        assert!(matches!(
            classify_batch(&err, &records),
            FailureClassification::NonRetryableKind
        ));
        assert!(matches!(
            classify_record(&err, &[]),
            FailureClassification::NonRetryableKind
        ));
    }

    #[test]
    fn test_deserialization_with_record_is_attributed_and_not_retryable() {
        let records = batch();
        let err = ListenerError::Deserialization {
            record: Some(tpo(12)),
            source: anyhow!("bad magic byte"),
        };

        match classify_batch(&err, &records) {
            FailureClassification::AttributedBatchPosition(info) => {
                assert_eq!(info.index, 2);
                assert!(!info.is_retryable());
            }
            other => panic!("unexpected classification {other:?}"),
        }
    }
}
