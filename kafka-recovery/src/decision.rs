use std::collections::BTreeMap;
use std::time::Duration;

use tracing::debug;

use crate::backoff::BackOffSchedule;
use crate::consumer::ConsumerControl;
use crate::error::ConsumerError;
use crate::types::{ConsumerRecord, Partition, TopicPartitionOffset};

/// What to do with a failed record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Reposition the consumer so the record is delivered again after `delay`
    Retry { delay: Duration },
    /// Hand the record to the recoverer and move past it
    Recover,
}

/// Seek-or-recover decision for failure number `attempt` (1-based) of `key`.
///
/// Depends only on its arguments: the same inputs always give the same verdict.
pub fn decide(key: &TopicPartitionOffset, attempt: u32, schedule: &BackOffSchedule) -> Verdict {
    let verdict = match schedule.delay_for_attempt(attempt) {
        Some(delay) => Verdict::Retry { delay },
        None => Verdict::Recover,
    };
    debug!(
        record = %key,
        attempt,
        retries = schedule.len(),
        verdict = ?verdict,
        "Decided on failed record"
    );
    verdict
}

/// First offset of every partition present in `records`, in offset order of appearance
pub fn first_offsets(records: &[ConsumerRecord]) -> BTreeMap<Partition, i64> {
    let mut offsets = BTreeMap::new();
    for record in records {
        offsets
            .entry(record.partition().clone())
            .or_insert(record.offset());
    }
    offsets
}

/// Next offset to consume (highest offset + 1) for every partition present in `records`
pub fn next_offsets(records: &[ConsumerRecord]) -> BTreeMap<Partition, i64> {
    let mut offsets: BTreeMap<Partition, i64> = BTreeMap::new();
    for record in records {
        let next = record.offset() + 1;
        offsets
            .entry(record.partition().clone())
            .and_modify(|offset| *offset = (*offset).max(next))
            .or_insert(next);
    }
    offsets
}

/// Seek each partition in `records` back to its first offset there, so the next poll
/// redelivers them in their original order.
pub fn seek_to_first(
    consumer: &dyn ConsumerControl,
    records: &[ConsumerRecord],
) -> Result<BTreeMap<Partition, i64>, ConsumerError> {
    let offsets = first_offsets(records);
    for (partition, offset) in &offsets {
        consumer.seek(partition, *offset)?;
        debug!(
            topic = partition.topic(),
            partition = partition.partition_number(),
            offset,
            "Seeked partition for redelivery"
        );
    }
    Ok(offsets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{record, FakeConsumer};
    use rstest::rstest;

    fn key() -> TopicPartitionOffset {
        TopicPartitionOffset::new(Partition::new("events", 0), 10)
    }

    #[test]
    fn test_three_attempts_retry_retry_recover() {
        let schedule = BackOffSchedule::from_delays(vec![Duration::ZERO, Duration::ZERO]);

        assert_eq!(
            decide(&key(), 1, &schedule),
            Verdict::Retry {
                delay: Duration::ZERO
            }
        );
        assert_eq!(
            decide(&key(), 2, &schedule),
            Verdict::Retry {
                delay: Duration::ZERO
            }
        );
        assert_eq!(decide(&key(), 3, &schedule), Verdict::Recover);
    }

    #[rstest]
    #[case(1, Verdict::Retry { delay: Duration::from_millis(100) })]
    #[case(2, Verdict::Retry { delay: Duration::from_millis(200) })]
    #[case(3, Verdict::Recover)]
    #[case(50, Verdict::Recover)]
    fn test_decide_is_pure(#[case] attempt: u32, #[case] expected: Verdict) {
        let schedule = BackOffSchedule::from_delays(vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
        ]);

        for _ in 0..3 {
            assert_eq!(decide(&key(), attempt, &schedule), expected);
        }
    }

    #[test]
    fn test_empty_schedule_recovers_immediately() {
        let schedule = BackOffSchedule::from_delays(vec![]);
        assert_eq!(decide(&key(), 1, &schedule), Verdict::Recover);
    }

    #[test]
    fn test_first_and_next_offsets() {
        let records = vec![
            record("events", 0, 10),
            record("events", 1, 5),
            record("events", 0, 11),
            record("events", 1, 6),
        ];

        let first = first_offsets(&records);
        assert_eq!(first.get(&Partition::new("events", 0)), Some(&10));
        assert_eq!(first.get(&Partition::new("events", 1)), Some(&5));

        let next = next_offsets(&records);
        assert_eq!(next.get(&Partition::new("events", 0)), Some(&12));
        assert_eq!(next.get(&Partition::new("events", 1)), Some(&7));
    }

    #[test]
    fn test_seek_to_first_seeks_every_partition_once() {
        let consumer = FakeConsumer::new();
        let records = vec![
            record("events", 0, 10),
            record("events", 1, 5),
            record("events", 0, 11),
        ];

        seek_to_first(&consumer, &records).unwrap();

        assert_eq!(
            consumer.seeks(),
            vec![
                (Partition::new("events", 0), 10),
                (Partition::new("events", 1), 5)
            ]
        );
    }
}
