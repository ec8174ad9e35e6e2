use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::anyhow;

use crate::consumer::{CommitMode, ConsumerControl};
use crate::error::ConsumerError;
use crate::types::{ConsumerRecord, Partition};

/// Test utilities for the recovery engine, used by unit tests and the tests/ directory
pub fn record(topic: &str, partition: i32, offset: i64) -> ConsumerRecord {
    ConsumerRecord::new(Partition::new(topic, partition), offset)
        .with_payload(format!("{topic}-{partition}-{offset}"))
}

pub fn records(topic: &str, partition: i32, offsets: std::ops::Range<i64>) -> Vec<ConsumerRecord> {
    offsets.map(|offset| record(topic, partition, offset)).collect()
}

#[derive(Default)]
struct FakeState {
    /// Per-partition log the fake "broker" serves polls from
    log: BTreeMap<Partition, Vec<ConsumerRecord>>,
    positions: BTreeMap<Partition, i64>,
    paused: BTreeSet<Partition>,
    seeks: Vec<(Partition, i64)>,
    commits: Vec<(BTreeMap<Partition, i64>, CommitMode)>,
    pauses: Vec<Vec<Partition>>,
    resumes: Vec<Vec<Partition>>,
}

/// In-memory consumer that records every control call and can serve polls from a log.
#[derive(Default)]
pub struct FakeConsumer {
    state: Mutex<FakeState>,
    fail_seeks: AtomicBool,
    fail_commits: AtomicBool,
}

impl FakeConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A consumer positioned at the start of `log`
    pub fn with_log(log: Vec<ConsumerRecord>) -> Self {
        let consumer = Self::new();
        {
            let mut state = consumer.state.lock().unwrap();
            for record in log {
                state
                    .positions
                    .entry(record.partition().clone())
                    .or_insert(record.offset());
                state
                    .log
                    .entry(record.partition().clone())
                    .or_default()
                    .push(record);
            }
        }
        consumer
    }

    /// Return up to `max_records` records from unpaused partitions, advancing positions
    pub fn poll(&self, max_records: usize) -> Vec<ConsumerRecord> {
        let mut state = self.state.lock().unwrap();
        let FakeState {
            log,
            positions,
            paused,
            ..
        } = &mut *state;

        let mut polled = vec![];
        for (partition, partition_log) in log.iter() {
            if paused.contains(partition) {
                continue;
            }
            let position = positions.entry(partition.clone()).or_insert(0);
            let start = *position;
            for record in partition_log.iter().filter(|r| r.offset() >= start) {
                if polled.len() >= max_records {
                    break;
                }
                *position = record.offset() + 1;
                polled.push(record.clone());
            }
        }
        polled
    }

    pub fn set_fail_seeks(&self, fail: bool) {
        self.fail_seeks.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn seeks(&self) -> Vec<(Partition, i64)> {
        self.state.lock().unwrap().seeks.clone()
    }

    pub fn commits(&self) -> Vec<(BTreeMap<Partition, i64>, CommitMode)> {
        self.state.lock().unwrap().commits.clone()
    }

    /// Latest committed offset for a partition
    pub fn committed(&self, partition: &Partition) -> Option<i64> {
        self.state
            .lock()
            .unwrap()
            .commits
            .iter()
            .rev()
            .find_map(|(offsets, _)| offsets.get(partition).copied())
    }

    pub fn position(&self, partition: &Partition) -> Option<i64> {
        self.state.lock().unwrap().positions.get(partition).copied()
    }

    pub fn pauses(&self) -> Vec<Vec<Partition>> {
        self.state.lock().unwrap().pauses.clone()
    }

    pub fn resumes(&self) -> Vec<Vec<Partition>> {
        self.state.lock().unwrap().resumes.clone()
    }

    pub fn is_paused(&self, partition: &Partition) -> bool {
        self.state.lock().unwrap().paused.contains(partition)
    }
}

impl ConsumerControl for FakeConsumer {
    fn seek(&self, partition: &Partition, offset: i64) -> Result<(), ConsumerError> {
        if self.fail_seeks.load(Ordering::SeqCst) {
            return Err(ConsumerError::Seek {
                partition: partition.clone(),
                offset,
                source: anyhow!("seek rejected by test consumer"),
            });
        }
        let mut state = self.state.lock().unwrap();
        state.seeks.push((partition.clone(), offset));
        state.positions.insert(partition.clone(), offset);
        Ok(())
    }

    fn commit(
        &self,
        offsets: &BTreeMap<Partition, i64>,
        mode: CommitMode,
    ) -> Result<(), ConsumerError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(ConsumerError::Commit(anyhow!(
                "commit rejected by test consumer"
            )));
        }
        self.state
            .lock()
            .unwrap()
            .commits
            .push((offsets.clone(), mode));
        Ok(())
    }

    fn pause(&self, partitions: &[Partition]) -> Result<(), ConsumerError> {
        let mut state = self.state.lock().unwrap();
        state.paused.extend(partitions.iter().cloned());
        state.pauses.push(partitions.to_vec());
        Ok(())
    }

    fn resume(&self, partitions: &[Partition]) -> Result<(), ConsumerError> {
        let mut state = self.state.lock().unwrap();
        for partition in partitions {
            state.paused.remove(partition);
        }
        state.resumes.push(partitions.to_vec());
        Ok(())
    }
}
