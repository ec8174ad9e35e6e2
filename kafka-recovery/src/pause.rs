//! Non-blocking back-off: a partition waiting out a retry delay is paused on the consumer
//! instead of sleeping the container thread, and resumed once its deadline has passed.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::consumer::ConsumerControl;
use crate::error::ConsumerError;
use crate::types::Partition;

#[derive(Debug, Default)]
pub struct PausedPartitions {
    resume_at: BTreeMap<Partition, Instant>,
}

impl PausedPartitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause `partition` until `now + delay`. Re-pausing moves the deadline.
    pub fn pause(
        &mut self,
        consumer: &dyn ConsumerControl,
        partition: &Partition,
        delay: Duration,
        now: Instant,
    ) -> Result<(), ConsumerError> {
        if !self.resume_at.contains_key(partition) {
            consumer.pause(std::slice::from_ref(partition))?;
        }
        self.resume_at.insert(partition.clone(), now + delay);
        debug!(
            topic = partition.topic(),
            partition = partition.partition_number(),
            delay_ms = delay.as_millis() as u64,
            "Paused partition for back-off"
        );
        Ok(())
    }

    /// Resume every partition whose deadline is at or before `now`
    pub fn resume_due(
        &mut self,
        consumer: &dyn ConsumerControl,
        now: Instant,
    ) -> Result<Vec<Partition>, ConsumerError> {
        let due: Vec<Partition> = self
            .resume_at
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(partition, _)| partition.clone())
            .collect();

        if due.is_empty() {
            return Ok(due);
        }

        consumer.resume(&due)?;
        for partition in &due {
            self.resume_at.remove(partition);
        }
        info!(partitions = due.len(), "Resumed partitions after back-off");
        Ok(due)
    }

    /// Drop a partition without resuming it (it was revoked)
    pub fn forget(&mut self, partition: &Partition) {
        self.resume_at.remove(partition);
    }

    pub fn clear(&mut self) {
        self.resume_at.clear();
    }

    pub fn is_paused(&self, partition: &Partition) -> bool {
        self.resume_at.contains_key(partition)
    }

    pub fn len(&self) -> usize {
        self.resume_at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resume_at.is_empty()
    }

    /// Earliest pending resume deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.resume_at.values().min().copied()
    }
}
