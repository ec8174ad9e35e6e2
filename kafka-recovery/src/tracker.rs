//! Partition Retry Tracker - counts failures of the record at the head of each partition
//!
//! One tracker belongs to one container thread. Records of a partition are processed strictly
//! in order by that thread, so at most one record per partition can be mid-episode: the entry
//! for a partition remembers which offset is failing and how many times it has failed. A
//! failure at any other offset of the same partition starts a fresh episode.

use std::collections::HashMap;

use tracing::debug;

use crate::types::{Partition, TopicPartitionOffset};

/// State tracked per partition
#[derive(Debug)]
struct FailureEpisode {
    /// Offset of the record currently failing
    offset: i64,
    /// How many times it has failed so far
    attempts: u32,
}

#[derive(Debug, Default)]
pub struct PartitionRetryTracker {
    episodes: HashMap<Partition, FailureEpisode>,
}

impl PartitionRetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more failure of `key` and return the failure count, starting at 1.
    pub fn on_failure(&mut self, key: &TopicPartitionOffset) -> u32 {
        let episode = self
            .episodes
            .entry(key.partition().clone())
            .and_modify(|episode| {
                if episode.offset == key.offset() {
                    episode.attempts = episode.attempts.saturating_add(1);
                } else {
                    debug!(
                        topic = key.topic(),
                        partition = key.partition_number(),
                        previous_offset = episode.offset,
                        offset = key.offset(),
                        "Failure at a new offset, starting a new episode"
                    );
                    episode.offset = key.offset();
                    episode.attempts = 1;
                }
            })
            .or_insert_with(|| FailureEpisode {
                offset: key.offset(),
                attempts: 1,
            });

        episode.attempts
    }

    /// End the episode for `key` once it was recovered or processed successfully.
    ///
    /// Returns whether an episode was open at exactly that offset.
    pub fn reset(&mut self, key: &TopicPartitionOffset) -> bool {
        match self.episodes.get(key.partition()) {
            Some(episode) if episode.offset == key.offset() => {
                self.episodes.remove(key.partition());
                debug!(
                    topic = key.topic(),
                    partition = key.partition_number(),
                    offset = key.offset(),
                    "Cleared failure episode"
                );
                true
            }
            _ => false,
        }
    }

    /// Failures recorded so far for `key`
    pub fn attempts(&self, key: &TopicPartitionOffset) -> u32 {
        match self.episodes.get(key.partition()) {
            Some(episode) if episode.offset == key.offset() => episode.attempts,
            _ => 0,
        }
    }

    /// The 1-based delivery attempt the next delivery of `key` will be
    pub fn delivery_attempt(&self, key: &TopicPartitionOffset) -> u32 {
        self.attempts(key).saturating_add(1)
    }

    /// Forget a partition (during revocation)
    pub fn clear_partition(&mut self, partition: &Partition) {
        if self.episodes.remove(partition).is_some() {
            debug!(
                topic = partition.topic(),
                partition = partition.partition_number(),
                "Cleared failure episode for revoked partition"
            );
        }
    }

    /// Clear all partitions (during shutdown)
    pub fn clear_all(&mut self) {
        self.episodes.clear();
    }

    /// Number of partitions with an open failure episode
    pub fn episode_count(&self) -> usize {
        self.episodes.len()
    }
}
