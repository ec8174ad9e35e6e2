use std::collections::BTreeMap;

use crate::error::ConsumerError;
use crate::types::Partition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    Sync,
    Async,
}

impl CommitMode {
    pub fn from_sync_commits(sync_commits: bool) -> Self {
        if sync_commits {
            Self::Sync
        } else {
            Self::Async
        }
    }
}

/// The consumer operations the recovery engine needs.
///
/// Implementations are owned by the container thread and are only ever called from it.
/// Offsets passed to `commit` are the next offsets to consume (last processed + 1).
pub trait ConsumerControl {
    fn seek(&self, partition: &Partition, offset: i64) -> Result<(), ConsumerError>;

    fn commit(
        &self,
        offsets: &BTreeMap<Partition, i64>,
        mode: CommitMode,
    ) -> Result<(), ConsumerError>;

    fn pause(&self, partitions: &[Partition]) -> Result<(), ConsumerError>;

    fn resume(&self, partitions: &[Partition]) -> Result<(), ConsumerError>;
}
