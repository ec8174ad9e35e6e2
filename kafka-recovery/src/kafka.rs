//! rdkafka adapters: a [`ConsumerControl`] over a `BaseConsumer`, conversion of polled messages
//! into [`ConsumerRecord`]s and a dead-letter recoverer.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use rdkafka::consumer::{BaseConsumer, Consumer, ConsumerContext};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{BaseProducer, BaseRecord, Producer};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use tracing::{error, info};

use crate::consumer::{CommitMode, ConsumerControl};
use crate::error::{ConsumerError, ListenerError};
use crate::recoverer::ConsumerRecordRecoverer;
use crate::types::{ConsumerRecord, Partition};

pub const DLT_ORIGINAL_TOPIC: &str = "kafka_dlt-original-topic";
pub const DLT_ORIGINAL_PARTITION: &str = "kafka_dlt-original-partition";
pub const DLT_ORIGINAL_OFFSET: &str = "kafka_dlt-original-offset";
pub const DLT_ORIGINAL_TIMESTAMP: &str = "kafka_dlt-original-timestamp";
pub const DLT_EXCEPTION_KIND: &str = "kafka_dlt-exception-kind";
pub const DLT_EXCEPTION_MESSAGE: &str = "kafka_dlt-exception-message";

const DEFAULT_SEEK_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

impl ConsumerRecord {
    /// Copy a polled message out of the consumer's buffer
    pub fn from_borrowed_message(message: &BorrowedMessage<'_>) -> Self {
        let mut record = ConsumerRecord::new(
            Partition::new(message.topic(), message.partition()),
            message.offset(),
        );
        record.key = message.key().map(<[u8]>::to_vec);
        record.payload = message.payload().map(<[u8]>::to_vec);
        record.timestamp = message.timestamp().to_millis();
        if let Some(headers) = message.headers() {
            record.headers = headers
                .iter()
                .map(|header| {
                    (
                        header.key.to_string(),
                        header.value.map(<[u8]>::to_vec).unwrap_or_default(),
                    )
                })
                .collect();
        }
        record
    }
}

fn partition_list(partitions: &[Partition]) -> TopicPartitionList {
    let mut list = TopicPartitionList::with_capacity(partitions.len());
    for partition in partitions {
        list.add_partition(partition.topic(), partition.partition_number());
    }
    list
}

/// Control surface over an rdkafka consumer owned by the container thread
pub struct RdKafkaConsumer<'a, X: ConsumerContext + 'static> {
    consumer: &'a BaseConsumer<X>,
    seek_timeout: Duration,
}

impl<'a, X: ConsumerContext + 'static> RdKafkaConsumer<'a, X> {
    pub fn new(consumer: &'a BaseConsumer<X>) -> Self {
        Self {
            consumer,
            seek_timeout: DEFAULT_SEEK_TIMEOUT,
        }
    }

    pub fn with_seek_timeout(mut self, seek_timeout: Duration) -> Self {
        self.seek_timeout = seek_timeout;
        self
    }
}

impl<X: ConsumerContext + 'static> ConsumerControl for RdKafkaConsumer<'_, X> {
    fn seek(&self, partition: &Partition, offset: i64) -> Result<(), ConsumerError> {
        self.consumer
            .seek(
                partition.topic(),
                partition.partition_number(),
                Offset::Offset(offset),
                self.seek_timeout,
            )
            .map_err(|e| ConsumerError::Seek {
                partition: partition.clone(),
                offset,
                source: e.into(),
            })
    }

    fn commit(
        &self,
        offsets: &BTreeMap<Partition, i64>,
        mode: CommitMode,
    ) -> Result<(), ConsumerError> {
        let mut list = TopicPartitionList::with_capacity(offsets.len());
        for (partition, offset) in offsets {
            list.add_partition_offset(
                partition.topic(),
                partition.partition_number(),
                Offset::Offset(*offset),
            )
            .map_err(|e| ConsumerError::Commit(e.into()))?;
        }

        let mode = match mode {
            CommitMode::Sync => rdkafka::consumer::CommitMode::Sync,
            CommitMode::Async => rdkafka::consumer::CommitMode::Async,
        };
        self.consumer
            .commit(&list, mode)
            .map_err(|e| ConsumerError::Commit(e.into()))
    }

    fn pause(&self, partitions: &[Partition]) -> Result<(), ConsumerError> {
        self.consumer
            .pause(&partition_list(partitions))
            .map_err(|e| ConsumerError::Pause(e.into()))
    }

    fn resume(&self, partitions: &[Partition]) -> Result<(), ConsumerError> {
        self.consumer
            .resume(&partition_list(partitions))
            .map_err(|e| ConsumerError::Resume(e.into()))
    }
}

/// Recoverer that publishes failed records to `<topic>.DLT` on the same partition.
///
/// The original headers are kept and `kafka_dlt-*` headers describe where the record came from
/// and why it failed. `recover` blocks until the producer has flushed, so the engine only moves
/// past the record once the dead letter is written.
pub struct DeadLetterPublishingRecoverer {
    producer: BaseProducer,
    topic_suffix: String,
    flush_timeout: Duration,
}

impl DeadLetterPublishingRecoverer {
    pub fn new(producer: BaseProducer) -> Self {
        Self {
            producer,
            topic_suffix: ".DLT".to_string(),
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }

    pub fn with_topic_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.topic_suffix = suffix.into();
        self
    }

    pub fn with_flush_timeout(mut self, flush_timeout: Duration) -> Self {
        self.flush_timeout = flush_timeout;
        self
    }

    pub fn destination(&self, record: &ConsumerRecord) -> String {
        format!("{}{}", record.topic(), self.topic_suffix)
    }
}

/// Original headers followed by the dead-letter headers
pub fn dead_letter_headers(record: &ConsumerRecord, error: &ListenerError) -> OwnedHeaders {
    let mut headers = OwnedHeaders::new_with_capacity(record.headers.len() + 6);
    for (key, value) in &record.headers {
        headers = headers.insert(Header {
            key: key.as_str(),
            value: Some(value.as_slice()),
        });
    }

    let partition = record.partition_number().to_string();
    let offset = record.offset().to_string();
    let message = format!("{error:#}");
    headers = headers
        .insert(Header {
            key: DLT_ORIGINAL_TOPIC,
            value: Some(record.topic()),
        })
        .insert(Header {
            key: DLT_ORIGINAL_PARTITION,
            value: Some(partition.as_str()),
        })
        .insert(Header {
            key: DLT_ORIGINAL_OFFSET,
            value: Some(offset.as_str()),
        })
        .insert(Header {
            key: DLT_EXCEPTION_KIND,
            value: Some(error.kind()),
        })
        .insert(Header {
            key: DLT_EXCEPTION_MESSAGE,
            value: Some(message.as_str()),
        });

    if let Some(timestamp) = record.timestamp {
        let timestamp = timestamp.to_string();
        headers = headers.insert(Header {
            key: DLT_ORIGINAL_TIMESTAMP,
            value: Some(timestamp.as_str()),
        });
    }
    headers
}

impl ConsumerRecordRecoverer for DeadLetterPublishingRecoverer {
    fn recover(&self, record: &ConsumerRecord, error: &ListenerError) -> anyhow::Result<()> {
        let topic = self.destination(record);

        let mut dead_letter = BaseRecord::<[u8], [u8]>::to(&topic)
            .partition(record.partition_number())
            .headers(dead_letter_headers(record, error));
        if let Some(key) = record.key.as_deref() {
            dead_letter = dead_letter.key(key);
        }
        if let Some(payload) = record.payload.as_deref() {
            dead_letter = dead_letter.payload(payload);
        }
        if let Some(timestamp) = record.timestamp {
            dead_letter = dead_letter.timestamp(timestamp);
        }

        self.producer.send(dead_letter).map_err(|(e, _)| {
            error!(topic, record = %record.tpo(), error = ?e, "Failed to queue dead letter");
            anyhow::Error::new(e).context(format!("failed to queue dead letter for {}", record.tpo()))
        })?;
        self.producer
            .flush(self.flush_timeout)
            .with_context(|| format!("failed to flush dead letter for {}", record.tpo()))?;

        info!(topic, record = %record.tpo(), "Published record to dead letter topic");
        Ok(())
    }
}
