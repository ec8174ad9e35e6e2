use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use kafka_recovery::backoff::BackOffPolicy;
use kafka_recovery::test_utils::{records, FakeConsumer};
use kafka_recovery::{
    BackOffMode, BackOffSchedule, ConsumerRecord, ContainerState, CycleOutcome,
    DefaultErrorHandler, HandleOutcome, ListenerError, ListenerInvoker, Partition, RecoveryConfig,
    RecoveryError, TopicPartitionOffset,
};

/// Recoverer that remembers the offsets it was handed
#[derive(Clone, Default)]
struct CollectingRecoverer {
    recovered: Arc<Mutex<Vec<i64>>>,
}

impl CollectingRecoverer {
    fn handler(&self, max_attempts: i32) -> DefaultErrorHandler {
        let sink = self.recovered.clone();
        let schedule = BackOffSchedule::generate(max_attempts, &BackOffPolicy::NoBackoff).unwrap();
        DefaultErrorHandler::new(schedule).with_recoverer(Arc::new(
            move |record: &ConsumerRecord, _: &ListenerError| -> anyhow::Result<()> {
                sink.lock().unwrap().push(record.offset());
                Ok(())
            },
        ))
    }

    fn recovered(&self) -> Vec<i64> {
        self.recovered.lock().unwrap().clone()
    }
}

fn p0() -> Partition {
    Partition::new("events", 0)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("kafka_recovery=debug")
        .with_test_writer()
        .try_init()
        .ok();
}

#[test]
fn test_batch_failure_commits_prefix_retries_then_recovers() {
    init_tracing();
    let recoverer = CollectingRecoverer::default();
    let handler = recoverer.handler(2).with_commit_recovered(true);
    let mut invoker = ListenerInvoker::new(Arc::new(handler));
    let consumer = FakeConsumer::with_log(records("events", 0, 10..13));
    let container = ContainerState::new("scenario");
    let failing = TopicPartitionOffset::new(p0(), 11);
    let mut deliveries: Vec<Vec<i64>> = vec![];

    let mut listener = |batch: &[ConsumerRecord]| {
        deliveries.push(batch.iter().map(|r| r.offset()).collect());
        if batch.iter().any(|r| r.is_at(&failing)) {
            Err(ListenerError::batch_failed_at_record(
                failing.clone(),
                anyhow!("cannot process"),
            ))
        } else {
            Ok(())
        }
    };

    // First delivery: 10 is committed, consumer rewinds to 11
    invoker.before_poll(&consumer).unwrap();
    let outcome = invoker
        .invoke_batch_listener(consumer.poll(10), &mut listener, &consumer, &container)
        .unwrap();
    assert!(matches!(
        outcome,
        CycleOutcome::Handled(HandleOutcome::Retry { attempt: 1, .. })
    ));
    assert_eq!(consumer.committed(&p0()), Some(11));
    assert_eq!(consumer.position(&p0()), Some(11));

    // Redelivery fails again: 11 is recovered and the partition moves on to 12
    invoker.before_poll(&consumer).unwrap();
    let outcome = invoker
        .invoke_batch_listener(consumer.poll(10), &mut listener, &consumer, &container)
        .unwrap();
    assert!(matches!(
        outcome,
        CycleOutcome::Handled(HandleOutcome::Recovered { attempt: 2, .. })
    ));
    assert_eq!(recoverer.recovered(), vec![11]);
    assert_eq!(consumer.committed(&p0()), Some(12));
    assert_eq!(consumer.position(&p0()), Some(12));

    invoker.before_poll(&consumer).unwrap();
    let outcome = invoker
        .invoke_batch_listener(consumer.poll(10), &mut listener, &consumer, &container)
        .unwrap();
    assert_eq!(outcome, CycleOutcome::Processed { records: 1 });

    assert_eq!(deliveries, vec![vec![10, 11, 12], vec![11, 12], vec![12]]);
    assert_eq!(invoker.state().tracker().episode_count(), 0);
}

#[test]
fn test_record_failure_never_redelivers_processed_records() {
    init_tracing();
    let recoverer = CollectingRecoverer::default();
    let mut invoker = ListenerInvoker::new(Arc::new(recoverer.handler(3)));
    let consumer = FakeConsumer::with_log(records("events", 0, 0..6));
    let container = ContainerState::new("scenario");
    let mut seen = vec![];

    let mut listener = |record: &ConsumerRecord| {
        seen.push(record.offset());
        if record.offset() == 3 {
            Err(ListenerError::Record(anyhow!("bad record")))
        } else {
            Ok(())
        }
    };

    let mut outcomes = vec![];
    for _ in 0..4 {
        invoker.before_poll(&consumer).unwrap();
        let polled = consumer.poll(10);
        outcomes.push(
            invoker
                .invoke_record_listener(polled, &mut listener, &consumer, &container)
                .unwrap(),
        );
    }

    assert!(matches!(
        outcomes[0],
        CycleOutcome::Handled(HandleOutcome::Retry { attempt: 1, .. })
    ));
    assert!(matches!(
        outcomes[1],
        CycleOutcome::Handled(HandleOutcome::Retry { attempt: 2, .. })
    ));
    assert!(matches!(
        outcomes[2],
        CycleOutcome::Handled(HandleOutcome::Recovered { attempt: 3, .. })
    ));
    assert_eq!(outcomes[3], CycleOutcome::Processed { records: 2 });

    assert_eq!(seen, vec![0, 1, 2, 3, 3, 3, 4, 5]);
    assert_eq!(recoverer.recovered(), vec![3]);
}

#[test]
fn test_failure_after_recovery_starts_a_new_episode() {
    let recoverer = CollectingRecoverer::default();
    let handler = recoverer.handler(3);
    let mut state = kafka_recovery::RetryState::new();
    let consumer = FakeConsumer::new();
    let container = ContainerState::new("scenario");
    let batch = records("events", 0, 7..8);

    let mut attempts = vec![];
    for _ in 0..4 {
        let outcome = handler
            .handle_record(
                &mut state,
                ListenerError::Record(anyhow!("boom")),
                &batch,
                &consumer,
                &container,
            )
            .unwrap();
        attempts.push(outcome);
    }

    assert!(matches!(attempts[0], HandleOutcome::Retry { attempt: 1, .. }));
    assert!(matches!(attempts[1], HandleOutcome::Retry { attempt: 2, .. }));
    assert!(matches!(attempts[2], HandleOutcome::Recovered { attempt: 3, .. }));
    assert!(matches!(attempts[3], HandleOutcome::Retry { attempt: 1, .. }));
    assert_eq!(recoverer.recovered(), vec![7]);
}

#[test]
fn test_failure_on_other_partition_keeps_good_partition_moving() {
    let recoverer = CollectingRecoverer::default();
    let mut invoker = ListenerInvoker::new(Arc::new(recoverer.handler(3)));
    let mut log = records("events", 0, 0..3);
    log.extend(records("events", 1, 0..3));
    let consumer = FakeConsumer::with_log(log);
    let container = ContainerState::new("scenario");
    let p1 = Partition::new("events", 1);

    invoker.before_poll(&consumer).unwrap();
    let outcome = invoker
        .invoke_batch_listener(
            consumer.poll(10),
            &mut |batch: &[ConsumerRecord]| -> Result<(), ListenerError> {
                let index = batch
                    .iter()
                    .position(|r| r.partition() == &p1 && r.offset() == 1)
                    .unwrap();
                Err(ListenerError::batch_failed_at_index(index, anyhow!("boom")))
            },
            &consumer,
            &container,
        )
        .unwrap();

    assert!(matches!(
        outcome,
        CycleOutcome::Handled(HandleOutcome::Retry { .. })
    ));
    // Everything of partition 0 and p1@0 precede the failure point
    assert_eq!(consumer.committed(&p0()), Some(3));
    assert_eq!(consumer.committed(&p1), Some(1));
    assert_eq!(consumer.position(&p0()), Some(3));
    assert_eq!(consumer.position(&p1), Some(1));
}

#[test]
fn test_deserialization_failure_without_record_is_fatal() {
    let mut invoker = ListenerInvoker::new(Arc::new(CollectingRecoverer::default().handler(3)));
    let consumer = FakeConsumer::with_log(records("events", 0, 0..3));
    let container = ContainerState::new("scenario");

    let result = invoker.invoke_batch_listener(
        consumer.poll(10),
        &mut |_: &[ConsumerRecord]| -> Result<(), ListenerError> {
            Err(ListenerError::Deserialization {
                record: None,
                source: anyhow!("unknown magic byte"),
            })
        },
        &consumer,
        &container,
    );

    match result {
        Err(err @ RecoveryError::Deserialization(_)) => {
            assert!(err.to_string().contains("error-handling deserializer"))
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert!(consumer.seeks().is_empty());
}

#[test]
fn test_unattributable_failure_is_redelivered_across_polls() {
    let mut invoker = ListenerInvoker::new(Arc::new(CollectingRecoverer::default().handler(3)));
    let consumer = FakeConsumer::with_log(records("events", 0, 0..3));
    let container = ContainerState::new("scenario");
    let mut calls = 0;

    let mut listener = |_: &[ConsumerRecord]| {
        calls += 1;
        if calls <= 4 {
            Err(ListenerError::Other(anyhow!("database down")))
        } else {
            Ok(())
        }
    };

    // 1 delivery + 2 blocking retries, then the batch goes back to the consumer
    let outcome = invoker
        .invoke_batch_listener(consumer.poll(10), &mut listener, &consumer, &container)
        .unwrap();
    assert_eq!(
        outcome,
        CycleOutcome::Handled(HandleOutcome::BatchRedelivered { attempts: 2 })
    );
    assert_eq!(consumer.position(&p0()), Some(0));

    let outcome = invoker
        .invoke_batch_listener(consumer.poll(10), &mut listener, &consumer, &container)
        .unwrap();
    assert_eq!(
        outcome,
        CycleOutcome::Handled(HandleOutcome::FallbackSucceeded { attempts: 1 })
    );
    assert_eq!(calls, 5);
}

#[test]
fn test_container_stop_preempts_blocking_fallback() {
    let schedule = BackOffSchedule::from_delays(vec![Duration::from_secs(30); 5]);
    let mut invoker = ListenerInvoker::new(Arc::new(DefaultErrorHandler::new(schedule)));
    let consumer = FakeConsumer::with_log(records("events", 0, 0..3));
    let container = ContainerState::new("scenario");

    let stopper = container.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        stopper.stop();
    });

    let started = Instant::now();
    let outcome = invoker
        .invoke_batch_listener(
            consumer.poll(10),
            &mut |_: &[ConsumerRecord]| -> Result<(), ListenerError> {
                Err(ListenerError::Other(anyhow!("database down")))
            },
            &consumer,
            &container,
        )
        .unwrap();
    handle.join().unwrap();

    assert_eq!(
        outcome,
        CycleOutcome::Handled(HandleOutcome::FallbackInterrupted { attempts: 0 })
    );
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(consumer.position(&p0()), Some(0));
}

#[test]
fn test_pause_mode_holds_partition_until_back_off_elapses() {
    let schedule = BackOffSchedule::from_delays(vec![Duration::from_millis(50)]);
    let handler = DefaultErrorHandler::new(schedule).with_backoff_mode(BackOffMode::Pause);
    let mut invoker = ListenerInvoker::new(Arc::new(handler));
    let consumer = FakeConsumer::with_log(records("events", 0, 0..2));
    let container = ContainerState::new("scenario");
    let mut attempts = 0;

    let mut listener = |_: &[ConsumerRecord]| {
        attempts += 1;
        if attempts == 1 {
            Err(ListenerError::batch_failed_at_index(0, anyhow!("boom")))
        } else {
            Ok(())
        }
    };

    invoker.before_poll(&consumer).unwrap();
    invoker
        .invoke_batch_listener(consumer.poll(10), &mut listener, &consumer, &container)
        .unwrap();
    assert!(consumer.is_paused(&p0()));

    // The poll loop keeps running while the partition is paused
    invoker.before_poll(&consumer).unwrap();
    assert!(consumer.poll(10).is_empty());

    thread::sleep(Duration::from_millis(60));
    invoker.before_poll(&consumer).unwrap();
    assert!(!consumer.is_paused(&p0()));

    let outcome = invoker
        .invoke_batch_listener(consumer.poll(10), &mut listener, &consumer, &container)
        .unwrap();
    assert_eq!(outcome, CycleOutcome::Processed { records: 2 });
}

#[test]
fn test_handler_from_environment_config() {
    let config = RecoveryConfig {
        recovery_max_attempts: 1,
        ..Default::default()
    };
    let handler = DefaultErrorHandler::from_config(&config).unwrap();
    assert!(handler.schedule().is_empty());

    let config = RecoveryConfig {
        recovery_backoff_policy: "fibonacci".to_string(),
        ..Default::default()
    };
    let err = DefaultErrorHandler::from_config(&config)
        .err()
        .unwrap();
    assert!(err.to_string().contains("fibonacci"));
}
