// ==== Failure handling metrics ====
/// Counter for listener failures attributed to a record (labels: topic, partition)
pub const FAILED_DELIVERIES_COUNTER: &str = "kafka_recovery_failed_deliveries_total";

/// Counter for records repositioned for another delivery attempt
pub const RETRIES_COUNTER: &str = "kafka_recovery_retries_total";

/// Histogram for the back-off delay applied before a retry
pub const BACKOFF_DELAY_HISTOGRAM: &str = "kafka_recovery_backoff_delay_ms";

// ==== Recovery metrics ====
/// Counter for records handed to the recoverer successfully
pub const RECOVERED_COUNTER: &str = "kafka_recovery_recovered_total";

/// Counter for recoverer invocations that failed
pub const RECOVERY_FAILURES_COUNTER: &str = "kafka_recovery_recovery_failures_total";

// ==== Fallback and fatal paths ====
/// Counter for whole-batch redelivery attempts made by the blocking fallback
pub const FALLBACK_ATTEMPTS_COUNTER: &str = "kafka_recovery_fallback_attempts_total";

/// Counter for errors the engine refuses to handle (label: kind)
pub const FATAL_ERRORS_COUNTER: &str = "kafka_recovery_fatal_errors_total";

/// Counter for interceptor hooks that returned an error (label: hook)
pub const INTERCEPTOR_ERRORS_COUNTER: &str = "kafka_recovery_interceptor_errors_total";
