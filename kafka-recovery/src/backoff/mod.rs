// Back-off policies and the precomputed retry schedule derived from them
pub mod policy;
pub mod schedule;

pub use policy::{
    BackOff, BackOffExecution, BackOffPolicy, ExponentialBackOff, ExponentialRandomBackOff,
    FixedBackOff,
};
pub use schedule::{
    resolve_max_attempts, BackOffSchedule, DEFAULT_MAX_ATTEMPTS, MAX_ATTEMPTS_LIMIT, NOT_SET,
};
