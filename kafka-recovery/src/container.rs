use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Upper bound on one uninterrupted sleep while waiting out a back-off
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// What the recovery engine needs to know about the listener container driving it
pub trait ListenerContainer {
    /// False once the container has been asked to stop
    fn is_running(&self) -> bool;

    fn listener_id(&self) -> &str;
}

/// Run state for a container, shareable with whoever may stop it
#[derive(Clone, Debug)]
pub struct ContainerState {
    listener_id: Arc<str>,
    running: Arc<AtomicBool>,
}

impl ContainerState {
    pub fn new(listener_id: &str) -> Self {
        Self {
            listener_id: Arc::from(listener_id),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl ListenerContainer for ContainerState {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn listener_id(&self) -> &str {
        &self.listener_id
    }
}

/// Sleep for `delay` on the calling thread, checking the container between short slices.
///
/// Returns `false` if the container stopped before the delay elapsed.
pub fn stoppable_sleep(container: &dyn ListenerContainer, delay: Duration) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if !container.is_running() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}
