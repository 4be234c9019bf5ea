use std::sync::atomic::{AtomicBool, Ordering};

/// Keeps the device awake while the service logs. Both calls are idempotent.
pub trait WakeLock: Send + Sync {
    fn acquire(&self);

    fn release(&self);

    fn is_held(&self) -> bool;
}

/// For hosts without power management; only tracks the requested state.
#[derive(Debug, Default)]
pub struct NoopWakeLock {
    held: AtomicBool,
}

impl WakeLock for NoopWakeLock {
    fn acquire(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
    }

    fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}
