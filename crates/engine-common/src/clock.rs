//! Monotonic clock abstraction.
//!
//! spec.md §9 requires a monotonic clock throughout and fake-clock
//! injection in tests so the aging (S4) and entropy (S5) scenarios are
//! reproducible. Components take `Arc<dyn Clock>` rather than calling
//! `Instant::now()` directly.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A settable clock for deterministic tests. Starts at the instant it
/// is constructed and only moves when `advance`/`set` are called.
pub struct FakeClock {
    inner: Mutex<Instant>,
}

impl FakeClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Instant::now()),
        })
    }

    pub fn advance(&self, by: Duration) {
        let mut g = self.inner.lock().unwrap();
        *g += by;
    }

    pub fn set(&self, to: Instant) {
        *self.inner.lock().unwrap() = to;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        *self.inner.lock().unwrap()
    }
}
