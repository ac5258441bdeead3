// crates/epayroll-core/src/runtime/clock.rs
// ============================================================================
// Module: Runtime Clocks
// Description: Wall-clock and deterministic clock and sleeper implementations.
// Purpose: Confine wall-clock reads to one adapter that hosts inject.
// Dependencies: crate::interfaces
// ============================================================================

//! ## Overview
//! [`SystemClock`] and [`ThreadSleeper`] are the production adapters.
//! [`ManualClock`] and [`ManualSleeper`] make retry timing deterministic:
//! sleeping advances the manual clock instead of blocking.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use crate::core::Timestamp;
use crate::interfaces::Clock;
use crate::interfaces::Sleeper;

// ============================================================================
// SECTION: System Adapters
// ============================================================================

/// Clock backed by the operating system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Timestamp::from_unix_millis(millis)
    }
}

/// Sleeper that blocks the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

// ============================================================================
// SECTION: Deterministic Adapters
// ============================================================================

/// Clock whose time only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    /// Current unix milliseconds.
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// Creates a clock at the given instant.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start.as_unix_millis())),
        }
    }

    /// Advances the clock.
    pub fn advance(&self, duration: Duration) {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    /// Sets the clock to an instant.
    pub fn set(&self, at: Timestamp) {
        self.now.store(at.as_unix_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_unix_millis(self.now.load(Ordering::SeqCst))
    }
}

/// Sleeper that records requested delays and advances a manual clock.
#[derive(Debug, Clone)]
pub struct ManualSleeper {
    /// Clock advanced by each sleep.
    clock: ManualClock,
    /// Requested delays in order.
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl ManualSleeper {
    /// Creates a sleeper bound to a manual clock.
    #[must_use]
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            delays: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns the requested delays in order.
    #[must_use]
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().map(|guard| guard.clone()).unwrap_or_default()
    }
}

impl Sleeper for ManualSleeper {
    fn sleep(&self, duration: Duration) {
        if let Ok(mut guard) = self.delays.lock() {
            guard.push(duration);
        }
        self.clock.advance(duration);
    }
}
