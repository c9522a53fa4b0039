//! Clock abstraction for testable timing.
//!
//! The pipeline stamps envelopes, spaces out retries, and runs periodic
//! maintenance; all of it goes through [`Clock`] so tests can drive time
//! deterministically instead of sleeping for real.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};

/// Time source injected into every time-dependent component.
///
/// Production code uses [`RealClock`]; tests inject [`TestClock`] to advance
/// time without waiting.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current instant, for duration measurements such as uptime.
    fn now(&self) -> Instant;

    /// Current wall-clock time, for envelope timestamps.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Sleeps for the given duration.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Production clock backed by system time and tokio's timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock instance.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Controllable clock for deterministic tests.
///
/// Both the monotonic and wall-clock readings are derived from a shared
/// offset, so advancing the clock moves them in lockstep. `sleep` completes
/// immediately after advancing the offset, which lets retry delays and
/// maintenance intervals elapse without real waiting.
#[derive(Debug, Clone)]
pub struct TestClock {
    offset_ns: Arc<AtomicU64>,
    base_instant: Instant,
    base_utc: DateTime<Utc>,
}

impl TestClock {
    /// Creates a test clock anchored at the current wall-clock time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Creates a test clock anchored at a specific wall-clock time.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            offset_ns: Arc::new(AtomicU64::new(0)),
            base_instant: Instant::now(),
            base_utc: start,
        }
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        let ns = u64::try_from(duration.as_nanos().min(u128::from(u64::MAX))).unwrap_or(u64::MAX);
        self.offset_ns.fetch_add(ns, Ordering::AcqRel);
    }

    /// Elapsed time since the clock was created.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        self.base_utc
            + chrono::Duration::from_std(self.elapsed()).unwrap_or(chrono::Duration::MAX)
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        // Sleeping in tests only advances the offset; yield so other tasks
        // scheduled for "now" get to run.
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}
