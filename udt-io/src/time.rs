//! Time utilities for the UDT send path
//!
//! Monotonic packet timestamps, a periodic timer, and the pacing gate that
//! spaces new-packet transmissions according to congestion control.

use std::ops::{Add, Sub};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic timestamp
///
/// UDT packet headers carry 32-bit microsecond timestamps relative to the
/// start of the connection; this type wraps `Instant` and provides that
/// conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(Instant);

impl Timestamp {
    /// Get the current timestamp
    #[inline]
    pub fn now() -> Self {
        Timestamp(Instant::now())
    }

    /// Calculate elapsed time since this timestamp
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }

    /// Microseconds elapsed since `reference` (zero if `reference` is later)
    pub fn as_micros_since(&self, reference: Timestamp) -> u64 {
        self.0
            .saturating_duration_since(reference.0)
            .as_micros()
            .try_into()
            .unwrap_or(u64::MAX)
    }

    /// 32-bit header timestamp; wraps around every ~71 minutes
    pub fn as_packet_timestamp(&self, reference: Timestamp) -> u32 {
        self.as_micros_since(reference) as u32
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, duration: Duration) -> Timestamp {
        Timestamp(self.0 + duration)
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    fn sub(self, other: Timestamp) -> Duration {
        self.0.saturating_duration_since(other.0)
    }
}

/// Timer for periodic operations
pub struct Timer {
    interval: Duration,
    last_fire: Timestamp,
}

impl Timer {
    /// Create a new timer with the given interval
    pub fn new(interval: Duration) -> Self {
        Timer {
            interval,
            last_fire: Timestamp::now(),
        }
    }

    /// Check if the timer has expired
    pub fn expired(&self) -> bool {
        self.last_fire.elapsed() >= self.interval
    }

    /// Reset the timer
    pub fn reset(&mut self) {
        self.last_fire = Timestamp::now();
    }

    /// Fire the timer if expired, returning true if it fired
    pub fn try_fire(&mut self) -> bool {
        if self.expired() {
            self.reset();
            true
        } else {
            false
        }
    }
}

const NEVER_RELEASED: u64 = u64::MAX;

/// Pacing gate for new-packet transmissions
///
/// Releases at most one send opportunity per period. The period can be
/// changed from any thread at any time (congestion control owns it); the new
/// value applies from the next [`try_acquire`](Self::try_acquire). A zero
/// period leaves the gate permanently open.
///
/// All state is atomic so readers and the tuning side never contend on a
/// lock.
#[derive(Debug)]
pub struct PacingGate {
    epoch: Instant,
    period_ns: AtomicU64,
    last_release_ns: AtomicU64,
}

impl PacingGate {
    /// Create a gate with the given period
    pub fn new(period: Duration) -> Self {
        PacingGate {
            epoch: Instant::now(),
            period_ns: AtomicU64::new(duration_to_nanos(period)),
            last_release_ns: AtomicU64::new(NEVER_RELEASED),
        }
    }

    /// Current period between releases
    pub fn period(&self) -> Duration {
        Duration::from_nanos(self.period_ns.load(Ordering::Relaxed))
    }

    /// Change the period between releases
    pub fn set_period(&self, period: Duration) {
        self.period_ns
            .store(duration_to_nanos(period), Ordering::Relaxed);
    }

    /// Instant at which the next opportunity opens, or `None` if it is open
    /// already at `now`
    pub fn next_release(&self, now: Instant) -> Option<Instant> {
        let last = self.last_release_ns.load(Ordering::Acquire);
        if last == NEVER_RELEASED {
            return None;
        }

        let period = self.period_ns.load(Ordering::Relaxed);
        let at = self.epoch + Duration::from_nanos(last.saturating_add(period));
        (at > now).then_some(at)
    }

    /// Take the send opportunity if the gate is open at `now`
    ///
    /// On success the gate closes for one period starting at `now`. On
    /// failure the instant the gate reopens is returned.
    pub fn try_acquire(&self, now: Instant) -> Result<(), Instant> {
        if let Some(at) = self.next_release(now) {
            return Err(at);
        }
        let since_epoch = duration_to_nanos(now.saturating_duration_since(self.epoch));
        self.last_release_ns.store(since_epoch, Ordering::Release);
        Ok(())
    }

    /// Forget the last release so the next acquire succeeds immediately
    pub fn reset(&self) {
        self.last_release_ns
            .store(NEVER_RELEASED, Ordering::Release);
    }
}

fn duration_to_nanos(duration: Duration) -> u64 {
    duration.as_nanos().try_into().unwrap_or(NEVER_RELEASED - 1)
}
