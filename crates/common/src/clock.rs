//! Clock and timing utilities for stream synchronization.
//!
//! Every SteadyRec timestamp is expressed in 100-nanosecond units ("hns")
//! relative to the start of a recording. This module provides:
//! - The monotonic tick source the sync layer reads from
//! - A manually driven clock for deterministic tests
//! - Unit conversions and drift measurement between streams

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 100ns units per second.
pub const HNS_PER_SECOND: i64 = 10_000_000;

/// A monotonic tick source.
///
/// Implementations must never go backwards. The tick frequency is fixed for
/// the lifetime of the clock; callers are free to cache it.
pub trait MonotonicClock: Send + Sync {
    /// Current reading in native ticks.
    fn now_ticks(&self) -> i64;

    /// Native ticks per second.
    fn ticks_per_second(&self) -> i64;
}

/// Wall-clock backed monotonic clock with nanosecond ticks.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for SystemClock {
    fn now_ticks(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }

    fn ticks_per_second(&self) -> i64 {
        1_000_000_000
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same tick counter, so a test can hand one clone to the
/// code under test and advance another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    ticks: Arc<AtomicI64>,
    frequency: i64,
}

impl ManualClock {
    /// Create a clock at tick 0 with the given frequency.
    pub fn new(ticks_per_second: i64) -> Self {
        Self {
            ticks: Arc::new(AtomicI64::new(0)),
            frequency: ticks_per_second.max(1),
        }
    }

    /// A clock whose ticks are already 100ns units.
    pub fn hns() -> Self {
        Self::new(HNS_PER_SECOND)
    }

    /// Move the clock forward by a wall duration.
    pub fn advance(&self, by: Duration) {
        let ticks = (by.as_secs_f64() * self.frequency as f64).round() as i64;
        self.ticks.fetch_add(ticks, Ordering::SeqCst);
    }

    /// Move the clock forward by raw ticks.
    pub fn advance_ticks(&self, ticks: i64) {
        self.ticks.fetch_add(ticks, Ordering::SeqCst);
    }

    /// Jump to an absolute tick value.
    pub fn set_ticks(&self, ticks: i64) {
        self.ticks.store(ticks, Ordering::SeqCst);
    }
}

impl MonotonicClock for ManualClock {
    fn now_ticks(&self) -> i64 {
        self.ticks.load(Ordering::SeqCst)
    }

    fn ticks_per_second(&self) -> i64 {
        self.frequency
    }
}

/// Convert a 100ns value to seconds.
pub fn hns_to_secs(hns: i64) -> f64 {
    hns as f64 / HNS_PER_SECOND as f64
}

/// Convert seconds to 100ns units.
pub fn secs_to_hns(secs: f64) -> i64 {
    (secs * HNS_PER_SECOND as f64) as i64
}

/// Convert a duration to 100ns units.
pub fn duration_to_hns(d: Duration) -> i64 {
    i64::try_from(d.as_nanos() / 100).unwrap_or(i64::MAX)
}

/// Drift measurement between two streams.
#[derive(Debug, Clone, Copy)]
pub struct DriftMeasurement {
    /// Timestamp in the reference stream (100ns).
    pub reference_hns: i64,
    /// Timestamp in the measured stream (100ns).
    pub measured_hns: i64,
}

impl DriftMeasurement {
    /// Drift in 100ns units (positive = measured is ahead).
    pub fn drift_hns(&self) -> i64 {
        self.measured_hns - self.reference_hns
    }

    /// Drift in milliseconds.
    pub fn drift_ms(&self) -> f64 {
        self.drift_hns() as f64 / 10_000.0
    }

    /// Whether drift exceeds an acceptable threshold.
    pub fn exceeds_threshold_ms(&self, threshold_ms: f64) -> bool {
        self.drift_ms().abs() > threshold_ms
    }
}
