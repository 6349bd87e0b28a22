//! Presentation timestamp alignment.
//!
//! Converts raw monotonic clock ticks into a session-relative PTS timeline in
//! 100ns units that starts at zero, advances with wall time while recording,
//! and hides paused intervals so the resumed timeline continues seamlessly.
//!
//! All state lives in atomics: the owner thread drives `start`/`pause`/`resume`
//! while capture and audio producers stamp PTS concurrently without locking.
//!
//! While paused, `now_pts` keeps advancing until `resume` folds the pause into
//! the paused total, so a stamp taken mid-pause lands ahead of the resumed
//! timeline. Producers use the checked [`SyncManager::try_now_pts`] and
//! [`SyncManager::try_to_pts`], which refuse any stamp that overlaps a pause.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use steadyrec_common::clock::{MonotonicClock, HNS_PER_SECOND};

/// Marker for "not currently paused".
const NOT_PAUSED: i64 = i64::MIN;

/// A/V presentation timestamp manager.
pub struct SyncManager {
    clock: Arc<dyn MonotonicClock>,
    ticks_per_second: f64,
    anchor_ticks: AtomicI64,
    paused_accum_hns: AtomicI64,
    pause_start_ticks: AtomicI64,
    /// Odd while paused or while the owner is rewriting the timeline.
    epoch: AtomicU64,
    /// Raw-tick bounds of the most recent completed pause, `[start, end)`.
    last_pause_ticks: AtomicI64,
    last_resume_ticks: AtomicI64,
}

impl SyncManager {
    /// Create a manager reading from `clock`. Frequency is queried once here.
    pub fn new(clock: Arc<dyn MonotonicClock>) -> Self {
        let ticks_per_second = clock.ticks_per_second().max(1) as f64;
        Self {
            clock,
            ticks_per_second,
            anchor_ticks: AtomicI64::new(0),
            paused_accum_hns: AtomicI64::new(0),
            pause_start_ticks: AtomicI64::new(NOT_PAUSED),
            epoch: AtomicU64::new(0),
            last_pause_ticks: AtomicI64::new(0),
            last_resume_ticks: AtomicI64::new(0),
        }
    }

    /// Anchor the timeline at the current clock reading.
    pub fn start(&self) {
        if self.epoch.load(Ordering::Acquire) % 2 == 0 {
            self.epoch.fetch_add(1, Ordering::AcqRel);
        }
        let now = self.clock.now_ticks();
        self.paused_accum_hns.store(0, Ordering::Release);
        self.pause_start_ticks.store(NOT_PAUSED, Ordering::Release);
        self.last_pause_ticks.store(0, Ordering::Release);
        self.last_resume_ticks.store(0, Ordering::Release);
        self.anchor_ticks.store(now, Ordering::Release);
        self.epoch.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(anchor_ticks = now, "Sync clock anchored");
    }

    /// Record the pause-entry reading. A second pause keeps the first reading.
    pub fn pause(&self) {
        if self.is_paused() {
            return;
        }
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let now = self.clock.now_ticks();
        self.pause_start_ticks.store(now, Ordering::Release);
    }

    /// Fold the time since `pause` into the paused total.
    ///
    /// Without a preceding `pause` this does nothing.
    pub fn resume(&self) {
        let started = self.pause_start_ticks.load(Ordering::Acquire);
        if started == NOT_PAUSED {
            return;
        }
        let now = self.clock.now_ticks();
        let elapsed = self.ticks_to_hns(now - started);
        let total = self.paused_accum_hns.fetch_add(elapsed, Ordering::AcqRel) + elapsed;
        self.last_pause_ticks.store(started, Ordering::Release);
        self.last_resume_ticks.store(now, Ordering::Release);
        self.pause_start_ticks.store(NOT_PAUSED, Ordering::Release);
        self.epoch.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(
            paused_hns = elapsed,
            paused_total_hns = total,
            "Sync clock resumed"
        );
    }

    /// Like [`to_pts`](Self::to_pts), but `None` if the result would not sit
    /// on the recording timeline: the session is paused, `raw_ticks` falls in
    /// the last paused interval, or a pause or resume ran mid-conversion.
    pub fn try_to_pts(&self, raw_ticks: i64) -> Option<i64> {
        let epoch = self.epoch.load(Ordering::Acquire);
        if epoch % 2 == 1 {
            return None;
        }
        let paused_from = self.last_pause_ticks.load(Ordering::Acquire);
        let paused_until = self.last_resume_ticks.load(Ordering::Acquire);
        if (paused_from..paused_until).contains(&raw_ticks) {
            return None;
        }
        let pts = self.to_pts(raw_ticks);
        (self.epoch.load(Ordering::Acquire) == epoch).then_some(pts)
    }

    /// Checked PTS for the current instant. `None` while paused.
    pub fn try_now_pts(&self) -> Option<i64> {
        self.try_to_pts(self.clock.now_ticks())
    }

    /// Rebase a raw clock reading onto the recording timeline.
    pub fn to_pts(&self, raw_ticks: i64) -> i64 {
        let anchor = self.anchor_ticks.load(Ordering::Acquire);
        self.ticks_to_hns(raw_ticks - anchor) - self.paused_accum_hns.load(Ordering::Acquire)
    }

    /// PTS for the current instant.
    pub fn now_pts(&self) -> i64 {
        self.to_pts(self.clock.now_ticks())
    }

    /// Current raw clock reading.
    pub fn now_ticks(&self) -> i64 {
        self.clock.now_ticks()
    }

    /// Total paused duration so far, in 100ns units.
    pub fn paused_total(&self) -> i64 {
        self.paused_accum_hns.load(Ordering::Acquire)
    }

    /// Raw clock reading captured by `start`.
    pub fn anchor_ticks(&self) -> i64 {
        self.anchor_ticks.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.pause_start_ticks.load(Ordering::Acquire) != NOT_PAUSED
    }

    fn ticks_to_hns(&self, ticks: i64) -> i64 {
        // Divide first so whole-second spans convert exactly.
        (ticks as f64 / self.ticks_per_second * HNS_PER_SECOND as f64).round() as i64
    }
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("anchor_ticks", &self.anchor_ticks())
            .field("paused_total", &self.paused_total())
            .field("paused", &self.is_paused())
            .finish()
    }
}
