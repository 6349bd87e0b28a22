//! Frame pacing.
//!
//! Capture sources deliver frames with irregular spacing. The pacer turns the
//! raw PTS stream into one the encoder can consume at a steady cadence:
//!
//! - a gap above 1.5x the target interval asks the caller to insert one
//!   duplicate of the previous frame
//! - every advance is clamped to at most 2x the target interval, so a long
//!   stall cannot shift the rest of the timeline (the excess is discarded)
//! - a full queue means the consumer is behind: the frame is dropped
//!
//! Between `initialize`/`reset` calls the emitted PTS values are strictly
//! increasing.

use steadyrec_common::clock::HNS_PER_SECOND;

/// Interval used when asked to pace at 0 fps (30 fps).
const FALLBACK_INTERVAL_HNS: i64 = 333_333;

/// What the caller should do with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaceAction {
    /// Encode the frame at the returned PTS.
    Accept,
    /// Encode one duplicate of the previous frame first, then this one.
    Duplicate,
    /// Discard the frame.
    Drop,
}

/// Pacing verdict for a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaceDecision {
    pub action: PaceAction,
    /// PTS to stamp on the encoded frame. Meaningless for `Drop`.
    pub pts: i64,
}

/// Frame pacing state for one recording segment.
#[derive(Debug, Clone)]
pub struct FramePacer {
    target_interval: i64,
    last_pts: Option<i64>,
    smoothed_pts: i64,
    duplicates: u32,
    drops: u32,
}

impl FramePacer {
    pub fn new(fps: u32) -> Self {
        let mut pacer = Self {
            target_interval: FALLBACK_INTERVAL_HNS,
            last_pts: None,
            smoothed_pts: 0,
            duplicates: 0,
            drops: 0,
        };
        pacer.initialize(fps);
        pacer
    }

    /// Set the target rate and clear all state, counters included.
    pub fn initialize(&mut self, fps: u32) {
        self.target_interval = if fps > 0 {
            HNS_PER_SECOND / i64::from(fps)
        } else {
            FALLBACK_INTERVAL_HNS
        };
        self.last_pts = None;
        self.smoothed_pts = 0;
        self.duplicates = 0;
        self.drops = 0;
        tracing::info!(
            target_interval_hns = self.target_interval,
            fps,
            "Frame pacer initialized"
        );
    }

    /// Forget the pacing baseline but keep the counters.
    ///
    /// Call after a pause/resume so the gap is not mistaken for a skipped frame.
    pub fn reset(&mut self) {
        self.last_pts = None;
        self.smoothed_pts = 0;
    }

    /// Classify a frame and compute its output PTS.
    pub fn pace_frame(&mut self, raw_pts: i64, queue_full: bool) -> PaceDecision {
        if queue_full {
            self.drops += 1;
            return PaceDecision {
                action: PaceAction::Drop,
                pts: raw_pts,
            };
        }

        let Some(last_pts) = self.last_pts else {
            self.last_pts = Some(raw_pts);
            self.smoothed_pts = raw_pts;
            return PaceDecision {
                action: PaceAction::Accept,
                pts: raw_pts,
            };
        };

        let gap = raw_pts - last_pts;
        let duplicate = gap > self.target_interval * 3 / 2;
        if duplicate {
            self.duplicates += 1;
            if self.duplicates <= 3 || self.duplicates % 30 == 0 {
                tracing::info!(
                    gap_hns = gap,
                    target_interval_hns = self.target_interval,
                    count = self.duplicates,
                    "Capture gap above 1.5x target, inserting duplicate"
                );
            }
        }

        // Floor of 1 keeps the output strictly increasing on repeated timestamps.
        let advance = gap.clamp(1, self.target_interval * 2);
        self.smoothed_pts += advance;
        self.last_pts = Some(raw_pts);

        PaceDecision {
            action: if duplicate {
                PaceAction::Duplicate
            } else {
                PaceAction::Accept
            },
            pts: self.smoothed_pts,
        }
    }

    /// Target frame interval in 100ns units.
    pub fn target_interval(&self) -> i64 {
        self.target_interval
    }

    pub fn duplicates_inserted(&self) -> u32 {
        self.duplicates
    }

    pub fn drops(&self) -> u32 {
        self.drops
    }
}
