//! Live pipeline counters.
//!
//! Producers and the encode loop bump relaxed atomics; presentation code reads
//! a [`TelemetrySnapshot`] at any time without blocking the pipeline.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::pipeline::EncoderMode;
use crate::power::PowerState;

/// Plain copy of every counter at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    /// Frames delivered by the video source.
    pub frames_captured: u64,
    /// Frames handed to the encoder, duplicates included.
    pub frames_encoded: u64,
    /// Frames lost to a full queue, at push or at pacing.
    pub frames_dropped: u64,
    /// Frames waiting in the video queue.
    pub frames_backlogged: u64,
    /// Audio packets handed to the writer.
    pub audio_packets: u64,
    /// Synthetic duplicates inserted by the pacer.
    pub duplicate_frames: u64,
    pub encoder_mode: EncoderMode,
    pub power_state: PowerState,
}

impl TelemetrySnapshot {
    pub fn encoder_mode_label(&self) -> &'static str {
        self.encoder_mode.label()
    }

    /// Dropped frames as a percentage of captured frames.
    pub fn drop_rate(&self) -> f64 {
        if self.frames_captured == 0 {
            return 0.0;
        }
        self.frames_dropped as f64 / self.frames_captured as f64 * 100.0
    }
}

/// Atomic counter store shared by the capture, audio, and encode threads.
#[derive(Debug, Default)]
pub struct TelemetryStore {
    frames_captured: AtomicU64,
    frames_encoded: AtomicU64,
    frames_dropped: AtomicU64,
    frames_backlogged: AtomicU64,
    audio_packets: AtomicU64,
    duplicate_frames: AtomicU64,
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_frame_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_frame_encoded(&self) {
        self.frames_encoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_audio_written(&self) {
        self.audio_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_duplicate_inserted(&self) {
        self.duplicate_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_backlog(&self, frames: u64) {
        self.frames_backlogged.store(frames, Ordering::Relaxed);
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn audio_packets(&self) -> u64 {
        self.audio_packets.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        for counter in [
            &self.frames_captured,
            &self.frames_encoded,
            &self.frames_dropped,
            &self.frames_backlogged,
            &self.audio_packets,
            &self.duplicate_frames,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self, encoder_mode: EncoderMode, power_state: PowerState) -> TelemetrySnapshot {
        TelemetrySnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_backlogged: self.frames_backlogged.load(Ordering::Relaxed),
            audio_packets: self.audio_packets.load(Ordering::Relaxed),
            duplicate_frames: self.duplicate_frames.load(Ordering::Relaxed),
            encoder_mode,
            power_state,
        }
    }
}
