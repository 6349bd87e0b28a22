//! Collaborator contracts for the recording pipeline.
//!
//! The session owns two bounded queues. Producers (video and audio sources)
//! get a sink handle that stamps PTS and pushes into a queue; the encode loop
//! pops, paces, encodes, and writes. Concrete backends live in [`crate::backend`].

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use steadyrec_common::error::RecorderResult;
use steadyrec_timing::{BoundedQueue, SyncManager};

use crate::media::{
    AudioPacket, EncodedUnit, EncoderProfile, ImageHandle, MuxConfig, VideoFrame,
    AUDIO_QUEUE_CAPACITY, VIDEO_QUEUE_CAPACITY,
};
use crate::telemetry::TelemetryStore;

pub type VideoQueue = BoundedQueue<VideoFrame, VIDEO_QUEUE_CAPACITY>;
pub type AudioQueue = BoundedQueue<AudioPacket, AUDIO_QUEUE_CAPACITY>;

/// Fired by a video source when its device disappears. Called from the
/// source's own thread.
pub type DeviceLostCallback = Arc<dyn Fn() + Send + Sync>;

/// Which encoder path ended up active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderMode {
    Hardware,
    Software,
    /// Software fallback at reduced resolution.
    Software720p,
}

impl EncoderMode {
    pub fn label(self) -> &'static str {
        match self {
            EncoderMode::Hardware => "HW",
            EncoderMode::Software => "SW",
            EncoderMode::Software720p => "SW 720p",
        }
    }
}

impl fmt::Display for EncoderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Producer-side handle onto the video queue.
#[derive(Clone)]
pub struct VideoSink {
    queue: Arc<VideoQueue>,
    sync: Arc<SyncManager>,
    telemetry: Arc<TelemetryStore>,
}

impl VideoSink {
    pub(crate) fn new(
        queue: Arc<VideoQueue>,
        sync: Arc<SyncManager>,
        telemetry: Arc<TelemetryStore>,
    ) -> Self {
        Self {
            queue,
            sync,
            telemetry,
        }
    }

    /// Session PTS for the current instant, or `None` while paused. Skip
    /// the frame on `None`.
    pub fn now_pts(&self) -> Option<i64> {
        self.sync.try_now_pts()
    }

    /// Session PTS for a raw clock reading, or `None` if it was taken while
    /// paused.
    pub fn to_pts(&self, raw_ticks: i64) -> Option<i64> {
        self.sync.try_to_pts(raw_ticks)
    }

    /// Hand a frame to the encode loop. Returns `false` if the frame was
    /// discarded because the session is paused or the queue is full.
    pub fn push(&self, frame: VideoFrame) -> bool {
        if self.sync.is_paused() {
            return false;
        }
        self.telemetry.on_frame_captured();
        match self.queue.try_push(frame) {
            Ok(()) => true,
            Err(_dropped) => {
                self.telemetry.on_frame_dropped();
                false
            }
        }
    }

    /// Stamp `image` with the current session PTS and push it.
    pub fn push_image(&self, image: ImageHandle) -> bool {
        match self.now_pts() {
            Some(pts) => self.push(VideoFrame::new(image, pts)),
            None => false,
        }
    }
}

impl fmt::Debug for VideoSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoSink")
            .field("queued", &self.queue.size())
            .finish()
    }
}

/// Producer-side handle onto the audio queue.
#[derive(Clone)]
pub struct AudioSink {
    queue: Arc<AudioQueue>,
    sync: Arc<SyncManager>,
}

impl AudioSink {
    pub(crate) fn new(queue: Arc<AudioQueue>, sync: Arc<SyncManager>) -> Self {
        Self { queue, sync }
    }

    /// Session PTS for the current instant, or `None` while paused.
    pub fn now_pts(&self) -> Option<i64> {
        self.sync.try_now_pts()
    }

    pub fn to_pts(&self, raw_ticks: i64) -> Option<i64> {
        self.sync.try_to_pts(raw_ticks)
    }

    /// Hand a packet to the encode loop. Returns `false` if it was dropped.
    pub fn push(&self, packet: AudioPacket) -> bool {
        if self.sync.is_paused() {
            return false;
        }
        match self.queue.try_push(packet) {
            Ok(()) => true,
            Err(dropped) => {
                tracing::debug!(pts = dropped.pts, "Audio queue full, dropping packet");
                false
            }
        }
    }
}

impl fmt::Debug for AudioSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSink")
            .field("queued", &self.queue.size())
            .finish()
    }
}

/// Screen or camera capture.
pub trait VideoSource: Send {
    /// Prepare capture and return the negotiated `(width, height)`.
    fn initialize(&mut self, sink: VideoSink) -> RecorderResult<(u32, u32)>;

    /// Begin delivering frames to the sink.
    fn start(&mut self) -> RecorderResult<()>;

    /// Stop delivering frames. Must be safe to call from the source's own
    /// thread (from inside the device-lost callback).
    fn stop(&mut self);

    fn set_device_lost_callback(&mut self, callback: DeviceLostCallback);
}

/// Microphone or loopback capture.
pub trait AudioSource: Send {
    fn initialize(&mut self, sink: AudioSink) -> RecorderResult<()>;
    fn start(&mut self) -> RecorderResult<()>;
    fn stop(&mut self);

    /// Replace captured samples with silence while `muted` is set.
    fn set_muted(&self, muted: bool);
    fn is_muted(&self) -> bool;

    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
    fn bits_per_sample(&self) -> u16;

    fn is_float(&self) -> bool {
        false
    }
}

/// Video encoder. May fall back internally (hardware to software, full
/// resolution to 720p); callers only observe the resulting output format.
pub trait VideoEncoder: Send {
    fn initialize(&mut self, profile: &EncoderProfile) -> RecorderResult<()>;

    /// Encode one image. Encoders with internal latency may return `None`
    /// and release the unit on a later call or on [`flush`](Self::flush).
    fn encode(&mut self, image: &ImageHandle, pts: i64) -> RecorderResult<Option<EncodedUnit>>;

    /// Drain every unit still held by the encoder.
    fn flush(&mut self) -> Vec<EncodedUnit>;

    /// Make the next encoded unit a keyframe.
    fn request_keyframe(&mut self);

    fn mode(&self) -> EncoderMode;
    fn output_width(&self) -> u32;
    fn output_height(&self) -> u32;
    fn output_fps(&self) -> u32;
}

/// Container writer. Writes go to `partial_path`; only a successful
/// [`finalize`](Self::finalize) produces `final_path`.
pub trait MediaWriter: Send {
    /// File extension of the container, without the dot.
    fn container_extension(&self) -> &'static str;

    fn initialize(
        &mut self,
        partial_path: &Path,
        final_path: &Path,
        config: &MuxConfig,
    ) -> RecorderResult<()>;

    fn write_video(&mut self, unit: EncodedUnit) -> RecorderResult<()>;
    fn write_audio(&mut self, unit: EncodedUnit) -> RecorderResult<()>;

    /// Close the container and move it to the final path. Returns `Ok(false)`
    /// if nothing was initialized.
    fn finalize(&mut self) -> RecorderResult<bool>;

    /// Abandon the output and remove the partial file.
    fn discard(&mut self) -> RecorderResult<()> {
        Ok(())
    }
}

/// Everything a session needs besides its clock and storage.
pub struct Collaborators {
    pub video: Box<dyn VideoSource>,
    pub audio: Option<Box<dyn AudioSource>>,
    pub encoder: Box<dyn VideoEncoder>,
    pub writer: Box<dyn MediaWriter>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("audio", &self.audio.is_some())
            .field("encoder_mode", &self.encoder.mode())
            .field("container", &self.writer.container_extension())
            .finish()
    }
}
