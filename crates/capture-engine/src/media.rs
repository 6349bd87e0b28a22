//! Media items that flow through the pipeline.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use steadyrec_common::clock::HNS_PER_SECOND;

/// Video queue depth. Small enough to bound memory, large enough to absorb
/// short encoder stalls.
pub const VIDEO_QUEUE_CAPACITY: usize = 5;

/// Audio queue depth (~160ms of 10ms packets).
pub const AUDIO_QUEUE_CAPACITY: usize = 16;

/// A captured image surface.
///
/// Implementations wrap whatever the capture backend produces (GPU texture,
/// shared memory buffer, ...). The pipeline never looks inside; only the
/// encoder does.
pub trait Surface: Send + Sync + fmt::Debug {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// CPU-visible pixel data, if the surface has any.
    fn bytes(&self) -> Option<&[u8]> {
        None
    }
}

/// Reference-counted handle to a [`Surface`]. Cloning never copies pixels.
#[derive(Debug, Clone)]
pub struct ImageHandle(Arc<dyn Surface>);

impl ImageHandle {
    pub fn new(surface: impl Surface + 'static) -> Self {
        Self(Arc::new(surface))
    }

    pub fn surface(&self) -> &dyn Surface {
        self.0.as_ref()
    }

    /// Whether two handles refer to the same surface.
    pub fn same_surface(&self, other: &ImageHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of live handles to this surface.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

/// Plain in-memory surface.
#[derive(Clone)]
pub struct CpuSurface {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl fmt::Debug for CpuSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuSurface")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Surface for CpuSurface {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn bytes(&self) -> Option<&[u8]> {
        Some(&self.data)
    }
}

/// One captured video frame. Move-only: it has exactly one owner at a time.
#[derive(Debug)]
pub struct VideoFrame {
    pub image: ImageHandle,
    /// Capture PTS in 100ns units.
    pub pts: i64,
    pub width: u32,
    pub height: u32,
}

impl VideoFrame {
    pub fn new(image: ImageHandle, pts: i64) -> Self {
        let width = image.surface().width();
        let height = image.surface().height();
        Self {
            image,
            pts,
            width,
            height,
        }
    }
}

/// One captured PCM packet (typically 10ms).
#[derive(Debug, Clone)]
pub struct AudioPacket {
    pub data: Vec<u8>,
    /// Number of sample frames (samples per channel).
    pub frame_count: u32,
    /// PTS in 100ns units.
    pub pts: i64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Zeroed PCM injected while muted.
    pub is_silence: bool,
}

impl AudioPacket {
    /// Playback duration in 100ns units.
    pub fn duration(&self) -> i64 {
        if self.sample_rate == 0 {
            return 0;
        }
        i64::from(self.frame_count) * HNS_PER_SECOND / i64::from(self.sample_rate)
    }
}

/// Output of the encoder, or an audio packet ready for the writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedUnit {
    pub data: Vec<u8>,
    pub pts: i64,
    pub duration: i64,
    pub keyframe: bool,
}

/// Encoder configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderProfile {
    pub fps: u32,
    pub bitrate_bps: u32,
    pub width: u32,
    pub height: u32,
    pub gop_seconds: u32,
    pub low_latency: bool,
    pub b_frames: u32,
}

impl Default for EncoderProfile {
    fn default() -> Self {
        Self {
            fps: 30,
            bitrate_bps: 8_000_000,
            width: 1920,
            height: 1080,
            gop_seconds: 2,
            low_latency: true,
            b_frames: 0,
        }
    }
}

impl EncoderProfile {
    /// Frames between forced keyframes.
    pub fn gop_frames(&self) -> u32 {
        self.fps.saturating_mul(self.gop_seconds).max(1)
    }
}

/// Stream layout handed to the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxConfig {
    pub video_width: u32,
    pub video_height: u32,
    pub video_fps: u32,
    pub video_bitrate: u32,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
    pub audio_bits_per_sample: u16,
    pub audio_is_float: bool,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            video_width: 1920,
            video_height: 1080,
            video_fps: 30,
            video_bitrate: 8_000_000,
            audio_sample_rate: 48000,
            audio_channels: 2,
            audio_bits_per_sample: 16,
            audio_is_float: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_duration_from_frame_count() {
        let pkt = AudioPacket {
            data: vec![0; 1920],
            frame_count: 480,
            pts: 0,
            sample_rate: 48000,
            channels: 2,
            is_silence: true,
        };
        assert_eq!(pkt.duration(), 100_000);
    }

    #[test]
    fn test_image_handle_clone_shares_surface() {
        let handle = ImageHandle::new(CpuSurface {
            width: 4,
            height: 2,
            data: vec![7; 32],
        });
        let cached = handle.clone();
        assert!(cached.same_surface(&handle));
        assert_eq!(handle.ref_count(), 2);

        let frame = VideoFrame::new(handle, 10);
        assert_eq!((frame.width, frame.height), (4, 2));
        drop(frame);
        assert_eq!(cached.ref_count(), 1);
    }

    #[test]
    fn test_gop_frames() {
        let profile = EncoderProfile::default();
        assert_eq!(profile.gop_frames(), 60);
    }
}
