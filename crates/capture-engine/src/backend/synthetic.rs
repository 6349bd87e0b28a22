//! Synthetic capture sources and a passthrough encoder.
//!
//! These drive the full pipeline without a display server, sound card, or
//! codec library: frames are generated test patterns, audio is a sine tone,
//! and "encoding" copies surface bytes through with realistic latency.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use steadyrec_common::clock::HNS_PER_SECOND;
use steadyrec_common::error::{RecorderError, RecorderResult};

use crate::media::{AudioPacket, CpuSurface, EncodedUnit, EncoderProfile, ImageHandle};
use crate::pipeline::{
    AudioSink, AudioSource, DeviceLostCallback, EncoderMode, VideoEncoder, VideoSink, VideoSource,
};

/// Audio packet length.
const AUDIO_PACKET: Duration = Duration::from_millis(10);
const TONE_HZ: f32 = 440.0;
const TONE_AMPLITUDE: f32 = 0.2 * i16::MAX as f32;

/// Small deterministic PRNG for capture jitter.
#[derive(Debug, Clone)]
struct XorShift(u64);

impl XorShift {
    fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    /// Uniform in `[-max, max]`.
    fn jitter(&mut self, max: Duration) -> i128 {
        let span = max.as_nanos() as u64;
        if span == 0 {
            return 0;
        }
        (self.next_u64() % (2 * span + 1)) as i128 - span as i128
    }
}

/// Stop a producer thread. Detaches instead of self-joining.
fn stop_worker(running: &AtomicBool, handle: Option<JoinHandle<()>>, name: &str) {
    running.store(false, Ordering::Release);
    let Some(handle) = handle else {
        return;
    };
    if handle.thread().id() == thread::current().id() {
        tracing::debug!(source = name, "Stopped from own thread, detaching");
        return;
    }
    if handle.join().is_err() {
        tracing::error!(source = name, "Producer thread panicked");
    }
}

/// Settings for [`SyntheticVideoSource`].
#[derive(Debug, Clone)]
pub struct SyntheticVideoConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Maximum deviation applied to each frame's delivery time.
    pub jitter: Duration,
    pub seed: u64,
    /// Simulate the device disappearing after this many frames.
    pub lose_device_after: Option<u64>,
}

impl Default for SyntheticVideoConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 180,
            fps: 30,
            jitter: Duration::ZERO,
            seed: 0x5EED,
            lose_device_after: None,
        }
    }
}

/// Test-pattern video producer running on its own thread.
pub struct SyntheticVideoSource {
    config: SyntheticVideoConfig,
    sink: Option<VideoSink>,
    device_lost: Option<DeviceLostCallback>,
    running: Arc<AtomicBool>,
    frames_produced: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl SyntheticVideoSource {
    pub fn new(config: SyntheticVideoConfig) -> Self {
        Self {
            config,
            sink: None,
            device_lost: None,
            running: Arc::new(AtomicBool::new(false)),
            frames_produced: Arc::new(AtomicU64::new(0)),
            handle: None,
        }
    }

    /// Shared counter of frames produced so far.
    pub fn frames_produced(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.frames_produced)
    }
}

fn test_pattern(width: u32, height: u32, frame: u64) -> ImageHandle {
    let shade = (frame % 256) as u8;
    let mut data = vec![0u8; width as usize * height as usize * 4];
    for (i, px) in data.chunks_exact_mut(4).enumerate() {
        let x = (i % width.max(1) as usize) as u8;
        px.copy_from_slice(&[x, shade, x ^ shade, 0xFF]);
    }
    ImageHandle::new(CpuSurface {
        width,
        height,
        data,
    })
}

impl VideoSource for SyntheticVideoSource {
    fn initialize(&mut self, sink: VideoSink) -> RecorderResult<(u32, u32)> {
        if self.config.width == 0 || self.config.height == 0 || self.config.fps == 0 {
            return Err(RecorderError::capture(format!(
                "Invalid synthetic capture format {}x{}@{}",
                self.config.width, self.config.height, self.config.fps
            )));
        }
        self.sink = Some(sink);
        Ok((self.config.width, self.config.height))
    }

    fn start(&mut self) -> RecorderResult<()> {
        let Some(sink) = self.sink.clone() else {
            return Err(RecorderError::capture("Video source not initialized"));
        };
        if self.handle.is_some() {
            return Err(RecorderError::capture("Video source already running"));
        }

        let config = self.config.clone();
        let device_lost = self.device_lost.clone();
        let running = Arc::clone(&self.running);
        let produced = Arc::clone(&self.frames_produced);
        running.store(true, Ordering::Release);

        let handle = thread::Builder::new()
            .name("synthetic-video".to_string())
            .spawn(move || {
                let interval = Duration::from_secs(1) / config.fps;
                let mut rng = XorShift::new(config.seed);
                let origin = Instant::now();
                let mut frame: u64 = 0;

                while running.load(Ordering::Acquire) {
                    if config.lose_device_after.is_some_and(|n| frame >= n) {
                        tracing::warn!(frames = frame, "Synthetic capture device lost");
                        if let Some(callback) = device_lost.as_ref() {
                            callback();
                        }
                        break;
                    }

                    let nominal = interval.as_nanos() as i128 * frame as i128;
                    let due = (nominal + rng.jitter(config.jitter)).max(0) as u64;
                    let due = origin + Duration::from_nanos(due);
                    let now = Instant::now();
                    if due > now {
                        thread::sleep(due - now);
                    }
                    if !running.load(Ordering::Acquire) {
                        break;
                    }

                    sink.push_image(test_pattern(config.width, config.height, frame));
                    produced.fetch_add(1, Ordering::Relaxed);
                    frame += 1;
                }
            })?;

        self.handle = Some(handle);
        tracing::info!(
            width = self.config.width,
            height = self.config.height,
            fps = self.config.fps,
            "Synthetic video capture started"
        );
        Ok(())
    }

    fn stop(&mut self) {
        stop_worker(&self.running, self.handle.take(), "video");
    }

    fn set_device_lost_callback(&mut self, callback: DeviceLostCallback) {
        self.device_lost = Some(callback);
    }
}

impl Drop for SyntheticVideoSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Settings for [`SyntheticAudioSource`].
#[derive(Debug, Clone)]
pub struct SyntheticAudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for SyntheticAudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
        }
    }
}

/// 10ms s16 sine-tone producer running on its own thread.
pub struct SyntheticAudioSource {
    config: SyntheticAudioConfig,
    sink: Option<AudioSink>,
    muted: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SyntheticAudioSource {
    pub fn new(config: SyntheticAudioConfig) -> Self {
        Self {
            config,
            sink: None,
            muted: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    fn frames_per_packet(&self) -> u32 {
        (u64::from(self.config.sample_rate) * AUDIO_PACKET.as_millis() as u64 / 1000) as u32
    }
}

fn sine_packet(frames: u32, channels: u16, sample_rate: u32, phase: &mut f32) -> Vec<u8> {
    let step = TAU * TONE_HZ / sample_rate as f32;
    let mut data = Vec::with_capacity(frames as usize * channels as usize * 2);
    for _ in 0..frames {
        let sample = (phase.sin() * TONE_AMPLITUDE) as i16;
        for _ in 0..channels {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        *phase = (*phase + step) % TAU;
    }
    data
}

impl AudioSource for SyntheticAudioSource {
    fn initialize(&mut self, sink: AudioSink) -> RecorderResult<()> {
        if self.config.sample_rate == 0 || self.config.channels == 0 {
            return Err(RecorderError::audio("Invalid synthetic audio format"));
        }
        self.sink = Some(sink);
        Ok(())
    }

    fn start(&mut self) -> RecorderResult<()> {
        let Some(sink) = self.sink.clone() else {
            return Err(RecorderError::audio("Audio source not initialized"));
        };
        if self.handle.is_some() {
            return Err(RecorderError::audio("Audio source already running"));
        }

        let frames = self.frames_per_packet();
        let channels = self.config.channels;
        let sample_rate = self.config.sample_rate;
        let muted = Arc::clone(&self.muted);
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::Release);

        let handle = thread::Builder::new()
            .name("synthetic-audio".to_string())
            .spawn(move || {
                let origin = Instant::now();
                let mut phase = 0.0f32;
                let mut packet_index: u32 = 0;

                while running.load(Ordering::Acquire) {
                    let silent = muted.load(Ordering::Relaxed);
                    let tone = sine_packet(frames, channels, sample_rate, &mut phase);
                    let data = if silent { vec![0; tone.len()] } else { tone };

                    if let Some(pts) = sink.now_pts() {
                        sink.push(AudioPacket {
                            data,
                            frame_count: frames,
                            pts,
                            sample_rate,
                            channels,
                            is_silence: silent,
                        });
                    }

                    packet_index = packet_index.wrapping_add(1);
                    let due = origin + AUDIO_PACKET * packet_index;
                    let now = Instant::now();
                    if due > now {
                        thread::sleep(due - now);
                    }
                }
            })?;

        self.handle = Some(handle);
        tracing::info!(sample_rate, channels, "Synthetic audio capture started");
        Ok(())
    }

    fn stop(&mut self) {
        stop_worker(&self.running, self.handle.take(), "audio");
    }

    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
        tracing::info!(muted, "Audio mute changed");
    }

    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn channels(&self) -> u16 {
        self.config.channels
    }

    fn bits_per_sample(&self) -> u16 {
        16
    }
}

impl Drop for SyntheticAudioSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Copies surface bytes into encoded units. Holds one unit back, the way a
/// real encoder's pipeline depth does, so `flush()` has work to do.
#[derive(Debug)]
pub struct PassthroughEncoder {
    mode: EncoderMode,
    profile: Option<EncoderProfile>,
    pending: Option<EncodedUnit>,
    frame_index: u64,
    force_keyframe: bool,
}

impl PassthroughEncoder {
    pub fn new() -> Self {
        Self::with_mode(EncoderMode::Software)
    }

    /// Report `mode` as the active encoder path.
    pub fn with_mode(mode: EncoderMode) -> Self {
        Self {
            mode,
            profile: None,
            pending: None,
            frame_index: 0,
            force_keyframe: false,
        }
    }
}

impl Default for PassthroughEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoEncoder for PassthroughEncoder {
    fn initialize(&mut self, profile: &EncoderProfile) -> RecorderResult<()> {
        if profile.fps == 0 || profile.width == 0 || profile.height == 0 {
            return Err(RecorderError::encoder(format!(
                "Unsupported profile {}x{}@{}",
                profile.width, profile.height, profile.fps
            )));
        }
        self.profile = Some(*profile);
        self.pending = None;
        self.frame_index = 0;
        self.force_keyframe = false;
        tracing::info!(
            mode = %self.mode,
            width = profile.width,
            height = profile.height,
            fps = profile.fps,
            bitrate_bps = profile.bitrate_bps,
            "Passthrough encoder initialized"
        );
        Ok(())
    }

    fn encode(&mut self, image: &ImageHandle, pts: i64) -> RecorderResult<Option<EncodedUnit>> {
        let Some(profile) = self.profile else {
            return Err(RecorderError::encoder("Encoder not initialized"));
        };

        let keyframe =
            self.force_keyframe || self.frame_index % u64::from(profile.gop_frames()) == 0;
        self.force_keyframe = false;
        self.frame_index += 1;

        let unit = EncodedUnit {
            data: image.surface().bytes().map(<[u8]>::to_vec).unwrap_or_default(),
            pts,
            duration: HNS_PER_SECOND / i64::from(profile.fps),
            keyframe,
        };
        Ok(self.pending.replace(unit))
    }

    fn flush(&mut self) -> Vec<EncodedUnit> {
        self.pending.take().into_iter().collect()
    }

    fn request_keyframe(&mut self) {
        self.force_keyframe = true;
    }

    fn mode(&self) -> EncoderMode {
        self.mode
    }

    fn output_width(&self) -> u32 {
        self.profile.map_or(0, |p| p.width)
    }

    fn output_height(&self) -> u32 {
        self.profile.map_or(0, |p| p.height)
    }

    fn output_fps(&self) -> u32 {
        self.profile.map_or(0, |p| p.fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{AudioQueue, VideoQueue};
    use crate::telemetry::TelemetryStore;
    use steadyrec_common::clock::SystemClock;
    use steadyrec_timing::SyncManager;

    fn sync() -> Arc<SyncManager> {
        let sync = Arc::new(SyncManager::new(Arc::new(SystemClock::new())));
        sync.start();
        sync
    }

    fn image(tag: u8) -> ImageHandle {
        ImageHandle::new(CpuSurface {
            width: 2,
            height: 1,
            data: vec![tag; 8],
        })
    }

    #[test]
    fn test_xorshift_jitter_is_bounded_and_deterministic() {
        let max = Duration::from_millis(4);
        let mut a = XorShift::new(7);
        let mut b = XorShift::new(7);
        for _ in 0..1000 {
            let j = a.jitter(max);
            assert_eq!(j, b.jitter(max));
            assert!(j.unsigned_abs() <= max.as_nanos());
        }
        assert_eq!(XorShift::new(0).jitter(Duration::ZERO), 0);
    }

    #[test]
    fn test_encoder_has_one_unit_latency() {
        let mut enc = PassthroughEncoder::new();
        enc.initialize(&EncoderProfile::default()).unwrap();

        assert!(enc.encode(&image(1), 0).unwrap().is_none());
        let first = enc.encode(&image(2), 333_333).unwrap().unwrap();
        assert_eq!(first.pts, 0);
        assert_eq!(first.data, vec![1; 8]);
        assert!(first.keyframe);
        assert_eq!(first.duration, 333_333);

        let flushed = enc.flush();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].pts, 333_333);
        assert!(!flushed[0].keyframe);
        assert!(enc.flush().is_empty());
    }

    #[test]
    fn test_encoder_keyframes_on_gop_and_request() {
        let mut enc = PassthroughEncoder::with_mode(EncoderMode::Hardware);
        let profile = EncoderProfile {
            fps: 2,
            gop_seconds: 2,
            ..EncoderProfile::default()
        };
        enc.initialize(&profile).unwrap();

        let mut keys = Vec::new();
        for i in 0..10 {
            if i == 6 {
                enc.request_keyframe();
            }
            if let Some(unit) = enc.encode(&image(i), i64::from(i)).unwrap() {
                keys.push(unit.keyframe);
            }
        }
        keys.extend(enc.flush().iter().map(|u| u.keyframe));
        assert_eq!(
            keys,
            vec![true, false, false, false, true, false, true, false, true, false]
        );
        assert_eq!(enc.mode(), EncoderMode::Hardware);
        assert_eq!(enc.output_fps(), 2);
    }

    #[test]
    fn test_encoder_rejects_uninitialized_use() {
        let mut enc = PassthroughEncoder::new();
        assert!(enc.encode(&image(0), 0).is_err());
        assert!(enc
            .initialize(&EncoderProfile {
                fps: 0,
                ..EncoderProfile::default()
            })
            .is_err());
    }

    #[test]
    fn test_video_source_produces_into_queue() {
        let queue = Arc::new(VideoQueue::new());
        let telemetry = Arc::new(TelemetryStore::new());
        let sink = VideoSink::new(Arc::clone(&queue), sync(), Arc::clone(&telemetry));

        let mut source = SyntheticVideoSource::new(SyntheticVideoConfig {
            fps: 200,
            ..SyntheticVideoConfig::default()
        });
        assert_eq!(source.initialize(sink).unwrap(), (320, 180));
        source.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while queue.size() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        source.stop();
        source.stop();

        let first = queue.try_pop().unwrap();
        let second = queue.try_pop().unwrap();
        assert!(second.pts >= first.pts);
        assert_eq!((first.width, first.height), (320, 180));
        assert!(telemetry.frames_captured() >= 2);
    }

    #[test]
    fn test_video_source_reports_device_loss() {
        let queue = Arc::new(VideoQueue::new());
        let sink = VideoSink::new(queue, sync(), Arc::new(TelemetryStore::new()));
        let lost = Arc::new(AtomicBool::new(false));

        let mut source = SyntheticVideoSource::new(SyntheticVideoConfig {
            fps: 500,
            lose_device_after: Some(2),
            ..SyntheticVideoConfig::default()
        });
        let flag = Arc::clone(&lost);
        source.set_device_lost_callback(Arc::new(move || flag.store(true, Ordering::SeqCst)));
        source.initialize(sink).unwrap();
        source.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !lost.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(lost.load(Ordering::SeqCst));
        source.stop();
        assert_eq!(source.frames_produced().load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_video_source_rejects_bad_format_and_unprepared_start() {
        let mut source = SyntheticVideoSource::new(SyntheticVideoConfig::default());
        assert!(source.start().is_err());

        let queue = Arc::new(VideoQueue::new());
        let sink = VideoSink::new(queue, sync(), Arc::new(TelemetryStore::new()));
        let mut bad = SyntheticVideoSource::new(SyntheticVideoConfig {
            fps: 0,
            ..SyntheticVideoConfig::default()
        });
        assert!(bad.initialize(sink).is_err());
    }

    #[test]
    fn test_audio_source_mute_injects_silence() {
        let queue = Arc::new(AudioQueue::new());
        let sink = AudioSink::new(Arc::clone(&queue), sync());

        let mut source = SyntheticAudioSource::new(SyntheticAudioConfig::default());
        source.set_muted(true);
        assert!(source.is_muted());
        source.initialize(sink).unwrap();
        source.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while queue.size() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        source.stop();

        let packet = queue.try_pop().unwrap();
        assert_eq!(packet.frame_count, 480);
        assert_eq!(packet.data.len(), 480 * 2 * 2);
        assert!(packet.is_silence);
        assert!(packet.data.iter().all(|b| *b == 0));
        assert_eq!(packet.duration(), 100_000);
    }

    #[test]
    fn test_sine_packet_is_not_silent() {
        let mut phase = 0.0;
        let data = sine_packet(480, 1, 48000, &mut phase);
        assert_eq!(data.len(), 960);
        assert!(data.iter().any(|b| *b != 0));
        assert!(phase > 0.0);
    }
}
