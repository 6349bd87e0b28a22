//! Recording session orchestration.
//!
//! A [`RecordingSession`] owns the queues, the session machine, the sync
//! manager, and the collaborators. Lifecycle calls take `&self` and may come
//! from any thread, including a producer's device-loss callback, the disk
//! watchdog, or the encode thread itself. Cross-thread signaling goes through
//! atomics; no lock is held across a join.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use steadyrec_common::clock::MonotonicClock;
use steadyrec_common::config::{AppConfig, RecordingDefaults};
use steadyrec_common::error::{RecorderError, RecorderResult};
use steadyrec_timing::{FramePacer, SyncManager};

use crate::encode_loop::{spawn_encode_thread, EncodeLoop, LoopOutcome, LoopSignals};
use crate::machine::{AtomicSessionState, SessionEvent, SessionMachine, SessionState};
use crate::media::{EncoderProfile, MuxConfig};
use crate::pipeline::{
    AudioQueue, AudioSink, AudioSource, Collaborators, EncoderMode, MediaWriter, VideoEncoder,
    VideoQueue, VideoSink, VideoSource,
};
use crate::power::{clamp_for_power, PowerState};
use crate::storage::{DiskSpaceMonitor, OutputPaths, StorageManager};
use crate::telemetry::{TelemetrySnapshot, TelemetryStore};

/// End-of-recording A/V drift above this is logged as a warning.
const DRIFT_WARN_MS: f64 = 100.0;

const MIB: u64 = 1024 * 1024;

/// Status and error notifications. Called from whichever thread triggered
/// them; keep them short.
pub type MessageCallback = Arc<dyn Fn(&str) + Send + Sync>;

type PowerProbe = Arc<dyn Fn() -> PowerState + Send + Sync>;

/// Per-session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub recording: RecordingDefaults,
    /// Stop the recording when free space drops below this.
    pub min_free_bytes: u64,
    pub disk_poll_interval: Duration,
    pub disk_watchdog: bool,
}

impl SessionConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        let mut recording = config.recording.clone();
        recording.normalize();
        Self {
            recording,
            min_free_bytes: config.storage.min_free_bytes,
            disk_poll_interval: Duration::from_millis(config.storage.poll_interval_ms.max(1)),
            disk_watchdog: true,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_app(&AppConfig::default())
    }
}

/// What a finished recording produced.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingSummary {
    /// Final file, if the writer finalized successfully.
    pub output: Option<PathBuf>,
    pub telemetry: TelemetrySnapshot,
    pub pacer_duplicates: u32,
    pub pacer_drops: u32,
    /// Audio end minus video end, if both streams were written.
    pub av_drift_ms: Option<f64>,
}

struct Producers {
    video: Box<dyn VideoSource>,
    audio: Option<Box<dyn AudioSource>>,
    audio_active: bool,
}

/// A recording pipeline instance.
pub struct RecordingSession {
    weak_self: Weak<RecordingSession>,
    config: SessionConfig,
    profile_override: Mutex<Option<EncoderProfile>>,

    machine: Mutex<SessionMachine>,
    state: Arc<AtomicSessionState>,
    sync: Arc<SyncManager>,
    video_queue: Arc<VideoQueue>,
    audio_queue: Arc<AudioQueue>,
    telemetry: Arc<TelemetryStore>,
    signals: Arc<LoopSignals>,

    producers: Mutex<Producers>,
    encoder: Mutex<Option<Box<dyn VideoEncoder>>>,
    writer: Mutex<Option<Box<dyn MediaWriter>>>,
    consumer: Mutex<Option<JoinHandle<Option<LoopOutcome>>>>,

    storage: StorageManager,
    disk_monitor: DiskSpaceMonitor,
    paths: Mutex<Option<OutputPaths>>,
    encoder_mode: Mutex<EncoderMode>,
    power_state: Mutex<PowerState>,
    power_probe: Mutex<PowerProbe>,
    last_summary: Mutex<Option<RecordingSummary>>,

    on_status: Mutex<Option<MessageCallback>>,
    on_error: Mutex<Option<MessageCallback>>,
}

impl RecordingSession {
    pub fn new(
        config: SessionConfig,
        collaborators: Collaborators,
        clock: Arc<dyn MonotonicClock>,
        storage: StorageManager,
    ) -> Arc<Self> {
        let Collaborators {
            video,
            audio,
            encoder,
            writer,
        } = collaborators;

        let state = Arc::new(AtomicSessionState::new(SessionState::Idle));
        let mut machine = SessionMachine::new();
        {
            let mirror = Arc::clone(&state);
            machine.set_observer(Box::new(move |_, new: SessionState| mirror.store(new)));
        }
        let encoder_mode = encoder.mode();

        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            config,
            profile_override: Mutex::new(None),
            machine: Mutex::new(machine),
            state,
            sync: Arc::new(SyncManager::new(clock)),
            video_queue: Arc::new(VideoQueue::new()),
            audio_queue: Arc::new(AudioQueue::new()),
            telemetry: Arc::new(TelemetryStore::new()),
            signals: Arc::new(LoopSignals::default()),
            producers: Mutex::new(Producers {
                video,
                audio,
                audio_active: false,
            }),
            encoder: Mutex::new(Some(encoder)),
            writer: Mutex::new(Some(writer)),
            consumer: Mutex::new(None),
            storage,
            disk_monitor: DiskSpaceMonitor::new(),
            paths: Mutex::new(None),
            encoder_mode: Mutex::new(encoder_mode),
            power_state: Mutex::new(PowerState::Unknown),
            power_probe: Mutex::new(Arc::new(PowerState::detect) as PowerProbe),
            last_summary: Mutex::new(None),
            on_status: Mutex::new(None),
            on_error: Mutex::new(None),
        })
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Begin recording.
    ///
    /// Fails without side effects if the session is not idle. If any
    /// collaborator fails to come up the session is rolled back to idle, the
    /// error callback fires once, and the error is returned.
    pub fn start(&self) -> RecorderResult<()> {
        if !self.transition(SessionEvent::Start) {
            return Err(RecorderError::session(format!(
                "Cannot start while {}",
                self.state()
            )));
        }
        tracing::info!("Starting recording session");

        self.sync.start();
        while self.video_queue.try_pop().is_some() {}
        while self.audio_queue.try_pop().is_some() {}
        *self.last_summary.lock() = None;

        let Some((mut encoder, mut writer)) = self.take_codec() else {
            let err = RecorderError::session("Encoder and writer are unavailable");
            self.rollback_start(&err);
            return Err(err);
        };

        let mut producers = self.producers.lock();
        let fps = match self.prepare(&mut producers, encoder.as_mut(), writer.as_mut()) {
            Ok(fps) => fps,
            Err(e) => {
                drop(producers);
                *self.encoder.lock() = Some(encoder);
                *self.writer.lock() = Some(writer);
                self.rollback_start(&e);
                return Err(e);
            }
        };

        self.telemetry.reset();
        self.signals.arm();
        if let Err(e) = self.spawn_consumer(FramePacer::new(fps), encoder, writer) {
            drop(producers);
            self.rollback_start(&e);
            return Err(e);
        }

        self.start_disk_watchdog();

        if let Err(e) = self.start_producers(&mut producers) {
            drop(producers);
            self.signals.abort.store(true, Ordering::Release);
            self.report_error(&format!("Failed to start capture: {e}"));
            self.stop();
            return Err(e);
        }
        drop(producers);

        tracing::info!(fps, "Recording session started");
        self.notify_status("Recording");
        Ok(())
    }

    /// Suspend encoding. Producers keep running; their output is discarded.
    pub fn pause(&self) -> bool {
        let mut machine = self.machine.lock();
        if !machine.transition(SessionEvent::Pause) {
            return false;
        }
        self.sync.pause();
        self.signals.pacer_reset.store(true, Ordering::Release);
        drop(machine);

        tracing::info!("Recording paused");
        self.notify_status("Paused");
        true
    }

    /// Continue after [`pause`](Self::pause). The paused interval is removed
    /// from the timeline and the next frame is encoded as a keyframe.
    pub fn resume(&self) -> bool {
        let mut machine = self.machine.lock();
        if machine.state().next(SessionEvent::Resume).is_none() {
            return false;
        }
        self.sync.resume();
        self.signals.pacer_reset.store(true, Ordering::Release);
        self.signals.keyframe_requested.store(true, Ordering::Release);
        machine.transition(SessionEvent::Resume);
        drop(machine);

        tracing::info!(
            paused_total_hns = self.sync.paused_total(),
            "Recording resumed"
        );
        self.notify_status("Recording");
        true
    }

    /// Stop recording, drain, and finalize.
    ///
    /// Callable from any thread. Returns `false` if there was nothing to
    /// stop. Called on the encode thread, it returns at once and that thread
    /// finishes the stop when its loop exits.
    pub fn stop(&self) -> bool {
        if !self.transition(SessionEvent::Stop) {
            return false;
        }
        tracing::info!("Stopping recording session");
        // An aborted start has already reported its failure.
        let aborted = self.signals.abort.load(Ordering::Acquire);
        if !aborted {
            self.notify_status("Stopping");
        }

        self.disk_monitor.stop();
        {
            let mut producers = self.producers.lock();
            if let Some(audio) = producers.audio.as_mut() {
                audio.stop();
            }
            producers.video.stop();
        }
        self.signals.running.store(false, Ordering::Release);

        let handle = self.consumer.lock().take();
        match handle {
            Some(handle) if handle.thread().id() == thread::current().id() => {
                tracing::debug!("Stop requested on the encode thread, finalizing on exit");
                self.signals.finalize_on_exit.store(true, Ordering::Release);
            }
            Some(handle) => match handle.join() {
                Ok(Some(outcome)) => self.complete_stop(outcome),
                Ok(None) => {}
                Err(_) => {
                    self.report_error("Encode thread panicked");
                    self.transition(SessionEvent::Finalized);
                }
            },
            None => {
                self.transition(SessionEvent::Finalized);
            }
        }
        true
    }

    // ── Controls and accessors ──────────────────────────────────────

    /// Mute or unmute the audio source (silence is recorded while muted).
    pub fn set_muted(&self, muted: bool) {
        if let Some(audio) = self.producers.lock().audio.as_ref() {
            audio.set_muted(muted);
        }
    }

    pub fn is_muted(&self) -> bool {
        self.producers
            .lock()
            .audio
            .as_ref()
            .is_some_and(|audio| audio.is_muted())
    }

    /// Override the encoder profile derived from config. Only while idle.
    pub fn set_encoder_profile(&self, profile: EncoderProfile) -> RecorderResult<()> {
        if self.state() != SessionState::Idle {
            return Err(RecorderError::session(
                "Encoder profile can only change while idle",
            ));
        }
        *self.profile_override.lock() = Some(profile);
        Ok(())
    }

    /// Replace the power state detection used at start.
    pub fn set_power_probe(&self, probe: impl Fn() -> PowerState + Send + Sync + 'static) {
        *self.power_probe.lock() = Arc::new(probe);
    }

    pub fn on_status(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_status.lock() = Some(Arc::new(callback) as MessageCallback);
    }

    pub fn on_error(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_error.lock() = Some(Arc::new(callback) as MessageCallback);
    }

    pub fn state(&self) -> SessionState {
        self.state.load()
    }

    pub fn is_recording(&self) -> bool {
        self.state() == SessionState::Recording
    }

    /// Final output path of the current or most recent recording.
    pub fn output_path(&self) -> Option<PathBuf> {
        self.paths.lock().as_ref().map(|p| p.final_path.clone())
    }

    /// Recorded time so far, excluding pauses, in 100ns units.
    pub fn elapsed_pts(&self) -> i64 {
        match self.state() {
            SessionState::Idle => 0,
            _ => self.sync.now_pts().max(0),
        }
    }

    pub fn telemetry_snapshot(&self) -> TelemetrySnapshot {
        self.telemetry.set_backlog(self.video_queue.size() as u64);
        self.telemetry
            .snapshot(*self.encoder_mode.lock(), *self.power_state.lock())
    }

    pub fn frames_captured(&self) -> u64 {
        self.telemetry.frames_captured()
    }

    pub fn frames_encoded(&self) -> u64 {
        self.telemetry.frames_encoded()
    }

    pub fn frames_dropped(&self) -> u64 {
        self.telemetry.frames_dropped()
    }

    /// Summary of the last completed recording.
    pub fn last_summary(&self) -> Option<RecordingSummary> {
        self.last_summary.lock().clone()
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    // ── Internals ───────────────────────────────────────────────────

    fn transition(&self, event: SessionEvent) -> bool {
        self.machine.lock().transition(event)
    }

    fn take_codec(&self) -> Option<(Box<dyn VideoEncoder>, Box<dyn MediaWriter>)> {
        let mut encoder = self.encoder.lock();
        let mut writer = self.writer.lock();
        if encoder.is_none() || writer.is_none() {
            return None;
        }
        Some((encoder.take()?, writer.take()?))
    }

    /// Initialize every collaborator. Returns the encoder's output fps.
    fn prepare(
        &self,
        producers: &mut Producers,
        encoder: &mut dyn VideoEncoder,
        writer: &mut dyn MediaWriter,
    ) -> RecorderResult<u32> {
        let recording = &self.config.recording;

        let weak = self.weak_self.clone();
        producers
            .video
            .set_device_lost_callback(Arc::new(move || {
                if let Some(session) = weak.upgrade() {
                    session.report_error("Capture device lost");
                    session.stop();
                }
            }));

        let (width, height) = producers.video.initialize(VideoSink::new(
            Arc::clone(&self.video_queue),
            Arc::clone(&self.sync),
            Arc::clone(&self.telemetry),
        ))?;
        tracing::info!(width, height, "Video capture initialized");

        producers.audio_active = false;
        if let Some(audio) = producers.audio.as_mut() {
            let sink = AudioSink::new(Arc::clone(&self.audio_queue), Arc::clone(&self.sync));
            match audio.initialize(sink) {
                Ok(()) => producers.audio_active = true,
                Err(e) if recording.audio_optional => {
                    tracing::warn!(error = %e, "Audio capture unavailable, recording video only");
                }
                Err(e) => return Err(e),
            }
        }

        let requested = self.requested_profile(width, height);
        let power = (self.power_probe.lock().clone())();
        *self.power_state.lock() = power;
        let profile = if recording.apply_power_clamp {
            clamp_for_power(requested, power)
        } else {
            requested
        };

        encoder.initialize(&profile)?;
        *self.encoder_mode.lock() = encoder.mode();
        tracing::info!(
            mode = %encoder.mode(),
            width = encoder.output_width(),
            height = encoder.output_height(),
            fps = encoder.output_fps(),
            "Encoder initialized"
        );

        let audio = producers
            .audio
            .as_ref()
            .filter(|_| producers.audio_active);
        let mux = MuxConfig {
            video_width: encoder.output_width(),
            video_height: encoder.output_height(),
            video_fps: encoder.output_fps(),
            video_bitrate: profile.bitrate_bps,
            audio_sample_rate: audio.map_or(0, |a| a.sample_rate()),
            audio_channels: audio.map_or(0, |a| a.channels()),
            audio_bits_per_sample: audio.map_or(0, |a| a.bits_per_sample()),
            audio_is_float: audio.is_some_and(|a| a.is_float()),
        };

        let paths = self.storage.generate_paths(writer.container_extension())?;
        writer.initialize(&paths.partial, &paths.final_path, &mux)?;
        tracing::info!(path = %paths.partial.display(), "Writer initialized");
        *self.paths.lock() = Some(paths);

        Ok(encoder.output_fps())
    }

    fn requested_profile(&self, width: u32, height: u32) -> EncoderProfile {
        let overridden = *self.profile_override.lock();
        match overridden {
            Some(mut profile) => {
                if profile.width == 0 || profile.height == 0 {
                    profile.width = width;
                    profile.height = height;
                }
                profile
            }
            None => EncoderProfile {
                fps: self.config.recording.fps,
                bitrate_bps: self.config.recording.bitrate_bps(),
                width,
                height,
                ..EncoderProfile::default()
            },
        }
    }

    /// Launch the encode thread. If the thread cannot be created the partial
    /// output is discarded and the encoder and writer go back to the session.
    fn spawn_consumer(
        &self,
        pacer: FramePacer,
        encoder: Box<dyn VideoEncoder>,
        writer: Box<dyn MediaWriter>,
    ) -> RecorderResult<()> {
        let fatal_session = self.weak_self.clone();
        let encode_loop = EncodeLoop::new(
            Arc::clone(&self.video_queue),
            Arc::clone(&self.audio_queue),
            Arc::clone(&self.telemetry),
            Arc::clone(&self.state),
            Arc::clone(&self.signals),
            pacer,
            encoder,
            writer,
            Box::new(move |error: RecorderError| {
                if let Some(session) = fatal_session.upgrade() {
                    session.report_error(&format!("Recording failed: {error}"));
                    session.stop();
                }
            }),
        );

        let session = self.weak_self.clone();
        let signals = Arc::clone(&self.signals);
        let builder = thread::Builder::new().name("encode-loop".to_string());
        let spawned = spawn_encode_thread(builder, encode_loop, move |outcome| {
            if signals.finalize_on_exit.load(Ordering::Acquire) {
                if let Some(session) = session.upgrade() {
                    session.complete_stop(outcome);
                    return None;
                }
            }
            Some(outcome)
        });

        match spawned {
            Ok(handle) => {
                *self.consumer.lock() = Some(handle);
                Ok(())
            }
            Err((e, encode_loop)) => {
                tracing::error!(error = %e, "Failed to spawn encode thread");
                let (encoder, mut writer) = encode_loop.into_parts();
                if let Err(discard) = writer.discard() {
                    tracing::warn!(error = %discard, "Failed to discard partial output");
                }
                *self.encoder.lock() = Some(encoder);
                *self.writer.lock() = Some(writer);
                Err(e.into())
            }
        }
    }

    fn start_disk_watchdog(&self) {
        if !self.config.disk_watchdog {
            return;
        }
        let weak = self.weak_self.clone();
        let started = self.disk_monitor.start(
            &self.storage,
            self.config.min_free_bytes,
            self.config.disk_poll_interval,
            move |free| {
                if let Some(session) = weak.upgrade() {
                    session.report_error(&format!(
                        "Disk space critically low ({} MiB free), stopping recording",
                        free / MIB
                    ));
                    session.stop();
                }
            },
        );
        if let Err(e) = started {
            tracing::warn!(error = %e, "Disk space watchdog unavailable");
        }
    }

    fn start_producers(&self, producers: &mut Producers) -> RecorderResult<()> {
        if producers.audio_active {
            if let Some(audio) = producers.audio.as_mut() {
                if let Err(e) = audio.start() {
                    if !self.config.recording.audio_optional {
                        return Err(e);
                    }
                    tracing::warn!(error = %e, "Audio capture failed to start, continuing without it");
                    producers.audio_active = false;
                }
            }
        }

        if let Err(e) = producers.video.start() {
            if let Some(audio) = producers.audio.as_mut() {
                audio.stop();
            }
            return Err(e);
        }
        Ok(())
    }

    fn rollback_start(&self, error: &RecorderError) {
        {
            let mut machine = self.machine.lock();
            machine.transition(SessionEvent::Stop);
            machine.transition(SessionEvent::Finalized);
        }
        self.report_error(&format!("Failed to start recording: {error}"));
    }

    /// Return the collaborators, record the summary, and go back to idle.
    fn complete_stop(&self, outcome: LoopOutcome) {
        let drift = outcome.drift();
        if let Some(drift) = drift {
            let drift_ms = drift.drift_ms();
            if drift.exceeds_threshold_ms(DRIFT_WARN_MS) {
                tracing::warn!(drift_ms, "A/V end drift exceeds 100ms");
            } else {
                tracing::info!(drift_ms, "A/V end drift within threshold");
            }
        }

        let LoopOutcome {
            encoder,
            writer,
            finalized,
            pacer_duplicates,
            pacer_drops,
            ..
        } = outcome;
        *self.encoder.lock() = Some(encoder);
        *self.writer.lock() = Some(writer);

        let output = match finalized {
            Ok(true) => self.output_path(),
            Ok(false) => None,
            Err(e) => {
                self.report_error(&format!("Failed to finalize recording: {e}"));
                None
            }
        };

        *self.last_summary.lock() = Some(RecordingSummary {
            output: output.clone(),
            telemetry: self.telemetry_snapshot(),
            pacer_duplicates,
            pacer_drops,
            av_drift_ms: drift.map(|d| d.drift_ms()),
        });

        self.transition(SessionEvent::Finalized);
        match output {
            Some(path) => {
                tracing::info!(path = %path.display(), "Recording saved");
                self.notify_status(&format!("Saved {}", path.display()));
            }
            None if self.signals.abort.load(Ordering::Acquire) => {
                tracing::debug!("Aborted start cleaned up");
            }
            None => self.notify_status("Stopped"),
        }
    }

    fn notify_status(&self, message: &str) {
        let callback = self.on_status.lock().clone();
        if let Some(callback) = callback {
            callback(message);
        }
    }

    fn report_error(&self, message: &str) {
        tracing::error!("{message}");
        let callback = self.on_error.lock().clone();
        if let Some(callback) = callback {
            callback(message);
        }
    }
}

impl fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingSession")
            .field("state", &self.state())
            .field("output_dir", &self.storage.output_dir())
            .finish()
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if self.state() != SessionState::Idle {
            self.stop();
        }
    }
}
