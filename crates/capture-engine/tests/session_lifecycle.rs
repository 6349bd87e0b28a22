//! End-to-end recording sessions against synthetic collaborators.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use steadyrec_capture_engine::backend::{
    synthetic_collaborators, FileWriter, PassthroughEncoder, SrawStream, SyntheticAudioConfig,
    SyntheticOptions, SyntheticVideoConfig, SyntheticVideoSource,
};
use steadyrec_capture_engine::pipeline::DeviceLostCallback;
use steadyrec_capture_engine::{
    AudioSink, AudioSource, Collaborators, EncodedUnit, EncoderMode, EncoderProfile, ImageHandle,
    PowerState, RecordingSession, SessionConfig, SessionState, StorageManager, VideoEncoder,
    VideoSink, VideoSource,
};
use steadyrec_common::clock::SystemClock;
use steadyrec_common::error::{RecorderError, RecorderResult};

const WAIT: Duration = Duration::from_secs(5);

fn config() -> SessionConfig {
    let mut config = SessionConfig::default();
    config.disk_watchdog = false;
    config
}

fn video(fps: u32) -> SyntheticVideoConfig {
    SyntheticVideoConfig {
        width: 64,
        height: 36,
        fps,
        ..SyntheticVideoConfig::default()
    }
}

fn session_in(
    dir: &Path,
    config: SessionConfig,
    collaborators: Collaborators,
) -> Arc<RecordingSession> {
    let session = RecordingSession::new(
        config,
        collaborators,
        Arc::new(SystemClock::new()),
        StorageManager::new(dir),
    );
    session.set_power_probe(|| PowerState::Ac);
    session
}

fn synthetic_session(dir: &Path) -> Arc<RecordingSession> {
    session_in(
        dir,
        config(),
        synthetic_collaborators(SyntheticOptions {
            video: video(60),
            audio: Some(SyntheticAudioConfig::default()),
        }),
    )
}

type Messages = Arc<Mutex<Vec<String>>>;

fn collect_messages(session: &RecordingSession) -> (Messages, Messages) {
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(Mutex::new(Vec::new()));
    {
        let statuses = Arc::clone(&statuses);
        session.on_status(move |msg| statuses.lock().push(msg.to_string()));
    }
    {
        let errors = Arc::clone(&errors);
        session.on_error(move |msg| errors.lock().push(msg.to_string()));
    }
    (statuses, errors)
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_record_pause_resume_stop_produces_final_file() {
    let dir = tempfile::tempdir().unwrap();
    let session = synthetic_session(dir.path());
    let (statuses, errors) = collect_messages(&session);

    session.start().unwrap();
    assert_eq!(session.state(), SessionState::Recording);
    assert!(wait_until(|| session.frames_encoded() >= 5));

    assert!(session.pause());
    assert_eq!(session.state(), SessionState::Paused);
    thread::sleep(Duration::from_millis(150));
    assert!(session.resume());
    let encoded_at_resume = session.frames_encoded();
    assert!(wait_until(|| session.frames_encoded() >= encoded_at_resume + 5));

    assert!(session.stop());
    assert_eq!(session.state(), SessionState::Idle);
    assert!(errors.lock().is_empty(), "errors: {:?}", errors.lock());

    let summary = session.last_summary().unwrap();
    let output = summary.output.clone().unwrap();
    assert_eq!(Some(output.clone()), session.output_path());
    assert!(output.exists());
    assert!(session.storage().find_orphans().unwrap().is_empty());

    let stream = SrawStream::read(&output).unwrap();
    assert_eq!(stream.config.video_width, 64);
    assert_eq!(stream.config.video_fps, 30);
    assert_eq!(stream.config.audio_sample_rate, 48000);

    let video_pts: Vec<i64> = stream.video().map(|r| r.pts).collect();
    assert!(video_pts.len() >= 10);
    assert!(video_pts.windows(2).all(|w| w[1] > w[0]));
    assert!(stream.video().next().unwrap().keyframe);
    assert!(stream.video().skip(1).any(|r| r.keyframe));

    let audio_pts: Vec<i64> = stream.audio().map(|r| r.pts).collect();
    assert!(!audio_pts.is_empty());
    assert!(audio_pts.windows(2).all(|w| w[1] >= w[0]));

    assert!(summary.telemetry.frames_captured >= summary.telemetry.frames_encoded);

    let statuses = statuses.lock();
    assert_eq!(statuses.first().map(String::as_str), Some("Recording"));
    assert!(statuses.iter().any(|s| s == "Paused"));
    assert!(statuses.iter().any(|s| s == "Stopping"));
    assert!(statuses.last().unwrap().starts_with("Saved"));
}

#[test]
fn test_illegal_lifecycle_calls_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let session = synthetic_session(dir.path());

    assert!(!session.pause());
    assert!(!session.resume());
    assert!(!session.stop());

    session.start().unwrap();
    assert!(matches!(
        session.start(),
        Err(RecorderError::Session { .. })
    ));
    assert!(!session.resume());
    assert!(session.pause());
    assert!(!session.pause());
    assert!(session.start().is_err());
    assert_eq!(session.state(), SessionState::Paused);

    assert!(session.stop());
    assert!(!session.stop());
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn test_stop_while_paused_finalizes() {
    let dir = tempfile::tempdir().unwrap();
    let session = synthetic_session(dir.path());
    session.start().unwrap();
    assert!(wait_until(|| session.frames_encoded() >= 2));
    assert!(session.pause());
    assert!(session.stop());
    assert!(session.last_summary().unwrap().output.unwrap().exists());
}

#[test]
fn test_encoder_setup_failure_rolls_back_to_idle() {
    let dir = tempfile::tempdir().unwrap();
    let session = synthetic_session(dir.path());
    let (_statuses, errors) = collect_messages(&session);

    session
        .set_encoder_profile(EncoderProfile {
            fps: 0,
            ..EncoderProfile::default()
        })
        .unwrap();
    let err = session.start().unwrap_err();
    assert!(matches!(err, RecorderError::Encoder { .. }));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(errors.lock().len(), 1);
    assert!(errors.lock()[0].contains("Failed to start recording"));
    assert!(files_in(dir.path()).is_empty());

    // Collaborators survive the failed attempt.
    session
        .set_encoder_profile(EncoderProfile {
            width: 0,
            height: 0,
            ..EncoderProfile::default()
        })
        .unwrap();
    session.start().unwrap();
    assert!(wait_until(|| session.frames_encoded() >= 2));
    assert!(session.stop());
    assert!(session.last_summary().unwrap().output.is_some());
}

#[test]
fn test_profile_cannot_change_while_recording() {
    let dir = tempfile::tempdir().unwrap();
    let session = synthetic_session(dir.path());
    session.start().unwrap();
    assert!(session.set_encoder_profile(EncoderProfile::default()).is_err());
    session.stop();
}

#[test]
fn test_device_loss_stops_session_from_capture_thread() {
    let dir = tempfile::tempdir().unwrap();
    let session = session_in(
        dir.path(),
        config(),
        synthetic_collaborators(SyntheticOptions {
            video: SyntheticVideoConfig {
                lose_device_after: Some(10),
                ..video(120)
            },
            audio: None,
        }),
    );
    let (_statuses, errors) = collect_messages(&session);

    session.start().unwrap();
    assert!(wait_until(|| session.state() == SessionState::Idle));
    assert_eq!(errors.lock().len(), 1);
    assert_eq!(errors.lock()[0], "Capture device lost");

    let output = session.last_summary().unwrap().output.unwrap();
    let stream = SrawStream::read(&output).unwrap();
    assert!(stream.video().count() > 0);
    assert_eq!(stream.audio().count(), 0);

    // A stop after the fact is a no-op.
    assert!(!session.stop());
}

#[test]
fn test_low_disk_watchdog_stops_recording() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.disk_watchdog = true;
    config.min_free_bytes = u64::MAX;
    config.disk_poll_interval = Duration::from_millis(10);

    let session = session_in(
        dir.path(),
        config,
        synthetic_collaborators(SyntheticOptions {
            video: video(30),
            audio: Some(SyntheticAudioConfig::default()),
        }),
    );
    let (_statuses, errors) = collect_messages(&session);

    session.start().unwrap();
    assert!(wait_until(|| session.state() == SessionState::Idle));
    let errors = errors.lock();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Disk space critically low"));
}

/// Encodes a few frames, then fails every call.
struct FlakyEncoder {
    inner: PassthroughEncoder,
    remaining: u32,
}

impl VideoEncoder for FlakyEncoder {
    fn initialize(&mut self, profile: &EncoderProfile) -> RecorderResult<()> {
        self.inner.initialize(profile)
    }

    fn encode(&mut self, image: &ImageHandle, pts: i64) -> RecorderResult<Option<EncodedUnit>> {
        if self.remaining == 0 {
            return Err(RecorderError::encoder("device removed"));
        }
        self.remaining -= 1;
        self.inner.encode(image, pts)
    }

    fn flush(&mut self) -> Vec<EncodedUnit> {
        self.inner.flush()
    }

    fn request_keyframe(&mut self) {
        self.inner.request_keyframe();
    }

    fn mode(&self) -> EncoderMode {
        EncoderMode::Hardware
    }

    fn output_width(&self) -> u32 {
        self.inner.output_width()
    }

    fn output_height(&self) -> u32 {
        self.inner.output_height()
    }

    fn output_fps(&self) -> u32 {
        self.inner.output_fps()
    }
}

#[test]
fn test_encoder_failure_stops_from_encode_thread_and_discards() {
    let dir = tempfile::tempdir().unwrap();
    let collaborators = Collaborators {
        video: Box::new(SyntheticVideoSource::new(video(120))),
        audio: None,
        encoder: Box::new(FlakyEncoder {
            inner: PassthroughEncoder::new(),
            remaining: 5,
        }),
        writer: Box::new(FileWriter::new()),
    };
    let session = session_in(dir.path(), config(), collaborators);
    let (_statuses, errors) = collect_messages(&session);

    session.start().unwrap();
    assert_eq!(session.telemetry_snapshot().encoder_mode, EncoderMode::Hardware);
    assert!(wait_until(|| session.state() == SessionState::Idle));

    let errors = errors.lock();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("device removed"));
    assert!(session.last_summary().unwrap().output.is_none());
    assert!(files_in(dir.path()).is_empty());
}

#[test]
fn test_battery_clamps_profile() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.recording.fps = 60;
    let session = session_in(
        dir.path(),
        config,
        synthetic_collaborators(SyntheticOptions {
            video: video(60),
            audio: None,
        }),
    );
    session.set_power_probe(|| PowerState::Battery);

    session.start().unwrap();
    assert_eq!(session.telemetry_snapshot().power_state, PowerState::Battery);
    assert!(wait_until(|| session.frames_encoded() >= 2));
    session.stop();

    let output = session.last_summary().unwrap().output.unwrap();
    let stream = SrawStream::read(&output).unwrap();
    assert_eq!(stream.config.video_fps, 30);
    assert_eq!(stream.config.video_bitrate, 8_000_000);
}

#[test]
fn test_muted_session_records_silence() {
    let dir = tempfile::tempdir().unwrap();
    let session = synthetic_session(dir.path());
    assert!(!session.is_muted());
    session.set_muted(true);
    assert!(session.is_muted());

    session.start().unwrap();
    assert!(wait_until(|| session.telemetry_snapshot().audio_packets >= 5));
    session.stop();

    let stream = SrawStream::read(&session.last_summary().unwrap().output.unwrap()).unwrap();
    assert!(stream.audio().count() >= 5);
    assert!(stream.audio().all(|r| r.data.iter().all(|b| *b == 0)));
}

/// Audio source that cannot be opened.
struct MissingMicrophone;

impl AudioSource for MissingMicrophone {
    fn initialize(&mut self, _sink: AudioSink) -> RecorderResult<()> {
        Err(RecorderError::audio("no input device"))
    }
    fn start(&mut self) -> RecorderResult<()> {
        Ok(())
    }
    fn stop(&mut self) {}
    fn set_muted(&self, _muted: bool) {}
    fn is_muted(&self) -> bool {
        false
    }
    fn sample_rate(&self) -> u32 {
        48000
    }
    fn channels(&self) -> u16 {
        2
    }
    fn bits_per_sample(&self) -> u16 {
        16
    }
}

fn missing_mic_collaborators() -> Collaborators {
    Collaborators {
        video: Box::new(SyntheticVideoSource::new(video(60))),
        audio: Some(Box::new(MissingMicrophone)),
        encoder: Box::new(PassthroughEncoder::new()),
        writer: Box::new(FileWriter::new()),
    }
}

#[test]
fn test_missing_audio_fails_start_unless_optional() {
    let dir = tempfile::tempdir().unwrap();
    let session = session_in(dir.path(), config(), missing_mic_collaborators());
    let err = session.start().unwrap_err();
    assert!(matches!(err, RecorderError::Audio { .. }));
    assert_eq!(session.state(), SessionState::Idle);

    let mut optional = config();
    optional.recording.audio_optional = true;
    let session = session_in(dir.path(), optional, missing_mic_collaborators());
    session.start().unwrap();
    assert!(wait_until(|| session.frames_encoded() >= 2));
    session.stop();

    let stream = SrawStream::read(&session.last_summary().unwrap().output.unwrap()).unwrap();
    assert_eq!(stream.config.audio_channels, 0);
    assert_eq!(stream.audio().count(), 0);
}

struct BlockedDisplay;

impl VideoSource for BlockedDisplay {
    fn initialize(&mut self, _sink: VideoSink) -> RecorderResult<(u32, u32)> {
        Ok((64, 36))
    }
    fn start(&mut self) -> RecorderResult<()> {
        Err(RecorderError::capture("display capture blocked"))
    }
    fn stop(&mut self) {}
    fn set_device_lost_callback(&mut self, _callback: DeviceLostCallback) {}
}

#[test]
fn test_capture_start_failure_is_reported_once() {
    let dir = tempfile::tempdir().unwrap();
    let session = session_in(
        dir.path(),
        config(),
        Collaborators {
            video: Box::new(BlockedDisplay),
            audio: None,
            encoder: Box::new(PassthroughEncoder::new()),
            writer: Box::new(FileWriter::new()),
        },
    );
    let (statuses, errors) = collect_messages(&session);

    let err = session.start().unwrap_err();
    assert!(matches!(err, RecorderError::Capture { .. }));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(errors.lock().len(), 1, "errors: {:?}", errors.lock());
    assert!(errors.lock()[0].contains("display capture blocked"));
    assert!(statuses.lock().is_empty(), "statuses: {:?}", statuses.lock());
    assert!(files_in(dir.path()).is_empty());

    // The encoder and writer came back, so a retry fails the same way.
    let err = session.start().unwrap_err();
    assert!(matches!(err, RecorderError::Capture { .. }));
    assert_eq!(errors.lock().len(), 2);
    assert!(statuses.lock().is_empty());
}

#[test]
fn test_dropping_a_live_session_finalizes() {
    let dir = tempfile::tempdir().unwrap();
    let final_path = {
        let session = synthetic_session(dir.path());
        session.start().unwrap();
        assert!(wait_until(|| session.frames_encoded() >= 2));
        session.output_path().unwrap()
    };
    assert!(final_path.exists());
    assert!(StorageManager::new(dir.path()).find_orphans().unwrap().is_empty());
}

#[test]
fn test_concurrent_stop_calls_finalize_once() {
    let dir = tempfile::tempdir().unwrap();
    let session = synthetic_session(dir.path());
    let saved = Arc::new(AtomicU32::new(0));
    {
        let saved = Arc::clone(&saved);
        session.on_status(move |msg| {
            if msg.starts_with("Saved") {
                saved.fetch_add(1, Ordering::SeqCst);
            }
        });
    }

    session.start().unwrap();
    assert!(wait_until(|| session.frames_encoded() >= 2));

    let accepted: u32 = (0..4)
        .map(|_| {
            let session = Arc::clone(&session);
            thread::spawn(move || u32::from(session.stop()))
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap())
        .sum();

    assert_eq!(accepted, 1);
    assert!(wait_until(|| session.state() == SessionState::Idle));
    assert_eq!(saved.load(Ordering::SeqCst), 1);
}
