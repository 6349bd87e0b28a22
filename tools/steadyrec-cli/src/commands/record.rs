//! Run a recording session on the synthetic pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use steadyrec_capture_engine::backend::{
    synthetic_collaborators, SyntheticAudioConfig, SyntheticOptions, SyntheticVideoConfig,
};
use steadyrec_capture_engine::{
    RecordingSession, SessionConfig, SessionState, StorageManager, TelemetrySnapshot,
};
use steadyrec_common::clock::SystemClock;
use steadyrec_common::config::AppConfig;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};

pub struct RecordOptions {
    pub fps: Option<u32>,
    pub output: Option<PathBuf>,
    pub duration: Option<f64>,
    /// Seconds into the recording to pause, and how long to stay paused.
    pub pause: Option<(f64, f64)>,
    pub mute: bool,
    pub jitter_ms: u64,
    pub json: bool,
}

pub async fn run(mut config: AppConfig, options: RecordOptions) -> anyhow::Result<()> {
    if let Some(fps) = options.fps {
        config.recording.fps = fps;
    }
    if let Some(output) = options.output.clone() {
        config.output_dir = Some(output);
    }
    let session_config = SessionConfig::from_app(&config);
    let storage = StorageManager::from_config(&config);
    storage.ensure_output_dir()?;

    let collaborators = synthetic_collaborators(SyntheticOptions {
        video: SyntheticVideoConfig {
            width: 1280,
            height: 720,
            fps: session_config.recording.fps,
            jitter: Duration::from_millis(options.jitter_ms),
            ..SyntheticVideoConfig::default()
        },
        audio: Some(SyntheticAudioConfig {
            sample_rate: session_config.recording.audio_sample_rate,
            channels: session_config.recording.audio_channels,
        }),
    });

    let session = RecordingSession::new(
        session_config,
        collaborators,
        Arc::new(SystemClock::new()),
        storage,
    );
    session.on_status(|msg| eprintln!("[status] {msg}"));
    session.on_error(|msg| eprintln!("[error] {msg}"));
    session.set_muted(options.mute);

    println!("Recording to {}", session.storage().output_dir().display());
    if let Some(secs) = options.duration {
        println!("Stopping after {secs:.1}s (Ctrl+C to stop early)");
    } else {
        println!("Press Ctrl+C to stop recording...");
    }
    println!();

    {
        let session = Arc::clone(&session);
        tokio::task::spawn_blocking(move || session.start()).await??;
    }

    let started = Instant::now();
    let deadline = options
        .duration
        .map(|secs| started + Duration::from_secs_f64(secs.max(0.0)));
    let mut pause_at = options
        .pause
        .map(|(after, _)| started + Duration::from_secs_f64(after.max(0.0)));
    let mut resume_at: Option<Instant> = None;

    let mut ticker = interval_at(started + Duration::from_secs(1), Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result?;
                println!();
                break;
            }
            _ = sleep_until(deadline.unwrap_or_else(far_future)), if deadline.is_some() => break,
            _ = sleep_until(pause_at.unwrap_or_else(far_future)), if pause_at.is_some() => {
                pause_at = None;
                if session.pause() {
                    let pause_for = options.pause.map_or(0.0, |(_, secs)| secs.max(0.0));
                    resume_at = Some(Instant::now() + Duration::from_secs_f64(pause_for));
                }
            }
            _ = sleep_until(resume_at.unwrap_or_else(far_future)), if resume_at.is_some() => {
                resume_at = None;
                session.resume();
            }
            _ = ticker.tick() => {
                if session.state() == SessionState::Idle {
                    break;
                }
                print_telemetry(&session.telemetry_snapshot(), started.elapsed(), options.json)?;
            }
        }
    }

    {
        let session = Arc::clone(&session);
        tokio::task::spawn_blocking(move || session.stop()).await?;
    }

    match session.last_summary() {
        Some(summary) if options.json => println!("{}", serde_json::to_string(&summary)?),
        Some(summary) => {
            let t = &summary.telemetry;
            println!();
            println!(
                "Frames: {} captured, {} encoded, {} dropped ({:.1}%), {} duplicated",
                t.frames_captured,
                t.frames_encoded,
                t.frames_dropped,
                t.drop_rate(),
                t.duplicate_frames
            );
            if let Some(drift) = summary.av_drift_ms {
                println!("A/V end drift: {drift:.1} ms");
            }
            match summary.output {
                Some(path) => println!("Recording saved to: {}", path.display()),
                None => anyhow::bail!("recording was not saved"),
            }
        }
        None => anyhow::bail!("recording did not complete"),
    }

    Ok(())
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365)
}

fn print_telemetry(
    snapshot: &TelemetrySnapshot,
    elapsed: Duration,
    json: bool,
) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(snapshot)?);
        return Ok(());
    }
    println!(
        "{:>6.1}s  {}  captured {:>6}  encoded {:>6}  dropped {:>4}  backlog {:>2}  audio {:>6}",
        elapsed.as_secs_f64(),
        snapshot.encoder_mode_label(),
        snapshot.frames_captured,
        snapshot.frames_encoded,
        snapshot.frames_dropped,
        snapshot.frames_backlogged,
        snapshot.audio_packets,
    );
    Ok(())
}
