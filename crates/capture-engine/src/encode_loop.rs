//! The consumer side of the pipeline.
//!
//! One dedicated thread pops video frames, paces them, encodes, and hands the
//! output to the writer, then drains whatever audio is waiting. The encoder and
//! writer are moved in for the duration of a session and handed back in the
//! [`LoopOutcome`] when the loop exits.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use steadyrec_common::clock::DriftMeasurement;
use steadyrec_common::error::{RecorderError, RecorderResult};
use steadyrec_timing::{FramePacer, PaceAction};

use crate::machine::{AtomicSessionState, SessionState};
use crate::media::{AudioPacket, EncodedUnit, ImageHandle, VideoFrame};
use crate::pipeline::{AudioQueue, MediaWriter, VideoEncoder, VideoQueue};
use crate::telemetry::TelemetryStore;

/// Sleep when the video queue was empty, to avoid spinning.
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Flags shared between the session and its consumer thread.
#[derive(Debug, Default)]
pub(crate) struct LoopSignals {
    /// Cleared by `stop()`. The loop drains the video queue, then exits.
    pub running: AtomicBool,
    /// Set on resume; the next encoded frame is a keyframe.
    pub keyframe_requested: AtomicBool,
    /// Set on pause and resume; the loop resets its pacer.
    pub pacer_reset: AtomicBool,
    /// Start failed after the loop was launched: discard instead of finalizing.
    pub abort: AtomicBool,
    /// `stop()` ran on the consumer thread and could not join it; the thread
    /// completes the stop sequence itself after the loop returns.
    pub finalize_on_exit: AtomicBool,
}

impl LoopSignals {
    pub fn arm(&self) {
        self.keyframe_requested.store(false, Ordering::Release);
        self.pacer_reset.store(false, Ordering::Release);
        self.abort.store(false, Ordering::Release);
        self.finalize_on_exit.store(false, Ordering::Release);
        self.running.store(true, Ordering::Release);
    }
}

/// Invoked once, from the consumer thread, when encoding or writing fails.
pub(crate) type FatalHandler = Box<dyn Fn(RecorderError) + Send>;

/// What the consumer thread hands back when it exits.
pub(crate) struct LoopOutcome {
    pub encoder: Box<dyn VideoEncoder>,
    pub writer: Box<dyn MediaWriter>,
    /// Writer finalize result. `Ok(false)` when the output was discarded.
    pub finalized: RecorderResult<bool>,
    /// End of the last written video unit (pts + duration).
    pub video_end_pts: Option<i64>,
    /// End of the last written audio packet.
    pub audio_end_pts: Option<i64>,
    pub pacer_duplicates: u32,
    pub pacer_drops: u32,
}

impl LoopOutcome {
    /// Audio end measured against video end, if both streams wrote anything.
    pub fn drift(&self) -> Option<DriftMeasurement> {
        Some(DriftMeasurement {
            reference_hns: self.video_end_pts?,
            measured_hns: self.audio_end_pts?,
        })
    }
}

pub(crate) struct EncodeLoop {
    video: Arc<VideoQueue>,
    audio: Arc<AudioQueue>,
    telemetry: Arc<TelemetryStore>,
    state: Arc<AtomicSessionState>,
    signals: Arc<LoopSignals>,
    pacer: FramePacer,
    encoder: Box<dyn VideoEncoder>,
    writer: Box<dyn MediaWriter>,
    on_fatal: FatalHandler,
    failed: bool,
    last_image: Option<ImageHandle>,
    last_out_pts: Option<i64>,
    video_end_pts: Option<i64>,
    audio_end_pts: Option<i64>,
    last_audio_pts: Option<i64>,
}

impl EncodeLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        video: Arc<VideoQueue>,
        audio: Arc<AudioQueue>,
        telemetry: Arc<TelemetryStore>,
        state: Arc<AtomicSessionState>,
        signals: Arc<LoopSignals>,
        pacer: FramePacer,
        encoder: Box<dyn VideoEncoder>,
        writer: Box<dyn MediaWriter>,
        on_fatal: FatalHandler,
    ) -> Self {
        Self {
            video,
            audio,
            telemetry,
            state,
            signals,
            pacer,
            encoder,
            writer,
            on_fatal,
            failed: false,
            last_image: None,
            last_out_pts: None,
            video_end_pts: None,
            audio_end_pts: None,
            last_audio_pts: None,
        }
    }

    /// Run until `running` is cleared and the video queue is empty.
    pub fn run(mut self) -> LoopOutcome {
        tracing::info!(
            target_interval_hns = self.pacer.target_interval(),
            "Encode loop started"
        );

        while self.signals.running.load(Ordering::Acquire) || !self.video.is_empty() {
            if self.signals.pacer_reset.swap(false, Ordering::AcqRel) {
                self.pacer.reset();
            }

            let popped = self.video.try_pop();
            let had_video = popped.is_some();
            if let Some(frame) = popped {
                self.handle_video(frame);
            }

            self.drain_audio();
            self.telemetry.set_backlog(self.video.size() as u64);

            if !had_video {
                thread::sleep(IDLE_SLEEP);
            }
        }

        self.finish()
    }

    fn discarding(&self) -> bool {
        self.failed || self.state.load() == SessionState::Paused
    }

    fn handle_video(&mut self, frame: VideoFrame) {
        if self.discarding() {
            return;
        }

        let queue_full = self.video.is_full();
        let decision = self.pacer.pace_frame(frame.pts, queue_full);

        match decision.action {
            PaceAction::Drop => {
                self.telemetry.on_frame_dropped();
                return;
            }
            PaceAction::Duplicate => {
                if let (Some(cached), Some(prev)) = (self.last_image.clone(), self.last_out_pts) {
                    let mid = prev + (decision.pts - prev) / 2;
                    if mid > prev {
                        self.encode_and_write(&cached, mid);
                        self.telemetry.on_duplicate_inserted();
                    }
                }
            }
            PaceAction::Accept => {}
        }

        // A pacer reset restarts from the raw PTS, which can trail frames
        // already written if they were stamped while paused.
        let pts = match self.last_out_pts {
            Some(prev) if decision.pts <= prev => prev + 1,
            _ => decision.pts,
        };

        let VideoFrame { image, .. } = frame;
        self.encode_and_write(&image, pts);
        self.last_image = Some(image);
        self.last_out_pts = Some(pts);
    }

    fn encode_and_write(&mut self, image: &ImageHandle, pts: i64) {
        if self.failed {
            return;
        }
        if self.signals.keyframe_requested.swap(false, Ordering::AcqRel) {
            self.encoder.request_keyframe();
        }

        match self.encoder.encode(image, pts) {
            Ok(Some(unit)) => self.write_video(unit),
            Ok(None) => {}
            Err(e) => {
                self.fail(e);
                return;
            }
        }
        self.telemetry.on_frame_encoded();
    }

    fn write_video(&mut self, unit: EncodedUnit) {
        let end = unit.pts + unit.duration;
        match self.writer.write_video(unit) {
            Ok(()) => self.video_end_pts = Some(end),
            Err(e) => self.fail(e),
        }
    }

    /// Bounded by queue capacity so audio cannot starve the video path.
    fn drain_audio(&mut self) {
        for _ in 0..AudioQueue::capacity() {
            let Some(packet) = self.audio.try_pop() else {
                break;
            };
            if self.discarding() {
                continue;
            }
            self.write_audio(packet);
        }
    }

    fn write_audio(&mut self, packet: AudioPacket) {
        // Stamped during a pause but popped after resume.
        if self.last_audio_pts.is_some_and(|last| packet.pts < last) {
            tracing::debug!(pts = packet.pts, "Dropping out-of-order audio packet");
            return;
        }
        self.last_audio_pts = Some(packet.pts);

        let duration = packet.duration();
        let end = packet.pts + duration;
        let unit = EncodedUnit {
            data: packet.data,
            pts: packet.pts,
            duration,
            keyframe: true,
        };
        match self.writer.write_audio(unit) {
            Ok(()) => {
                self.telemetry.on_audio_written();
                self.audio_end_pts = Some(end);
            }
            Err(e) => self.fail(e),
        }
    }

    fn fail(&mut self, error: RecorderError) {
        if self.failed {
            return;
        }
        self.failed = true;
        tracing::error!(error = %error, "Encode loop failed, stopping session");
        self.signals.running.store(false, Ordering::Release);
        (self.on_fatal)(error);
    }

    fn finish(mut self) -> LoopOutcome {
        let aborted = self.signals.abort.load(Ordering::Acquire);
        let finalized = if aborted || self.failed {
            self.writer.discard().map(|()| false)
        } else {
            let pending = self.encoder.flush();
            tracing::debug!(units = pending.len(), "Flushing encoder");
            for unit in pending {
                self.write_video(unit);
            }
            if self.failed {
                self.writer.discard().map(|()| false)
            } else {
                self.writer.finalize()
            }
        };

        tracing::info!(
            encoded = self.telemetry.frames_encoded(),
            dropped = self.telemetry.frames_dropped(),
            audio_packets = self.telemetry.audio_packets(),
            duplicates = self.pacer.duplicates_inserted(),
            "Encode loop finished"
        );

        LoopOutcome {
            encoder: self.encoder,
            writer: self.writer,
            finalized,
            video_end_pts: self.video_end_pts,
            audio_end_pts: self.audio_end_pts,
            pacer_duplicates: self.pacer.duplicates_inserted(),
            pacer_drops: self.pacer.drops(),
        }
    }

    /// Take back the encoder and writer of a loop that never ran.
    pub fn into_parts(self) -> (Box<dyn VideoEncoder>, Box<dyn MediaWriter>) {
        (self.encoder, self.writer)
    }
}

/// Launch `encode_loop` on a thread built by `builder`, then pass the outcome
/// through `on_exit` on that thread.
///
/// The loop moves to the thread only once the thread exists, so a failed
/// spawn returns it unstarted along with the error.
pub(crate) fn spawn_encode_thread<T, F>(
    builder: thread::Builder,
    encode_loop: EncodeLoop,
    on_exit: F,
) -> Result<JoinHandle<Option<T>>, (io::Error, EncodeLoop)>
where
    T: Send + 'static,
    F: FnOnce(LoopOutcome) -> Option<T> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel::<EncodeLoop>(1);
    let spawned = builder.spawn(move || {
        let encode_loop = rx.recv().ok()?;
        on_exit(encode_loop.run())
    });
    match spawned {
        Ok(handle) => match tx.send(encode_loop) {
            Ok(()) => Ok(handle),
            Err(mpsc::SendError(encode_loop)) => Err((
                io::Error::other("encode thread exited before receiving its loop"),
                encode_loop,
            )),
        },
        Err(e) => Err((e, encode_loop)),
    }
}
