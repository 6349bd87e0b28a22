//! SteadyRec Capture Engine
//!
//! Coordinates a real-time recording: producers push frames and audio into
//! bounded queues, one encode thread paces and encodes them, and a writer
//! muxes the result into a file that only appears under its final name once
//! finalized.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    RecordingSession                      │
//! │                                                          │
//! │  ┌─────────────┐  VideoSink  ┌──────────────┐            │
//! │  │ VideoSource ├────────────►│ VideoQueue(5)├──┐         │
//! │  └─────────────┘             └──────────────┘  │         │
//! │  ┌─────────────┐  AudioSink  ┌──────────────┐  │         │
//! │  │ AudioSource ├────────────►│AudioQueue(16)├──┤         │
//! │  └─────────────┘             └──────────────┘  ▼         │
//! │                          ┌──────────────────────────┐    │
//! │  SyncManager (PTS)       │ EncodeLoop (own thread)  │    │
//! │  SessionMachine (FSM)    │ FramePacer → VideoEncoder│    │
//! │  DiskSpaceMonitor        │            → MediaWriter │    │
//! │                          └──────────────────────────┘    │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod backend;
mod encode_loop;
pub mod machine;
pub mod media;
pub mod pipeline;
pub mod power;
pub mod session;
pub mod storage;
pub mod telemetry;

pub use machine::{SessionEvent, SessionMachine, SessionState};
pub use media::{AudioPacket, CpuSurface, EncodedUnit, EncoderProfile, ImageHandle, MuxConfig, VideoFrame};
pub use pipeline::{
    AudioSink, AudioSource, Collaborators, EncoderMode, MediaWriter, VideoEncoder, VideoSink,
    VideoSource,
};
pub use power::PowerState;
pub use session::{RecordingSession, RecordingSummary, SessionConfig};
pub use storage::{DiskSpaceMonitor, OutputPaths, StorageManager};
pub use telemetry::TelemetrySnapshot;
