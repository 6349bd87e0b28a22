//! SteadyRec timing primitives
//!
//! The leaf components of the recording pipeline:
//!
//! - [`queue::BoundedQueue`]: fixed-capacity ring buffer, many producers, one consumer
//! - [`sync::SyncManager`]: raw clock ticks to a pause-aware PTS timeline
//! - [`pacer::FramePacer`]: jittery capture PTS to a steady encoder cadence
//!
//! All timestamps are 100ns units relative to session start.

pub mod pacer;
pub mod queue;
pub mod sync;

pub use pacer::{FramePacer, PaceAction, PaceDecision};
pub use queue::BoundedQueue;
pub use sync::SyncManager;
