//! Concrete collaborator implementations.
//!
//! Platform capture and hardware encoders plug in through the traits in
//! [`crate::pipeline`]. This module ships the portable set: synthetic sources,
//! a passthrough encoder, and a raw file writer.

pub mod file;
pub mod synthetic;

pub use file::{FileWriter, SrawRecord, SrawStream, StreamKind};
pub use synthetic::{
    PassthroughEncoder, SyntheticAudioConfig, SyntheticAudioSource, SyntheticVideoConfig,
    SyntheticVideoSource,
};

use crate::pipeline::{AudioSource, Collaborators};

/// Options for [`synthetic_collaborators`].
#[derive(Debug, Clone, Default)]
pub struct SyntheticOptions {
    pub video: SyntheticVideoConfig,
    pub audio: Option<SyntheticAudioConfig>,
}

/// Synthetic sources, passthrough encoder, and `.sraw` writer, ready to hand
/// to a session.
pub fn synthetic_collaborators(options: SyntheticOptions) -> Collaborators {
    Collaborators {
        video: Box::new(SyntheticVideoSource::new(options.video)),
        audio: options
            .audio
            .map(|config| Box::new(SyntheticAudioSource::new(config)) as Box<dyn AudioSource>),
        encoder: Box::new(PassthroughEncoder::new()),
        writer: Box::new(FileWriter::new()),
    }
}
