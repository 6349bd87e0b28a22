//! SteadyRec Common Utilities
//!
//! Shared infrastructure for all SteadyRec crates:
//! - Error types and result aliases
//! - Monotonic clock abstraction and 100ns unit helpers
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
