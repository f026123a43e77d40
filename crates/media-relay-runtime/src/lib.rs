#![deny(missing_docs)]
//! Media relay runtime helpers.
//!
//! Transport-agnostic control of scan runs: the single-run gate, stop
//! escalation and the progress update loop.

/// Run lifecycle control.
pub mod controller;
/// Progress update loop.
pub mod progress;

pub use controller::{ControlError, JoinError, ScanController};
pub use progress::{spawn_progress_runtime, ProgressRuntimeConfig, ProgressSink};
