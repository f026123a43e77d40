use anyhow::Result;
use async_trait::async_trait;
use media_relay_core::{ProgressEvent, ProgressState};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;
use tracing::warn;

/// Operator-facing adapter used by the progress runtime loop.
#[async_trait]
pub trait ProgressSink: Send + Sync + 'static {
    /// Render the current state.
    async fn update_progress(&self, state: &ProgressState) -> Result<()>;
}

/// Runtime configuration for progress updates.
#[derive(Debug, Clone, Copy)]
pub struct ProgressRuntimeConfig {
    /// Minimum duration between progress updates.
    pub throttle: Duration,
}

impl Default for ProgressRuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressRuntimeConfig {
    /// Create a new config with the default throttle.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            throttle: Duration::from_millis(1500),
        }
    }

    /// Override the throttle interval.
    #[must_use]
    pub const fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }
}

/// Spawn the progress runtime loop on the Tokio runtime.
pub fn spawn_progress_runtime<S: ProgressSink>(
    sink: S,
    rx: Receiver<ProgressEvent>,
    config: ProgressRuntimeConfig,
) -> JoinHandle<ProgressState> {
    tokio::spawn(run_progress_loop(sink, rx, config))
}

/// Run the progress update loop until the channel is closed.
///
/// Terminal events are pushed immediately; everything else is throttled.
/// A state equal to the last delivered one is never sent again.
pub async fn run_progress_loop<S: ProgressSink>(
    sink: S,
    mut rx: Receiver<ProgressEvent>,
    config: ProgressRuntimeConfig,
) -> ProgressState {
    let mut state = ProgressState::new();
    let mut delivered: Option<ProgressState> = None;
    let mut last_update: Option<Instant> = None;

    while let Some(event) = rx.recv().await {
        state.update(event);

        let due = state.is_finished()
            || last_update.map_or(true, |at| at.elapsed() >= config.throttle);
        if due && delivered.as_ref() != Some(&state) {
            if let Err(e) = sink.update_progress(&state).await {
                warn!(error = %e, "Progress update failed");
            }
            delivered = Some(state.clone());
            last_update = Some(Instant::now());
        }
    }

    if delivered.as_ref() != Some(&state) {
        if let Err(e) = sink.update_progress(&state).await {
            warn!(error = %e, "Final progress update failed");
        }
    }

    state
}
