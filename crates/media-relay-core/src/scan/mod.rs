//! Scan pipeline
//!
//! A run walks the catalog, resolves every item chat, locates its menu and
//! drives one delivery session per season/quality option. All stages run
//! sequentially on the orchestrator task.

mod bot_session;
mod collector;
mod context;
mod orchestrator;
mod runner;
mod state;

pub use bot_session::{BotInteractionSession, SessionPhase};
pub use collector::{CollectEnd, CollectOutcome, FileCollector};
pub use context::ScanContext;
pub use orchestrator::{RunReport, ScanOrchestrator};
pub use runner::ScanRunner;
pub use state::{ScanState, ScanStatus};

use crate::dedup::LedgerError;
use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors that end a stage of a scan
#[derive(Debug, Error)]
pub enum ScanError {
    /// A rate limit above the threshold; the run restarts on the next credential
    #[error("rate limit of {wait_secs}s requires a session switch")]
    Failover {
        /// Wait the service asked for
        wait_secs: u64,
    },
    /// The run was cancelled
    #[error("scan cancelled")]
    Cancelled,
    /// A transport call failed
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A ledger could not be written
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// The run cannot continue
    #[error("{0}")]
    Fatal(String),
}

impl ScanError {
    /// Whether the error must unwind the whole run instead of skipping one item
    #[must_use]
    pub const fn is_abort(&self) -> bool {
        !matches!(self, Self::Transport(_))
    }
}

/// Stop and cancel signals of one run
///
/// A stop is cooperative: stages look at it on item, sub-item and tick
/// boundaries. A cancel interrupts every pending sleep at once.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    stop: CancellationToken,
    cancel: CancellationToken,
}

impl RunControl {
    /// Fresh, unsignalled control
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to finish at the next boundary
    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    /// Abort the run at the next suspension point
    pub fn cancel(&self) {
        self.stop.cancel();
        self.cancel.cancel();
    }

    /// Whether a stop or cancel was requested
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Whether the run was cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail with [`ScanError::Cancelled`] once cancelled
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Cancelled`] if the run was cancelled.
    pub fn check_cancelled(&self) -> Result<(), ScanError> {
        if self.is_cancelled() {
            Err(ScanError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`; returns early on stop
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Cancelled`] if the run is cancelled while sleeping.
    pub async fn sleep(&self, duration: Duration) -> Result<(), ScanError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ScanError::Cancelled),
            () = self.stop.cancelled() => Ok(()),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// Degrade a non-aborting error to `None`, logging it
pub(crate) fn skip_on_error<T>(
    result: Result<T, ScanError>,
    what: &str,
) -> Result<Option<T>, ScanError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_abort() => Err(e),
        Err(e) => {
            tracing::warn!(error = %e, "{what} failed, skipping");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn stop_ends_sleep_without_error() {
        let control = RunControl::new();
        let stopper = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            stopper.request_stop();
        });

        let started = tokio::time::Instant::now();
        let result = control.sleep(Duration::from_secs(60)).await;
        assert!(result.is_ok());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(control.stop_requested());
        assert!(!control.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_implies_stop() {
        let control = RunControl::new();
        control.cancel();
        assert!(control.stop_requested());
        assert!(matches!(
            control.sleep(Duration::from_secs(5)).await,
            Err(ScanError::Cancelled)
        ));
        assert!(matches!(control.check_cancelled(), Err(ScanError::Cancelled)));
    }

    #[test]
    fn only_transport_errors_are_skippable() {
        assert!(!ScanError::Transport(TransportError::NotModified).is_abort());
        assert!(ScanError::Failover { wait_secs: 1 }.is_abort());
        assert!(ScanError::Cancelled.is_abort());
        assert!(ScanError::Fatal("x".to_string()).is_abort());
    }
}
