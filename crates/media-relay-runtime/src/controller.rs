//! Single-run gate with soft stop and hard cancellation
//!
//! At most one scan runs per process. A stop request first lowers the run's
//! stop flag; if the run is still active after the grace period it is
//! cancelled, and if it still has not unwound it is aborted and every piece
//! of run state is forced back to idle. Operator joins share the same gate.

use media_relay_core::config::STOP_GRACE_SECS;
use media_relay_core::resolver::ResolvedChat;
use media_relay_core::scan::RunReport;
use media_relay_core::{ProgressEvent, RunControl, ScanError, ScanRunner, ScanStatus};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{info, warn};

/// Time a cancelled run gets to unwind before it is aborted
const CANCEL_UNWIND: Duration = Duration::from_secs(2);

/// Rejected control requests
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ControlError {
    /// A run is already in progress
    #[error("a scan is already running")]
    AlreadyRunning,
    /// Nothing to stop
    #[error("no scan is running")]
    NotRunning,
}

/// Failures of an operator join
#[derive(Debug, Error)]
pub enum JoinError {
    /// The session is busy with a scan
    #[error(transparent)]
    Control(#[from] ControlError),
    /// The chat could not be accessed or joined
    #[error("could not access {0}")]
    Unreachable(String),
    /// The join itself failed
    #[error(transparent)]
    Scan(#[from] ScanError),
}

/// Releases the run gate when dropped
struct GateRelease<'a>(&'a AtomicBool);

impl Drop for GateRelease<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct ActiveRun {
    generation: u64,
    control: RunControl,
    abort: AbortHandle,
    progress: Option<mpsc::Sender<ProgressEvent>>,
}

struct Inner {
    runner: Arc<ScanRunner>,
    running: AtomicBool,
    generation: AtomicU64,
    active: Mutex<Option<ActiveRun>>,
    stop_grace: Duration,
}

impl Inner {
    fn active(&self) -> MutexGuard<'_, Option<ActiveRun>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Release the gate if `generation` is still the active run
    fn finish(&self, generation: u64) {
        let mut active = self.active();
        if active.as_ref().is_some_and(|run| run.generation == generation) {
            *active = None;
            self.running.store(false, Ordering::Release);
        }
    }

    fn acquire(&self) -> Result<(), ControlError> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| ControlError::AlreadyRunning)
    }

    fn is_active(&self, generation: u64) -> bool {
        self.active()
            .as_ref()
            .is_some_and(|run| run.generation == generation)
    }

    async fn escalate(&self, generation: u64, control: RunControl) {
        tokio::time::sleep(self.stop_grace).await;
        if !self.is_active(generation) {
            return;
        }
        warn!(generation, grace_secs = self.stop_grace.as_secs(), "Run ignored stop, cancelling");
        control.cancel();

        tokio::time::sleep(CANCEL_UNWIND).await;
        let Some(run) = self.active().take_if(|run| run.generation == generation) else {
            return;
        };
        warn!(generation, "Run did not unwind, aborting");
        run.abort.abort();
        self.runner.reset_status();
        if let Some(progress) = &run.progress {
            let _ = progress.try_send(ProgressEvent::RunCancelled);
        }
        self.running.store(false, Ordering::Release);
    }
}

/// Operator-facing control of scan runs
///
/// Cheap to clone; clones share the same gate.
#[derive(Clone)]
pub struct ScanController {
    inner: Arc<Inner>,
}

impl ScanController {
    /// Controller over `runner` with the default stop grace period
    #[must_use]
    pub fn new(runner: Arc<ScanRunner>) -> Self {
        Self::with_stop_grace(runner, Duration::from_secs(STOP_GRACE_SECS))
    }

    /// Controller with a custom stop grace period
    #[must_use]
    pub fn with_stop_grace(runner: Arc<ScanRunner>, stop_grace: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                runner,
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                active: Mutex::new(None),
                stop_grace,
            }),
        }
    }

    /// Start a run over the catalog, or over `target` and its successors
    ///
    /// Events are sent to `progress` when given. The returned handle yields
    /// the run result, or a cancelled join error if the run had to be
    /// aborted.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::AlreadyRunning`] while another run holds the
    /// gate.
    pub fn start_run(
        &self,
        target: Option<String>,
        progress: Option<mpsc::Sender<ProgressEvent>>,
    ) -> Result<JoinHandle<Result<RunReport, ScanError>>, ControlError> {
        self.inner.acquire()?;

        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let control = RunControl::new();
        info!(generation, target = ?target, "Scan starting");

        // Held until the run is registered so `finish` cannot run first
        let mut active = self.inner.active();
        let inner = Arc::clone(&self.inner);
        let run_control = control.clone();
        let run_progress = progress.clone();
        let handle = tokio::spawn(async move {
            let result = inner.runner.run(target, run_control, run_progress).await;
            inner.finish(generation);
            result
        });
        *active = Some(ActiveRun {
            generation,
            control,
            abort: handle.abort_handle(),
            progress,
        });
        Ok(handle)
    }

    /// Ask the active run to stop
    ///
    /// The run stops at its next checkpoint. If it is still active after the
    /// grace period it is cancelled, then aborted with a forced reset.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::NotRunning`] when idle.
    pub fn request_stop(&self) -> Result<(), ControlError> {
        let (generation, control) = {
            let active = self.inner.active();
            let run = active.as_ref().ok_or(ControlError::NotRunning)?;
            (run.generation, run.control.clone())
        };

        info!(generation, "Stop requested");
        control.request_stop();

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.escalate(generation, control).await });
        Ok(())
    }

    /// Resolve or join `target` with the current session
    ///
    /// Holds the run gate for the duration, so no scan can start meanwhile.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::AlreadyRunning`] while a scan is active,
    /// [`JoinError::Unreachable`] when the chat cannot be accessed, and the
    /// scan error of a failed connection or an invalid target.
    pub async fn join_chat(&self, target: &str) -> Result<ResolvedChat, JoinError> {
        self.inner.acquire()?;
        let _release = GateRelease(&self.inner.running);

        info!(target, "Join requested");
        self.inner
            .runner
            .join(target, RunControl::new())
            .await?
            .ok_or_else(|| JoinError::Unreachable(target.to_string()))
    }

    /// Whether a run holds the gate
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Current status snapshot
    #[must_use]
    pub fn status(&self) -> ScanStatus {
        self.inner.runner.status().borrow().clone()
    }

    /// Scan runner shared by every run
    #[must_use]
    pub fn runner(&self) -> &Arc<ScanRunner> {
        &self.inner.runner
    }
}
