use crate::dedup::normalize_name;
use crate::progress::ProgressEvent;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Status snapshot published to the operator surface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ScanStatus {
    /// No run in progress
    #[default]
    Idle,
    /// A run is in progress
    Running {
        /// Item in progress
        item: Option<String>,
        /// Option in progress
        sub_item: Option<String>,
        /// Files collected for the current option
        files_collected: usize,
        /// Files collected during the run
        total_files: usize,
        /// One-based number of the session in use
        session_number: usize,
    },
}

/// Run-wide mutable state, owned by the orchestrator task
///
/// Other tasks only see it through the status watch channel and the
/// progress event channel.
#[derive(Debug, Clone)]
pub struct ScanState {
    status: Arc<watch::Sender<ScanStatus>>,
    progress: Option<mpsc::Sender<ProgressEvent>>,
}

impl ScanState {
    /// State publishing into `status` and, optionally, `progress`
    #[must_use]
    pub fn new(
        status: Arc<watch::Sender<ScanStatus>>,
        progress: Option<mpsc::Sender<ProgressEvent>>,
    ) -> Self {
        Self { status, progress }
    }

    /// State with a private status channel and no progress sink
    #[must_use]
    pub fn detached() -> Self {
        let (tx, _rx) = watch::channel(ScanStatus::Idle);
        Self::new(Arc::new(tx), None)
    }

    /// Enter the running state for `session_number`; counters survive a
    /// failover restart
    pub fn begin(&self, session_number: usize) {
        self.status.send_modify(|status| match status {
            ScanStatus::Running {
                session_number: current,
                ..
            } => *current = session_number,
            ScanStatus::Idle => {
                *status = ScanStatus::Running {
                    item: None,
                    sub_item: None,
                    files_collected: 0,
                    total_files: 0,
                    session_number,
                }
            }
        });
    }

    /// Clear everything
    pub fn reset(&self) {
        self.status.send_replace(ScanStatus::Idle);
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> ScanStatus {
        self.status.borrow().clone()
    }

    /// Set the item in progress
    pub fn set_item(&self, name: Option<&str>) {
        self.status.send_modify(|status| {
            if let ScanStatus::Running { item, sub_item, .. } = status {
                *item = name.map(ToString::to_string);
                *sub_item = None;
            }
        });
    }

    /// Set the option in progress and zero its counter
    pub fn set_sub_item(&self, label: Option<&str>) {
        self.status.send_modify(|status| {
            if let ScanStatus::Running {
                sub_item,
                files_collected,
                ..
            } = status
            {
                *sub_item = label.map(ToString::to_string);
                *files_collected = 0;
            }
        });
    }

    /// Item in progress
    #[must_use]
    pub fn current_item(&self) -> Option<String> {
        match &*self.status.borrow() {
            ScanStatus::Running { item, .. } => item.clone(),
            ScanStatus::Idle => None,
        }
    }

    /// Count a forwarded file; returns the per-option count
    pub fn file_forwarded(&self) -> usize {
        let mut count = 0;
        self.status.send_modify(|status| {
            if let ScanStatus::Running {
                files_collected,
                total_files,
                ..
            } = status
            {
                *files_collected += 1;
                *total_files += 1;
                count = *files_collected;
            }
        });
        count
    }

    /// Files collected for the current option
    #[must_use]
    pub fn files_collected(&self) -> usize {
        match &*self.status.borrow() {
            ScanStatus::Running {
                files_collected, ..
            } => *files_collected,
            ScanStatus::Idle => 0,
        }
    }

    /// Whether `file_name` plausibly belongs to the item in progress
    ///
    /// Holds when the normalized item name is a substring of the normalized
    /// file name, or any word of four or more characters of the item name is.
    /// Always holds without a current item.
    #[must_use]
    pub fn is_related(&self, file_name: &str) -> bool {
        self.current_item()
            .map_or(true, |item| is_related_to(&item, file_name))
    }

    /// Queue a progress event, if a sink is attached
    ///
    /// Never waits: a full channel drops the event.
    pub fn emit(&self, event: ProgressEvent) {
        let Some(tx) = &self.progress else {
            return;
        };
        if let Err(mpsc::error::TrySendError::Full(event)) = tx.try_send(event) {
            debug!(event = ?event, "Progress channel full, event dropped");
        }
    }

    /// Deliver the terminal event of a run, waiting for room in the channel
    pub async fn emit_final(&self, event: ProgressEvent) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(event).await;
        }
    }
}

pub(crate) fn is_related_to(item: &str, file_name: &str) -> bool {
    let file = normalize_name(file_name);
    let whole = normalize_name(item);
    if !whole.is_empty() && file.contains(&whole) {
        return true;
    }

    item.split(|c: char| !c.is_alphanumeric())
        .map(normalize_name)
        .filter(|word| word.chars().count() >= 4)
        .any(|word| file.contains(&word))
}
