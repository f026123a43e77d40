use serde::{Deserialize, Serialize};

/// Notable state changes of a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A run began
    RunStarted {
        /// Targeted catalog post, if any
        target: Option<String>,
    },
    /// Processing of a catalog item began
    ItemStarted {
        /// Display name
        name: String,
        /// One-based position within this run
        index: usize,
    },
    /// An item was skipped without being marked done
    ItemSkipped {
        /// Display name
        name: String,
        /// Short reason
        reason: String,
    },
    /// An item was marked done
    ItemCompleted {
        /// Display name
        name: String,
    },
    /// Collection for a season/quality option began
    SubItemStarted {
        /// Option label
        label: String,
        /// One-based position in the menu
        position: usize,
        /// Number of options in the menu
        total: usize,
    },
    /// A file was forwarded
    FileForwarded {
        /// File name, if known
        file_name: String,
        /// Files collected for the current option
        files: usize,
    },
    /// A long rate limit moved the run to another session
    SessionSwitched {
        /// One-based number of the abandoned session
        from: usize,
        /// One-based number of the new session
        to: usize,
    },
    /// Auto-chaining moved to the next catalog post
    ChainAdvanced {
        /// Link of the next post
        link: String,
        /// One-based position in the chain
        position: usize,
    },
    /// The run finished normally
    RunCompleted {
        /// Items processed
        items: usize,
    },
    /// The run failed
    RunFailed(String),
    /// The run was stopped or cancelled
    RunCancelled,
}

/// Lifecycle of a run as seen by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPhase {
    /// Nothing happened yet
    #[default]
    Starting,
    /// Work in progress
    Running,
    /// Finished normally
    Completed,
    /// Finished with an error
    Failed,
    /// Stopped by the operator
    Cancelled,
}

/// Folded view of every event received so far
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressState {
    /// Run lifecycle
    pub phase: RunPhase,
    /// Targeted catalog post
    pub target: Option<String>,
    /// Item in progress
    pub current_item: Option<String>,
    /// One-based index of the item in progress
    pub item_index: usize,
    /// Option in progress with its position and menu size
    pub current_sub_item: Option<(String, usize, usize)>,
    /// Files collected for the current option
    pub files_current: usize,
    /// Files collected during the whole run
    pub files_total: usize,
    /// Last forwarded file
    pub last_file: Option<String>,
    /// Items marked done
    pub items_completed: usize,
    /// Items skipped
    pub items_skipped: usize,
    /// Active session number, once a switch happened
    pub session: Option<usize>,
    /// Number of session switches
    pub session_switches: usize,
    /// Position in the auto-chain
    pub chain_position: Option<usize>,
    /// Failure message
    pub error: Option<String>,
}

impl ProgressState {
    /// Creates a new empty progress state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the run reached a final phase
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(
            self.phase,
            RunPhase::Completed | RunPhase::Failed | RunPhase::Cancelled
        )
    }

    /// Updates the state based on a scan event
    pub fn update(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::RunStarted { target } => {
                self.phase = RunPhase::Running;
                self.target = target;
            }
            ProgressEvent::ItemStarted { name, index } => self.handle_item_started(name, index),
            ProgressEvent::ItemSkipped { .. } => {
                self.items_skipped += 1;
                self.current_sub_item = None;
            }
            ProgressEvent::ItemCompleted { .. } => {
                self.items_completed += 1;
                self.current_sub_item = None;
            }
            ProgressEvent::SubItemStarted {
                label,
                position,
                total,
            } => {
                self.current_sub_item = Some((label, position, total));
                self.files_current = 0;
            }
            ProgressEvent::FileForwarded { file_name, files } => {
                self.files_current = files;
                self.files_total += 1;
                self.last_file = Some(file_name);
            }
            ProgressEvent::SessionSwitched { to, .. } => {
                self.session = Some(to);
                self.session_switches += 1;
            }
            ProgressEvent::ChainAdvanced { link, position } => {
                self.chain_position = Some(position);
                self.target = Some(link);
            }
            ProgressEvent::RunCompleted { .. } => self.phase = RunPhase::Completed,
            ProgressEvent::RunFailed(e) => {
                self.phase = RunPhase::Failed;
                self.error = Some(e);
            }
            ProgressEvent::RunCancelled => self.phase = RunPhase::Cancelled,
        }
    }

    fn handle_item_started(&mut self, name: String, index: usize) {
        self.phase = RunPhase::Running;
        self.current_item = Some(name);
        self.item_index = index;
        self.current_sub_item = None;
        self.files_current = 0;
        self.last_file = None;
    }

    // Formatting is handled in the UI layer.
}
