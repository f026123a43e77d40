//! Text rendering of scan progress and status
//!
//! Every dynamic value is HTML-escaped; messages are sent in HTML mode.

use html_escape::encode_text;
use media_relay_core::progress::RunPhase;
use media_relay_core::resolver::ResolvedChat;
use media_relay_core::{ProgressState, ScanStatus};
use media_relay_runtime::{ControlError, JoinError};
use std::fmt::Write;

/// Help text for `/start`
#[must_use]
pub fn help_text() -> String {
    "<b>Media relay</b>\n\n\
     /scan - process the catalog channel\n\
     /scan &lt;post link&gt; - process one catalog post and the ones after it\n\
     /stop - stop the running scan\n\
     /status - show what is being processed\n\
     /join &lt;link or username&gt; - join a chat with the scanning account"
        .to_string()
}

/// Reply to `/scan` while a run is active
pub const ALREADY_RUNNING: &str = "⚠️ A scan is already processing. Use /stop first.";
/// Reply to `/stop` while idle
pub const NOTHING_RUNNING: &str = "ℹ️ Nothing is running.";
/// Reply to `/join` without an argument
pub const JOIN_USAGE: &str = "Usage: /join &lt;link or username&gt;";

/// Acknowledgement of `/join`
#[must_use]
pub fn joining(target: &str) -> String {
    format!("⏳ Trying to join {}...", encode_text(target))
}

/// Outcome of `/join`
#[must_use]
pub fn render_join(result: &Result<ResolvedChat, JoinError>) -> String {
    match result {
        Ok(chat) => format!("✅ Joined <b>{}</b>", encode_text(&chat.title)),
        Err(JoinError::Control(ControlError::AlreadyRunning)) => {
            "⚠️ A scan is running. Use /stop first, then /join again.".to_string()
        }
        Err(e) => format!("❌ Failed to join: <code>{}</code>", encode_text(&e.to_string())),
    }
}

/// Reply to an accepted `/stop`
pub const STOP_REQUESTED: &str = "🛑 Stop requested, finishing the current step...";

fn phase_header(state: &ProgressState) -> &'static str {
    match state.phase {
        RunPhase::Starting => "⏳ <b>Starting scan</b>",
        RunPhase::Running => "🔄 <b>Scanning</b>",
        RunPhase::Completed => "✅ <b>Scan completed</b>",
        RunPhase::Failed => "❌ <b>Scan failed</b>",
        RunPhase::Cancelled => "🛑 <b>Scan stopped</b>",
    }
}

/// Render the live progress message
#[must_use]
pub fn render_progress(state: &ProgressState) -> String {
    let mut text = String::from(phase_header(state));
    text.push('\n');

    if let Some(target) = &state.target {
        let _ = write!(text, "\n🔗 {}", encode_text(target));
        if let Some(position) = state.chain_position {
            let _ = write!(text, " (post {position})");
        }
    }
    if !state.is_finished() {
        if let Some(item) = &state.current_item {
            let _ = write!(text, "\n📺 <b>{}</b> (#{})", encode_text(item), state.item_index);
        }
        if let Some((label, position, total)) = &state.current_sub_item {
            let _ = write!(text, "\n📂 {} ({position}/{total})", encode_text(label));
        }
        if let Some(file) = &state.last_file {
            let _ = write!(
                text,
                "\n📄 {} ({} this option)",
                encode_text(file),
                state.files_current
            );
        }
    }

    let _ = write!(
        text,
        "\n\n✔️ Items done: {}\n⏭ Skipped: {}\n📦 Files forwarded: {}",
        state.items_completed, state.items_skipped, state.files_total
    );
    if state.session_switches > 0 {
        let _ = write!(
            text,
            "\n🔁 Session switches: {} (now #{})",
            state.session_switches,
            state.session.unwrap_or(1)
        );
    }
    if let Some(error) = &state.error {
        let _ = write!(text, "\n\n<code>{}</code>", encode_text(error));
    }
    text
}

/// Render the `/status` reply
#[must_use]
pub fn render_status(status: &ScanStatus) -> String {
    match status {
        ScanStatus::Idle => "💤 <b>Idle</b>".to_string(),
        ScanStatus::Running {
            item,
            sub_item,
            files_collected,
            total_files,
            session_number,
        } => {
            let mut text = String::from("🔄 <b>Running</b>");
            let _ = write!(
                text,
                "\n📺 Item: {}",
                item.as_deref().map_or_else(|| "-".into(), encode_text)
            );
            let _ = write!(
                text,
                "\n📂 Option: {}",
                sub_item.as_deref().map_or_else(|| "-".into(), encode_text)
            );
            let _ = write!(
                text,
                "\n📦 Files: {files_collected} current, {total_files} total\n🔑 Session #{session_number}"
            );
            text
        }
    }
}
