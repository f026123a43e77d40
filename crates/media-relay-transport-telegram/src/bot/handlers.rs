//! Command handlers of the control bot

use super::resilient::{edit_message_safe_resilient, send_message_resilient};
use super::sink::TelegramProgressSink;
use super::views;
use anyhow::Result;
use media_relay_runtime::{spawn_progress_runtime, ControlError, ProgressRuntimeConfig, ScanController};
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Buffered progress events between the scan and the status message
const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Supported commands for the bot
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Show help
    #[command(description = "Show help.")]
    Start,
    /// Start a scan, optionally from a catalog post link
    #[command(description = "Scan the catalog, or one post and the ones after it.")]
    Scan(String),
    /// Stop the running scan
    #[command(description = "Stop the running scan.")]
    Stop,
    /// Show what is being processed
    #[command(description = "Show scan status.")]
    Status,
    /// Join a chat with the scanning account
    #[command(description = "Join a chat by link or username.")]
    Join(String),
}

/// Sender id, or `0` for anonymous messages
#[must_use]
pub fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

/// Trimmed command argument; `None` when blank
#[must_use]
pub fn command_argument(arg: &str) -> Option<String> {
    let arg = arg.trim();
    (!arg.is_empty()).then(|| arg.to_string())
}

/// `/start`
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn start(bot: Bot, msg: Message) -> Result<()> {
    info!(user_id = get_user_id_safe(&msg), "Start command received");
    send_message_resilient(&bot, msg.chat.id, views::help_text()).await?;
    Ok(())
}

/// `/scan [link]`
///
/// Acknowledges with a message that is then edited with live progress.
///
/// # Errors
///
/// Returns an error if the acknowledgement cannot be sent.
pub async fn scan(bot: Bot, msg: Message, arg: String, controller: ScanController) -> Result<()> {
    // Blank means the whole catalog
    let target = command_argument(&arg);
    info!(user_id = get_user_id_safe(&msg), target = ?target, "Scan command received");

    if controller.is_running() {
        send_message_resilient(&bot, msg.chat.id, views::ALREADY_RUNNING).await?;
        return Ok(());
    }

    let ack = send_message_resilient(&bot, msg.chat.id, "⏳ <b>Starting scan</b>").await?;
    let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
    let handle = match controller.start_run(target, Some(tx)) {
        Ok(handle) => handle,
        Err(ControlError::AlreadyRunning) => {
            edit_message_safe_resilient(&bot, msg.chat.id, ack.id, views::ALREADY_RUNNING).await;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let sink = TelegramProgressSink::new(bot.clone(), msg.chat.id, ack.id);
    let progress = spawn_progress_runtime(sink, rx, ProgressRuntimeConfig::new());

    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(report)) => info!(
                items = report.items,
                posts = report.posts,
                stopped = report.stopped,
                "Scan finished"
            ),
            Ok(Err(e)) => warn!(error = %e, "Scan ended with an error"),
            Err(e) if e.is_cancelled() => warn!("Scan aborted"),
            Err(e) => error!(error = %e, "Scan task panicked"),
        }
        if let Err(e) = progress.await {
            error!(error = %e, "Progress runtime join failed");
        }
    });
    Ok(())
}

/// `/stop`
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn stop(bot: Bot, msg: Message, controller: ScanController) -> Result<()> {
    info!(user_id = get_user_id_safe(&msg), "Stop command received");
    let reply = match controller.request_stop() {
        Ok(()) => views::STOP_REQUESTED,
        Err(ControlError::NotRunning) => views::NOTHING_RUNNING,
        Err(e) => return Err(e.into()),
    };
    send_message_resilient(&bot, msg.chat.id, reply).await?;
    Ok(())
}

/// `/status`
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn status(bot: Bot, msg: Message, controller: ScanController) -> Result<()> {
    let text = views::render_status(&controller.status());
    send_message_resilient(&bot, msg.chat.id, text).await?;
    Ok(())
}

/// `/join <link or username>`
///
/// # Errors
///
/// Returns an error if a reply cannot be sent.
pub async fn join(bot: Bot, msg: Message, arg: String, controller: ScanController) -> Result<()> {
    let Some(target) = command_argument(&arg) else {
        send_message_resilient(&bot, msg.chat.id, views::JOIN_USAGE).await?;
        return Ok(());
    };
    info!(user_id = get_user_id_safe(&msg), target = %target, "Join command received");

    send_message_resilient(&bot, msg.chat.id, views::joining(&target)).await?;
    let result = controller.join_chat(&target).await;
    if let Err(e) = &result {
        warn!(target = %target, error = %e, "Join failed");
    }
    send_message_resilient(&bot, msg.chat.id, views::render_join(&result)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_with_and_without_a_target() {
        let parsed = Command::parse("/scan https://t.me/catalog/5", "relaybot");
        assert_eq!(
            parsed.ok(),
            Some(Command::Scan("https://t.me/catalog/5".to_string()))
        );
        assert_eq!(Command::parse("/stop", "relaybot").ok(), Some(Command::Stop));
        assert_eq!(Command::parse("/status", "relaybot").ok(), Some(Command::Status));
        assert_eq!(
            Command::parse("/join https://t.me/+AbCdEf", "relaybot").ok(),
            Some(Command::Join("https://t.me/+AbCdEf".to_string()))
        );
    }

    #[test]
    fn blank_argument_is_no_argument() {
        assert_eq!(command_argument("   "), None);
        assert_eq!(command_argument(" 42 "), Some("42".to_string()));
    }
}
