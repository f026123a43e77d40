//! Progress sink that keeps one status message up to date

use super::resilient::edit_message_safe_resilient;
use super::views::render_progress;
use anyhow::Result;
use async_trait::async_trait;
use media_relay_core::ProgressState;
use media_relay_runtime::ProgressSink;
use std::sync::Mutex;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId};

/// Remembers the last delivered text so repeats are dropped
#[derive(Debug, Default)]
pub struct TextDeduper {
    last: Mutex<Option<String>>,
}

impl TextDeduper {
    /// `true` if `text` differs from the last text marked delivered
    #[must_use]
    pub fn is_new(&self, text: &str) -> bool {
        let last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        last.as_deref() != Some(text)
    }

    /// Record `text` as delivered
    pub fn delivered(&self, text: String) {
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *last = Some(text);
    }
}

/// Edits the message that acknowledged `/scan`
pub struct TelegramProgressSink {
    bot: Bot,
    chat_id: ChatId,
    message_id: MessageId,
    deduper: TextDeduper,
}

impl TelegramProgressSink {
    /// Sink editing `message_id` in `chat_id`
    #[must_use]
    pub fn new(bot: Bot, chat_id: ChatId, message_id: MessageId) -> Self {
        Self {
            bot,
            chat_id,
            message_id,
            deduper: TextDeduper::default(),
        }
    }
}

#[async_trait]
impl ProgressSink for TelegramProgressSink {
    async fn update_progress(&self, state: &ProgressState) -> Result<()> {
        let text = render_progress(state);
        if !self.deduper.is_new(&text) {
            return Ok(());
        }
        if edit_message_safe_resilient(&self.bot, self.chat_id, self.message_id, &text).await {
            self.deduper.delivered(text);
            Ok(())
        } else {
            anyhow::bail!("status message could not be edited")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_is_suppressed() {
        let deduper = TextDeduper::default();
        assert!(deduper.is_new("🔄 Scanning"));
        deduper.delivered("🔄 Scanning".to_string());
        assert!(!deduper.is_new("🔄 Scanning"));
        assert!(deduper.is_new("✅ Scan completed"));
    }
}
