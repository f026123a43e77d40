//! Telegram control settings.

use config::ConfigError;
use media_relay_core::RelaySettings;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Initial delay between Telegram API retries (milliseconds).
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Upper bound of the delay between Telegram API retries (milliseconds).
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
/// Attempts per Telegram API operation.
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;

/// Telegram control settings loaded from environment variables.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct TelegramSettings {
    /// Telegram Bot API token.
    #[serde(default)]
    pub bot_token: String,
    /// Comma-separated list of user IDs allowed to issue commands.
    #[serde(rename = "admin_ids")]
    pub admin_ids_str: Option<String>,
}

impl TelegramSettings {
    /// Create new settings by loading from environment and files.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        media_relay_core::config::build_config()?.try_deserialize()
    }

    /// Returns the set of admin user IDs.
    #[must_use]
    pub fn admin_ids(&self) -> HashSet<i64> {
        self.admin_ids_str
            .as_ref()
            .map(|s| {
                s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                    .filter(|token| !token.is_empty())
                    .filter_map(|id| id.parse::<i64>().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `user_id` may issue commands; an empty list allows everyone.
    #[must_use]
    pub fn is_admin(&self, user_id: i64) -> bool {
        let admins = self.admin_ids();
        admins.is_empty() || admins.contains(&user_id)
    }
}

/// Combined settings used by the Telegram layer.
#[derive(Clone)]
pub struct BotSettings {
    /// Relay settings shared with the scan runner.
    pub relay: Arc<RelaySettings>,
    /// Telegram-specific settings.
    pub telegram: Arc<TelegramSettings>,
}

impl BotSettings {
    /// Create a new combined settings bundle.
    #[must_use]
    pub fn new(relay: RelaySettings, telegram: TelegramSettings) -> Self {
        Self {
            relay: Arc::new(relay),
            telegram: Arc::new(telegram),
        }
    }

    /// Missing required settings, relay and Telegram alike.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = self.relay.validate();
        if self.telegram.bot_token.trim().is_empty() {
            errors.push("BOT_TOKEN is required".to_string());
        }
        errors
    }
}
