//! Configuration and settings management
//!
//! Loads relay settings from optional config files and environment variables
//! and defines the timing and keyword defaults.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Keywords identifying the "download" element of a menu
pub const DOWNLOAD_BUTTON_KEYWORDS: &[&str] = &["download", "⬇️", "get", "links"];
/// Keywords identifying a "send all" element in a delivery chat
pub const SEND_ALL_KEYWORDS: &[&str] = &["send all", "send_all", "all files", "get all", "batch"];
/// Keywords identifying a "next page" element in a delivery chat
pub const NEXT_BUTTON_KEYWORDS: &[&str] = &["next", "→", ">>", "more", "▶", "➡"];
/// Keywords identifying a "next post" element on a catalog post
pub const NEXT_POST_KEYWORDS: &[&str] = &["next", "▶️", "➡️", "next post", "→", ">>"];

/// Delay after clicking a menu button (seconds)
pub const BUTTON_CLICK_DELAY_SECS: f64 = 2.0;
/// Delay between sub-items (seconds)
pub const SEASON_BUTTON_DELAY_SECS: f64 = 3.0;
/// Delay after each forward (seconds)
pub const FORWARD_DELAY_SECS: f64 = 1.0;
/// Delay after a next-page click (seconds)
pub const NEXT_BUTTON_DELAY_SECS: f64 = 2.0;
/// Delay after joining a chat (seconds)
pub const JOIN_CHANNEL_DELAY_SECS: f64 = 2.0;
/// Delay after any successful resolution (seconds)
pub const RESOLVE_SETTLE_DELAY_SECS: f64 = 1.0;
/// Delay after starting a delivery bot (seconds)
pub const BOT_START_DELAY_SECS: f64 = 3.0;
/// Delay between catalog items (seconds)
pub const INTER_ITEM_DELAY_SECS: f64 = 3.0;
/// Inactivity timeout of the file collector (seconds)
pub const FILE_WAIT_TIMEOUT_SECS: f64 = 40.0;
/// Poll loop tick (seconds)
pub const POLL_TICK_SECS: f64 = 1.0;
/// Messages fetched from a delivery chat per tick
pub const POLL_WINDOW: usize = 10;
/// Messages older than the session start by more than this are ignored unless edited
pub const STALE_GRACE_SECS: i64 = 60;
/// Added on top of every rate-limit wait (seconds)
pub const RATE_LIMIT_BUFFER_SECS: u64 = 5;
/// Rate-limit waits above this trigger failover (seconds)
pub const FLOOD_WAIT_THRESHOLD_SECS: u64 = 3600;
/// Cooldown before restarting on the next credential (seconds)
pub const GLOBAL_COOLDOWN_SECS: f64 = 25.0;
/// Catalog history window
pub const CATALOG_HISTORY_LIMIT: usize = 100;
/// Item chat history window searched for the menu
pub const MENU_HISTORY_LIMIT: usize = 30;
/// Maximum posts processed by one auto-chained invocation
pub const MAX_AUTO_FETCH_POSTS: usize = 50;
/// Grace period between a soft stop and a hard cancel (seconds)
pub const STOP_GRACE_SECS: u64 = 10;

/// Relay settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct RelaySettings {
    /// Primary account session string
    pub session_string: Option<String>,
    /// Second account session string
    pub session_string_2: Option<String>,
    /// Third account session string
    pub session_string_3: Option<String>,
    /// Comma-separated additional session strings
    pub extra_session_strings: Option<String>,

    /// Catalog channel: `@alias`, numeric id or link
    #[serde(default)]
    pub index_channel: String,
    /// Destination chat: `@alias`, numeric id or link
    #[serde(default)]
    pub destination_channel: String,

    /// Rate-limit waits above this trigger failover (seconds)
    pub flood_wait_threshold: Option<u64>,
    /// Whether long rate limits switch credentials
    pub auto_switch_session: Option<bool>,
    /// Cooldown before a failover restart (seconds)
    pub global_cooldown: Option<f64>,

    /// Delay after clicking a menu button (seconds)
    pub button_click_delay: Option<f64>,
    /// Delay between sub-items (seconds)
    pub season_button_delay: Option<f64>,
    /// Delay after each forward (seconds)
    pub forward_delay: Option<f64>,
    /// Delay after a next-page click (seconds)
    pub next_button_delay: Option<f64>,
    /// Delay after joining a chat (seconds)
    pub join_channel_delay: Option<f64>,
    /// Delay after starting a delivery bot (seconds)
    pub bot_start_delay: Option<f64>,
    /// Delay between catalog items (seconds)
    pub inter_item_delay: Option<f64>,
    /// Inactivity timeout of the file collector (seconds)
    pub file_wait_timeout: Option<f64>,

    /// Items processed per run, 0 for unlimited
    #[serde(default)]
    pub max_series_to_process: usize,
    /// Catalog messages scanned per run
    pub catalog_history_limit: Option<usize>,
    /// Follow "next post" links after a targeted run
    pub auto_fetch_next_post: Option<bool>,
    /// Maximum posts per auto-chained invocation
    pub max_auto_fetch_posts: Option<usize>,

    /// Directory holding the ledgers
    pub ledger_dir: Option<PathBuf>,

    /// Comma-separated override of the download keywords
    #[serde(rename = "download_button_keywords")]
    pub download_keywords_str: Option<String>,
    /// Comma-separated override of the send-all keywords
    #[serde(rename = "send_all_keywords")]
    pub send_all_keywords_str: Option<String>,
    /// Comma-separated override of the next-page keywords
    #[serde(rename = "next_button_keywords")]
    pub next_keywords_str: Option<String>,
    /// Comma-separated override of the next-post keywords
    #[serde(rename = "next_post_keywords")]
    pub next_post_keywords_str: Option<String>,
}

/// Build the layered configuration source shared by all crates
///
/// # Errors
///
/// Returns a `ConfigError` if a present config file cannot be parsed.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Not checked into git
        .add_source(File::with_name("config/local").required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        // UPPER_SNAKE_CASE maps to snake_case; empty values count as unset
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

fn parse_list(raw: Option<&String>, defaults: &[&str]) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
    })
    .filter(|list| !list.is_empty())
    .unwrap_or_else(|| defaults.iter().map(|k| (*k).to_string()).collect())
}

fn secs(value: Option<f64>, default: f64) -> Duration {
    Duration::try_from_secs_f64(value.unwrap_or(default).max(0.0))
        .unwrap_or_else(|_| Duration::from_secs_f64(default))
}

impl RelaySettings {
    /// Load settings from config files and the environment
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        build_config()?.try_deserialize()
    }

    /// Names of required settings that are missing
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.session_strings().is_empty() {
            errors.push("SESSION_STRING is required".to_string());
        }
        if self.index_channel.trim().is_empty() {
            errors.push("INDEX_CHANNEL is required".to_string());
        }
        if self.destination_channel.trim().is_empty() {
            errors.push("DESTINATION_CHANNEL is required".to_string());
        }
        errors
    }

    /// All configured session strings in failover order
    #[must_use]
    pub fn session_strings(&self) -> Vec<String> {
        let extras = self
            .extra_session_strings
            .as_deref()
            .unwrap_or_default()
            .split(',');

        [
            self.session_string.as_deref(),
            self.session_string_2.as_deref(),
            self.session_string_3.as_deref(),
        ]
        .into_iter()
        .flatten()
        .chain(extras)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
    }

    /// Download keywords, lowercase
    #[must_use]
    pub fn download_keywords(&self) -> Vec<String> {
        parse_list(self.download_keywords_str.as_ref(), DOWNLOAD_BUTTON_KEYWORDS)
    }

    /// Send-all keywords, lowercase
    #[must_use]
    pub fn send_all_keywords(&self) -> Vec<String> {
        parse_list(self.send_all_keywords_str.as_ref(), SEND_ALL_KEYWORDS)
    }

    /// Next-page keywords, lowercase
    #[must_use]
    pub fn next_keywords(&self) -> Vec<String> {
        parse_list(self.next_keywords_str.as_ref(), NEXT_BUTTON_KEYWORDS)
    }

    /// Next-post keywords, lowercase
    #[must_use]
    pub fn next_post_keywords(&self) -> Vec<String> {
        parse_list(self.next_post_keywords_str.as_ref(), NEXT_POST_KEYWORDS)
    }

    /// Ledger directory, `data` by default
    #[must_use]
    pub fn ledger_dir(&self) -> PathBuf {
        self.ledger_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("data"))
    }

    /// Resolved timings
    #[must_use]
    pub fn timings(&self) -> ScanTimings {
        ScanTimings {
            button_click: secs(self.button_click_delay, BUTTON_CLICK_DELAY_SECS),
            between_sub_items: secs(self.season_button_delay, SEASON_BUTTON_DELAY_SECS),
            after_forward: secs(self.forward_delay, FORWARD_DELAY_SECS),
            after_next_page: secs(self.next_button_delay, NEXT_BUTTON_DELAY_SECS),
            after_join: secs(self.join_channel_delay, JOIN_CHANNEL_DELAY_SECS),
            resolve_settle: secs(None, RESOLVE_SETTLE_DELAY_SECS),
            bot_start: secs(self.bot_start_delay, BOT_START_DELAY_SECS),
            inter_item: secs(self.inter_item_delay, INTER_ITEM_DELAY_SECS),
            inactivity_timeout: secs(self.file_wait_timeout, FILE_WAIT_TIMEOUT_SECS),
            poll_tick: secs(None, POLL_TICK_SECS),
            global_cooldown: secs(self.global_cooldown, GLOBAL_COOLDOWN_SECS),
        }
    }

    /// Resolved scan limits and switches
    #[must_use]
    pub fn limits(&self) -> ScanLimits {
        ScanLimits {
            max_items: self.max_series_to_process,
            catalog_history: self.catalog_history_limit.unwrap_or(CATALOG_HISTORY_LIMIT),
            menu_history: MENU_HISTORY_LIMIT,
            poll_window: POLL_WINDOW,
            auto_chain: self.auto_fetch_next_post.unwrap_or(true),
            max_chain_posts: self
                .max_auto_fetch_posts
                .unwrap_or(MAX_AUTO_FETCH_POSTS)
                .max(1),
            flood_wait_threshold_secs: self
                .flood_wait_threshold
                .unwrap_or(FLOOD_WAIT_THRESHOLD_SECS),
            auto_switch_session: self.auto_switch_session.unwrap_or(true),
        }
    }
}

/// Every delay the pipeline sleeps for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanTimings {
    /// After a menu button click
    pub button_click: Duration,
    /// Between sub-items
    pub between_sub_items: Duration,
    /// After each forward
    pub after_forward: Duration,
    /// After a next-page click
    pub after_next_page: Duration,
    /// After joining a chat
    pub after_join: Duration,
    /// After any successful resolution
    pub resolve_settle: Duration,
    /// After starting a delivery bot
    pub bot_start: Duration,
    /// Between catalog items
    pub inter_item: Duration,
    /// Collector inactivity timeout
    pub inactivity_timeout: Duration,
    /// Collector tick
    pub poll_tick: Duration,
    /// Before a failover restart
    pub global_cooldown: Duration,
}

impl Default for ScanTimings {
    fn default() -> Self {
        RelaySettings::default().timings()
    }
}

/// Bounds and switches of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanLimits {
    /// Items per run, 0 for unlimited
    pub max_items: usize,
    /// Catalog history window
    pub catalog_history: usize,
    /// Menu history window
    pub menu_history: usize,
    /// Delivery chat window per tick
    pub poll_window: usize,
    /// Follow successor posts after a targeted run
    pub auto_chain: bool,
    /// Posts per auto-chained invocation, including the first
    pub max_chain_posts: usize,
    /// Failover threshold (seconds)
    pub flood_wait_threshold_secs: u64,
    /// Whether failover is enabled at all
    pub auto_switch_session: bool,
}

impl Default for ScanLimits {
    fn default() -> Self {
        RelaySettings::default().limits()
    }
}

/// Keyword lists used for button matching
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keywords {
    /// Download element
    pub download: Vec<String>,
    /// Send-all element
    pub send_all: Vec<String>,
    /// Next-page element
    pub next_page: Vec<String>,
    /// Next-post element
    pub next_post: Vec<String>,
}

impl Default for Keywords {
    fn default() -> Self {
        Self::from(&RelaySettings::default())
    }
}

impl From<&RelaySettings> for Keywords {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            download: settings.download_keywords(),
            send_all: settings.send_all_keywords(),
            next_page: settings.next_keywords(),
            next_post: settings.next_post_keywords(),
        }
    }
}
