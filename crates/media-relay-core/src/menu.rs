//! Menu lookup and button matching
//!
//! Matching is case-insensitive substring matching against keyword lists,
//! plus the season/quality rule for option buttons.

use crate::resolver::ResolvedChat;
use crate::scan::{ScanContext, ScanError};
use crate::transport::{Button, ButtonAction, Message};
use lazy_regex::lazy_regex;
use tracing::{debug, info};

static RE_SEASON: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?i)(season\s*\d+|s\d+|s0\d+)");

/// Quality markers that qualify a label when it also contains a digit
const QUALITY_TOKENS: &[&str] = &["720P", "1080P", "480P", "2160P", "X265", "X264", "HEVC"];

/// Whether `label` contains any keyword, ignoring case
#[must_use]
pub fn matches_any(label: &str, keywords: &[String]) -> bool {
    let label = label.trim().to_lowercase();
    keywords
        .iter()
        .any(|keyword| label.contains(&keyword.to_lowercase()))
}

/// First button whose label contains one of `keywords`
#[must_use]
pub fn find_button<'a>(message: &'a Message, keywords: &[String]) -> Option<&'a Button> {
    message
        .iter_buttons()
        .find(|button| matches_any(&button.text, keywords))
}

/// Whether a label names a season or a quality variant
#[must_use]
pub fn is_season_label(label: &str) -> bool {
    if RE_SEASON.is_match(label) {
        return true;
    }
    let upper = label.to_uppercase();
    QUALITY_TOKENS.iter().any(|token| upper.contains(token))
        && label.chars().any(|c| c.is_ascii_digit())
}

/// Season/quality buttons in presentation order
#[must_use]
pub fn season_buttons(message: &Message) -> Vec<&Button> {
    message
        .iter_buttons()
        .filter(|button| button.action != ButtonAction::Other)
        .filter(|button| is_season_label(&button.text))
        .collect()
}

/// Whether `message` looks like an item menu
#[must_use]
pub fn is_menu(message: &Message, download_keywords: &[String]) -> bool {
    message.has_buttons()
        && (find_button(message, download_keywords).is_some() || !season_buttons(message).is_empty())
}

/// Finds the menu message of a resolved item chat
pub struct MenuLocator<'a> {
    ctx: &'a ScanContext,
}

impl<'a> MenuLocator<'a> {
    /// Locator over the transport of `ctx`
    #[must_use]
    pub const fn new(ctx: &'a ScanContext) -> Self {
        Self { ctx }
    }

    /// Most recent menu within the history window, else the pinned message
    /// if it carries buttons
    ///
    /// # Errors
    ///
    /// Returns aborting [`ScanError`]s only; lookup failures yield `Ok(None)`.
    pub async fn locate(&self, chat: &ResolvedChat) -> Result<Option<Message>, ScanError> {
        let ctx = self.ctx;
        let transport = ctx.transport();
        let chat_ref = &chat.chat_ref;
        let limit = ctx.limits.menu_history;
        let keywords = ctx.keywords.download.as_slice();

        let history = ctx
            .guard
            .call(&ctx.control, "fetch_history", move || {
                transport.fetch_history(chat_ref, limit)
            })
            .await;
        if let Some(history) = crate::scan::skip_on_error(history, "Menu history fetch")? {
            if let Some(menu) = history.into_iter().find(|m| is_menu(m, keywords)) {
                info!(chat = %chat.title, message_id = menu.id, "Menu located");
                return Ok(Some(menu));
            }
        }

        let Some(pinned_id) = chat.pinned_message_id else {
            debug!(chat = %chat.title, "No menu in history and nothing pinned");
            return Ok(None);
        };

        let pinned = ctx
            .guard
            .call(&ctx.control, "fetch_message", move || {
                transport.fetch_message(chat_ref, pinned_id)
            })
            .await;
        let menu = crate::scan::skip_on_error(pinned, "Pinned message fetch")?
            .flatten()
            .filter(Message::has_buttons);
        if let Some(menu) = &menu {
            info!(chat = %chat.title, message_id = menu.id, "Menu located in pinned message");
        }
        Ok(menu)
    }

    /// Re-fetch `menu`; keeps the previous copy when that fails
    ///
    /// # Errors
    ///
    /// Returns aborting [`ScanError`]s only.
    pub async fn refresh(&self, chat: &ResolvedChat, menu: Message) -> Result<Message, ScanError> {
        let ctx = self.ctx;
        let transport = ctx.transport();
        let chat_ref = &chat.chat_ref;
        let id = menu.id;

        let fresh = ctx
            .guard
            .call(&ctx.control, "fetch_message", move || {
                transport.fetch_message(chat_ref, id)
            })
            .await;
        Ok(crate::scan::skip_on_error(fresh, "Menu refresh")?
            .flatten()
            .unwrap_or(menu))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DOWNLOAD_BUTTON_KEYWORDS;
    use crate::testing::message;

    fn download_keywords() -> Vec<String> {
        DOWNLOAD_BUTTON_KEYWORDS.iter().map(|k| (*k).to_string()).collect()
    }

    #[test]
    fn season_rule() {
        assert!(is_season_label("SEASON 1"));
        assert!(is_season_label("Season 2 1080p"));
        assert!(is_season_label("S01"));
        assert!(is_season_label("720p x265"));
        assert!(is_season_label("HEVC 2"));
        assert!(!is_season_label("HEVC"));
        assert!(!is_season_label("Download"));
        assert!(!is_season_label("Trailer"));
    }

    #[test]
    fn season_buttons_keep_menu_order() {
        let mut msg = message(1, "menu");
        msg.buttons = vec![
            vec![Button::callback("Season 2", b"s2".to_vec())],
            vec![
                Button::callback("Season 1", b"s1".to_vec()),
                Button::url("S03", "https://t.me/Bot?start=s3"),
            ],
            vec![Button::callback("Trailer", b"t".to_vec())],
        ];
        let labels: Vec<&str> = season_buttons(&msg).iter().map(|b| b.text.as_str()).collect();
        assert_eq!(labels, vec!["Season 2", "Season 1", "S03"]);
    }

    #[test]
    fn keyword_matching_is_substring_and_case_insensitive() {
        let mut msg = message(1, "menu");
        msg.buttons = vec![vec![Button::callback("⬇️ DOWNLOAD NOW", b"d".to_vec())]];
        assert!(find_button(&msg, &download_keywords()).is_some());
        assert!(is_menu(&msg, &download_keywords()));

        msg.buttons = vec![vec![Button::callback("Watch trailer", b"t".to_vec())]];
        assert!(!is_menu(&msg, &download_keywords()));
        assert!(!is_menu(&message(2, "download"), &download_keywords()));
    }
}
