//! Link extraction and parsing
//!
//! Catalog posts reference item chats through `t.me` links carried by inline
//! buttons, hidden text links or plain URLs in the body.

use crate::menu::matches_any;
use crate::transport::{ButtonAction, ChatRef, EntityKind, Message, MessageId};
use lazy_regex::lazy_regex;
use tracing::debug;

static RE_TME_LINK: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?i)(?:^|[/.])t\.me/\S+");
static RE_ALIAS: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"^[A-Za-z0-9_]+$");
static RE_SCHEME: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?i)^https?://");

/// A discovered item link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationLink {
    /// Human-readable name
    pub name: String,
    /// Normalized URL, the item's dedup key
    pub url: String,
}

/// Whether `url` points at `t.me`
#[must_use]
pub fn is_recognized(url: &str) -> bool {
    RE_TME_LINK.is_match(url.trim())
}

/// Canonical form of a link: trimmed, `https://` scheme, no trailing slash
#[must_use]
pub fn normalize_link(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_scheme = RE_SCHEME.replace(trimmed, "");
    let body = without_scheme.trim_end_matches('/');
    format!("https://{body}")
}

/// Path after `t.me/` with query and fragment removed
fn tme_path(url: &str) -> Option<&str> {
    let lower = url.to_ascii_lowercase();
    let start = lower.find("t.me/")? + "t.me/".len();
    let rest = &url[start..];
    let end = rest.find(['?', '#']).unwrap_or(rest.len());
    Some(rest[..end].trim_end_matches('/'))
}

fn query_param<'a>(url: &'a str, key: &str) -> Option<&'a str> {
    let query = url.split_once('?')?.1;
    let query = query.split('#').next().unwrap_or_default();
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

fn last_segment(url: &str) -> String {
    tme_path(url)
        .and_then(|path| path.rsplit('/').find(|segment| !segment.is_empty()))
        .unwrap_or(url)
        .to_string()
}

/// Navigation links of a catalog message
///
/// Buttons come first, then hidden text links, then plain URLs. Duplicates
/// within the message are kept.
#[must_use]
pub fn extract_links(message: &Message) -> Vec<NavigationLink> {
    let mut links = Vec::new();

    for button in message.iter_buttons() {
        if let ButtonAction::Url(url) = &button.action {
            if is_recognized(url) {
                links.push(NavigationLink {
                    name: button.text.trim().to_string(),
                    url: normalize_link(url),
                });
            }
        }
    }

    for entity in &message.entities {
        if let EntityKind::TextLink { url } = &entity.kind {
            if is_recognized(url) {
                links.push(NavigationLink {
                    name: message.entity_text(entity).trim().to_string(),
                    url: normalize_link(url),
                });
            }
        }
    }

    for entity in &message.entities {
        if entity.kind == EntityKind::Url {
            let url = message.entity_text(entity);
            if is_recognized(&url) {
                links.push(NavigationLink {
                    name: last_segment(&url),
                    url: normalize_link(&url),
                });
            }
        }
    }

    debug!(message_id = message.id, links = links.len(), "Extracted links");
    links
}

/// A parsed chat link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatLink {
    /// `t.me/+hash` or `t.me/joinchat/hash`
    Invite {
        /// Normalized invite URL
        url: String,
    },
    /// `t.me/c/<id>[/<post>]`
    Private {
        /// Full channel id with the `-100` prefix
        channel_id: i64,
        /// Post id, if the link targets one
        post: Option<MessageId>,
    },
    /// `t.me/<alias>[/<post>]`
    Public {
        /// Alias without `@`
        username: String,
        /// Post id, if the link targets one
        post: Option<MessageId>,
    },
}

impl ChatLink {
    /// Parse a `t.me` link; `None` if malformed
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let url = normalize_link(raw);
        let path = tme_path(&url)?;
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let first = segments.next()?;

        if let Some(hash) = first.strip_prefix('+') {
            return (!hash.is_empty()).then(|| Self::Invite {
                url: format!("https://t.me/+{hash}"),
            });
        }

        match first {
            "joinchat" => {
                let hash = segments.next()?;
                Some(Self::Invite {
                    url: format!("https://t.me/joinchat/{hash}"),
                })
            }
            "c" => {
                let raw_id = segments.next()?;
                if !raw_id.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                let channel_id = format!("-100{raw_id}").parse().ok()?;
                let post = segments.next().and_then(|p| p.parse().ok());
                Some(Self::Private { channel_id, post })
            }
            alias => {
                // `t.me/s/<alias>` is the web preview of the same channel
                let alias = if alias == "s" { segments.next()? } else { alias };
                if !RE_ALIAS.is_match(alias) {
                    return None;
                }
                let post = segments.next().and_then(|p| p.parse().ok());
                Some(Self::Public {
                    username: alias.to_string(),
                    post,
                })
            }
        }
    }

    /// Parse an operator-supplied chat: a `t.me` link, `@alias`, bare alias
    /// or numeric chat id
    #[must_use]
    pub fn from_target(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.contains("t.me/") {
            return Self::parse(raw);
        }
        if let Ok(channel_id) = raw.parse::<i64>() {
            return Some(Self::Private {
                channel_id,
                post: None,
            });
        }
        let alias = raw.strip_prefix('@').unwrap_or(raw);
        RE_ALIAS.is_match(alias).then(|| Self::Public {
            username: alias.to_string(),
            post: None,
        })
    }

    /// Reference accepted by the transport
    #[must_use]
    pub fn chat_ref(&self) -> ChatRef {
        match self {
            Self::Invite { url } => ChatRef::Invite(url.clone()),
            Self::Private { channel_id, .. } => ChatRef::Id(*channel_id),
            Self::Public { username, .. } => ChatRef::Username(username.clone()),
        }
    }

    /// Targeted post id
    #[must_use]
    pub const fn post(&self) -> Option<MessageId> {
        match self {
            Self::Invite { .. } => None,
            Self::Private { post, .. } | Self::Public { post, .. } => *post,
        }
    }

    /// Whether resolution goes through a join
    #[must_use]
    pub const fn is_invite(&self) -> bool {
        matches!(self, Self::Invite { .. })
    }

    /// Canonical URL of this link
    #[must_use]
    pub fn to_url(&self) -> String {
        match self {
            Self::Invite { url } => url.clone(),
            Self::Private { channel_id, post } => {
                let bare = channel_id.to_string();
                let bare = bare.strip_prefix("-100").unwrap_or(&bare);
                match post {
                    Some(post) => format!("https://t.me/c/{bare}/{post}"),
                    None => format!("https://t.me/c/{bare}"),
                }
            }
            Self::Public { username, post } => match post {
                Some(post) => format!("https://t.me/{username}/{post}"),
                None => format!("https://t.me/{username}"),
            },
        }
    }

    /// Link to the post right after this one in the same chat
    #[must_use]
    pub fn successor(&self) -> Option<Self> {
        let next = self.post()?.checked_add(1)?;
        match self {
            Self::Invite { .. } => None,
            Self::Private { channel_id, .. } => Some(Self::Private {
                channel_id: *channel_id,
                post: Some(next),
            }),
            Self::Public { username, .. } => Some(Self::Public {
                username: username.clone(),
                post: Some(next),
            }),
        }
    }
}

/// A bot link: `t.me/<bot>[?start=<param>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeepLink {
    /// Bot alias without `@`
    pub bot: String,
    /// Opaque start parameter
    pub param: Option<String>,
}

impl DeepLink {
    /// Parse a bot link; the `start` parameter is optional
    #[must_use]
    pub fn parse(url: &str) -> Option<Self> {
        let bot = tme_path(url)?.split('/').next()?;
        if !RE_ALIAS.is_match(bot) || matches!(bot, "c" | "s" | "joinchat") {
            return None;
        }
        let param = query_param(url, "start")
            .filter(|param| !param.is_empty())
            .map(ToString::to_string);
        Some(Self {
            bot: bot.to_string(),
            param,
        })
    }

    /// Start command sent to the bot
    #[must_use]
    pub fn start_command(&self) -> String {
        match &self.param {
            Some(param) => format!("/start {param}"),
            None => "/start".to_string(),
        }
    }

    /// Chat reference of the bot
    #[must_use]
    pub fn chat_ref(&self) -> ChatRef {
        ChatRef::Username(self.bot.clone())
    }
}

/// Explicit "next post" link on a catalog post: a URL button or hidden text
/// link whose label matches one of `keywords`
#[must_use]
pub fn find_next_post_link(message: &Message, keywords: &[String]) -> Option<ChatLink> {
    let from_buttons = message.iter_buttons().find_map(|button| match &button.action {
        ButtonAction::Url(url) if matches_any(&button.text, keywords) => ChatLink::parse(url),
        _ => None,
    });
    if from_buttons.is_some() {
        return from_buttons;
    }

    message.entities.iter().find_map(|entity| match &entity.kind {
        EntityKind::TextLink { url } if matches_any(&message.entity_text(entity), keywords) => {
            ChatLink::parse(url)
        }
        _ => None,
    })
}
