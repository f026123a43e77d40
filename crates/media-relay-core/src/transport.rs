//! Transport capability interface
//!
//! The relay never speaks the chat wire protocol itself. Everything it needs
//! from a user-account client is expressed by [`ChatTransport`], and a fresh
//! connection per credential is obtained through [`TransportConnector`].

use crate::session_pool::SessionCredential;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Message identifier within a chat.
pub type MessageId = i32;

/// Capacity of the real-time delivery channel.
const DELIVERY_FEED_CAPACITY: usize = 256;

/// Errors raised by the transport collaborator
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The service asked the caller to back off for `wait_secs`
    #[error("rate limited, required wait: {wait_secs}s")]
    RateLimited {
        /// Required wait in seconds
        wait_secs: u64,
    },
    /// Join was attempted on a chat the account already belongs to
    #[error("already a participant")]
    AlreadyParticipant,
    /// Chat metadata is only visible to members
    #[error("membership required")]
    MembershipRequired,
    /// Click or edit produced no change
    #[error("message not modified")]
    NotModified,
    /// Callback payload was rejected
    #[error("invalid callback data")]
    InvalidCallbackData,
    /// Chat, user or message does not exist
    #[error("not found: {0}")]
    NotFound(String),
    /// Network failure, worth one retry
    #[error("network error: {0}")]
    Network(String),
    /// Anything else
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether one retry of the same call is reasonable
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// Reference to a chat as accepted by the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatRef {
    /// Numeric chat identifier (channels use the `-100` prefix)
    Id(i64),
    /// Public alias without the leading `@`
    Username(String),
    /// Full invite URL
    Invite(String),
}

impl ChatRef {
    /// Parse a configured chat reference: `@alias`, `alias`, `-100123` or a `t.me` link.
    #[must_use]
    pub fn from_setting(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(id) = raw.parse::<i64>() {
            return Some(Self::Id(id));
        }
        if raw.contains("t.me/") {
            return crate::links::ChatLink::parse(raw).map(|link| link.chat_ref());
        }
        Some(Self::Username(raw.trim_start_matches('@').to_string()))
    }
}

impl fmt::Display for ChatRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Username(name) => write!(f, "@{name}"),
            Self::Invite(url) => write!(f, "{url}"),
        }
    }
}

/// Chat metadata returned by a lookup or a join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatInfo {
    /// Stable numeric identifier
    pub id: i64,
    /// Display title
    pub title: String,
    /// Pinned message, if any
    pub pinned_message_id: Option<MessageId>,
}

/// Kind of a text annotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKind {
    /// Hidden URL behind a text span
    TextLink {
        /// Target URL
        url: String,
    },
    /// Visible URL in the body
    Url,
    /// Formatting or anything not relevant to navigation
    Other,
}

/// Text annotation with offsets in UTF-16 code units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEntity {
    /// Start offset in UTF-16 code units
    pub offset: usize,
    /// Length in UTF-16 code units
    pub length: usize,
    /// Annotation kind
    pub kind: EntityKind,
}

/// What an inline button does when pressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonAction {
    /// Opens a URL
    Url(String),
    /// Sends callback data back to the message author
    Callback(Vec<u8>),
    /// Login, switch-inline and other kinds the relay never presses
    Other,
}

/// Inline keyboard button
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    /// Visible label
    pub text: String,
    /// Press behavior
    pub action: ButtonAction,
}

impl Button {
    /// URL button
    #[must_use]
    pub fn url(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: ButtonAction::Url(url.into()),
        }
    }

    /// Callback button
    #[must_use]
    pub fn callback(text: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            text: text.into(),
            action: ButtonAction::Callback(data.into()),
        }
    }
}

/// Media kind attached to a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Video file
    Video,
    /// Generic document
    Document,
    /// Audio file
    Audio,
    /// Photo
    Photo,
    /// Stickers, voice notes and the rest
    Other,
}

/// Media attached to a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Media {
    /// Media kind
    pub kind: MediaKind,
    /// Service-wide stable file identifier
    pub file_unique_id: Option<String>,
    /// Original file name
    pub file_name: Option<String>,
    /// Size in bytes
    pub file_size: Option<u64>,
    /// MIME type
    pub mime_type: Option<String>,
}

impl Media {
    /// Only videos, documents and audio are relayed
    #[must_use]
    pub const fn is_forwardable(&self) -> bool {
        matches!(
            self.kind,
            MediaKind::Video | MediaKind::Document | MediaKind::Audio
        )
    }

    /// Short description for logs
    #[must_use]
    pub fn describe(&self) -> String {
        let kind = match self.kind {
            MediaKind::Video => "Video",
            MediaKind::Document => "Document",
            MediaKind::Audio => "Audio",
            MediaKind::Photo => "Photo",
            MediaKind::Other => "Media",
        };
        #[allow(clippy::cast_precision_loss)]
        let size_mb = self.file_size.unwrap_or(0) as f64 / 1024.0 / 1024.0;
        format!(
            "{kind}: {} ({size_mb:.2} MB)",
            self.file_name.as_deref().unwrap_or("unnamed")
        )
    }
}

/// A chat message as seen by the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message id
    pub id: MessageId,
    /// Chat the message belongs to
    pub chat_id: i64,
    /// Send time
    pub date: DateTime<Utc>,
    /// Last edit time
    pub edit_date: Option<DateTime<Utc>>,
    /// Text or media caption
    pub text: String,
    /// Annotations over `text`
    pub entities: Vec<TextEntity>,
    /// Inline keyboard, row by row
    pub buttons: Vec<Vec<Button>>,
    /// Attached media
    pub media: Option<Media>,
}

impl Message {
    /// Edit time if edited, send time otherwise, in Unix seconds
    #[must_use]
    pub fn edit_timestamp(&self) -> i64 {
        self.edit_date.unwrap_or(self.date).timestamp()
    }

    /// All buttons in presentation order (row by row, left to right)
    pub fn iter_buttons(&self) -> impl Iterator<Item = &Button> {
        self.buttons.iter().flatten()
    }

    /// Whether the message carries an inline keyboard
    #[must_use]
    pub fn has_buttons(&self) -> bool {
        self.buttons.iter().any(|row| !row.is_empty())
    }

    /// Text covered by an entity; offsets are UTF-16 code units
    #[must_use]
    pub fn entity_text(&self, entity: &TextEntity) -> String {
        let units: Vec<u16> = self
            .text
            .encode_utf16()
            .skip(entity.offset)
            .take(entity.length)
            .collect();
        String::from_utf16_lossy(&units)
    }

    /// Forwardable media, if any
    #[must_use]
    pub fn forwardable_media(&self) -> Option<&Media> {
        self.media.as_ref().filter(|media| media.is_forwardable())
    }
}

/// User-account client primitives consumed by the relay
///
/// Every call may fail with [`TransportError::RateLimited`]; callers route
/// those through [`crate::rate_limit::RateLimitGuard`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Fetch chat metadata
    async fn get_chat(&self, chat: &ChatRef) -> Result<ChatInfo, TransportError>;
    /// Join a chat by alias, id or invite link
    async fn join_chat(&self, chat: &ChatRef) -> Result<ChatInfo, TransportError>;
    /// Most recent messages, newest first
    async fn fetch_history(
        &self,
        chat: &ChatRef,
        limit: usize,
    ) -> Result<Vec<Message>, TransportError>;
    /// A single message by id
    async fn fetch_message(
        &self,
        chat: &ChatRef,
        id: MessageId,
    ) -> Result<Option<Message>, TransportError>;
    /// Press a callback button on `message`
    async fn click_callback(&self, message: &Message, data: &[u8]) -> Result<(), TransportError>;
    /// Send a text message
    async fn send_message(&self, chat: &ChatRef, text: &str) -> Result<(), TransportError>;
    /// Forward `message` to `destination`
    async fn forward_message(
        &self,
        message: &Message,
        destination: &ChatRef,
    ) -> Result<(), TransportError>;
    /// Close the connection; calling it twice is harmless
    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Opens one transport connection per credential
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Connect with `credential`; incoming private messages go to `feed`
    async fn connect(
        &self,
        credential: &SessionCredential,
        feed: DeliveryFeed,
    ) -> Result<Arc<dyn ChatTransport>, TransportError>;
}

/// Real-time hookup for incoming private messages
///
/// The transport's update listener pushes every private message here; only
/// messages arriving while a delivery session is waiting are kept.
#[derive(Clone)]
pub struct DeliveryFeed {
    waiting: Arc<AtomicBool>,
    tx: mpsc::Sender<Message>,
}

impl fmt::Debug for DeliveryFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryFeed")
            .field("waiting", &self.is_waiting())
            .finish_non_exhaustive()
    }
}

impl DeliveryFeed {
    /// Create a feed and the receiving end the collector drains
    #[must_use]
    pub fn channel() -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(DELIVERY_FEED_CAPACITY);
        (
            Self {
                waiting: Arc::new(AtomicBool::new(false)),
                tx,
            },
            rx,
        )
    }

    /// Offer an incoming message; returns `true` if it was queued
    pub fn push(&self, message: Message) -> bool {
        if !self.is_waiting() {
            return false;
        }
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Delivery feed dropped a message");
                false
            }
        }
    }

    /// Whether a delivery session is currently waiting
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::Acquire)
    }

    /// Raise the waiting flag until the returned guard drops
    #[must_use]
    pub fn begin_waiting(&self) -> WaitingGuard {
        self.waiting.store(true, Ordering::Release);
        WaitingGuard {
            waiting: Arc::clone(&self.waiting),
        }
    }

    /// Lower the waiting flag; idempotent
    pub fn stop_waiting(&self) {
        self.waiting.store(false, Ordering::Release);
    }
}

/// Lowers the delivery flag when dropped
#[derive(Debug)]
pub struct WaitingGuard {
    waiting: Arc<AtomicBool>,
}

impl Drop for WaitingGuard {
    fn drop(&mut self) {
        self.waiting.store(false, Ordering::Release);
    }
}
