//! Chat resolution
//!
//! Turns an item link into an accessible chat, joining it when needed.

use crate::links::ChatLink;
use crate::scan::{ScanContext, ScanError};
use crate::transport::{ChatInfo, ChatRef, MessageId, TransportError};
use tracing::{info, warn};

/// An item chat the account can read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChat {
    /// Stable numeric id
    pub id: i64,
    /// Reference used for every later call
    pub chat_ref: ChatRef,
    /// Display title
    pub title: String,
    /// Pinned message, if any
    pub pinned_message_id: Option<MessageId>,
}

impl From<ChatInfo> for ResolvedChat {
    fn from(info: ChatInfo) -> Self {
        Self {
            id: info.id,
            chat_ref: ChatRef::Id(info.id),
            title: info.title,
            pinned_message_id: info.pinned_message_id,
        }
    }
}

/// Resolves item links, joining chats where membership is required
pub struct ChannelResolver<'a> {
    ctx: &'a ScanContext,
}

impl<'a> ChannelResolver<'a> {
    /// Resolver over the transport of `ctx`
    #[must_use]
    pub const fn new(ctx: &'a ScanContext) -> Self {
        Self { ctx }
    }

    /// Resolve `link` into an accessible chat
    ///
    /// `Ok(None)` means the item cannot be reached in this run; it is skipped
    /// and left unmarked.
    ///
    /// # Errors
    ///
    /// Returns aborting [`ScanError`]s only.
    pub async fn resolve(&self, link: &ChatLink) -> Result<Option<ResolvedChat>, ScanError> {
        let chat_ref = link.chat_ref();
        let resolved = if link.is_invite() {
            self.resolve_invite(&chat_ref).await?
        } else {
            self.resolve_direct(&chat_ref).await?
        };

        if let Some(chat) = &resolved {
            info!(chat = %chat.title, chat_id = chat.id, "Chat resolved");
            self.ctx.control.sleep(self.ctx.timings.resolve_settle).await?;
        }
        Ok(resolved)
    }

    async fn resolve_invite(&self, chat: &ChatRef) -> Result<Option<ResolvedChat>, ScanError> {
        match self.join(chat).await {
            Ok(info) => Ok(Some(info.into())),
            Err(ScanError::Transport(TransportError::AlreadyParticipant)) => {
                self.lookup(chat).await
            }
            Err(e) if e.is_abort() => Err(e),
            Err(e) => {
                warn!(chat = %chat, error = %e, "Could not join via invite");
                Ok(None)
            }
        }
    }

    async fn resolve_direct(&self, chat: &ChatRef) -> Result<Option<ResolvedChat>, ScanError> {
        match self.get_chat(chat).await {
            Ok(info) => return Ok(Some(info.into())),
            Err(ScanError::Transport(TransportError::MembershipRequired)) => {}
            Err(e) if e.is_abort() => return Err(e),
            Err(e) => {
                warn!(chat = %chat, error = %e, "Could not access chat");
                return Ok(None);
            }
        }

        info!(chat = %chat, "Membership required, joining");
        match self.join(chat).await {
            Ok(_) | Err(ScanError::Transport(TransportError::AlreadyParticipant)) => {}
            Err(e) if e.is_abort() => return Err(e),
            Err(e) => {
                warn!(chat = %chat, error = %e, "Could not join chat");
                return Ok(None);
            }
        }
        self.lookup(chat).await
    }

    /// One metadata fetch; non-aborting failures become `None`
    async fn lookup(&self, chat: &ChatRef) -> Result<Option<ResolvedChat>, ScanError> {
        match self.get_chat(chat).await {
            Ok(info) => Ok(Some(info.into())),
            Err(e) if e.is_abort() => Err(e),
            Err(e) => {
                warn!(chat = %chat, error = %e, "Chat lookup failed");
                Ok(None)
            }
        }
    }

    async fn get_chat(&self, chat: &ChatRef) -> Result<ChatInfo, ScanError> {
        let transport = self.ctx.transport();
        self.ctx
            .guard
            .call(&self.ctx.control, "get_chat", move || transport.get_chat(chat))
            .await
    }

    async fn join(&self, chat: &ChatRef) -> Result<ChatInfo, ScanError> {
        let transport = self.ctx.transport();
        let info = self
            .ctx
            .guard
            .call(&self.ctx.control, "join_chat", move || transport.join_chat(chat))
            .await?;
        info!(chat = %info.title, "Joined chat");
        self.ctx.control.sleep(self.ctx.timings.after_join).await?;
        Ok(info)
    }
}
