//! In-memory transport used by the scenario tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use media_relay_core::transport::{
    Button, ChatInfo, ChatRef, ChatTransport, DeliveryFeed, Media, MediaKind, Message, MessageId,
    TransportConnector, TransportError,
};
use media_relay_core::{RelaySettings, SessionCredential};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

pub const CATALOG: &str = "@catalog";
pub const DESTINATION: &str = "@sink";

#[derive(Default)]
struct FakeState {
    /// Chat metadata keyed by the `Display` of the reference
    chats: HashMap<String, ChatInfo>,
    /// Messages per chat, oldest first
    histories: HashMap<String, Vec<Message>>,
    /// Replies appended to the bot history when a start command arrives
    bot_replies: HashMap<String, Vec<Message>>,
    /// Replies pushed to the feed when a callback is clicked
    callback_replies: HashMap<Vec<u8>, Vec<Message>>,
    /// Message edits applied to a chat history when a callback is clicked
    callback_edits: HashMap<Vec<u8>, (String, Message)>,
    /// Errors returned by the next calls of an operation
    failures: HashMap<&'static str, VecDeque<TransportError>>,
    /// Errors returned by every call of an operation
    always: HashMap<&'static str, TransportError>,
    calls: Vec<String>,
    forwarded: Vec<Message>,
    feed: Option<DeliveryFeed>,
}

/// Scripted chat service
#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<FakeState>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        let fake = Self::default();
        fake.add_chat(DESTINATION, -100_999, "Sink");
        Arc::new(fake)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake state poisoned")
    }

    pub fn add_chat(&self, reference: &str, id: i64, title: &str) {
        self.lock().chats.insert(
            reference.to_string(),
            ChatInfo {
                id,
                title: title.to_string(),
                pinned_message_id: None,
            },
        );
    }

    /// Append `message` to the history of `chat`
    pub fn post(&self, chat: &str, message: Message) {
        self.lock()
            .histories
            .entry(chat.to_string())
            .or_default()
            .push(message);
    }

    pub fn reply_to_start(&self, bot: &str, command: &str, replies: Vec<Message>) {
        self.lock()
            .bot_replies
            .insert(format!("{bot} {command}"), replies);
    }

    pub fn reply_to_callback(&self, data: &[u8], replies: Vec<Message>) {
        self.lock().callback_replies.insert(data.to_vec(), replies);
    }

    /// Replace the message with the same id in `chat` once `data` is clicked
    pub fn edit_on_callback(&self, data: &[u8], chat: &str, edited: Message) {
        self.lock()
            .callback_edits
            .insert(data.to_vec(), (chat.to_string(), edited));
    }

    pub fn pin(&self, reference: &str, message_id: MessageId) {
        if let Some(chat) = self.lock().chats.get_mut(reference) {
            chat.pinned_message_id = Some(message_id);
        }
    }

    pub fn fail_next(&self, op: &'static str, error: TransportError) {
        self.lock().failures.entry(op).or_default().push_back(error);
    }

    pub fn fail_always(&self, op: &'static str, error: TransportError) {
        self.lock().always.insert(op, error);
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn calls_to(&self, op: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with(op))
            .collect()
    }

    pub fn forwarded_names(&self) -> Vec<String> {
        self.lock()
            .forwarded
            .iter()
            .filter_map(|m| m.media.as_ref().and_then(|media| media.file_name.clone()))
            .collect()
    }

    fn attach(&self, feed: DeliveryFeed) {
        self.lock().feed = Some(feed);
    }

    fn enter(&self, op: &'static str, detail: String) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.push(format!("{op} {detail}"));
        if let Some(error) = state.always.get(op) {
            return Err(error.clone());
        }
        match state.failures.get_mut(op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    async fn get_chat(&self, chat: &ChatRef) -> Result<ChatInfo, TransportError> {
        self.enter("get_chat", chat.to_string())?;
        self.lock()
            .chats
            .get(&chat.to_string())
            .cloned()
            .ok_or_else(|| TransportError::NotFound(chat.to_string()))
    }

    async fn join_chat(&self, chat: &ChatRef) -> Result<ChatInfo, TransportError> {
        self.enter("join_chat", chat.to_string())?;
        self.lock()
            .chats
            .get(&chat.to_string())
            .cloned()
            .ok_or_else(|| TransportError::NotFound(chat.to_string()))
    }

    async fn fetch_history(
        &self,
        chat: &ChatRef,
        limit: usize,
    ) -> Result<Vec<Message>, TransportError> {
        self.enter("fetch_history", chat.to_string())?;
        let state = self.lock();
        Ok(state
            .histories
            .get(&chat.to_string())
            .map(|history| history.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn fetch_message(
        &self,
        chat: &ChatRef,
        id: MessageId,
    ) -> Result<Option<Message>, TransportError> {
        self.enter("fetch_message", format!("{chat} {id}"))?;
        let state = self.lock();
        Ok(state
            .histories
            .get(&chat.to_string())
            .and_then(|history| history.iter().find(|m| m.id == id).cloned()))
    }

    async fn click_callback(&self, message: &Message, data: &[u8]) -> Result<(), TransportError> {
        self.enter("click_callback", format!("{} {}", message.id, String::from_utf8_lossy(data)))?;
        let (replies, feed) = {
            let mut state = self.lock();
            if let Some((chat, edited)) = state.callback_edits.get(data).cloned() {
                let history = state.histories.entry(chat).or_default();
                match history.iter_mut().find(|m| m.id == edited.id) {
                    Some(slot) => *slot = edited,
                    None => history.push(edited),
                }
            }
            (
                state.callback_replies.get(data).cloned().unwrap_or_default(),
                state.feed.clone(),
            )
        };
        if let Some(feed) = feed {
            for reply in replies {
                let _ = feed.push(stamp(reply));
            }
        }
        Ok(())
    }

    async fn send_message(&self, chat: &ChatRef, text: &str) -> Result<(), TransportError> {
        self.enter("send_message", format!("{chat} {text}"))?;
        let mut state = self.lock();
        let replies = state
            .bot_replies
            .get(&format!("{chat} {text}"))
            .cloned()
            .unwrap_or_default();
        let history = state.histories.entry(chat.to_string()).or_default();
        history.extend(replies.into_iter().map(stamp));
        Ok(())
    }

    async fn forward_message(
        &self,
        message: &Message,
        destination: &ChatRef,
    ) -> Result<(), TransportError> {
        self.enter("forward_message", format!("{} -> {destination}", message.id))?;
        self.lock().forwarded.push(message.clone());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.enter("disconnect", String::new())
    }
}

/// Replies are sent "now", when the bot answers
fn stamp(mut message: Message) -> Message {
    message.date = Utc::now();
    message
}

/// Hands out one scripted transport per credential
pub struct FakeConnector {
    transports: Vec<Arc<FakeTransport>>,
    connects: Mutex<Vec<usize>>,
}

impl FakeConnector {
    pub fn new(transports: Vec<Arc<FakeTransport>>) -> Arc<Self> {
        Arc::new(Self {
            transports,
            connects: Mutex::new(Vec::new()),
        })
    }

    /// One-based session numbers, in connection order
    pub fn connects(&self) -> Vec<usize> {
        self.connects.lock().expect("connects poisoned").clone()
    }
}

#[async_trait]
impl TransportConnector for FakeConnector {
    async fn connect(
        &self,
        credential: &SessionCredential,
        feed: DeliveryFeed,
    ) -> Result<Arc<dyn ChatTransport>, TransportError> {
        self.connects
            .lock()
            .expect("connects poisoned")
            .push(credential.number());
        let transport = self
            .transports
            .get(credential.index())
            .cloned()
            .ok_or_else(|| TransportError::Other("no transport scripted".to_string()))?;
        transport.attach(feed);
        Ok(transport)
    }
}

pub fn settings() -> RelaySettings {
    RelaySettings {
        index_channel: CATALOG.to_string(),
        destination_channel: DESTINATION.to_string(),
        ..RelaySettings::default()
    }
}

pub fn text(chat_id: i64, id: MessageId, body: &str) -> Message {
    Message {
        id,
        chat_id,
        date: Utc::now(),
        edit_date: None,
        text: body.to_string(),
        entities: Vec::new(),
        buttons: Vec::new(),
        media: None,
    }
}

pub fn with_buttons(mut message: Message, buttons: Vec<Button>) -> Message {
    message.buttons = buttons.into_iter().map(|b| vec![b]).collect();
    message
}

pub fn file(chat_id: i64, id: MessageId, unique_id: &str, name: &str) -> Message {
    let mut message = text(chat_id, id, "");
    message.media = Some(Media {
        kind: MediaKind::Document,
        file_unique_id: Some(unique_id.to_string()),
        file_name: Some(name.to_string()),
        file_size: Some(700 * 1024 * 1024),
        mime_type: Some("video/x-matroska".to_string()),
    });
    message
}

/// Catalog post linking to one item chat
pub fn catalog_post(id: MessageId, name: &str, alias: &str) -> Message {
    with_buttons(
        text(-100_1, id, "New this week"),
        vec![Button::url(name, format!("https://t.me/{alias}"))],
    )
}

/// Item chat `alias` with a one-option menu served by `FileBot`
pub fn item_with_bot_menu(fake: &FakeTransport, alias: &str, chat_id: i64, param: &str) {
    fake.add_chat(&format!("@{alias}"), chat_id, alias);
    fake.post(
        &chat_id.to_string(),
        with_buttons(
            text(chat_id, 10, "Pick a season"),
            vec![Button::url(
                "Season 1",
                format!("https://t.me/FileBot?start={param}"),
            )],
        ),
    );
}
