//! Testing helpers and mock utilities.
//!
//! Builders for domain messages and a scan context over a mock transport.

use crate::transport::{Media, MediaKind, Message, MessageId, MockChatTransport};
use chrono::Utc;

/// Plain text message in chat `1`, sent now.
#[must_use]
pub fn message(id: MessageId, text: &str) -> Message {
    Message {
        id,
        chat_id: 1,
        date: Utc::now(),
        edit_date: None,
        text: text.to_string(),
        entities: Vec::new(),
        buttons: Vec::new(),
        media: None,
    }
}

/// Video message with the given unique id and file name.
#[must_use]
pub fn video(id: MessageId, unique_id: &str, file_name: &str) -> Message {
    let mut msg = message(id, "");
    msg.media = Some(Media {
        kind: MediaKind::Video,
        file_unique_id: Some(unique_id.to_string()),
        file_name: Some(file_name.to_string()),
        file_size: Some(1024 * 1024),
        mime_type: Some("video/x-matroska".to_string()),
    });
    msg
}

/// Scan context over `transport` with a throwaway ledger directory.
///
/// Keep the returned directory alive for the duration of the test.
pub async fn scan_context(
    transport: MockChatTransport,
) -> (crate::scan::ScanContext, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = crate::dedup::DedupStore::load(dir.path())
        .await
        .expect("ledgers");
    let ctx = crate::scan::ScanContext::new(
        std::sync::Arc::new(transport),
        std::sync::Arc::new(store),
        crate::transport::ChatRef::Username("catalog".to_string()),
        crate::transport::ChatRef::Username("sink".to_string()),
        crate::scan::RunControl::new(),
    );
    (ctx, dir)
}
