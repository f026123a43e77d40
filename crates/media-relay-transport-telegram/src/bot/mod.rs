/// Command handlers
pub mod handlers;
/// Resilient messaging with automatic retry for Telegram API operations
pub mod resilient;
/// Progress sink editing the status message
pub mod sink;
/// Text rendering of progress and status
pub mod views;
