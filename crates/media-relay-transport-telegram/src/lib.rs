#![deny(missing_docs)]
//! Telegram control surface for the media relay.

/// Telegram-specific bot implementation.
pub mod bot;
/// Telegram control settings.
pub mod config;
/// Logging bootstrap with secret redaction.
pub mod logging;
/// Telegram runtime entrypoint.
pub mod runner;
