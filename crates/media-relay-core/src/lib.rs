#![deny(missing_docs)]
//! Media relay core library.
//!
//! Crawls a catalog channel, walks each item's menu, drives delivery bots and
//! forwards the media they send to a single destination chat.

/// Settings and tunable constants.
pub mod config;
/// Append-only ledgers of completed work.
pub mod dedup;
/// Link extraction and parsing.
pub mod links;
/// Menu lookup and button matching.
pub mod menu;
/// Progress events emitted during a scan.
pub mod progress;
/// Rate-limit classification and guarded calls.
pub mod rate_limit;
/// Chat resolution and joining.
pub mod resolver;
/// Scan pipeline: orchestrator, bot sessions and file collection.
pub mod scan;
/// Credential pool with round-robin failover.
pub mod session_pool;
/// Transport capability interface and domain model.
pub mod transport;

#[cfg(test)]
pub mod testing;

pub use config::RelaySettings;
pub use dedup::{DedupStore, LedgerError};
pub use progress::{ProgressEvent, ProgressState};
pub use rate_limit::{RateLimitDecision, RateLimitGuard};
pub use scan::{RunControl, ScanError, ScanRunner, ScanStatus};
pub use session_pool::{SessionCredential, SessionPool};
pub use transport::{ChatRef, ChatTransport, DeliveryFeed, TransportConnector, TransportError};
