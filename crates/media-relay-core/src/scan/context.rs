use super::state::ScanState;
use super::RunControl;
use crate::config::{Keywords, ScanLimits, ScanTimings};
use crate::dedup::DedupStore;
use crate::rate_limit::RateLimitGuard;
use crate::transport::{ChatRef, ChatTransport, DeliveryFeed, Message, MessageId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Everything the stages of one run share
///
/// Built once per connection by the runner and borrowed by every stage.
pub struct ScanContext {
    pub(crate) transport: Arc<dyn ChatTransport>,
    pub(crate) feed: DeliveryFeed,
    pub(crate) deliveries: tokio::sync::Mutex<mpsc::Receiver<Message>>,
    pub(crate) store: Arc<DedupStore>,
    pub(crate) guard: RateLimitGuard,
    pub(crate) control: RunControl,
    pub(crate) catalog: ChatRef,
    pub(crate) destination: ChatRef,
    pub(crate) keywords: Keywords,
    pub(crate) timings: ScanTimings,
    pub(crate) limits: ScanLimits,
    pub(crate) state: ScanState,
    seen: Mutex<HashMap<(i64, MessageId), i64>>,
}

impl ScanContext {
    /// Context with default keywords, timings and limits and no failover
    #[must_use]
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        store: Arc<DedupStore>,
        catalog: ChatRef,
        destination: ChatRef,
        control: RunControl,
    ) -> Self {
        let (feed, deliveries) = DeliveryFeed::channel();
        let limits = ScanLimits::default();
        Self {
            transport,
            feed,
            deliveries: tokio::sync::Mutex::new(deliveries),
            store,
            guard: RateLimitGuard::new(
                limits.flood_wait_threshold_secs,
                limits.auto_switch_session,
                false,
            ),
            control,
            catalog,
            destination,
            keywords: Keywords::default(),
            timings: ScanTimings::default(),
            limits,
            state: ScanState::detached(),
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Use the delivery feed the transport was connected with
    #[must_use]
    pub fn with_feed(mut self, feed: DeliveryFeed, deliveries: mpsc::Receiver<Message>) -> Self {
        self.feed = feed;
        self.deliveries = tokio::sync::Mutex::new(deliveries);
        self
    }

    /// Override the rate-limit guard
    #[must_use]
    pub fn with_guard(mut self, guard: RateLimitGuard) -> Self {
        self.guard = guard;
        self
    }

    /// Override the keyword lists
    #[must_use]
    pub fn with_keywords(mut self, keywords: Keywords) -> Self {
        self.keywords = keywords;
        self
    }

    /// Override the timings
    #[must_use]
    pub fn with_timings(mut self, timings: ScanTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Override the limits
    #[must_use]
    pub fn with_limits(mut self, limits: ScanLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Publish status and progress through `state`
    #[must_use]
    pub fn with_state(mut self, state: ScanState) -> Self {
        self.state = state;
        self
    }

    /// Run-wide state
    #[must_use]
    pub const fn state(&self) -> &ScanState {
        &self.state
    }

    /// Delivery feed handed to the transport
    #[must_use]
    pub const fn feed(&self) -> &DeliveryFeed {
        &self.feed
    }

    /// Stop and cancel signals
    #[must_use]
    pub const fn control(&self) -> &RunControl {
        &self.control
    }

    pub(crate) fn transport(&self) -> &dyn ChatTransport {
        self.transport.as_ref()
    }

    /// Record `timestamp` for a message; `false` if it is not newer than the
    /// last one seen
    pub(crate) fn observe(&self, chat_id: i64, id: MessageId, timestamp: i64) -> bool {
        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match seen.get(&(chat_id, id)) {
            Some(&last) if timestamp <= last => false,
            _ => {
                seen.insert((chat_id, id), timestamp);
                true
            }
        }
    }
}
