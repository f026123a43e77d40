use super::{skip_on_error, ScanContext, ScanError};
use crate::config::STALE_GRACE_SECS;
use crate::dedup::FileFingerprint;
use crate::links::DeepLink;
use crate::menu::find_button;
use crate::progress::ProgressEvent;
use crate::transport::{Button, ButtonAction, ChatRef, Media, Message, TransportError};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Why collection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectEnd {
    /// Nothing happened for the inactivity timeout
    Inactivity,
    /// A stop was requested
    Stopped,
}

/// Result of one collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectOutcome {
    /// Files forwarded
    pub files: usize,
    /// Exit reason
    pub end: CollectEnd,
}

/// Polls a delivery source and forwards the media it produces
pub struct FileCollector<'a> {
    ctx: &'a ScanContext,
    source: Option<ChatRef>,
    started_at: DateTime<Utc>,
    forwarded: usize,
}

impl<'a> FileCollector<'a> {
    /// Collector reading `source`, or only the real-time feed when `None`
    #[must_use]
    pub fn new(ctx: &'a ScanContext, source: Option<ChatRef>) -> Self {
        Self {
            ctx,
            source,
            started_at: Utc::now(),
            forwarded: 0,
        }
    }

    /// Poll until inactivity or stop
    ///
    /// # Errors
    ///
    /// Returns aborting [`ScanError`]s: cancellation, failover or a ledger
    /// write failure.
    pub async fn run(mut self) -> Result<CollectOutcome, ScanError> {
        let timeout = self.ctx.timings.inactivity_timeout;
        let tick = self.ctx.timings.poll_tick;
        let mut last_activity = Instant::now();

        info!(
            source = %self.source.as_ref().map_or_else(|| "feed".to_string(), ToString::to_string),
            timeout_secs = timeout.as_secs_f64(),
            "Collecting files"
        );

        let end = loop {
            if self.ctx.control.stop_requested() {
                break CollectEnd::Stopped;
            }
            if last_activity.elapsed() > timeout {
                break CollectEnd::Inactivity;
            }

            if self.tick().await? {
                last_activity = Instant::now();
            }

            self.ctx.control.sleep(tick).await?;
        };

        info!(files = self.forwarded, end = ?end, "File collection finished");
        Ok(CollectOutcome {
            files: self.forwarded,
            end,
        })
    }

    /// Drain the feed, then poll the source; `true` on any activity
    async fn tick(&mut self) -> Result<bool, ScanError> {
        let mut activity = false;

        let pushed: Vec<Message> = {
            let mut rx = self.ctx.deliveries.lock().await;
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };
        for message in pushed {
            activity |= self.process(message).await?;
        }

        if let Some(source) = &self.source {
            let transport = self.ctx.transport();
            let window = self.ctx.limits.poll_window;
            let fetched = self
                .ctx
                .guard
                .call(&self.ctx.control, "fetch_history", move || {
                    transport.fetch_history(source, window)
                })
                .await;

            if let Some(mut history) = skip_on_error(fetched, "Delivery poll")? {
                // Service returns newest first
                history.reverse();
                for message in history {
                    activity |= self.process(message).await?;
                }
            }
        }

        Ok(activity)
    }

    async fn process(&mut self, message: Message) -> Result<bool, ScanError> {
        if !self
            .ctx
            .observe(message.chat_id, message.id, message.edit_timestamp())
        {
            return Ok(false);
        }

        let grace_start = self.started_at - ChronoDuration::seconds(STALE_GRACE_SECS);
        if message.edit_date.is_none() && message.date < grace_start {
            return Ok(false);
        }

        let mut activity = false;
        if let Some(media) = message.forwardable_media() {
            activity = self.handle_media(&message, media).await?;
        }

        let keywords = &self.ctx.keywords;
        if let Some(button) = find_button(&message, &keywords.send_all) {
            info!(button = %button.text, "Clicking send-all");
            self.press(&message, button, self.ctx.timings.button_click).await?;
            return Ok(true);
        }
        if let Some(button) = find_button(&message, &keywords.next_page) {
            info!(button = %button.text, "Clicking next page");
            self.press(&message, button, self.ctx.timings.after_next_page).await?;
            return Ok(true);
        }

        Ok(activity)
    }

    async fn handle_media(&mut self, message: &Message, media: &Media) -> Result<bool, ScanError> {
        let ctx = self.ctx;
        let fingerprint = FileFingerprint::of(media);
        if ctx.store.is_known(&fingerprint).await {
            debug!(file = %media.describe(), "Already forwarded, skipping");
            return Ok(false);
        }

        // Unnamed files cannot be matched against the item and are forwarded
        if let Some(name) = media.file_name.as_deref() {
            if !ctx.state.is_related(name) {
                info!(
                    file = %name,
                    item = ?ctx.state.current_item(),
                    "Unrelated file, skipping"
                );
                return Ok(false);
            }
        }

        let transport = ctx.transport();
        let destination = &ctx.destination;
        let forwarded = ctx
            .guard
            .call(&ctx.control, "forward_message", move || {
                transport.forward_message(message, destination)
            })
            .await;
        if skip_on_error(forwarded, "Forward")?.is_none() {
            return Ok(false);
        }

        ctx.store.record(&fingerprint).await?;
        self.forwarded += 1;
        let files = ctx.state.file_forwarded();
        info!(files, file = %media.describe(), "Forwarded");
        ctx.state
            .emit(ProgressEvent::FileForwarded {
                file_name: media.file_name.clone().unwrap_or_else(|| "unnamed".to_string()),
                files,
            });

        ctx.control.sleep(ctx.timings.after_forward).await?;
        Ok(true)
    }

    async fn press(&self, message: &Message, button: &Button, delay: Duration) -> Result<(), ScanError> {
        press_button(self.ctx, message, button).await?;
        self.ctx.control.sleep(delay).await
    }
}

/// Press `button` on `message`
///
/// Callback buttons are clicked in place; bot link buttons send the start
/// command to the bot. "Not modified" and other skippable failures are
/// logged and ignored.
pub(super) async fn press_button(
    ctx: &ScanContext,
    message: &Message,
    button: &Button,
) -> Result<(), ScanError> {
    let transport = ctx.transport();
    let result = match &button.action {
        ButtonAction::Callback(data) => {
            let data = data.as_slice();
            ctx.guard
                .call(&ctx.control, "click_callback", move || {
                    transport.click_callback(message, data)
                })
                .await
        }
        ButtonAction::Url(url) => match DeepLink::parse(url) {
            Some(link) => {
                let bot = link.chat_ref();
                let command = link.start_command();
                let (bot, command) = (&bot, command.as_str());
                ctx.guard
                    .call(&ctx.control, "send_message", move || {
                        transport.send_message(bot, command)
                    })
                    .await
            }
            None => Ok(()),
        },
        ButtonAction::Other => Ok(()),
    };

    match result {
        Ok(()) | Err(ScanError::Transport(TransportError::NotModified)) => Ok(()),
        Err(e) if e.is_abort() => Err(e),
        Err(e) => {
            warn!(button = %button.text, error = %e, "Button press failed");
            Ok(())
        }
    }
}
