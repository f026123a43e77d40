use super::collector::{CollectEnd, FileCollector};
use super::{ScanContext, ScanError};
use crate::links::DeepLink;
use crate::transport::{Button, ButtonAction, ChatRef, Message, TransportError};
use tracing::{info, warn};

/// Lifecycle of a delivery session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Not started
    Idle,
    /// Start message sent or callback pressed
    Started,
    /// Poll loop running
    Collecting,
    /// Poll loop finished with files, or on a stop
    Completed,
    /// Poll loop hit the inactivity timeout without a single file
    TimedOut,
    /// The run was cancelled
    Cancelled,
}

/// How a delivery bot is reached
#[derive(Debug, Clone, PartialEq, Eq)]
enum Trigger {
    /// `/start <param>` sent to a bot alias
    DeepLink(DeepLink),
    /// Callback pressed on the menu message
    Callback(Vec<u8>),
}

/// Drives one delivery bot handshake and the collection that follows
pub struct BotInteractionSession<'a> {
    ctx: &'a ScanContext,
    menu: &'a Message,
    label: String,
    trigger: Option<Trigger>,
    phase: SessionPhase,
}

impl<'a> BotInteractionSession<'a> {
    /// Session for an option button of `menu`
    #[must_use]
    pub fn new(ctx: &'a ScanContext, menu: &'a Message, button: &Button) -> Self {
        let trigger = match &button.action {
            ButtonAction::Url(url) => DeepLink::parse(url).map(Trigger::DeepLink),
            ButtonAction::Callback(data) => Some(Trigger::Callback(data.clone())),
            ButtonAction::Other => None,
        };
        Self {
            ctx,
            menu,
            label: button.text.clone(),
            trigger,
            phase: SessionPhase::Idle,
        }
    }

    /// Current phase
    #[must_use]
    pub const fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Start the bot and collect until inactivity or stop
    ///
    /// Returns the final phase. `Completed` and `TimedOut` both count as an
    /// attempted option; `Idle` means the bot could not be started.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Cancelled`] after moving to `Cancelled`, and any
    /// other aborting error unchanged.
    pub async fn run(&mut self) -> Result<SessionPhase, ScanError> {
        match self.drive().await {
            Ok(phase) => Ok(phase),
            Err(ScanError::Cancelled) => {
                self.phase = SessionPhase::Cancelled;
                Err(ScanError::Cancelled)
            }
            Err(e) => Err(e),
        }
    }

    async fn drive(&mut self) -> Result<SessionPhase, ScanError> {
        let Some(trigger) = self.trigger.clone() else {
            warn!(option = %self.label, "Option button cannot be pressed");
            return Ok(self.phase);
        };

        // Raised before the start so a fast reply is not missed
        let _waiting = self.ctx.feed.begin_waiting();

        let source = match self.start(&trigger).await {
            Ok(source) => source,
            Err(e) if e.is_abort() => return Err(e),
            Err(e) => {
                warn!(option = %self.label, error = %e, "Delivery start failed");
                return Ok(self.phase);
            }
        };
        self.phase = SessionPhase::Started;

        let settle = match trigger {
            Trigger::DeepLink(_) => self.ctx.timings.bot_start,
            Trigger::Callback(_) => self.ctx.timings.button_click,
        };
        self.ctx.control.sleep(settle).await?;

        self.phase = SessionPhase::Collecting;
        let outcome = FileCollector::new(self.ctx, source).run().await?;

        self.phase = if outcome.end == CollectEnd::Inactivity && outcome.files == 0 {
            SessionPhase::TimedOut
        } else {
            SessionPhase::Completed
        };
        info!(
            option = %self.label,
            files = outcome.files,
            stopped = outcome.end == CollectEnd::Stopped,
            "Delivery session finished"
        );
        Ok(self.phase)
    }

    /// Issue the start; returns the chat to poll, if any
    async fn start(&self, trigger: &Trigger) -> Result<Option<ChatRef>, ScanError> {
        let ctx = self.ctx;
        let transport = ctx.transport();
        match trigger {
            Trigger::DeepLink(link) => {
                let bot = link.chat_ref();
                let command = link.start_command();
                info!(bot = %bot, command = %command, "Starting delivery bot");
                let (bot_ref, text) = (&bot, command.as_str());
                ctx.guard
                    .call(&ctx.control, "send_message", move || {
                        transport.send_message(bot_ref, text)
                    })
                    .await?;
                Ok(Some(bot))
            }
            Trigger::Callback(data) => {
                info!(option = %self.label, "Pressing option callback");
                let menu = self.menu;
                let data = data.as_slice();
                let clicked = ctx
                    .guard
                    .call(&ctx.control, "click_callback", move || {
                        transport.click_callback(menu, data)
                    })
                    .await;
                match clicked {
                    Ok(()) | Err(ScanError::Transport(TransportError::NotModified)) => Ok(None),
                    Err(e) => Err(e),
                }
            }
        }
    }
}
