use super::bot_session::{BotInteractionSession, SessionPhase};
use super::collector::press_button;
use super::{skip_on_error, ScanContext, ScanError};
use crate::links::{extract_links, find_next_post_link, ChatLink, NavigationLink};
use crate::menu::{find_button, season_buttons, MenuLocator};
use crate::progress::ProgressEvent;
use crate::resolver::{ChannelResolver, ResolvedChat};
use crate::transport::{Button, ChatRef, Message, MessageId};
use tracing::{debug, info, warn};

/// Totals of one orchestrator run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Items marked done
    pub items: usize,
    /// Catalog posts processed
    pub posts: usize,
    /// Whether a stop ended the run early
    pub stopped: bool,
}

/// How an item ended
enum ItemOutcome {
    Ignored,
    Skipped,
    Interrupted,
    Completed,
}

/// Sequences resolution, menu lookup and delivery sessions over the catalog
pub struct ScanOrchestrator<'a> {
    ctx: &'a ScanContext,
    report: RunReport,
    items_started: usize,
    /// Next-post link of the current chained post; navigation, not an item
    chain_link: Option<ChatLink>,
}

impl<'a> ScanOrchestrator<'a> {
    /// Orchestrator over `ctx`
    #[must_use]
    pub const fn new(ctx: &'a ScanContext) -> Self {
        Self {
            ctx,
            report: RunReport {
                items: 0,
                posts: 0,
                stopped: false,
            },
            items_started: 0,
            chain_link: None,
        }
    }

    /// Process the catalog history, or one targeted post and its successors
    ///
    /// # Errors
    ///
    /// Returns aborting [`ScanError`]s; per-item failures are skipped.
    pub async fn run(mut self, target: Option<&str>) -> Result<RunReport, ScanError> {
        match target {
            Some(target) => self.run_chain(target).await?,
            None => {
                let messages = self.catalog_history().await?;
                self.process_posts(messages).await?;
            }
        }
        self.report.stopped = self.ctx.control.stop_requested();
        info!(
            items = self.report.items,
            posts = self.report.posts,
            stopped = self.report.stopped,
            "Scan finished"
        );
        Ok(self.report)
    }

    fn limit_reached(&self) -> bool {
        let max = self.ctx.limits.max_items;
        max > 0 && self.report.items >= max
    }

    fn should_halt(&self) -> bool {
        if self.ctx.control.stop_requested() {
            info!("Stop requested");
            return true;
        }
        if self.limit_reached() {
            info!(max = self.ctx.limits.max_items, "Item limit reached");
            return true;
        }
        false
    }

    async fn catalog_history(&self) -> Result<Vec<Message>, ScanError> {
        let ctx = self.ctx;
        let transport = ctx.transport();
        let catalog = &ctx.catalog;
        let limit = ctx.limits.catalog_history;

        let history = ctx
            .guard
            .call(&ctx.control, "fetch_history", move || {
                transport.fetch_history(catalog, limit)
            })
            .await;
        match history {
            Ok(messages) => {
                info!(catalog = %catalog, messages = messages.len(), "Catalog history fetched");
                Ok(messages)
            }
            Err(e) if e.is_abort() => Err(e),
            Err(e) if ctx.control.stop_requested() => {
                info!(error = %e, "Stop requested during catalog fetch");
                Ok(Vec::new())
            }
            Err(e) => Err(ScanError::Fatal(format!("catalog {catalog} unavailable: {e}"))),
        }
    }

    /// Resolve a `/scan` argument into a post link
    fn parse_target(&self, target: &str) -> Result<ChatLink, ScanError> {
        if let Ok(post) = target.trim().parse::<MessageId>() {
            return match &self.ctx.catalog {
                ChatRef::Id(channel_id) => Ok(ChatLink::Private {
                    channel_id: *channel_id,
                    post: Some(post),
                }),
                ChatRef::Username(username) => Ok(ChatLink::Public {
                    username: username.clone(),
                    post: Some(post),
                }),
                ChatRef::Invite(_) => Err(ScanError::Fatal(
                    "catalog is configured by invite; pass a full post link".to_string(),
                )),
            };
        }

        ChatLink::parse(target)
            .filter(|link| link.post().is_some())
            .ok_or_else(|| ScanError::Fatal(format!("not a catalog post link: {target}")))
    }

    async fn run_chain(&mut self, target: &str) -> Result<(), ScanError> {
        let mut link = self.parse_target(target)?;
        let max_posts = if self.ctx.limits.auto_chain {
            self.ctx.limits.max_chain_posts
        } else {
            1
        };

        for position in 1..=max_posts {
            if position > 1 {
                info!(link = %link.to_url(), position, "Following next post");
                self.ctx
                    .state
                    .emit(ProgressEvent::ChainAdvanced {
                        link: link.to_url(),
                        position,
                    });
            }

            let Some(post) = self.fetch_post(&link).await? else {
                info!(link = %link.to_url(), "Post not found, chain ends");
                break;
            };
            let next = find_next_post_link(&post, &self.ctx.keywords.next_post)
                .filter(|next| next.post().is_some());
            self.chain_link.clone_from(&next);

            self.process_posts(vec![post]).await?;
            if self.should_halt() {
                break;
            }

            match next.or_else(|| link.successor()) {
                Some(next) => link = next,
                None => break,
            }
        }
        Ok(())
    }

    async fn fetch_post(&self, link: &ChatLink) -> Result<Option<Message>, ScanError> {
        let Some(id) = link.post() else {
            return Ok(None);
        };
        let ctx = self.ctx;
        let transport = ctx.transport();
        let chat = link.chat_ref();
        let chat_ref = &chat;

        let fetched = ctx
            .guard
            .call(&ctx.control, "fetch_message", move || {
                transport.fetch_message(chat_ref, id)
            })
            .await;
        Ok(skip_on_error(fetched, "Catalog post fetch")?.flatten())
    }

    async fn process_posts(&mut self, posts: Vec<Message>) -> Result<(), ScanError> {
        for post in posts {
            if self.should_halt() {
                return Ok(());
            }
            self.report.posts += 1;

            let links = extract_links(&post);
            if links.is_empty() {
                continue;
            }
            debug!(message_id = post.id, links = links.len(), "Catalog post");

            for link in links {
                if self.should_halt() {
                    return Ok(());
                }
                if self.is_chain_link(&link) {
                    continue;
                }
                match self.process_item(&link).await? {
                    ItemOutcome::Ignored | ItemOutcome::Skipped => {}
                    ItemOutcome::Interrupted => return Ok(()),
                    ItemOutcome::Completed => {
                        self.report.items += 1;
                        self.ctx.control.sleep(self.ctx.timings.inter_item).await?;
                    }
                }
            }
        }
        Ok(())
    }

    fn is_chain_link(&self, link: &NavigationLink) -> bool {
        self.chain_link
            .as_ref()
            .is_some_and(|chain| ChatLink::parse(&link.url).as_ref() == Some(chain))
    }

    fn skip_item(&self, link: &NavigationLink, reason: &str) -> ItemOutcome {
        warn!(item = %link.name, url = %link.url, reason, "Item skipped");
        self.ctx
            .state
            .emit(ProgressEvent::ItemSkipped {
                name: link.name.clone(),
                reason: reason.to_string(),
            });
        self.ctx.state.set_item(None);
        ItemOutcome::Skipped
    }

    async fn process_item(&mut self, link: &NavigationLink) -> Result<ItemOutcome, ScanError> {
        let ctx = self.ctx;
        if ctx.store.is_item_done(&link.url).await {
            debug!(item = %link.name, "Already processed");
            return Ok(ItemOutcome::Ignored);
        }

        let Some(chat_link) = ChatLink::parse(&link.url) else {
            debug!(url = %link.url, "Malformed link");
            return Ok(ItemOutcome::Ignored);
        };

        self.items_started += 1;
        info!(item = %link.name, url = %link.url, "Processing item");
        ctx.state.set_item(Some(&link.name));
        ctx.state
            .emit(ProgressEvent::ItemStarted {
                name: link.name.clone(),
                index: self.items_started,
            });

        let Some(chat) = ChannelResolver::new(ctx).resolve(&chat_link).await? else {
            return Ok(self.skip_item(link, "chat unreachable"));
        };
        if ctx.control.stop_requested() {
            return Ok(ItemOutcome::Interrupted);
        }

        let locator = MenuLocator::new(ctx);
        let Some(mut menu) = locator.locate(&chat).await? else {
            return Ok(self.skip_item(link, "no menu found"));
        };

        if let Some(download) = find_button(&menu, &ctx.keywords.download).cloned() {
            info!(button = %download.text, "Clicking download");
            press_button(ctx, &menu, &download).await?;
            ctx.control.sleep(ctx.timings.button_click).await?;
            menu = locator.refresh(&chat, menu).await?;
        }

        if !self.process_options(&chat, menu).await? {
            return Ok(ItemOutcome::Interrupted);
        }

        ctx.store.mark_item_done(&link.url).await?;
        ctx.state
            .emit(ProgressEvent::ItemCompleted {
                name: link.name.clone(),
            });
        ctx.state.set_item(None);
        Ok(ItemOutcome::Completed)
    }

    /// Run every pending option of `menu`; `false` if a stop left options
    /// unvisited
    async fn process_options(&self, chat: &ResolvedChat, mut menu: Message) -> Result<bool, ScanError> {
        let ctx = self.ctx;
        let locator = MenuLocator::new(ctx);
        let options: Vec<Button> = season_buttons(&menu).into_iter().cloned().collect();
        let total = options.len();
        if total == 0 {
            info!(chat = %chat.title, "No season options");
        }

        for (index, option) in options.iter().enumerate() {
            if ctx.control.stop_requested() {
                return Ok(false);
            }
            if ctx.store.is_sub_item_done(chat.id, &option.text).await {
                debug!(option = %option.text, "Option already processed");
                continue;
            }

            info!(option = %option.text, position = index + 1, total, "Processing option");
            ctx.state.set_sub_item(Some(&option.text));
            ctx.state
                .emit(ProgressEvent::SubItemStarted {
                    label: option.text.clone(),
                    position: index + 1,
                    total,
                });

            // The refreshed menu may carry new callback data for the same label
            let current = menu
                .iter_buttons()
                .find(|button| button.text == option.text)
                .cloned()
                .unwrap_or_else(|| option.clone());
            let phase = BotInteractionSession::new(ctx, &menu, &current).run().await?;
            if matches!(phase, SessionPhase::Completed | SessionPhase::TimedOut) {
                ctx.store.mark_sub_item_done(chat.id, &option.text).await?;
            }

            ctx.control.sleep(ctx.timings.between_sub_items).await?;
            menu = locator.refresh(chat, menu).await?;
        }

        ctx.state.set_sub_item(None);
        Ok(true)
    }
}
