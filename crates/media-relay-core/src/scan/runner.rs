use super::orchestrator::{RunReport, ScanOrchestrator};
use super::state::{ScanState, ScanStatus};
use super::{RunControl, ScanContext, ScanError};
use crate::config::{Keywords, RelaySettings, ScanLimits, ScanTimings};
use crate::dedup::DedupStore;
use crate::links::ChatLink;
use crate::progress::ProgressEvent;
use crate::rate_limit::RateLimitGuard;
use crate::resolver::{ChannelResolver, ResolvedChat};
use crate::session_pool::{SessionCredential, SessionPool, SessionSwitch};
use crate::transport::{ChatRef, DeliveryFeed, TransportConnector};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{error, info, warn};

/// Failovers allowed per credential within one invocation
const FAILOVERS_PER_SESSION: usize = 3;

/// Runs scans against the current credential and fails over on long rate limits
pub struct ScanRunner {
    connector: Arc<dyn TransportConnector>,
    pool: Mutex<SessionPool>,
    store: Arc<DedupStore>,
    catalog: String,
    destination: String,
    keywords: Keywords,
    timings: ScanTimings,
    limits: ScanLimits,
    status: Arc<watch::Sender<ScanStatus>>,
}

impl ScanRunner {
    /// Runner configured from `settings`
    #[must_use]
    pub fn new(
        connector: Arc<dyn TransportConnector>,
        pool: SessionPool,
        store: Arc<DedupStore>,
        settings: &RelaySettings,
    ) -> Self {
        let (status, _) = watch::channel(ScanStatus::Idle);
        Self {
            connector,
            pool: Mutex::new(pool),
            store,
            catalog: settings.index_channel.clone(),
            destination: settings.destination_channel.clone(),
            keywords: Keywords::from(settings),
            timings: settings.timings(),
            limits: settings.limits(),
            status: Arc::new(status),
        }
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

    /// Subscribe to status snapshots
    #[must_use]
    pub fn status(&self) -> watch::Receiver<ScanStatus> {
        self.status.subscribe()
    }

    /// Force the published status back to idle
    pub fn reset_status(&self) {
        self.status.send_replace(ScanStatus::Idle);
    }

    /// Ledgers shared by every run
    #[must_use]
    pub fn store(&self) -> &Arc<DedupStore> {
        &self.store
    }

    /// Session switches made so far
    pub async fn session_history(&self) -> Vec<SessionSwitch> {
        self.pool.lock().await.history().to_vec()
    }

    /// Run one scan invocation, restarting on the next credential after each
    /// failover
    ///
    /// The status is reset to idle on every exit path.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Cancelled`] when cancelled, [`ScanError::Fatal`]
    /// when every session stays rate limited or the run cannot start, and
    /// ledger errors.
    pub async fn run(
        &self,
        target: Option<String>,
        control: RunControl,
        progress: Option<mpsc::Sender<ProgressEvent>>,
    ) -> Result<RunReport, ScanError> {
        let state = ScanState::new(Arc::clone(&self.status), progress);
        state
            .emit(ProgressEvent::RunStarted {
                target: target.clone(),
            });

        let result = self.run_with_failover(target.as_deref(), &control, &state).await;
        match &result {
            Ok(report) if report.stopped => state.emit_final(ProgressEvent::RunCancelled).await,
            Ok(report) => {
                state
                    .emit_final(ProgressEvent::RunCompleted {
                        items: report.items,
                    })
                    .await;
            }
            Err(ScanError::Cancelled) => state.emit_final(ProgressEvent::RunCancelled).await,
            Err(e) => {
                error!(error = %e, "Scan failed");
                state.emit_final(ProgressEvent::RunFailed(e.to_string())).await;
            }
        }

        state.reset();
        result
    }

    async fn run_with_failover(
        &self,
        target: Option<&str>,
        control: &RunControl,
        state: &ScanState,
    ) -> Result<RunReport, ScanError> {
        let max_failovers = self.pool.lock().await.len() * FAILOVERS_PER_SESSION;
        let mut failovers = 0usize;

        loop {
            let (credential, has_alternates) = {
                let pool = self.pool.lock().await;
                (pool.current().clone(), pool.has_alternates())
            };
            state.begin(credential.number());

            let wait_secs = match self
                .run_once(&credential, has_alternates, target, control, state)
                .await
            {
                Err(ScanError::Failover { wait_secs }) => wait_secs,
                other => return other,
            };

            failovers += 1;
            if failovers > max_failovers {
                return Err(ScanError::Fatal("all sessions rate limited".to_string()));
            }

            let (from, to) = {
                let mut pool = self.pool.lock().await;
                let from = pool.current().number();
                (from, pool.advance().number())
            };
            warn!(
                from,
                to,
                wait_secs,
                cooldown_secs = self.timings.global_cooldown.as_secs_f64(),
                "Restarting scan on next session"
            );
            state.emit(ProgressEvent::SessionSwitched { from, to });

            control.sleep(self.timings.global_cooldown).await?;
            if control.stop_requested() {
                return Ok(RunReport {
                    stopped: true,
                    ..RunReport::default()
                });
            }
        }
    }

    fn chat_setting(raw: &str, name: &str) -> Result<ChatRef, ScanError> {
        ChatRef::from_setting(raw).ok_or_else(|| ScanError::Fatal(format!("{name} is not set")))
    }

    async fn run_once(
        &self,
        credential: &SessionCredential,
        has_alternates: bool,
        target: Option<&str>,
        control: &RunControl,
        state: &ScanState,
    ) -> Result<RunReport, ScanError> {
        let guard = RateLimitGuard::new(
            self.limits.flood_wait_threshold_secs,
            self.limits.auto_switch_session,
            has_alternates,
        );
        let ctx = match self.connect(credential, guard, control).await {
            Ok(ctx) => ctx.with_state(state.clone()),
            Err(_) if control.stop_requested() => {
                return Ok(RunReport {
                    stopped: true,
                    ..RunReport::default()
                });
            }
            Err(e) => return Err(e),
        };

        let result = match Self::check_destination(&ctx).await {
            Ok(()) => ScanOrchestrator::new(&ctx).run(target).await,
            Err(e) => Err(e),
        };
        Self::teardown(&ctx).await;
        result
    }

    /// Open a connection for `credential` and build the run context over it
    async fn connect(
        &self,
        credential: &SessionCredential,
        guard: RateLimitGuard,
        control: &RunControl,
    ) -> Result<ScanContext, ScanError> {
        let catalog = Self::chat_setting(&self.catalog, "INDEX_CHANNEL")?;
        let destination = Self::chat_setting(&self.destination, "DESTINATION_CHANNEL")?;

        info!(session = credential.number(), "Connecting");
        let (feed, deliveries) = DeliveryFeed::channel();
        let connector = self.connector.as_ref();
        let connect_feed = feed.clone();
        let connected = guard
            .call(control, "connect", move || {
                connector.connect(credential, connect_feed.clone())
            })
            .await;
        let transport = match connected {
            Ok(transport) => transport,
            Err(e) if e.is_abort() => return Err(e),
            Err(e) => return Err(ScanError::Fatal(format!("connection failed: {e}"))),
        };

        Ok(ScanContext::new(
            transport,
            Arc::clone(&self.store),
            catalog,
            destination,
            control.clone(),
        )
        .with_feed(feed, deliveries)
        .with_guard(guard)
        .with_keywords(self.keywords.clone())
        .with_timings(self.timings)
        .with_limits(self.limits))
    }

    /// Resolve `target` on the current session, joining it if needed
    ///
    /// Runs outside a scan; `Ok(None)` means the chat could not be reached.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Fatal`] for a target that is not a chat, when the
    /// connection fails or when the service asks for a wait above the
    /// threshold, and [`ScanError::Cancelled`] when cancelled.
    pub async fn join(
        &self,
        target: &str,
        control: RunControl,
    ) -> Result<Option<ResolvedChat>, ScanError> {
        let link = ChatLink::from_target(target)
            .ok_or_else(|| ScanError::Fatal(format!("not a chat link or username: {target}")))?;
        let credential = self.pool.lock().await.current().clone();
        // A wait above the threshold fails the join
        let guard = RateLimitGuard::new(self.limits.flood_wait_threshold_secs, true, true);

        let ctx = self.connect(&credential, guard, &control).await?;
        let resolved = ChannelResolver::new(&ctx).resolve(&link).await;
        Self::teardown(&ctx).await;

        match resolved {
            Err(ScanError::Failover { wait_secs }) => {
                Err(ScanError::Fatal(format!("rate limited for {wait_secs}s")))
            }
            other => other,
        }
    }

    /// Warn early when the destination cannot be read
    async fn check_destination(ctx: &ScanContext) -> Result<(), ScanError> {
        let transport = ctx.transport();
        let destination = &ctx.destination;
        let checked = ctx
            .guard
            .call(&ctx.control, "get_chat", move || transport.get_chat(destination))
            .await;
        match checked {
            Ok(info) => {
                info!(destination = %info.title, "Destination reachable");
                Ok(())
            }
            Err(e) if e.is_abort() => Err(e),
            Err(e) => {
                warn!(
                    destination = %destination,
                    error = %e,
                    "Destination not reachable, forwards may fail; join it with /join <invite link>"
                );
                Ok(())
            }
        }
    }

    /// Stop collecting, close the connection and flush ledgers; each step
    /// tolerates having already happened
    async fn teardown(ctx: &ScanContext) {
        ctx.feed.stop_waiting();
        if let Err(e) = ctx.transport().disconnect().await {
            warn!(error = %e, "Disconnect failed");
        }
        if let Err(e) = ctx.store.flush().await {
            error!(error = %e, "Ledger flush failed");
        }
    }
}
