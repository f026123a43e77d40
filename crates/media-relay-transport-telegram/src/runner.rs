use crate::bot;
use crate::bot::handlers::{get_user_id_safe, Command};
use crate::config::{BotSettings, TelegramSettings};
use crate::logging::init_logging;
use anyhow::{anyhow, Context, Result};
use media_relay_core::{DedupStore, RelaySettings, ScanRunner, SessionPool, TransportConnector};
use media_relay_runtime::ScanController;
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use tracing::{error, info, warn};

/// Bootstrap from `.env`, config files and the environment, then run the bot.
///
/// `connector` supplies the user-account client for each credential.
///
/// # Errors
///
/// Returns an error when settings are missing or invalid, or the ledgers
/// cannot be opened.
pub async fn run_from_env(connector: Arc<dyn TransportConnector>) -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();
    info!("Starting media relay control bot...");

    let relay = RelaySettings::new().context("failed to load relay configuration")?;
    let telegram = TelegramSettings::new().context("failed to load telegram configuration")?;
    let settings = Arc::new(BotSettings::new(relay, telegram));

    let errors = settings.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        return Err(anyhow!("invalid configuration: {}", errors.join("; ")));
    }
    info!("Configuration loaded successfully.");

    let pool = SessionPool::new(settings.relay.session_strings())?;
    let store = Arc::new(DedupStore::load(settings.relay.ledger_dir()).await?);
    info!(
        completed_items = store.completed_items().await,
        sessions = pool.len(),
        "Ledgers loaded"
    );

    let runner = ScanRunner::new(connector, pool, store, &settings.relay);
    let controller = ScanController::new(Arc::new(runner));
    run_bot(settings, controller).await;
    Ok(())
}

/// Run the Telegram control bot until interrupted.
pub async fn run_bot(settings: Arc<BotSettings>, controller: ScanController) {
    if settings.telegram.admin_ids().is_empty() {
        warn!("ADMIN_IDS is empty: every user may control the relay");
    }

    let bot = Bot::new(settings.telegram.bot_token.clone());
    let handler = setup_handler();

    info!("Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![settings, controller])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(
            Update::filter_message()
                .filter(|msg: Message, settings: Arc<BotSettings>| {
                    settings.telegram.is_admin(get_user_id_safe(&msg))
                })
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(
            Update::filter_message()
                .filter(|msg: Message, settings: Arc<BotSettings>| {
                    !settings.telegram.is_admin(get_user_id_safe(&msg))
                })
                .endpoint(handle_unauthorized),
        )
}

async fn handle_unauthorized(bot: Bot, msg: Message) -> Result<(), teloxide::RequestError> {
    let user_id = get_user_id_safe(&msg);
    info!(user_id, "Unauthorized access, sending denial message");

    if let Err(e) = bot.send_message(msg.chat.id, "⛔️ Access denied").await {
        error!(user_id, error = %e, "Failed to send access denied message");
    }
    respond(())
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    controller: ScanController,
) -> Result<(), teloxide::RequestError> {
    let res = match cmd {
        Command::Start => bot::handlers::start(bot, msg).await,
        Command::Scan(arg) => bot::handlers::scan(bot, msg, arg, controller).await,
        Command::Stop => bot::handlers::stop(bot, msg, controller).await,
        Command::Status => bot::handlers::status(bot, msg, controller).await,
        Command::Join(arg) => bot::handlers::join(bot, msg, arg, controller).await,
    };
    if let Err(e) = res {
        error!(error = %e, "Command error");
    }
    respond(())
}
