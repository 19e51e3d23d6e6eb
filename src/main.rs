use dotenvy::dotenv;
use resale_guard::bot::{
    handlers, messages, AdminRoster, BotDeps, BotState, Command, ModerationContext,
    WarningService,
};
use resale_guard::config::{self, Settings};
use resale_guard::moderation::{CooldownLedger, MediaGroupAggregator, ModerationPolicy};
use resale_guard::storage::JsonStore;
use resale_guard::transport::{ChatTransport, TelegramTransport};
use resale_guard::xp::XpLedger;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    // Load .env file
    dotenv().ok();

    init_logging();

    info!("Starting Resale Guard bot...");

    let settings = init_settings();

    let store = init_store(&settings).await;

    let xp = init_xp_ledger(Arc::clone(&store)).await;
    let cooldowns = init_cooldown_ledger(&store).await;

    let policy = Arc::new(ModerationPolicy::new(
        Arc::clone(&cooldowns),
        config::get_min_price(),
        config::get_clothing_min_price(),
    ));

    let bot = Bot::new(settings.telegram_token.clone());
    let transport: Arc<dyn ChatTransport> = Arc::new(TelegramTransport::new(bot.clone()));

    let warnings = Arc::new(WarningService::new(
        Duration::from_secs(config::get_warning_suppress_secs()),
        Duration::from_secs(config::get_warning_ttl_secs()),
    ));
    let admins = Arc::new(AdminRoster::new(Duration::from_secs(
        config::get_admin_cache_ttl_secs(),
    )));

    let (settled_tx, settled_rx) = mpsc::channel(64);
    let aggregator = Arc::new(MediaGroupAggregator::new(
        Duration::from_millis(config::get_quiet_period_ms()),
        settled_tx,
    ));

    let ctx = Arc::new(ModerationContext {
        transport,
        policy,
        warnings,
        xp,
        cooldowns,
        store,
    });

    spawn_settled_group_consumer(Arc::clone(&ctx), settled_rx);

    let state = BotState::new(settings.report_chat_id);
    let deps = Arc::new(BotDeps {
        ctx,
        aggregator,
        admins,
        state,
    });

    let handler = setup_handler();

    info!("Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![deps])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn init_settings() -> Settings {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            s
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

async fn init_store(settings: &Settings) -> Arc<JsonStore> {
    let store = JsonStore::new(settings.data_dir.clone());
    if let Err(e) = store.ensure_dir().await {
        error!("Failed to prepare data directory: {}", e);
        std::process::exit(1);
    }
    Arc::new(store)
}

async fn init_xp_ledger(store: Arc<JsonStore>) -> Arc<XpLedger> {
    let users = match store.load_users().await {
        Ok(users) => users,
        Err(e) => {
            warn!("Failed to load users, starting empty: {}", e);
            HashMap::new()
        }
    };
    Arc::new(XpLedger::new(store, users))
}

async fn init_cooldown_ledger(store: &JsonStore) -> Arc<CooldownLedger> {
    let ledger = CooldownLedger::new(
        config::get_cooldown_seconds(),
        config::get_bonus_allowance(),
    );
    match store.load_cooldowns().await {
        Ok(snapshot) => ledger.restore(snapshot),
        Err(e) => warn!("Failed to load cooldowns, starting empty: {}", e),
    }
    Arc::new(ledger)
}

fn spawn_settled_group_consumer(
    ctx: Arc<ModerationContext>,
    mut settled_rx: mpsc::Receiver<resale_guard::moderation::Submission>,
) {
    tokio::spawn(async move {
        while let Some(submission) = settled_rx.recv().await {
            messages::moderate_submission(&ctx, submission).await;
        }
    });
}

fn setup_handler() -> UpdateHandler<anyhow::Error> {
    dptree::entry().branch(
        Update::filter_message()
            .branch(
                dptree::entry()
                    .filter_command::<Command>()
                    .endpoint(handlers::dispatch_command),
            )
            .endpoint(messages::dispatch_message),
    )
}
