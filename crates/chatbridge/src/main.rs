//! Runner: loads configuration, opens storage, wires both network
//! sides to the dispatcher, and runs until interrupted.

use std::sync::Arc;

use anyhow::Context;
use chatbridge_config::BridgeConfig;
use chatbridge_dispatcher::MessageDispatcher;
use chatbridge_service::ChatService;
use chatbridge_telegram::{TelegramApi, TelegramHandlerFactory, TelegramPoller};
use chatbridge_xmpp::{XmppActorFactory, XmppHandlerFactory, XmppListener};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chatbridge", about = "Bridges a Telegram chat and an XMPP room")]
struct Cli {
    /// Path to the INI configuration file.
    #[arg(short, long, default_value = "config.ini")]
    config: String,

    /// Directory holding the SQLite database.
    #[arg(short, long, default_value = ".")]
    data: String,

    /// Raises the log level to debug.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = BridgeConfig::load(&cli.config).context("failed to load configuration")?;

    let database_path = format!("{}/bridge.db", cli.data.trim_end_matches('/'));
    let storage = chatbridge_storage::open(&database_path)
        .await
        .context("failed to open storage")?;

    let bridge_jid: jid::BareJid = config
        .xmpp_login
        .parse()
        .context("xmpp login is not a valid jid")?;

    let service = Arc::new(ChatService::new(storage.chats.clone(), config.handshake_key.clone()));
    let dispatcher = Arc::new(MessageDispatcher::new(storage.chats.clone()));

    let telegram_api = TelegramApi::new(config.telegram_token.clone());
    let telegram_factory = Arc::new(TelegramHandlerFactory::new(
        telegram_api.clone(),
        dispatcher.clone(),
        storage.messages.clone(),
        storage.topics.clone(),
    ));
    service.register_factory(telegram_factory).await;

    let (join_tx, join_rx) = tokio::sync::mpsc::unbounded_channel();
    let actors = Arc::new(XmppActorFactory::new(
        bridge_jid.clone(),
        config.xmpp_password.clone(),
        config.actors_pool_size_limit,
        join_tx,
    ));
    actors
        .start_listener()
        .await
        .context("failed to start xmpp fallback session")?;
    let xmpp_factory = Arc::new(XmppHandlerFactory::new(
        actors.clone(),
        dispatcher.clone(),
        storage.messages.clone(),
        storage.stickers.clone(),
    ));
    service.register_factory(xmpp_factory).await;

    service.load_chats().await;

    let listener_jid: jid::FullJid = format!("{bridge_jid}/bridge")
        .parse()
        .expect("bare jid plus a literal resource is always a valid full jid");
    let listener = XmppListener::new(
        listener_jid,
        config.xmpp_password.clone(),
        service.clone(),
        dispatcher.sender(),
    );

    let poller = TelegramPoller::new(
        telegram_api.bot().clone(),
        storage.chats.clone(),
        service.clone(),
        dispatcher.sender(),
    );

    info!("chatbridge starting");

    let dispatcher_task = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.start().await }
    });
    let poller_task = tokio::spawn(poller.run());
    let listener_task = tokio::spawn(listener.run(join_rx));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
        _ = dispatcher_task => {
            error!("dispatcher task exited unexpectedly");
        }
        _ = poller_task => {
            error!("telegram poll task exited unexpectedly");
        }
        _ = listener_task => {
            error!("xmpp listener task exited unexpectedly");
        }
    }

    Ok(())
}
