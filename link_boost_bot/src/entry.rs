use std::{convert::Infallible, sync::Arc, time::Duration};

use bot_commons::outbox::Outbox;
use teloxide::{dptree::deps, prelude::*};

use crate::{
    commands::generate_bot_commands,
    handlers,
    lifecycle::{stop_on_cancel, Lifecycle},
    persistence::LinkStore,
    App, Config, DELIVERY_BACKOFF, OUTBOX_CAPACITY,
};

/// # Panics
///
/// Panics if the state file is corrupt, or if there's no usable bot token.
pub async fn entry(config: Config) {
    log::info!("ASYNC WOOOO");

    let store = Arc::new(
        LinkStore::open(&config.state_path).expect("Could not load the state file!"),
    );
    log::info!(
        "Loaded {} links from {}",
        store.registry.count(),
        store.state.path().display()
    );

    let key = config.bot_token().expect("Could not load bot key file!");
    let bot = Bot::new(key);

    let me = bot.get_me().await.expect("Bot token was rejected!");
    log::info!("Starting bot @{}", me.username());

    if let Err(e) = bot.set_my_commands(generate_bot_commands()).await {
        log::warn!("Failed to set bot commands: {}", e);
    }

    let lifecycle = Lifecycle::new(store.clone());
    let (outbox, _outbox_worker) = Outbox::spawn(
        bot.clone(),
        OUTBOX_CAPACITY,
        DELIVERY_BACKOFF,
        lifecycle.token(),
    );
    let app = Arc::new(App { store, outbox });

    lifecycle.spawn_flush_ticker(config.flush_interval());
    lifecycle.spawn_signal_handler();

    log::info!("Creating the handler...");

    let handler = Update::filter_message().endpoint(handlers::handle_message);

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .default_handler(|_| async {})
        .dependencies(deps![app])
        // Every update gets handled on its own, no per-chat queueing.
        .distribution_function(|_| None::<Infallible>)
        .build();

    tokio::spawn(stop_on_cancel(
        dispatcher.shutdown_token(),
        lifecycle.token(),
        Duration::from_millis(100),
    ));

    log::info!("Dispatching the dispatcher!");

    dispatcher.dispatch().await;

    log::info!("it appears we have been bonked.");
}
