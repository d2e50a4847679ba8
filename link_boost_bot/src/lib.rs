//! Source code for a bot that keeps a queue of AliExpress bargain links,
//! so people can promote each other's links.

use std::{sync::Arc, time::Duration};

use bot_commons::outbox::{Outbox, OutgoingMessage};

/// Command line options.
mod config;
pub use config::Config;

/// Error types.
pub mod error;

/// In-memory table of all links.
pub mod registry;

/// Saving and loading the registry.
pub mod persistence;

/// Periodic flushing and shutting down.
pub mod lifecycle;

/// Parsing and running commands.
pub mod commands;

/// Functions that handle events from Telegram.
mod handlers;

/// Entry function that starts the bot.
mod entry;
pub use entry::*;

/// How many links `/next` shows at most.
pub const NEXT_LINKS_LIMIT: usize = 10;

/// How many outgoing messages can wait before handlers have to wait too.
pub const OUTBOX_CAPACITY: usize = 10;

/// Pause between attempts to send a message.
pub const DELIVERY_BACKOFF: Duration = Duration::from_secs(1);

/// Everything handlers need, built once at startup.
pub struct App {
    pub store: Arc<persistence::LinkStore>,
    pub outbox: Outbox<OutgoingMessage>,
}
