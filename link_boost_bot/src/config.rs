use std::{fs, path::PathBuf, time::Duration};

use clap::Parser;

/// Telegram bot that runs a queue of AliExpress links for people to promote for each other.
#[derive(Debug, Parser)]
#[command(version)]
pub struct Config {
    /// Print more data about what is going on
    #[arg(short, long)]
    pub verbose: bool,

    /// Where to save the state
    #[arg(short = 'd', long, default_value = "./database.json")]
    pub state_path: PathBuf,

    /// Seconds between scheduled state flushes
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub flush_interval: u64,

    /// Telegram bot token. If unset, it's read from the file `key`
    /// (or `key_debug` in debug builds).
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

impl Config {
    /// Log filter to use when `RUST_LOG` isn't set.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            true => "info,teloxide=debug,link_boost_bot=debug,bot_commons=debug",
            false => "warn,link_boost_bot=info,bot_commons=info",
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval)
    }

    pub fn bot_token(&self) -> std::io::Result<String> {
        if let Some(token) = &self.token {
            return Ok(token.trim().to_string());
        }

        let key = fs::read_to_string(match cfg!(debug_assertions) {
            true => "key_debug",
            false => "key",
        })?;
        Ok(key.trim().to_string())
    }
}
