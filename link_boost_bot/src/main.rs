use bot_commons::*;
use clap::Parser;

fn main() {
    let config = link_boost_bot::Config::parse();
    start_everything(config.log_filter(), link_boost_bot::entry(config));
}
