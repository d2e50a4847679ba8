//! This crate houses common for me functions, because some things
//! are just boilerplate and aaAAAAAAAAA

use std::future::Future;

/// Queue of outgoing messages that are retried until they go through.
pub mod outbox;

/// Initialize logging and start the `closure` in an async runtime.
///
/// Logging uses `default_filter` unless overridden by environment
/// variable `RUST_LOG`. This uses the crate [pretty_env_logger][]
/// internally, see its documentation for more details on the filter syntax.
///
/// # Panics
///
/// Panics if the tokio runtime can't be built.
///
/// [pretty_env_logger]: https://docs.rs/pretty_env_logger
pub fn start_everything(default_filter: &str, closure: impl Future<Output = ()>) {
    let log_filter = std::env::var_os("RUST_LOG")
        .and_then(|x| x.into_string().ok())
        .unwrap_or_else(|| default_filter.to_string());

    // journald already stamps every line.
    let running_as_systemd_service = std::env::var_os("JOURNAL_STREAM").is_some();

    let mut builder = match running_as_systemd_service {
        true => pretty_env_logger::formatted_builder(),
        false => pretty_env_logger::formatted_timed_builder(),
    };

    builder.parse_filters(&log_filter);

    if builder.try_init().is_err() {
        log::error!("Tried to init logger twice!");
    }

    log::info!("hi");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Could not build the tokio runtime!")
        .block_on(closure);
}
