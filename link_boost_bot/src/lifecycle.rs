use std::{future::Future, sync::Arc, time::Duration};

use teloxide::dispatching::ShutdownToken;
use tokio::{
    task::JoinHandle,
    time::{interval_at, sleep, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::persistence::LinkStore;

/// Owns the cancellation token every background loop listens to,
/// and makes sure the links hit the disk before it's cancelled.
#[derive(Clone)]
pub struct Lifecycle {
    store: Arc<LinkStore>,
    cancel: CancellationToken,
}

impl Lifecycle {
    pub fn new(store: Arc<LinkStore>) -> Self {
        Self {
            store,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that gets cancelled on shutdown.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Flush the links every `period` until shutdown.
    pub fn spawn_flush_ticker(&self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(flush_spinjob(
            self.store.clone(),
            period,
            self.cancel.clone(),
        ))
    }

    /// Call [`Self::shutdown`] once a termination signal comes in.
    pub fn spawn_signal_handler(&self) -> JoinHandle<()> {
        tokio::spawn(self.clone().shutdown_on(wait_for_termination_signal()))
    }

    /// Wait for `signal`, then [`Self::shutdown`] on the blocking thread pool.
    pub async fn shutdown_on(self, signal: impl Future<Output = std::io::Result<()>>) {
        tokio::select! {
            result = signal => {
                if let Err(e) = result {
                    log::error!("Can't listen for termination signals: {}", e);
                    return;
                }
                log::info!("Got a termination signal.");
            }
            // Shut down some other way. Nothing to do then.
            _ = self.cancel.cancelled() => return,
        }

        let lifecycle = self.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || lifecycle.shutdown()).await {
            log::error!("Shutdown flush panicked: {}", e);
            self.cancel.cancel();
        }
    }

    /// Flush the links one last time, then cancel everything.
    /// Does nothing if already shut down.
    pub fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }

        match self.store.flush() {
            Ok(count) => log::info!("Saved {} links before shutting down.", count),
            Err(e) => log::error!("Final state flush failed: {}", e),
        }

        log::info!("Finishing up...");
        self.cancel.cancel();
    }
}

async fn flush_spinjob(store: Arc<LinkStore>, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                log::debug!("Running scheduled state flush...");
                let store = store.clone();
                match tokio::task::spawn_blocking(move || store.flush()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => log::error!("Scheduled state flush failed: {}", e),
                    Err(e) => log::error!("Scheduled state flush panicked: {}", e),
                }
            }
            _ = cancel.cancelled() => return,
        }
    }
}

/// Something that runs until told to stop, but can't be stopped before it starts.
pub trait StopHandle: Send + Sync + 'static {
    /// Ask it to stop and wait until it has.
    /// Returns `false` without waiting if it isn't running.
    fn try_stop(&self) -> impl Future<Output = bool> + Send;
}

impl StopHandle for ShutdownToken {
    async fn try_stop(&self) -> bool {
        match self.shutdown() {
            Ok(stopped) => {
                stopped.await;
                true
            }
            Err(_) => false,
        }
    }
}

/// Stop `handle` once `cancel` fires.
///
/// Keeps poking it every `retry` until it's running, in case
/// cancellation came before it even started.
pub async fn stop_on_cancel(
    handle: impl StopHandle,
    cancel: CancellationToken,
    retry: Duration,
) {
    cancel.cancelled().await;
    while !handle.try_stop().await {
        sleep(retry).await;
    }
    log::debug!("Stopped receiving updates.");
}

/// Resolves on ctrl-c or SIGTERM.
#[cfg(unix)]
pub async fn wait_for_termination_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

/// Resolves on ctrl-c.
#[cfg(not(unix))]
pub async fn wait_for_termination_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
