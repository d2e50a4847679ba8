use std::{fmt::Display, future::Future, time::Duration};

use teloxide::{requests::Requester, types::ChatId, Bot, RequestError};
use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;

/// Something that can push a message of type `T` out into the world.
pub trait Courier<T>: Clone + Send + Sync + 'static {
    type Error: Display + Send;

    /// Try to deliver the message once.
    fn deliver(&self, item: &T) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// A plain text message to be sent to some chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub chat: ChatId,
    pub text: String,
}

impl OutgoingMessage {
    pub fn new(chat: impl Into<ChatId>, text: impl Into<String>) -> Self {
        Self {
            chat: chat.into(),
            text: text.into(),
        }
    }
}

impl Courier<OutgoingMessage> for Bot {
    type Error = RequestError;

    async fn deliver(&self, item: &OutgoingMessage) -> Result<(), RequestError> {
        self.send_message(item.chat, item.text.as_str()).await?;
        Ok(())
    }
}

/// Returned when the outbox worker is gone. Holds the message that
/// could not be queued.
#[derive(Debug)]
pub struct OutboxClosed<T>(pub T);

impl<T> Display for OutboxClosed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "outbox worker has stopped")
    }
}

impl<T: std::fmt::Debug> std::error::Error for OutboxClosed<T> {}

/// Bounded queue in front of a [`Courier`].
///
/// Every queued message gets its own task that retries delivery
/// until it succeeds, so one stubborn message never holds up the rest.
/// Queueing waits when the queue is full, which throttles producers
/// down to the speed of delivery.
pub struct Outbox<T> {
    sender: mpsc::Sender<T>,
}

impl<T> Clone for Outbox<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Outbox<T> {
    /// Start the worker. It stops when `cancel` is cancelled
    /// or when every [`Outbox`] handle is dropped.
    pub fn spawn<C: Courier<T>>(
        courier: C,
        capacity: usize,
        backoff: Duration,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let worker = tokio::spawn(outbox_spinjob(courier, receiver, backoff, cancel));
        (Self { sender }, worker)
    }

    /// Queue a message, waiting for room if the queue is full.
    pub async fn send(&self, item: T) -> Result<(), OutboxClosed<T>> {
        self.sender.send(item).await.map_err(|e| OutboxClosed(e.0))
    }
}

async fn outbox_spinjob<T, C>(
    courier: C,
    mut receiver: mpsc::Receiver<T>,
    backoff: Duration,
    cancel: CancellationToken,
) where
    T: Send + Sync + 'static,
    C: Courier<T>,
{
    loop {
        let item = tokio::select! {
            item = receiver.recv() => item,
            _ = cancel.cancelled() => break,
        };

        let Some(item) = item else {
            // Everyone who could send stuff is gone.
            break;
        };

        tokio::spawn(deliver_until_done(
            courier.clone(),
            item,
            backoff,
            cancel.clone(),
        ));
    }

    log::debug!("Outbox worker stopped.");
}

/// Keep trying to deliver `item`, sleeping `backoff` between attempts.
///
/// Returns `true` once delivered, or `false` if `cancel` fired first.
pub async fn deliver_until_done<T, C: Courier<T>>(
    courier: C,
    item: T,
    backoff: Duration,
    cancel: CancellationToken,
) -> bool {
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);

        let error = match courier.deliver(&item).await {
            Ok(()) => return true,
            Err(e) => e,
        };

        log::warn!(
            "Message send failed (attempt {}), retrying in {:?}: {}",
            attempt,
            backoff,
            error
        );

        tokio::select! {
            _ = sleep(backoff) => {}
            _ = cancel.cancelled() => {
                log::warn!("Dropping an undelivered message due to shutdown.");
                return false;
            }
        }
    }
}
