use std::sync::Arc;

use teloxide::{
    types::{Me, Message},
    RequestError,
};

use crate::{
    commands::{respond_blocking, Request},
    App,
};

/// Turn a Telegram message into a [`Request`], run it, and queue the replies.
pub async fn handle_message(
    me: Me,
    message: Message,
    app: Arc<App>,
) -> Result<(), RequestError> {
    let Some(user) = message.from.as_ref() else {
        // Channel posts and such. Nobody to answer to.
        return Ok(());
    };

    // Bot ignores messages made by itself.
    if user.id == me.id {
        return Ok(());
    }

    let sender_name = match &user.username {
        Some(username) => format!("@{}", username),
        None => user.full_name(),
    };

    log::info!(
        "<{}> {}",
        sender_name,
        message.text().unwrap_or("<not text>").replace('\n', "\\n")
    );

    let request = Request {
        sender: user.id,
        sender_name: sender_name.clone(),
        chat: message.chat.id,
        text: message.text().map(str::to_owned),
    };

    let replies = respond_blocking(
        app.store.clone(),
        Some(me.username().to_owned()),
        request,
    )
    .await;

    for reply in replies {
        // Waits here if the outbox is full.
        if app.outbox.send(reply).await.is_err() {
            log::warn!("Outbox is closed, dropping replies to {}.", sender_name);
            break;
        }
    }

    Ok(())
}
