use std::sync::{Arc, LazyLock};

use bot_commons::outbox::OutgoingMessage;
use regex::Regex;
use teloxide::types::{BotCommand, ChatId, UserId};

use crate::{
    error::CommandError,
    persistence::LinkStore,
    registry::LinkAdded,
    NEXT_LINKS_LIMIT,
};

/// Every promotable link starts with this. The rest is the link ID.
pub const LINK_PREFIX: &str = "https://a.aliexpress.com/";

static LINK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    // The ID has to end there, so odd links aren't cut short.
    Regex::new(r"https://a\.aliexpress\.com/([A-Za-z0-9_]+)(?:$|[\s?#])")
        .expect("Regex will always be valid")
});

const HELP: &str = "
This bot helps everyone taking part in AliExpress bargain deals.
- You can't promote your own link.
- You can promote up to 3 links every 24 hours.
- A product needs a certain number of promotions to get its discount.
- Each account can be tied to only one phone, and each phone to only one account.

How to use it:
- Send your link, like https://a.aliexpress.com/_mOKDdtH, and it goes into the queue.
- Use /next to see other people's links to promote. Under each link there's a command; tap it once the link is promoted or has expired.
- If someone marks your link as done, the bot tells you and gives you a command to add it back.
- Everyone does this for each other, and everyone wins.";

/// Extract a link ID from the first promotable link in `text`.
pub fn extract_link_id(text: &str) -> Option<&str> {
    LINK_REGEX
        .captures(text)?
        .get(1)
        .map(|id| id.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// `/ok<id>`: link was promoted or expired.
    Done(&'a str),
    /// `/add<id>`: put a link back into the queue.
    Readd(&'a str),
    Next,
    Flush,
    Help,
    /// Not a command, but has a link in it.
    Submit(&'a str),
    Unrecognized,
}

impl<'a> Command<'a> {
    /// Figure out what the text asks for.
    ///
    /// Returns `None` if it's a command meant for some other bot,
    /// like `/next@SomeOtherBot`.
    pub fn parse(text: &'a str, bot_username: Option<&str>) -> Option<Command<'a>> {
        // "/ ok" and such are not commands to Telegram.
        if let Some(command) = text
            .strip_prefix('/')
            .and_then(|x| x.split(char::is_whitespace).next())
            .filter(|x| !x.is_empty())
        {
            // Trim the "@username" part, if it's there and is ours.
            let callname = if let Some(username_start) = command.find('@') {
                let addressee = &command[username_start + '@'.len_utf8()..];
                if let Some(bot_username) = bot_username {
                    if !addressee.eq_ignore_ascii_case(bot_username) {
                        return None;
                    }
                }
                &command[..username_start]
            } else {
                command
            };

            if let Some(id) = strip_prefix_ignore_ascii_case(callname, "ok") {
                return Some(Command::Done(id));
            }
            if let Some(id) = strip_prefix_ignore_ascii_case(callname, "add") {
                if !id.is_empty() {
                    return Some(Command::Readd(id));
                }
            }
            if callname.eq_ignore_ascii_case("next") {
                return Some(Command::Next);
            }
            if callname.eq_ignore_ascii_case("flush") {
                return Some(Command::Flush);
            }
            if callname.eq_ignore_ascii_case("start") || callname.eq_ignore_ascii_case("help") {
                return Some(Command::Help);
            }
        }

        // Not a command we know. Maybe there's a link?
        Some(match extract_link_id(text) {
            Some(id) => Command::Submit(id),
            None => Command::Unrecognized,
        })
    }
}

fn strip_prefix_ignore_ascii_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}

/// An incoming message, stripped down to what the bot cares about.
#[derive(Debug, Clone)]
pub struct Request {
    pub sender: UserId,
    /// How to call the sender in messages to other people.
    pub sender_name: String,
    pub chat: ChatId,
    /// `None` for stickers, photos and such.
    pub text: Option<String>,
}

/// Run whatever the request asks for and produce the messages to send.
/// Errors end up as a message to the requester.
pub fn respond(
    store: &LinkStore,
    bot_username: Option<&str>,
    request: &Request,
) -> Vec<OutgoingMessage> {
    match run_command(store, bot_username, request) {
        Ok(messages) => messages,
        Err(e) => vec![OutgoingMessage::new(request.chat, format!("ERROR: {}", e))],
    }
}

/// [`respond`] on the blocking thread pool, since `/flush` writes to disk.
pub async fn respond_blocking(
    store: Arc<LinkStore>,
    bot_username: Option<String>,
    request: Request,
) -> Vec<OutgoingMessage> {
    let responding = tokio::task::spawn_blocking(move || {
        respond(&store, bot_username.as_deref(), &request)
    });

    match responding.await {
        Ok(messages) => messages,
        Err(e) => {
            log::error!("Command handling panicked: {}", e);
            Vec::new()
        }
    }
}

fn run_command(
    store: &LinkStore,
    bot_username: Option<&str>,
    request: &Request,
) -> Result<Vec<OutgoingMessage>, CommandError> {
    let Some(text) = request.text.as_deref().filter(|x| !x.is_empty()) else {
        return Err(CommandError::NotText);
    };

    let Some(command) = Command::parse(text, bot_username) else {
        return Ok(Vec::new());
    };

    let reply = |text: String| OutgoingMessage::new(request.chat, text);
    let registry = &store.registry;

    let messages = match command {
        Command::Done(id) => {
            let Some(owner) = registry.owner_of(id) else {
                return Err(CommandError::NotFound(id.to_string()));
            };
            registry.mark_done(id);

            let mut messages = vec![reply(format!(
                "Link {}{} removed from the queue.",
                LINK_PREFIX, id
            ))];
            if owner != request.sender {
                messages.push(OutgoingMessage::new(
                    owner,
                    format!(
                        "Your link was removed from the queue by {}\nLINK: {}{}\nRE-ADD: /add{}",
                        request.sender_name, LINK_PREFIX, id, id
                    ),
                ));
            }
            messages
        }
        Command::Readd(id) => {
            registry.add_link(request.sender, id);
            vec![reply(format!("Link re-added. REMOVE: /ok{}", id))]
        }
        Command::Next => {
            let ids = registry.list_promotable(request.sender, NEXT_LINKS_LIMIT);
            if ids.is_empty() {
                return Err(CommandError::NoLinksQueued);
            }
            let list = ids
                .iter()
                .map(|id| {
                    format!(
                        "{}{}\nIf expired or already promoted: /ok{}",
                        LINK_PREFIX, id, id
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");
            vec![reply(list)]
        }
        Command::Flush => {
            let count = store.flush()?;
            vec![reply(format!("State saved, {} links in total.", count))]
        }
        Command::Help => vec![reply(HELP.trim().to_string())],
        Command::Submit(id) => {
            let response = match registry.add_link(request.sender, id) {
                LinkAdded::New => format!(
                    "Link {}{} added successfully.\nREMOVE: /ok{}",
                    LINK_PREFIX, id, id
                ),
                LinkAdded::Reenabled { .. } => format!(
                    "Link {}{} is back in the queue.\nREMOVE: /ok{}",
                    LINK_PREFIX, id, id
                ),
            };
            vec![reply(response)]
        }
        Command::Unrecognized => vec![reply(format!(
            "If that was meant to be a link or a command, it was not recognized.\n{}",
            HELP
        ))],
    };

    Ok(messages)
}

/// Commands shown in Telegram's command menu.
/// `/ok<id>` and `/add<id>` are sent by the bot itself, so they're not here.
pub fn generate_bot_commands() -> Vec<BotCommand> {
    vec![
        BotCommand::new("next", "Show links from other people to promote"),
        BotCommand::new("flush", "Save the link queue to disk right now"),
        BotCommand::new("help", "How this bot works"),
    ]
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    const BOT: Option<&str> = Some("Link_Boost_Bot");

    fn request(sender: u64, text: &str) -> Request {
        Request {
            sender: UserId(sender),
            sender_name: "@someone".to_string(),
            chat: ChatId(sender as i64),
            text: Some(text.to_string()),
        }
    }

    fn open_store(dir: &tempfile::TempDir) -> LinkStore {
        LinkStore::open(dir.path().join("database.json")).unwrap()
    }

    #[test]
    fn link_extraction() {
        assert_eq!(
            extract_link_id("https://a.aliexpress.com/_mOKDdtH"),
            Some("_mOKDdtH")
        );
        assert_eq!(
            extract_link_id("look at this!! https://a.aliexpress.com/_abc123 pls"),
            Some("_abc123")
        );
        assert_eq!(extract_link_id("https://a.aliexpress.com/"), None);
        assert_eq!(extract_link_id("https://www.aliexpress.com/_abc"), None);
        assert_eq!(extract_link_id("http://a.aliexpress.com/_abc"), None);
        assert_eq!(extract_link_id("hi"), None);
    }

    #[test]
    fn link_ids_are_not_truncated() {
        assert_eq!(extract_link_id("https://a.aliexpress.com/_abc-def"), None);
        assert_eq!(extract_link_id("https://a.aliexpress.com/_abc/def"), None);
        assert_eq!(
            extract_link_id("https://a.aliexpress.com/_abc?lang=pt"),
            Some("_abc")
        );
        assert_eq!(
            extract_link_id("https://a.aliexpress.com/_abc\nthanks"),
            Some("_abc")
        );
        assert_eq!(
            extract_link_id("https://a.aliexpress.com/_a-b and https://a.aliexpress.com/_ok"),
            Some("_ok")
        );

        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let out = respond(&store, BOT, &request(1, "https://a.aliexpress.com/_abc-def"));
        assert!(out[0].text.contains("not recognized"));
        assert_eq!(store.registry.count(), 0);
    }

    #[test]
    fn command_parsing() {
        use Command::*;
        assert_eq!(Command::parse("/ok_abc", BOT), Some(Done("_abc")));
        assert_eq!(Command::parse("/OK_abc", BOT), Some(Done("_abc")));
        assert_eq!(Command::parse("/ok", BOT), Some(Done("")));
        assert_eq!(Command::parse("/add_abc", BOT), Some(Readd("_abc")));
        assert_eq!(Command::parse("/add", BOT), Some(Unrecognized));
        assert_eq!(Command::parse("/next", BOT), Some(Next));
        assert_eq!(Command::parse("/next@link_boost_bot", BOT), Some(Next));
        assert_eq!(Command::parse("/next@OtherBot", BOT), None);
        assert_eq!(Command::parse("/next@OtherBot", None), Some(Next));
        assert_eq!(Command::parse("/flush extra words", BOT), Some(Flush));
        assert_eq!(Command::parse("/start", BOT), Some(Help));
        assert_eq!(Command::parse("/help", BOT), Some(Help));
        assert_eq!(
            Command::parse("https://a.aliexpress.com/_x1", BOT),
            Some(Submit("_x1"))
        );
        assert_eq!(
            Command::parse("/whatever https://a.aliexpress.com/_x1", BOT),
            Some(Submit("_x1"))
        );
        assert_eq!(Command::parse("hello", BOT), Some(Unrecognized));
        assert_eq!(Command::parse("/", BOT), Some(Unrecognized));
    }

    #[test]
    fn space_after_slash_is_not_a_command() {
        use Command::*;
        assert_eq!(Command::parse("/ okX1", BOT), Some(Unrecognized));
        assert_eq!(Command::parse("/ next", BOT), Some(Unrecognized));
        assert_eq!(Command::parse("/\tflush", BOT), Some(Unrecognized));
        assert_eq!(
            Command::parse("/ https://a.aliexpress.com/_x1", BOT),
            Some(Submit("_x1"))
        );

        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        store.registry.add_link(UserId(42), "X1");
        respond(&store, BOT, &request(7, "/ okX1"));
        assert!(store.registry.get("X1").unwrap().enabled);
    }

    #[test]
    fn submit_next_and_done() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let out = respond(&store, BOT, &request(42, "https://a.aliexpress.com/X1"));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].chat, ChatId(42));
        assert!(out[0].text.contains("added successfully"));
        assert!(out[0].text.contains("/okX1"));

        // Owner doesn't see their own link.
        let out = respond(&store, BOT, &request(42, "/next"));
        assert_eq!(out.len(), 1);
        assert!(out[0].text.starts_with("ERROR:"));

        let out = respond(&store, BOT, &request(7, "/next"));
        assert_eq!(out.len(), 1);
        assert!(out[0].text.contains("https://a.aliexpress.com/X1"));
        assert!(out[0].text.contains("/okX1"));

        // Someone else marks it done: they get a reply, owner gets notified.
        let out = respond(&store, BOT, &request(7, "/okX1"));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].chat, ChatId(7));
        assert_eq!(out[1].chat, ChatId(42));
        assert!(out[1].text.contains("@someone"));
        assert!(out[1].text.contains("/addX1"));
        assert!(!store.registry.get("X1").unwrap().enabled);

        let out = respond(&store, BOT, &request(7, "/next"));
        assert!(out[0].text.starts_with("ERROR:"));
    }

    #[test]
    fn owner_marking_own_link_is_not_notified() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        store.registry.add_link(UserId(42), "X1");

        let out = respond(&store, BOT, &request(42, "/okX1"));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].chat, ChatId(42));
    }

    #[test]
    fn readd_keeps_owner() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        store.registry.add_link(UserId(42), "X1");
        store.registry.mark_done("X1");

        let out = respond(&store, BOT, &request(99, "/addX1"));
        assert_eq!(out.len(), 1);
        assert!(out[0].text.contains("/okX1"));

        assert_eq!(store.registry.owner_of("X1"), Some(UserId(42)));
        assert_eq!(
            store.registry.list_promotable(UserId(99), 10),
            vec!["X1".to_string()]
        );
    }

    #[test]
    fn resubmitting_a_link() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        store.registry.add_link(UserId(42), "X1");
        store.registry.mark_done("X1");

        let out = respond(&store, BOT, &request(99, "https://a.aliexpress.com/X1"));
        assert!(out[0].text.contains("back in the queue"));
        assert_eq!(store.registry.owner_of("X1"), Some(UserId(42)));
    }

    #[test]
    fn unknown_link_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let out = respond(&store, BOT, &request(7, "/okNOPE"));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "ERROR: Link NOPE was not found");
        assert_eq!(store.registry.count(), 0);
    }

    #[test]
    fn next_is_limited() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        for i in 0..(NEXT_LINKS_LIMIT + 5) {
            store.registry.add_link(UserId(1), &format!("L{}", i));
        }

        let out = respond(&store, BOT, &request(2, "/next"));
        assert_eq!(out[0].text.matches(LINK_PREFIX).count(), NEXT_LINKS_LIMIT);
    }

    #[test]
    fn flush_command_saves() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        store.registry.add_link(UserId(1), "A");

        let out = respond(&store, BOT, &request(2, "/flush"));
        assert_eq!(out[0].text, "State saved, 1 links in total.");
        let saved = fs::read_to_string(store.state.path()).unwrap();
        assert!(saved.contains("\"A\""));
    }

    #[test]
    fn flush_command_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        fs::create_dir(store.state.temp_path()).unwrap();

        let out = respond(&store, BOT, &request(2, "/flush"));
        assert_eq!(out.len(), 1);
        assert!(out[0].text.starts_with("ERROR: Could not save the state"));
    }

    #[tokio::test]
    async fn flush_command_runs_off_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(open_store(&dir));
        store.registry.add_link(UserId(1), "A");
        store.registry.add_link(UserId(1), "B");

        let out = respond_blocking(
            store.clone(),
            Some("Link_Boost_Bot".to_string()),
            request(2, "/flush@link_boost_bot"),
        )
        .await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "State saved, 2 links in total.");

        let reloaded = LinkStore::open(store.state.path()).unwrap();
        assert_eq!(reloaded.registry.count(), 2);
    }

    #[test]
    fn help_and_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let out = respond(&store, BOT, &request(2, "/start"));
        assert!(out[0].text.contains("/next"));

        let out = respond(&store, BOT, &request(2, "hewwo"));
        assert!(out[0].text.contains("not recognized"));
        assert!(out[0].text.contains("/next"));

        let out = respond(
            &store,
            BOT,
            &Request {
                text: None,
                ..request(2, "")
            },
        );
        assert_eq!(out[0].text, "ERROR: Only text messages are supported");

        assert!(respond(&store, BOT, &request(2, "/next@OtherBot")).is_empty());
        assert_eq!(store.registry.count(), 0);
    }
}
