//! Long-poll loop: Telegram updates in, engine replies out.

use crate::api::{BotApi, Update};
use anyhow::Result;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use timeroll::{ChatId, Engine, Inbound, UserId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Map an update to an engine event. Updates the bot does not act on
/// (stickers, edits, joins) map to `None`.
pub fn to_inbound(update: &Update) -> Option<Inbound> {
    if let Some(query) = &update.callback_query {
        let token = query.data.clone()?;
        return Some(Inbound::Selection {
            actor: UserId(query.from.id),
            chat: ChatId(chat_key(update)?),
            token,
        });
    }

    let message = update.message.as_ref()?;
    let actor = UserId(message.from.as_ref()?.id);
    let chat = ChatId(message.chat.id);
    let text = message.text.clone()?;

    if text.starts_with('/') {
        Some(Inbound::Command { actor, chat, text })
    } else {
        Some(Inbound::FreeText { actor, chat, text })
    }
}

/// Chat an update belongs to. A callback without its message falls back to
/// the sender's private chat.
fn chat_key(update: &Update) -> Option<i64> {
    if let Some(query) = &update.callback_query {
        return Some(
            query
                .message
                .as_ref()
                .map_or(query.from.id, |message| message.chat.id),
        );
    }
    update.message.as_ref().map(|message| message.chat.id)
}

/// Update handlers, serialized per chat. Each chat's newest handler waits
/// for the one before it; different chats run concurrently.
#[derive(Default)]
struct ChatQueue {
    tails: HashMap<i64, JoinHandle<()>>,
}

impl ChatQueue {
    fn push<F>(&mut self, chat: Option<i64>, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tails.retain(|_, task| !task.is_finished());

        let Some(chat) = chat else {
            tokio::spawn(work);
            return;
        };
        let previous = self.tails.remove(&chat);
        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(e) = previous.await {
                    error!(chat, error = %e, "update handler ended abnormally");
                }
            }
            work.await;
        });
        self.tails.insert(chat, task);
    }

    /// Wait for every queued handler.
    async fn drain(self) {
        for (chat, task) in self.tails {
            if let Err(e) = task.await {
                error!(chat, error = %e, "update handler ended abnormally");
            }
        }
    }
}

/// Poll until `stop` flips. Updates from one chat are handled in the order
/// they arrived; separate chats do not wait on each other.
pub async fn run(api: BotApi, engine: Arc<Engine>, mut stop: watch::Receiver<bool>) -> Result<()> {
    let mut offset = 0;
    let mut queue = ChatQueue::default();
    info!("polling Telegram for updates");

    loop {
        let updates = tokio::select! {
            result = api.get_updates(offset) => result,
            _ = stop.changed() => break,
        };

        let updates = match updates {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "getUpdates failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(RETRY_DELAY) => continue,
                    _ = stop.changed() => break,
                }
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            queue.push(
                chat_key(&update),
                handle_update(api.clone(), engine.clone(), update),
            );
        }
    }

    queue.drain().await;
    info!("stopped polling");
    Ok(())
}

async fn handle_update(api: BotApi, engine: Arc<Engine>, update: Update) {
    if let Some(query) = &update.callback_query {
        if let Err(e) = api.answer_callback_query(&query.id).await {
            warn!(error = %format!("{e:#}"), "answerCallbackQuery failed");
        }
    }

    let Some(event) = to_inbound(&update) else {
        debug!(update_id = update.update_id, "update ignored");
        return;
    };

    for reply in engine.handle(event).await {
        if let Err(e) = api.send(&reply).await {
            warn!(chat = %reply.chat(), error = %format!("{e:#}"), "sendMessage failed");
        }
    }
}
