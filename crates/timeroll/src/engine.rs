//! The engine: one entry point per inbound event.
//!
//! ```text
//! Inbound ──► Whitelist ──► command / selection / free text
//!                               │
//!                               ├─► RegistryStore (view, aliases)
//!                               ├─► ConversationMachine (pending edits)
//!                               └─► RegistryStore.update ─► PublishScheduler
//! ```
//!
//! Every event is authorized first, in one place. Rejected events get a fixed
//! reply and touch nothing else.

use crate::auth::Whitelist;
use crate::clock::{Clock, SystemClock};
use crate::commands::{edit_token, parse_edit_token, BotCommand, HELP_TEXT};
use crate::config::{AuthorizedUser, BotConfig};
use crate::core::{ChatId, Choice, Inbound, Outbound, Replies, UserId};
use crate::error::{BotError, ErrorKind};
use crate::machine::{ConversationKey, ConversationMachine, ConversationState, ReplyDecision};
use crate::publish::{PublishAction, PublishOutcome, PublishScheduler, ScriptPublisher};
use crate::registry::RegistryStore;
use smallvec::smallvec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Builder for [`Engine`]. Defaults to the system clock and the configured
/// publish script.
pub struct EngineBuilder {
    config: Arc<BotConfig>,
    clock: Option<Arc<dyn Clock>>,
    action: Option<Arc<dyn PublishAction>>,
}

impl EngineBuilder {
    pub fn new(config: impl Into<Arc<BotConfig>>) -> Self {
        Self {
            config: config.into(),
            clock: None,
            action: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_publish_action(mut self, action: Arc<dyn PublishAction>) -> Self {
        self.action = Some(action);
        self
    }

    pub fn build(self) -> Engine {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let action = self
            .action
            .unwrap_or_else(|| Arc::new(ScriptPublisher::from_config(&self.config.publish)));

        Engine {
            whitelist: Whitelist::new(self.config.users.iter().cloned()),
            registry: RegistryStore::from_config(&self.config, clock.clone()),
            conversations: ConversationMachine::new(self.config.pending_ttl()),
            publisher: PublishScheduler::new(action, clock.clone(), self.config.publish.interval()),
            clock,
            config: self.config,
        }
    }
}

pub struct Engine {
    config: Arc<BotConfig>,
    whitelist: Whitelist,
    registry: RegistryStore,
    conversations: ConversationMachine,
    publisher: PublishScheduler,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn registry(&self) -> &RegistryStore {
        &self.registry
    }

    pub fn publisher(&self) -> &PublishScheduler {
        &self.publisher
    }

    pub fn conversation_state(&self, chat: ChatId, user: UserId) -> ConversationState {
        self.conversations
            .state(ConversationKey::new(chat, user), self.clock.now())
    }

    /// Handle one inbound event and return the replies to send.
    pub async fn handle(&self, event: Inbound) -> Replies {
        let event_id = Uuid::new_v4();
        let span = info_span!(
            "event",
            %event_id,
            actor = %event.actor(),
            chat = %event.chat(),
            kind = event.kind()
        );
        self.dispatch(event).instrument(span).await
    }

    async fn dispatch(&self, event: Inbound) -> Replies {
        let chat = event.chat();
        let actor = event.actor();
        let user = match self.whitelist.authorize(actor) {
            Ok(user) => user,
            Err(err) => {
                warn!(
                    user = self.whitelist.display_name(actor),
                    command = %event.audit_label(),
                    "rejected event from user not on the whitelist"
                );
                return smallvec![Outbound::text(chat, err.user_message())];
            }
        };

        match event {
            Inbound::Command { text, .. } => {
                info!(user = %user.name, command = %text, "command");
                // An awaiting conversation takes the command text as its answer;
                // only /cancel gets through.
                if BotCommand::parse(&text) != Some(BotCommand::Cancel) {
                    if let Some(replies) = self.answer_pending(user, chat, &text).await {
                        return replies;
                    }
                }
                self.on_command(user, chat, &text).await
            }
            Inbound::Selection { token, .. } => self.on_selection(user, chat, &token).await,
            Inbound::FreeText { text, .. } => {
                info!(user = %user.name, command = "free_text", "message");
                self.answer_pending(user, chat, &text).await.unwrap_or_else(|| {
                    debug!(user = %user.name, "free text outside an edit ignored");
                    Replies::new()
                })
            }
        }
    }

    async fn on_command(&self, user: &AuthorizedUser, chat: ChatId, text: &str) -> Replies {
        let Some(command) = BotCommand::parse(text) else {
            info!(user = %user.name, command = %text, "unknown command");
            return smallvec![Outbound::text(
                chat,
                "Unknown command. Use /help to see the list of available commands"
            )];
        };
        debug!(user = %user.name, command = command.name(), "running command");

        match command {
            BotCommand::Start => smallvec![Outbound::text(
                chat,
                "Use /help to see the list of available commands"
            )],
            BotCommand::Help => smallvec![Outbound::text(chat, HELP_TEXT)],
            BotCommand::View => match self.registry.render_view().await {
                Ok(lines) if lines.is_empty() => {
                    smallvec![Outbound::text(chat, "No devices registered")]
                }
                Ok(lines) => smallvec![Outbound::text(chat, lines.join("\n"))],
                Err(e) => self.failure(chat, e.into()),
            },
            BotCommand::Edit => match self.registry.list_aliases().await {
                Ok(aliases) if aliases.is_empty() => {
                    smallvec![Outbound::text(chat, "No devices registered")]
                }
                Ok(aliases) => smallvec![Outbound::OfferChoices {
                    chat,
                    prompt: "Pick a device:".to_string(),
                    choices: aliases
                        .into_iter()
                        .map(|alias| Choice {
                            token: edit_token(&alias),
                            label: alias,
                        })
                        .collect(),
                }],
                Err(e) => self.failure(chat, e.into()),
            },
            BotCommand::Cancel => {
                let key = ConversationKey::new(chat, user.id);
                match self.conversations.cancel(key) {
                    Some(edit) => smallvec![Outbound::text(
                        chat,
                        format!("Edit of \"{}\" cancelled", edit.alias)
                    )],
                    None => smallvec![Outbound::text(chat, "Nothing to cancel")],
                }
            }
        }
    }

    async fn on_selection(&self, user: &AuthorizedUser, chat: ChatId, token: &str) -> Replies {
        let Some(alias) = parse_edit_token(token) else {
            info!(user = %user.name, token, "unknown selection");
            return smallvec![Outbound::text(chat, "Unknown selection")];
        };
        info!(user = %user.name, command = "edit_select", alias, "selection");

        // Keyboards can outlive the devices they list.
        match self.registry.list_aliases().await {
            Ok(aliases) if aliases.iter().any(|a| a == alias) => {}
            Ok(_) => return self.failure(chat, BotError::NotFound(alias.to_string())),
            Err(e) => return self.failure(chat, e.into()),
        }

        let key = ConversationKey::new(chat, user.id);
        self.conversations.begin(key, alias, self.clock.now());
        smallvec![Outbound::text(chat, format!("New login time for {alias}:"))]
    }

    /// Feed `text` to the conversation's pending edit. `None` when nothing
    /// is awaiting input.
    async fn answer_pending(&self, user: &AuthorizedUser, chat: ChatId, text: &str) -> Option<Replies> {
        let key = ConversationKey::new(chat, user.id);
        let replies = match self.conversations.on_free_text(key, text, self.clock.now()) {
            ReplyDecision::NotAwaiting => return None,
            ReplyDecision::Invalid { alias, error } => {
                info!(user = %user.name, alias = %alias, %error, "invalid login time");
                self.failure(chat, error.into())
            }
            ReplyDecision::Apply { alias, time } => {
                info!(user = %user.name, alias = %alias, new_time = %time, "applying edit");
                if let Err(e) = self.registry.update(&alias, &time).await {
                    return Some(self.failure(chat, e.into()));
                }

                let outcome = self.publisher.maybe_publish().await;
                debug!(?outcome, "publish check after update");

                smallvec![
                    Outbound::text(chat, format!("Configuration updated for \"{alias}\": {time}")),
                    Outbound::text(chat, self.publish_reminder()),
                ]
            }
        };
        Some(replies)
    }

    fn publish_reminder(&self) -> String {
        let mut reminder = format!(
            "Changes are published at most once every {}.",
            describe_interval(self.publisher.interval())
        );
        if let Some(url) = &self.config.publish.public_url {
            reminder.push_str(&format!(" You should see your changes at {url} by then."));
        }
        reminder
    }

    fn failure(&self, chat: ChatId, err: BotError) -> Replies {
        match err.kind() {
            ErrorKind::Io | ErrorKind::Publish => error!(error = %err, "request failed"),
            _ => info!(error = %err, "request rejected"),
        }
        smallvec![Outbound::text(chat, err.user_message())]
    }

    /// One round of background upkeep: drop lapsed prompts and publish
    /// changes whose window has opened.
    pub async fn run_maintenance(&self) -> (usize, PublishOutcome) {
        let purged = self.conversations.purge_expired(self.clock.now());
        if purged > 0 {
            debug!(purged, "expired pending edits removed");
        }
        (purged, self.publisher.flush_if_due().await)
    }

    /// Spawn the maintenance ticker.
    pub fn start(self: Arc<Self>) -> EngineHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let engine = self.clone();
        let every = self.config.check_every();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        engine.run_maintenance().await;
                    }
                    _ = stop.changed() => break,
                }
            }
            debug!("maintenance ticker stopped");
        });

        EngineHandle {
            engine: self,
            shutdown,
            task,
        }
    }
}

/// A running engine with its background ticker.
pub struct EngineHandle {
    engine: Arc<Engine>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "maintenance ticker ended abnormally");
        }
    }
}

fn describe_interval(interval: Duration) -> String {
    let secs = interval.as_secs();
    let (n, unit) = if secs % 3600 == 0 {
        (secs / 3600, "hour")
    } else if secs % 60 == 0 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };
    if n == 1 {
        unit.to_string()
    } else {
        format!("{n} {unit}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intervals_read_naturally() {
        assert_eq!(describe_interval(Duration::from_secs(3600)), "hour");
        assert_eq!(describe_interval(Duration::from_secs(7200)), "2 hours");
        assert_eq!(describe_interval(Duration::from_secs(900)), "15 minutes");
        assert_eq!(describe_interval(Duration::from_secs(45)), "45 seconds");
    }
}
