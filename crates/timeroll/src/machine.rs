//! Per-conversation continuation state.
//!
//! Each `(chat, user)` pair is either idle or awaiting a free-text login time
//! for one alias. The table is explicit and inspectable; nothing is captured in
//! closures. Entries carry their creation time and lapse after a TTL.

use crate::core::{ChatId, UserId};
use crate::error::ValidationError;
use crate::login_time::LoginTime;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;
use tracing::debug;

/// Key of one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub chat: ChatId,
    pub user: UserId,
}

impl ConversationKey {
    pub fn new(chat: ChatId, user: UserId) -> Self {
        Self { chat, user }
    }
}

/// An edit waiting for its login time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEdit {
    pub alias: String,
    pub created_at: DateTime<Utc>,
}

impl PendingEdit {
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let age = now.signed_duration_since(self.created_at);
        age.to_std().is_ok_and(|age| age >= ttl)
    }
}

/// Observable state of one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    AwaitingInput(String),
}

/// What a free-text message means for its conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyDecision {
    /// No live prompt; the text is ignored.
    NotAwaiting,
    /// The prompt was answered with a valid time.
    Apply { alias: String, time: LoginTime },
    /// The prompt was answered with something that is not a time.
    Invalid {
        alias: String,
        error: ValidationError,
    },
}

pub struct ConversationMachine {
    pending: DashMap<ConversationKey, PendingEdit>,
    ttl: Duration,
}

impl ConversationMachine {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            ttl,
        }
    }

    /// Start awaiting a time for `alias`. Replaces any earlier prompt for the
    /// same conversation and returns it.
    pub fn begin(&self, key: ConversationKey, alias: impl Into<String>, now: DateTime<Utc>) -> Option<PendingEdit> {
        let edit = PendingEdit {
            alias: alias.into(),
            created_at: now,
        };
        let replaced = self.pending.insert(key, edit);
        if let Some(old) = &replaced {
            debug!(chat = %key.chat, user = %key.user, alias = %old.alias, "pending edit replaced");
        }
        replaced
    }

    /// Consume the next free-text message. The pending edit is removed whatever
    /// the outcome, so a second message never reaches the same alias.
    pub fn on_free_text(&self, key: ConversationKey, text: &str, now: DateTime<Utc>) -> ReplyDecision {
        let Some((_, edit)) = self.pending.remove(&key) else {
            return ReplyDecision::NotAwaiting;
        };
        if edit.is_expired(now, self.ttl) {
            debug!(chat = %key.chat, user = %key.user, alias = %edit.alias, "reply to expired prompt ignored");
            return ReplyDecision::NotAwaiting;
        }
        match LoginTime::parse(text) {
            Ok(time) => ReplyDecision::Apply {
                alias: edit.alias,
                time,
            },
            Err(error) => ReplyDecision::Invalid {
                alias: edit.alias,
                error,
            },
        }
    }

    /// Drop the pending edit, if any.
    pub fn cancel(&self, key: ConversationKey) -> Option<PendingEdit> {
        self.pending.remove(&key).map(|(_, edit)| edit)
    }

    pub fn state(&self, key: ConversationKey, now: DateTime<Utc>) -> ConversationState {
        match self.pending.get(&key) {
            Some(edit) if !edit.is_expired(now, self.ttl) => {
                ConversationState::AwaitingInput(edit.alias.clone())
            }
            _ => ConversationState::Idle,
        }
    }

    /// Remove expired prompts. Returns how many were dropped.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, edit| !edit.is_expired(now, self.ttl));
        before.saturating_sub(self.pending.len())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key(user: i64) -> ConversationKey {
        ConversationKey::new(ChatId(user), UserId(user))
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn machine() -> ConversationMachine {
        ConversationMachine::new(Duration::from_secs(600))
    }

    #[test]
    fn starts_idle() {
        assert_eq!(machine().state(key(1), t0()), ConversationState::Idle);
    }

    #[test]
    fn selection_then_valid_reply_applies_once() {
        let m = machine();
        m.begin(key(1), "Laptop", t0());
        assert_eq!(
            m.state(key(1), t0()),
            ConversationState::AwaitingInput("Laptop".into())
        );

        let decision = m.on_free_text(key(1), "09:15:30.500000", t0());
        assert_eq!(
            decision,
            ReplyDecision::Apply {
                alias: "Laptop".into(),
                time: LoginTime::parse("09:15:30.500000").unwrap(),
            }
        );

        assert_eq!(m.on_free_text(key(1), "10:00:00.000000", t0()), ReplyDecision::NotAwaiting);
        assert_eq!(m.state(key(1), t0()), ConversationState::Idle);
    }

    #[test]
    fn invalid_reply_returns_to_idle() {
        let m = machine();
        m.begin(key(1), "Laptop", t0());

        let decision = m.on_free_text(key(1), "not-a-time", t0());
        assert!(matches!(decision, ReplyDecision::Invalid { alias, .. } if alias == "Laptop"));
        assert_eq!(m.state(key(1), t0()), ConversationState::Idle);
    }

    #[test]
    fn last_prompt_wins() {
        let m = machine();
        m.begin(key(1), "Laptop", t0());
        let replaced = m.begin(key(1), "Desktop", t0());

        assert_eq!(replaced.map(|e| e.alias), Some("Laptop".to_string()));
        assert_eq!(m.pending_count(), 1);
        assert!(matches!(
            m.on_free_text(key(1), "09:00:00.0", t0()),
            ReplyDecision::Apply { alias, .. } if alias == "Desktop"
        ));
    }

    #[test]
    fn conversations_are_independent() {
        let m = machine();
        m.begin(key(1), "Laptop", t0());

        assert_eq!(m.on_free_text(key(2), "09:00:00.0", t0()), ReplyDecision::NotAwaiting);
        assert_eq!(
            m.state(key(1), t0()),
            ConversationState::AwaitingInput("Laptop".into())
        );
    }

    #[test]
    fn same_user_in_another_chat_is_a_different_conversation() {
        let m = machine();
        let private = ConversationKey::new(ChatId(1), UserId(1));
        let group = ConversationKey::new(ChatId(-100), UserId(1));
        m.begin(private, "Laptop", t0());

        assert_eq!(m.on_free_text(group, "09:00:00.0", t0()), ReplyDecision::NotAwaiting);
        assert_eq!(m.pending_count(), 1);
    }

    #[test]
    fn expired_prompt_is_treated_as_absent() {
        let m = machine();
        m.begin(key(1), "Laptop", t0());
        let later = t0() + chrono::Duration::seconds(600);

        assert_eq!(m.state(key(1), later), ConversationState::Idle);
        assert_eq!(m.on_free_text(key(1), "09:00:00.0", later), ReplyDecision::NotAwaiting);
        assert_eq!(m.pending_count(), 0);
    }

    #[test]
    fn purge_drops_only_expired() {
        let m = machine();
        m.begin(key(1), "Laptop", t0());
        m.begin(key(2), "Desktop", t0() + chrono::Duration::seconds(300));

        let purged = m.purge_expired(t0() + chrono::Duration::seconds(700));

        assert_eq!(purged, 1);
        assert_eq!(m.pending_count(), 1);
    }

    #[test]
    fn cancel_clears_pending() {
        let m = machine();
        m.begin(key(1), "Laptop", t0());

        assert!(m.cancel(key(1)).is_some());
        assert!(m.cancel(key(1)).is_none());
        assert_eq!(m.state(key(1), t0()), ConversationState::Idle);
    }
}
