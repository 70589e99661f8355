//! Transport-neutral event and reply types.
//!
//! A transport turns whatever it receives into an [`Inbound`] and renders each
//! [`Outbound`] it gets back. Nothing in this crate knows how messages travel.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// External identifier of the person acting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Conversation a message arrived in and replies go back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inbound event as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Slash command such as `/edit`. `text` is the raw command text.
    Command {
        actor: UserId,
        chat: ChatId,
        text: String,
    },

    /// A discrete choice picked from a previous [`Outbound::OfferChoices`].
    Selection {
        actor: UserId,
        chat: ChatId,
        token: String,
    },

    /// Any other text message.
    FreeText {
        actor: UserId,
        chat: ChatId,
        text: String,
    },
}

impl Inbound {
    pub fn actor(&self) -> UserId {
        match self {
            Inbound::Command { actor, .. }
            | Inbound::Selection { actor, .. }
            | Inbound::FreeText { actor, .. } => *actor,
        }
    }

    pub fn chat(&self) -> ChatId {
        match self {
            Inbound::Command { chat, .. }
            | Inbound::Selection { chat, .. }
            | Inbound::FreeText { chat, .. } => *chat,
        }
    }

    /// What the actor asked for: command text, selection token, or
    /// `free_text` (reply contents stay out of the log).
    pub fn audit_label(&self) -> &str {
        match self {
            Inbound::Command { text, .. } => text,
            Inbound::Selection { token, .. } => token,
            Inbound::FreeText { .. } => "free_text",
        }
    }

    /// Short name used in audit lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Inbound::Command { .. } => "command",
            Inbound::Selection { .. } => "selection",
            Inbound::FreeText { .. } => "free_text",
        }
    }
}

/// One selectable option: what the operator sees and what comes back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub label: String,
    pub token: String,
}

/// Outbound message for the transport to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    SendText {
        chat: ChatId,
        text: String,
    },
    OfferChoices {
        chat: ChatId,
        prompt: String,
        choices: Vec<Choice>,
    },
}

impl Outbound {
    pub fn text(chat: ChatId, text: impl Into<String>) -> Self {
        Outbound::SendText {
            chat,
            text: text.into(),
        }
    }

    pub fn chat(&self) -> ChatId {
        match self {
            Outbound::SendText { chat, .. } | Outbound::OfferChoices { chat, .. } => *chat,
        }
    }

    /// Text body, or the prompt for a choice offer.
    pub fn body(&self) -> &str {
        match self {
            Outbound::SendText { text, .. } => text,
            Outbound::OfferChoices { prompt, .. } => prompt,
        }
    }
}

/// Replies produced for one inbound event. Rarely more than three.
pub type Replies = SmallVec<[Outbound; 4]>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_label_names_the_request_but_not_reply_text() {
        let command = Inbound::Command {
            actor: UserId(1),
            chat: ChatId(1),
            text: "/view_config".into(),
        };
        let selection = Inbound::Selection {
            actor: UserId(1),
            chat: ChatId(1),
            token: "edit:Laptop".into(),
        };
        let reply = Inbound::FreeText {
            actor: UserId(1),
            chat: ChatId(1),
            text: "09:00:00.000000".into(),
        };

        assert_eq!(command.audit_label(), "/view_config");
        assert_eq!(selection.audit_label(), "edit:Laptop");
        assert_eq!(reply.audit_label(), "free_text");
    }
}
