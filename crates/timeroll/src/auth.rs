//! Whitelist gate in front of every handler.

use crate::config::AuthorizedUser;
use crate::core::UserId;
use crate::error::BotError;
use std::collections::HashMap;

/// Immutable allow-list built from configuration.
#[derive(Debug, Clone)]
pub struct Whitelist {
    users: HashMap<UserId, AuthorizedUser>,
}

impl Whitelist {
    pub fn new(users: impl IntoIterator<Item = AuthorizedUser>) -> Self {
        Self {
            users: users.into_iter().map(|user| (user.id, user)).collect(),
        }
    }

    /// Resolve an actor, or reject it. No side effects.
    pub fn authorize(&self, id: UserId) -> Result<&AuthorizedUser, BotError> {
        self.users.get(&id).ok_or(BotError::Unauthorized(id))
    }

    /// Display name for logging, whether or not the actor is allowed.
    pub fn display_name(&self, id: UserId) -> &str {
        self.users.get(&id).map_or("unknown", |user| user.name.as_str())
    }
}
