//! Command parsing and selection tokens.

const EDIT_TOKEN_PREFIX: &str = "edit:";

/// Commands operators can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
    View,
    Edit,
    Cancel,
}

impl BotCommand {
    /// Parse `/view`, `/VIEW_CONFIG@some_bot extra`, `edit` and friends.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let word = word.strip_prefix('/').unwrap_or(word);
        let word = word.split('@').next().unwrap_or(word);
        match word.to_ascii_lowercase().as_str() {
            "start" => Some(BotCommand::Start),
            "help" => Some(BotCommand::Help),
            "view" | "view_config" => Some(BotCommand::View),
            "edit" | "edit_config" => Some(BotCommand::Edit),
            "cancel" => Some(BotCommand::Cancel),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BotCommand::Start => "start",
            BotCommand::Help => "help",
            BotCommand::View => "view",
            BotCommand::Edit => "edit",
            BotCommand::Cancel => "cancel",
        }
    }
}

pub fn edit_token(alias: &str) -> String {
    format!("{EDIT_TOKEN_PREFIX}{alias}")
}

/// Alias carried by an edit selection token. Aliases may contain `:`.
pub fn parse_edit_token(token: &str) -> Option<&str> {
    token
        .strip_prefix(EDIT_TOKEN_PREFIX)
        .filter(|alias| !alias.is_empty())
}

pub const HELP_TEXT: &str = "Here are the commands you can use:\n\
/start - Start interacting with the bot\n\
/view - View the current login times\n\
/edit - Update the login time of a device\n\
/cancel - Abandon an edit in progress\n\
/help - Show this help message";
