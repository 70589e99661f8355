//! Minimal Telegram Bot API client: just what the bot needs.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use timeroll::{Choice, Outbound};
use tracing::warn;

const API_BASE: &str = "https://api.telegram.org";

/// Telegram rejects callback data longer than this.
pub const MAX_CALLBACK_DATA: usize = 64;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Serialize)]
struct GetUpdates {
    offset: i64,
    timeout: u64,
    allowed_updates: &'static [&'static str],
}

#[derive(Debug, Serialize)]
pub(crate) struct SendMessage {
    pub chat_id: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<InlineKeyboardMarkup>,
}

#[derive(Debug, Serialize)]
pub(crate) struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Serialize)]
struct AnswerCallbackQuery<'a> {
    callback_query_id: &'a str,
}

impl SendMessage {
    /// Render an outbound reply. Choices become one button per row.
    pub(crate) fn from_outbound(outbound: &Outbound) -> Self {
        match outbound {
            Outbound::SendText { chat, text } => SendMessage {
                chat_id: chat.0,
                text: text.clone(),
                reply_markup: None,
            },
            Outbound::OfferChoices {
                chat,
                prompt,
                choices,
            } => SendMessage {
                chat_id: chat.0,
                text: prompt.clone(),
                reply_markup: Some(InlineKeyboardMarkup {
                    inline_keyboard: choices.iter().filter_map(button).map(|b| vec![b]).collect(),
                }),
            },
        }
    }
}

fn button(choice: &Choice) -> Option<InlineKeyboardButton> {
    if choice.token.len() > MAX_CALLBACK_DATA {
        warn!(label = %choice.label, "choice token too long for a Telegram button, skipped");
        return None;
    }
    Some(InlineKeyboardButton {
        text: choice.label.clone(),
        callback_data: choice.token.clone(),
    })
}

// ============================================================================
// Client
// ============================================================================

/// Bot API client. The token is part of every URL, so request errors are
/// stripped of their URL before they can reach a log.
#[derive(Clone)]
pub struct BotApi {
    http: reqwest::Client,
    base: String,
    poll_timeout: Duration,
}

impl BotApi {
    pub fn new(token: &str, poll_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(poll_timeout + Duration::from_secs(10))
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            http,
            base: format!("{API_BASE}/bot{token}"),
            poll_timeout,
        })
    }

    async fn call<B: Serialize, T: for<'de> Deserialize<'de>>(&self, method: &str, body: &B) -> Result<T> {
        let response = self
            .http
            .post(format!("{}/{method}", self.base))
            .json(body)
            .send()
            .await
            .map_err(|e| e.without_url())
            .with_context(|| format!("{method} request failed"))?;

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| e.without_url())
            .with_context(|| format!("{method} returned an unreadable body"))?;

        if !envelope.ok {
            bail!(
                "{method} rejected: {}",
                envelope.description.unwrap_or_else(|| "no description".into())
            );
        }
        envelope
            .result
            .with_context(|| format!("{method} returned no result"))
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            &GetUpdates {
                offset,
                timeout: self.poll_timeout.as_secs(),
                allowed_updates: &["message", "callback_query"],
            },
        )
        .await
    }

    pub async fn send(&self, outbound: &Outbound) -> Result<()> {
        let _: serde_json::Value = self
            .call("sendMessage", &SendMessage::from_outbound(outbound))
            .await?;
        Ok(())
    }

    pub async fn answer_callback_query(&self, id: &str) -> Result<()> {
        let _: bool = self
            .call("answerCallbackQuery", &AnswerCallbackQuery { callback_query_id: id })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timeroll::ChatId;

    #[test]
    fn choices_render_one_button_per_row() {
        let outbound = Outbound::OfferChoices {
            chat: ChatId(5),
            prompt: "Pick a device:".into(),
            choices: vec![
                Choice {
                    label: "Laptop".into(),
                    token: "edit:Laptop".into(),
                },
                Choice {
                    label: "Desktop".into(),
                    token: "edit:Desktop".into(),
                },
            ],
        };

        let json = serde_json::to_value(SendMessage::from_outbound(&outbound)).unwrap();

        assert_eq!(json["chat_id"], 5);
        assert_eq!(json["text"], "Pick a device:");
        let rows = json["reply_markup"]["inline_keyboard"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0]["callback_data"], "edit:Desktop");
    }

    #[test]
    fn plain_text_has_no_markup() {
        let json =
            serde_json::to_value(SendMessage::from_outbound(&Outbound::text(ChatId(5), "hi"))).unwrap();
        assert!(json.get("reply_markup").is_none());
    }

    #[test]
    fn oversized_tokens_are_dropped() {
        let outbound = Outbound::OfferChoices {
            chat: ChatId(5),
            prompt: "Pick a device:".into(),
            choices: vec![Choice {
                label: "x".repeat(80),
                token: format!("edit:{}", "x".repeat(80)),
            }],
        };
        let message = SendMessage::from_outbound(&outbound);
        assert!(message.reply_markup.unwrap().inline_keyboard.is_empty());
    }

    #[test]
    fn parses_update_envelope() {
        let raw = r#"{
            "ok": true,
            "result": [{
                "update_id": 10,
                "callback_query": {
                    "id": "abc",
                    "from": {"id": 7, "is_bot": false, "first_name": "Hugo"},
                    "message": {"message_id": 3, "chat": {"id": 7, "type": "private"}, "date": 0},
                    "data": "edit:Laptop"
                }
            }]
        }"#;
        let envelope: Envelope<Vec<Update>> = serde_json::from_str(raw).unwrap();
        let updates = envelope.result.unwrap();
        let query = updates[0].callback_query.as_ref().unwrap();
        assert_eq!(query.data.as_deref(), Some("edit:Laptop"));
        assert_eq!(query.message.as_ref().unwrap().chat.id, 7);
    }
}
