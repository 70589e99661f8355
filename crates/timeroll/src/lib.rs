//! # Timeroll
//!
//! Whitelisted operators edit a registry of devices and their login times
//! through a chat conversation. Every write is backed up first, and changes are
//! propagated to a public copy at most once per interval.
//!
//! ## Architecture
//!
//! ```text
//! Transport (Telegram, tests, ...)
//!     │
//!     ▼ Engine::handle(Inbound)
//! Whitelist ── reject ──► fixed reply, nothing else touched
//!     │
//!     ▼
//! Command / Selection / FreeText
//!     │
//!     ├─► RegistryStore.render_view / list_aliases      (read, always fresh)
//!     │
//!     ├─► ConversationMachine.begin(alias)              (Idle → AwaitingInput)
//!     │
//!     └─► ConversationMachine.on_free_text              (AwaitingInput → Idle)
//!             │
//!             ▼ valid time
//!         RegistryStore.update ─► backup ─► rewrite
//!             │
//!             ▼
//!         PublishScheduler.maybe_publish                (≤ once per interval)
//!     │
//!     ▼
//! Replies (SmallVec<Outbound>) ──► Transport
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Authorization first** - every event passes the whitelist before any
//!    handler runs
//! 2. **One-shot continuation** - an awaiting conversation consumes exactly
//!    the next free-text message, valid or not
//! 3. **Backup before write** - no registry write without a fresh backup; a
//!    failed backup aborts the update
//! 4. **Serialized writes** - backup, load, modify and write run under one lock
//! 5. **Best-effort publish** - a failed publish is logged and never undoes a
//!    write
//!
//! ## Example
//!
//! ```ignore
//! use timeroll::{BotConfig, ChatId, EngineBuilder, Inbound, UserId};
//! use std::sync::Arc;
//!
//! let config = BotConfig::from_path("timeroll.toml")?;
//! let engine = Arc::new(EngineBuilder::new(config).build());
//! let handle = engine.clone().start();
//!
//! let replies = engine
//!     .handle(Inbound::Command {
//!         actor: UserId(1761200689),
//!         chat: ChatId(1761200689),
//!         text: "/view".into(),
//!     })
//!     .await;
//!
//! handle.shutdown().await;
//! ```

mod auth;
mod clock;
mod commands;
mod config;
mod core;
mod engine;
mod error;
mod login_time;
mod machine;
mod publish;
mod registry;

pub use crate::core::{ChatId, Choice, Inbound, Outbound, Replies, UserId};

pub use auth::Whitelist;

pub use clock::{Clock, SystemClock};

pub use commands::{edit_token, parse_edit_token, BotCommand, HELP_TEXT};

pub use config::{AuthorizedUser, BotConfig, PublishConfig, TelegramConfig};

pub use engine::{Engine, EngineBuilder, EngineHandle};

pub use crate::error::{
    BotError, ConfigError, ErrorKind, PublishError, RegistryError, ValidationError,
};

pub use login_time::LoginTime;

pub use machine::{ConversationKey, ConversationMachine, ConversationState, PendingEdit, ReplyDecision};

pub use publish::{PublishAction, PublishOutcome, PublishScheduler, ScriptPublisher};

pub use registry::{DeviceRecord, RegistryStore, UpdateReceipt};

pub use async_trait::async_trait;
