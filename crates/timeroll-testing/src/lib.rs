//! Testing utilities for Timeroll.
//!
//! [`TestBot`] wires a real [`Engine`] to a registry in a temporary directory,
//! a [`ManualClock`] and a [`RecordingPublisher`], so conversations can be
//! driven end to end without a chat transport.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use timeroll::{
    edit_token, AuthorizedUser, BotConfig, ChatId, Clock, DeviceRecord, Engine, EngineBuilder,
    Inbound, PublishAction, PublishConfig, PublishError, Replies, TelegramConfig, UserId,
};

// ============================================================================
// Clock
// ============================================================================

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    /// 2024-03-09 14:05:07 UTC.
    pub fn fixed() -> Arc<Self> {
        Self::new(Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap())
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(chrono::Duration::seconds(secs));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ============================================================================
// Publish action
// ============================================================================

/// Publish action that counts invocations and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl PublishAction for RecordingPublisher {
    async fn publish(&self) -> Result<(), PublishError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Other("simulated publish failure".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Registry fixture
// ============================================================================

/// Registry file plus backup directory inside a temporary directory.
pub struct RegistryFixture {
    dir: TempDir,
    registry_path: PathBuf,
    backup_dir: PathBuf,
}

impl RegistryFixture {
    /// Write `records` as `(alias, time)` pairs to `devices.json`.
    pub fn new(records: &[(&str, &str)]) -> Result<Self> {
        let records: Vec<DeviceRecord> = records
            .iter()
            .map(|(alias, time)| DeviceRecord {
                alias: alias.to_string(),
                time: time.to_string(),
                extra: Default::default(),
            })
            .collect();
        Self::with_contents(&serde_json::to_string(&records)?)
    }

    /// Write raw registry contents, valid or not.
    pub fn with_contents(contents: &str) -> Result<Self> {
        let dir = TempDir::new().context("create temp dir")?;
        let registry_path = dir.path().join("devices.json");
        let backup_dir = dir.path().join("backup_config_jsons");
        std::fs::write(&registry_path, contents).context("write registry")?;
        Ok(Self {
            dir,
            registry_path,
            backup_dir,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn registry_path(&self) -> &Path {
        &self.registry_path
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn raw(&self) -> Result<String> {
        std::fs::read_to_string(&self.registry_path).context("read registry")
    }

    pub fn records(&self) -> Result<Vec<DeviceRecord>> {
        Ok(serde_json::from_str(&self.raw()?)?)
    }

    /// Backup files, sorted by name.
    pub fn backups(&self) -> Result<Vec<PathBuf>> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths = std::fs::read_dir(&self.backup_dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        paths.sort();
        Ok(paths)
    }

    pub fn config(&self, users: Vec<AuthorizedUser>) -> BotConfig {
        BotConfig {
            registry_path: self.registry_path.clone(),
            backup_dir: self.backup_dir.clone(),
            pending_ttl_secs: 600,
            io_timeout_secs: 10,
            check_every_secs: 60,
            publish: PublishConfig {
                program: "true".to_string(),
                args: Vec::new(),
                interval_secs: 3600,
                timeout_secs: 30,
                public_url: None,
            },
            users,
            telegram: TelegramConfig::default(),
        }
    }
}

pub fn user(id: i64, name: &str) -> AuthorizedUser {
    AuthorizedUser {
        id: UserId(id),
        name: name.to_string(),
    }
}

// ============================================================================
// End-to-end harness
// ============================================================================

/// Whitelisted operators in every [`TestBot`].
pub const HOWARD: UserId = UserId(1761200689);
pub const HUGO: UserId = UserId(1111111111);

pub struct TestBot {
    pub fixture: RegistryFixture,
    pub clock: Arc<ManualClock>,
    pub publisher: Arc<RecordingPublisher>,
    pub engine: Arc<Engine>,
}

impl TestBot {
    pub fn new(records: &[(&str, &str)]) -> Result<Self> {
        Self::with_config(RegistryFixture::new(records)?, |_| {})
    }

    /// Build around an existing fixture, adjusting the config first.
    pub fn with_config(fixture: RegistryFixture, adjust: impl FnOnce(&mut BotConfig)) -> Result<Self> {
        let mut config = fixture.config(vec![user(HOWARD.0, "Howard"), user(HUGO.0, "Hugo")]);
        adjust(&mut config);
        config.validate()?;

        let clock = ManualClock::fixed();
        let publisher = RecordingPublisher::new();
        let engine = EngineBuilder::new(config)
            .with_clock(clock.clone())
            .with_publish_action(publisher.clone())
            .build();

        Ok(Self {
            fixture,
            clock,
            publisher,
            engine: Arc::new(engine),
        })
    }

    /// Private chats share the user's id, as Telegram does.
    pub fn chat_of(user: UserId) -> ChatId {
        ChatId(user.0)
    }

    pub async fn command(&self, actor: UserId, text: &str) -> Replies {
        self.engine
            .handle(Inbound::Command {
                actor,
                chat: Self::chat_of(actor),
                text: text.to_string(),
            })
            .await
    }

    pub async fn select(&self, actor: UserId, alias: &str) -> Replies {
        self.select_token(actor, &edit_token(alias)).await
    }

    pub async fn select_token(&self, actor: UserId, token: &str) -> Replies {
        self.engine
            .handle(Inbound::Selection {
                actor,
                chat: Self::chat_of(actor),
                token: token.to_string(),
            })
            .await
    }

    pub async fn reply(&self, actor: UserId, text: &str) -> Replies {
        self.engine
            .handle(Inbound::FreeText {
                actor,
                chat: Self::chat_of(actor),
                text: text.to_string(),
            })
            .await
    }

    /// Run the whole edit flow: command, selection, reply.
    pub async fn edit(&self, actor: UserId, alias: &str, time: &str) -> Replies {
        self.command(actor, "/edit").await;
        self.select(actor, alias).await;
        self.reply(actor, time).await
    }
}

/// Bodies of all replies, in order.
pub fn bodies(replies: &Replies) -> Vec<&str> {
    replies.iter().map(|r| r.body()).collect()
}
