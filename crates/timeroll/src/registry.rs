//! Device registry on disk.
//!
//! The registry file is the only source of truth. Every read loads it fresh and
//! every update follows one protocol under a single lock:
//!
//! 1. load the current bytes and locate the alias (`NotFound` stops here,
//!    nothing is written)
//! 2. copy exactly those bytes to a new timestamped backup (failure aborts)
//! 3. replace the time and write the whole list to a temporary file
//! 4. rename the temporary file over the registry

use crate::clock::Clock;
use crate::config::BotConfig;
use crate::error::RegistryError;
use crate::login_time::LoginTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Upper bound on same-second backup name collisions before giving up.
const MAX_BACKUP_SUFFIX: u32 = 1000;

/// One device and its login time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub alias: String,
    pub time: String,
    /// Keys this bot does not manage. Written back untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// What a successful update did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReceipt {
    pub backup: PathBuf,
    pub previous: String,
}

pub struct RegistryStore {
    path: PathBuf,
    backup_dir: PathBuf,
    io_timeout: Duration,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            backup_dir: backup_dir.into(),
            io_timeout: Duration::from_secs(10),
            clock,
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &BotConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(&config.registry_path, &config.backup_dir, clock).with_io_timeout(config.io_timeout())
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub async fn records(&self) -> Result<Vec<DeviceRecord>, RegistryError> {
        self.bounded(async {
            let bytes = self.read_raw().await?;
            self.parse(&bytes)
        })
        .await
    }

    /// Aliases in registry order, for building a selection prompt.
    pub async fn list_aliases(&self) -> Result<Vec<String>, RegistryError> {
        Ok(self.records().await?.into_iter().map(|r| r.alias).collect())
    }

    /// `alias: time` lines in registry order.
    pub async fn render_view(&self) -> Result<Vec<String>, RegistryError> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .map(|r| format!("{}: {}", r.alias, r.time))
            .collect())
    }

    /// Set the login time of `alias`, backing up the current file first.
    pub async fn update(&self, alias: &str, time: &LoginTime) -> Result<UpdateReceipt, RegistryError> {
        let _guard = self.write_lock.lock().await;
        self.bounded(self.update_locked(alias, time)).await
    }

    async fn update_locked(&self, alias: &str, time: &LoginTime) -> Result<UpdateReceipt, RegistryError> {
        let bytes = self.read_raw().await?;
        let mut records = self.parse(&bytes)?;

        let index = records
            .iter()
            .position(|r| r.alias == alias)
            .ok_or_else(|| RegistryError::NotFound(alias.to_string()))?;

        let backup = self.write_backup(&bytes).await?;

        let previous = std::mem::replace(&mut records[index].time, time.to_string());
        self.persist(&records).await?;

        info!(
            alias,
            previous = %previous,
            new_time = %time,
            registry = %self.path.display(),
            backup = %backup.display(),
            "registry updated"
        );

        Ok(UpdateReceipt { backup, previous })
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, RegistryError>>,
    ) -> Result<T, RegistryError> {
        tokio::time::timeout(self.io_timeout, fut)
            .await
            .map_err(|_| RegistryError::Timeout(self.io_timeout))?
    }

    async fn read_raw(&self) -> Result<Vec<u8>, RegistryError> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|e| RegistryError::io("read", &self.path, e))
    }

    fn parse(&self, bytes: &[u8]) -> Result<Vec<DeviceRecord>, RegistryError> {
        serde_json::from_slice(bytes).map_err(|source| RegistryError::Malformed {
            path: self.path.clone(),
            source,
        })
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "registry.json".to_string())
    }

    async fn write_backup(&self, bytes: &[u8]) -> Result<PathBuf, RegistryError> {
        tokio::fs::create_dir_all(&self.backup_dir)
            .await
            .map_err(|e| RegistryError::io("create backup dir", &self.backup_dir, e))?;

        let stamp = self.clock.now().format("%Y-%m-%d_%H-%M-%S").to_string();
        let file_name = self.file_name();

        for n in 1..=MAX_BACKUP_SUFFIX {
            let name = if n == 1 {
                format!("{stamp}_{file_name}")
            } else {
                format!("{stamp}-{n}_{file_name}")
            };
            let target = self.backup_dir.join(name);

            let mut file = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&target)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(RegistryError::io("create backup", &target, e)),
            };

            file.write_all(bytes)
                .await
                .map_err(|e| RegistryError::io("write backup", &target, e))?;
            file.sync_all()
                .await
                .map_err(|e| RegistryError::io("sync backup", &target, e))?;

            debug!(backup = %target.display(), "registry backed up");
            return Ok(target);
        }

        Err(RegistryError::io(
            "create backup",
            &self.backup_dir,
            std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("too many backups for {stamp}"),
            ),
        ))
    }

    async fn persist(&self, records: &[DeviceRecord]) -> Result<(), RegistryError> {
        let body = to_pretty_json(records).map_err(|source| RegistryError::Malformed {
            path: self.path.clone(),
            source,
        })?;

        let tmp = self.path.with_file_name(format!(".{}.tmp", self.file_name()));
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| RegistryError::io("create", &tmp, e))?;
        file.write_all(&body)
            .await
            .map_err(|e| RegistryError::io("write", &tmp, e))?;
        file.sync_all()
            .await
            .map_err(|e| RegistryError::io("sync", &tmp, e))?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| RegistryError::io("replace", &self.path, e))
    }
}

/// Four-space indented JSON, the layout operators edit by hand.
fn to_pretty_json(records: &[DeviceRecord]) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    records.serialize(&mut ser)?;
    Ok(out)
}
