//! Best-effort session persistence.
//!
//! The orchestrator owns the in-memory session; every mutation is mirrored
//! to a durable snapshot keyed by a fixed slot (one active session at a
//! time) so the process can be torn down and resume transparently. Failures
//! here are logged and never block the in-memory operation.

use std::future::Future;
use std::path::PathBuf;
use std::{fmt, io};

use log::info;

use super::session::CaptureSession;
use super::types::now_ms;

#[derive(Debug)]
pub enum StorageError {
    Io(io::Error),
    Json(serde_json::Error),
}

impl From<io::Error> for StorageError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(error: serde_json::Error) -> Self {
        Self::Json(error)
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Io(error) => write!(formatter, "io error: {error}"),
            StorageError::Json(error) => write!(formatter, "json error: {error}"),
        }
    }
}

impl std::error::Error for StorageError {}

/// Futures are `Send` so pipeline runs can move onto spawned tasks.
pub trait SessionStore: Send + Sync {
    fn save(&self, session: &CaptureSession) -> impl Future<Output = Result<(), StorageError>> + Send;
    fn restore(&self) -> impl Future<Output = Result<Option<CaptureSession>, StorageError>> + Send;
    /// Remove the snapshot so a cancelled session leaves no record behind.
    fn clear(&self) -> impl Future<Output = Result<(), StorageError>> + Send;
    /// Drop snapshots older than `retention_ms`, along with their
    /// screenshot directories.
    fn purge_expired(&self, retention_ms: i64) -> impl Future<Output = Result<(), StorageError>> + Send;
}

/// Snapshot store writing one `session.json` slot file under `dir`.
#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn default_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("com.pagecast.app")
    }

    fn slot_path(&self) -> PathBuf {
        self.dir.join("session.json")
    }
}

impl SessionStore for JsonStore {
    async fn save(&self, session: &CaptureSession) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(session)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.slot_path(), json).await?;
        Ok(())
    }

    async fn restore(&self) -> Result<Option<CaptureSession>, StorageError> {
        let raw = match tokio::fs::read_to_string(self.slot_path()).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        let session: CaptureSession = serde_json::from_str(&raw)?;
        Ok(Some(session))
    }

    async fn clear(&self) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.slot_path()).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn purge_expired(&self, retention_ms: i64) -> Result<(), StorageError> {
        let Some(session) = self.restore().await? else {
            return Ok(());
        };
        let age_ms = now_ms() - session.updated_at_ms;
        if age_ms <= retention_ms {
            return Ok(());
        }

        let last_touched = chrono::DateTime::from_timestamp_millis(session.updated_at_ms)
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| session.updated_at_ms.to_string());
        info!("purging expired session snapshot (last touched {last_touched})");

        session.cleanup();
        self.clear().await
    }
}
