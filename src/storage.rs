//! JSON-file persistence for ledgers and the XP history log.
//!
//! The store favors availability: callers log write failures and keep the
//! in-memory state authoritative for the process lifetime. Whole-file
//! writes go through a temp file plus rename so a crash never leaves a
//! half-written snapshot behind.

use crate::moderation::cooldown::CooldownSnapshot;
use crate::xp::{HistoryEntry, UserRecord};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Errors from the JSON store.
#[derive(Error, Debug)]
pub enum StorageError {
    /// JSON (de)serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

const USERS_FILE: &str = "users.json";
const COOLDOWNS_FILE: &str = "cooldowns.json";
const HISTORY_FILE: &str = "xp_history.jsonl";

/// File-backed JSON store rooted at one data directory.
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    /// Create a store rooted at `dir`. The directory is created by
    /// [`Self::ensure_dir`] at startup.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the data directory if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn ensure_dir(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        info!(dir = %self.dir.display(), "data directory ready");
        Ok(())
    }

    /// Save data as pretty-printed JSON, atomically via temp file + rename.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn save_json<T: Serialize + Sync>(
        &self,
        name: &str,
        data: &T,
    ) -> Result<(), StorageError> {
        // Per-write temp names keep concurrent savers from clobbering each
        // other's half-written files before the rename.
        static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

        let body = serde_json::to_string_pretty(data)?;
        let path = self.dir.join(name);
        let tmp = self
            .dir
            .join(format!("{name}.{}.tmp", TMP_COUNTER.fetch_add(1, Ordering::Relaxed)));

        tokio::fs::write(&tmp, body.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Load JSON data, returning `None` if the file does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the read or deserialization fails.
    pub async fn load_json<T: DeserializeOwned>(
        &self,
        name: &str,
    ) -> Result<Option<T>, StorageError> {
        let path = self.dir.join(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(body) => Ok(Some(serde_json::from_str(&body)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Append one JSON line to a log file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the append fails.
    pub async fn append_line<T: Serialize + Sync>(
        &self,
        name: &str,
        entry: &T,
    ) -> Result<(), StorageError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(name))
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Persist the full user table.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn save_users(&self, users: &HashMap<i64, UserRecord>) -> Result<(), StorageError> {
        self.save_json(USERS_FILE, users).await
    }

    /// Load the user table, empty if never saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub async fn load_users(&self) -> Result<HashMap<i64, UserRecord>, StorageError> {
        Ok(self.load_json(USERS_FILE).await?.unwrap_or_default())
    }

    /// Persist the cooldown ledger snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn save_cooldowns(&self, snapshot: &CooldownSnapshot) -> Result<(), StorageError> {
        self.save_json(COOLDOWNS_FILE, snapshot).await
    }

    /// Load the cooldown ledger snapshot, empty if never saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub async fn load_cooldowns(&self) -> Result<CooldownSnapshot, StorageError> {
        Ok(self.load_json(COOLDOWNS_FILE).await?.unwrap_or_default())
    }

    /// Append one entry to the XP history audit log.
    ///
    /// # Errors
    ///
    /// Returns an error if the append fails.
    pub async fn append_history(&self, entry: &HistoryEntry) -> Result<(), StorageError> {
        self.append_line(HISTORY_FILE, entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(tag: &str) -> JsonStore {
        let dir = std::env::temp_dir().join(format!("resale-guard-test-{tag}-{}", std::process::id()));
        JsonStore::new(dir)
    }

    #[tokio::test]
    async fn round_trips_json() -> Result<(), StorageError> {
        let store = temp_store("json");
        store.ensure_dir().await?;

        let data: HashMap<String, u32> = [("a".to_string(), 1)].into_iter().collect();
        store.save_json("t.json", &data).await?;
        let loaded: Option<HashMap<String, u32>> = store.load_json("t.json").await?;
        assert_eq!(loaded, Some(data));
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_is_none() -> Result<(), StorageError> {
        let store = temp_store("missing");
        store.ensure_dir().await?;

        let loaded: Option<HashMap<String, u32>> = store.load_json("absent.json").await?;
        assert!(loaded.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_saves_leave_a_parsable_file() -> Result<(), StorageError> {
        let store = std::sync::Arc::new(temp_store("concurrent"));
        store.ensure_dir().await?;

        let mut tasks = Vec::new();
        for i in 0..8u32 {
            let store = std::sync::Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                let data: HashMap<String, u32> = [("value".to_string(), i)].into_iter().collect();
                store.save_json("race.json", &data).await
            }));
        }
        for task in tasks {
            task.await.expect("task panicked")?;
        }

        // Whichever writer renamed last, the file is whole valid JSON.
        let loaded: Option<HashMap<String, u32>> = store.load_json("race.json").await?;
        let loaded = loaded.expect("file exists");
        assert!(loaded.contains_key("value"));
        Ok(())
    }

    #[tokio::test]
    async fn append_accumulates_lines() -> Result<(), StorageError> {
        let store = temp_store("append");
        store.ensure_dir().await?;

        let _ = tokio::fs::remove_file(store.dir.join("log.jsonl")).await;
        store.append_line("log.jsonl", &1u32).await?;
        store.append_line("log.jsonl", &2u32).await?;
        let body = tokio::fs::read_to_string(store.dir.join("log.jsonl")).await?;
        assert_eq!(body.lines().count(), 2);
        Ok(())
    }
}
