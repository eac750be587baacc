//! Local session index and attachment cache housekeeping
//!
//! Each dispatched thread is a session keyed `gmail:<account>:<threadId>`.
//! The index lives in `sessions.json`; every read-modify-write holds the
//! `sessions.json.lock` file so several processes can share one state dir.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::ThreadId;

/// Outcome of [`SessionStore::prune_expired`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    /// Entries dropped from the index
    pub removed: usize,
    /// Entries still live
    pub kept: usize,
    /// Attachment directories deleted along with their entries
    pub dirs_deleted: usize,
}

/// Where session activity is recorded
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Touch a session, remembering its attachment directory if it has one
    async fn record_activity(&self, key: &str, attachments_dir: Option<&Path>) -> Result<()>;

    /// Drop `account`'s sessions idle for longer than `ttl` and delete their
    /// attachments
    ///
    /// Sessions of other accounts are left alone.
    async fn prune_expired(&self, account: &str, ttl: Duration) -> Result<PruneStats>;
}

/// Session key for a thread of an account
pub fn session_key(account: &str, thread_id: &ThreadId) -> String {
    format!("{}{}", session_prefix(account), thread_id)
}

/// Prefix shared by every session key of an account
pub fn session_prefix(account: &str) -> String {
    format!("gmail:{}:", account.trim().to_lowercase())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionEntry {
    last_activity: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attachments_dir: Option<PathBuf>,
}

type SessionIndex = BTreeMap<String, SessionEntry>;

/// [`SessionStore`] backed by a JSON file
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
    lock_attempts: u32,
    lock_backoff: Duration,
    stale_after: Duration,
}

impl FileSessionStore {
    pub const INDEX_FILE: &'static str = "sessions.json";
    pub const LOCK_FILE: &'static str = "sessions.json.lock";

    /// Store rooted at `dir`; the directory is created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock_attempts: 5,
            lock_backoff: Duration::from_millis(50),
            stale_after: Duration::from_secs(30),
        }
    }

    /// Store in the shared state directory
    pub fn open_default() -> Result<Self> {
        let dir = config::state_dir().context("Could not determine state directory")?;
        Ok(Self::new(dir))
    }

    /// Override lock timing
    ///
    /// # Arguments
    /// * `attempts` - How many times to try creating the lock file
    /// * `backoff` - Base delay; attempt `n` waits `n * backoff`
    /// * `stale_after` - Lock files older than this are broken
    pub fn with_lock_timing(mut self, attempts: u32, backoff: Duration, stale_after: Duration) -> Self {
        self.lock_attempts = attempts.max(1);
        self.lock_backoff = backoff;
        self.stale_after = stale_after;
        self
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(Self::INDEX_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(Self::LOCK_FILE)
    }

    fn record_blocking(&self, key: &str, attachments_dir: Option<PathBuf>) -> Result<()> {
        let _lock = self.acquire_lock()?;
        let mut index = self.read_index()?;
        let entry = index.entry(key.to_string()).or_insert_with(|| SessionEntry {
            last_activity: Utc::now(),
            attachments_dir: None,
        });
        entry.last_activity = Utc::now();
        if attachments_dir.is_some() {
            entry.attachments_dir = attachments_dir;
        }
        self.write_index(&index)
    }

    fn prune_blocking(&self, account: &str, ttl: Duration) -> Result<PruneStats> {
        let _lock = self.acquire_lock()?;
        let mut index = self.read_index()?;
        let cutoff = Utc::now() - chrono::Duration::seconds(ttl.as_secs().min(i64::MAX as u64) as i64);
        let prefix = session_prefix(account);

        let mut stats = PruneStats::default();
        index.retain(|key, entry| {
            if !key.starts_with(&prefix) {
                return true;
            }
            if entry.last_activity > cutoff {
                stats.kept += 1;
                return true;
            }
            stats.removed += 1;
            if let Some(dir) = &entry.attachments_dir
                && dir.exists()
            {
                match std::fs::remove_dir_all(dir) {
                    Ok(()) => stats.dirs_deleted += 1,
                    Err(e) => warn!("Failed to delete attachments for {}: {}", key, e),
                }
            }
            false
        });

        if stats.removed > 0 {
            self.write_index(&index)?;
        }
        Ok(stats)
    }

    fn read_index(&self) -> Result<SessionIndex> {
        let path = self.index_path();
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(SessionIndex::new()),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };
        match serde_json::from_str(&contents) {
            Ok(index) => Ok(index),
            Err(e) => {
                warn!("Discarding unreadable session index {}: {}", path.display(), e);
                Ok(SessionIndex::new())
            }
        }
    }

    fn write_index(&self, index: &SessionIndex) -> Result<()> {
        let path = self.index_path();
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(index).context("Failed to serialize session index")?;
        std::fs::write(&tmp, contents).with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("Failed to replace {}", path.display()))
    }

    fn acquire_lock(&self) -> Result<LockFile> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.lock_path();

        for attempt in 1..=self.lock_attempts {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(LockFile { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if self.lock_is_stale(&path) {
                        warn!("Breaking stale session lock {}", path.display());
                        let _ = std::fs::remove_file(&path);
                        continue;
                    }
                    debug!("Session lock busy (attempt {}/{})", attempt, self.lock_attempts);
                    std::thread::sleep(self.lock_backoff * attempt);
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create {}", path.display()));
                }
            }
        }
        bail!(
            "Session lock {} still held after {} attempts",
            path.display(),
            self.lock_attempts
        )
    }

    fn lock_is_stale(&self, path: &Path) -> bool {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age > self.stale_after)
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn record_activity(&self, key: &str, attachments_dir: Option<&Path>) -> Result<()> {
        let store = self.clone();
        let key = key.to_string();
        let dir = attachments_dir.map(Path::to_path_buf);
        tokio::task::spawn_blocking(move || store.record_blocking(&key, dir))
            .await
            .context("Session store task failed")?
    }

    async fn prune_expired(&self, account: &str, ttl: Duration) -> Result<PruneStats> {
        let store = self.clone();
        let account = account.to_string();
        tokio::task::spawn_blocking(move || store.prune_blocking(&account, ttl))
            .await
            .context("Session store task failed")?
    }
}

/// Held advisory lock; removed on drop
struct LockFile {
    path: PathBuf,
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> FileSessionStore {
        FileSessionStore::new(dir).with_lock_timing(2, Duration::from_millis(1), Duration::from_secs(30))
    }

    #[test]
    fn test_session_key_format() {
        let key = session_key("Bot@Example.com", &ThreadId::new("t1"));
        assert_eq!(key, "gmail:bot@example.com:t1");
    }

    #[tokio::test]
    async fn test_record_then_prune_deletes_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let attachments = dir.path().join("attachments").join("t1");
        std::fs::create_dir_all(&attachments).unwrap();
        std::fs::write(attachments.join("a.txt"), "x").unwrap();

        let store = store(dir.path());
        store.record_activity("gmail:a@x.com:t1", Some(&attachments)).await.unwrap();
        store.record_activity("gmail:a@x.com:t2", None).await.unwrap();

        let stats = store.prune_expired("a@x.com", Duration::from_secs(3600)).await.unwrap();
        assert_eq!(stats, PruneStats { removed: 0, kept: 2, dirs_deleted: 0 });
        assert!(attachments.exists());

        let stats = store.prune_expired("a@x.com", Duration::ZERO).await.unwrap();
        assert_eq!(stats.removed, 2);
        assert_eq!(stats.dirs_deleted, 1);
        assert!(!attachments.exists());
        assert!(!dir.path().join(FileSessionStore::LOCK_FILE).exists());
    }

    #[tokio::test]
    async fn test_held_lock_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        std::fs::write(dir.path().join(FileSessionStore::LOCK_FILE), "123").unwrap();

        assert!(store.record_activity("k", None).await.is_err());

        std::fs::remove_file(dir.path().join(FileSessionStore::LOCK_FILE)).unwrap();
        store.record_activity("k", None).await.unwrap();
        assert!(store.index_path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_index_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(FileSessionStore::INDEX_FILE), "not json").unwrap();

        let store = store(dir.path());
        store.record_activity("gmail:a@x.com:t1", None).await.unwrap();
        let stats = store.prune_expired("a@x.com", Duration::from_secs(60)).await.unwrap();
        assert_eq!(stats.kept, 1);
    }

    #[tokio::test]
    async fn test_prune_leaves_other_accounts_alone() {
        let dir = tempfile::tempdir().unwrap();
        let other_attachments = dir.path().join("attachments").join("t9");
        std::fs::create_dir_all(&other_attachments).unwrap();

        let store = store(dir.path());
        store.record_activity("gmail:a@x.com:t1", None).await.unwrap();
        store.record_activity("gmail:b@y.com:t9", Some(&other_attachments)).await.unwrap();

        let stats = store.prune_expired("A@x.com", Duration::ZERO).await.unwrap();
        assert_eq!(stats, PruneStats { removed: 1, kept: 0, dirs_deleted: 0 });
        assert!(other_attachments.exists());

        let index = std::fs::read_to_string(store.index_path()).unwrap();
        assert!(index.contains("gmail:b@y.com:t9"));
        assert!(!index.contains("gmail:a@x.com:t1"));
    }
}
