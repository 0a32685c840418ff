//! Concurrency-safe topic cache with atomic snapshot persistence

use super::entry::{CacheSnapshot, MergeOutcome, Observation, QueryPage, TopicEntry};
use super::CacheError;
use crate::protocol::topics::matches_keywords;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Last known state per topic, shared by every operation
///
/// Entries live in a sorted map so paging is reproducible. Each merge runs
/// under the write lock, so readers never see a half-applied update.
pub struct TopicCache {
    entries: RwLock<BTreeMap<String, TopicEntry>>,
    path: Option<PathBuf>,
    persist_lock: Mutex<()>,
    dirty: AtomicBool,
}

impl TopicCache {
    /// Cache that is never written to disk
    pub fn in_memory() -> Self {
        Self::with_entries(None, BTreeMap::new())
    }

    fn with_entries(path: Option<PathBuf>, entries: BTreeMap<String, TopicEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
            path,
            persist_lock: Mutex::new(()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Load the snapshot at `path`, starting empty when it is missing or unreadable
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let span = crate::cache_span!(operation = "load", path = %path.display());
        let entries = Self::read_snapshot(&path).instrument(span).await;
        Self::with_entries(Some(path), entries)
    }

    async fn read_snapshot(path: &Path) -> BTreeMap<String, TopicEntry> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No cache file yet, starting empty");
                return BTreeMap::new();
            }
            Err(e) => {
                warn!("Cannot read topic cache, continuing in memory: {}", e);
                return BTreeMap::new();
            }
        };

        let snapshot: CacheSnapshot = match serde_json::from_slice(&bytes) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Topic cache is corrupt, starting empty: {}", e);
                let aside = sibling_path(path, "corrupt");
                if let Err(e) = tokio::fs::rename(path, &aside).await {
                    warn!("Could not move corrupt cache aside: {}", e);
                }
                return BTreeMap::new();
            }
        };

        let mut entries: BTreeMap<String, TopicEntry> = BTreeMap::new();
        for entry in snapshot.topics {
            // Duplicate topics in a hand-edited file: keep the newest
            match entries.get(&entry.topic) {
                Some(existing) if existing.last_seen >= entry.last_seen => {}
                _ => {
                    entries.insert(entry.topic.clone(), entry);
                }
            }
        }

        info!(topics = entries.len(), "Loaded topic cache");
        entries
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Insert or update one topic; older observations than the cached one are ignored
    pub async fn merge(&self, observation: Observation) -> MergeOutcome {
        let mut entries = self.entries.write().await;

        let outcome = match entries.get_mut(&observation.topic) {
            None => {
                let entry = TopicEntry::from_observation(observation);
                entries.insert(entry.topic.clone(), entry);
                MergeOutcome::Inserted
            }
            Some(entry) if observation.observed_at < entry.last_seen => MergeOutcome::Stale,
            Some(entry) => {
                entry.last_seen = observation.observed_at;
                if let Some(payload) = observation.payload {
                    entry.value = Some(super::PayloadValue::new(payload));
                }
                if observation.qos.is_some() {
                    entry.qos = observation.qos;
                }
                if observation.retained.is_some() {
                    entry.retained = observation.retained;
                }
                MergeOutcome::Updated
            }
        };

        if outcome != MergeOutcome::Stale {
            self.dirty.store(true, Ordering::Release);
        }
        outcome
    }

    pub async fn lookup(&self, topic: &str) -> Option<TopicEntry> {
        self.entries.read().await.get(topic).cloned()
    }

    pub async fn contains(&self, topic: &str) -> bool {
        self.entries.read().await.contains_key(topic)
    }

    /// Topics matching any keyword (all topics when none), sorted, then paged
    pub async fn query(&self, keywords: &[String], limit: usize, offset: usize) -> QueryPage {
        let entries = self.entries.read().await;
        let mut total = 0;
        let mut page = Vec::new();

        for entry in entries
            .values()
            .filter(|entry| matches_keywords(&entry.topic, keywords))
        {
            if total >= offset && page.len() < limit {
                page.push(entry.clone());
            }
            total += 1;
        }

        QueryPage {
            entries: page,
            total,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn snapshot(&self) -> CacheSnapshot {
        let entries = self.entries.read().await;
        CacheSnapshot::new(entries.values().cloned().collect())
    }

    /// Whether anything was merged since the last successful persist
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Write the snapshot to disk via temp file and rename
    pub async fn persist(&self) -> Result<(), CacheError> {
        let Some(path) = self.path.clone() else {
            self.dirty.store(false, Ordering::Release);
            return Ok(());
        };

        let span = crate::cache_span!(operation = "persist", path = %path.display());
        async {
            // Held across snapshot and rename so an older snapshot never lands last
            let _guard = self.persist_lock.lock().await;

            self.dirty.store(false, Ordering::Release);
            let snapshot = self.snapshot().await;
            let result = write_atomically(&path, &snapshot).await;

            match &result {
                Ok(()) => debug!(topics = snapshot.topics.len(), "Persisted topic cache"),
                Err(_) => self.dirty.store(true, Ordering::Release),
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Persist only if something changed; returns whether a write happened
    pub async fn flush(&self) -> Result<bool, CacheError> {
        if !self.is_dirty() {
            return Ok(false);
        }
        self.persist().await?;
        Ok(true)
    }
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{suffix}"));
    path.with_file_name(name)
}

async fn write_atomically(path: &Path, snapshot: &CacheSnapshot) -> Result<(), CacheError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let payload = serde_json::to_vec_pretty(snapshot)?;
    let temp_path = sibling_path(path, &format!("{}.tmp", Uuid::new_v4().simple()));

    let written = async {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&payload).await?;
        file.sync_all().await?;
        tokio::fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    Ok(())
}
