//! Write-back content cache.
//!
//! Holds the authoritative content of files being edited, keyed by project
//! and path. Every entry carries a version; an entry is dirty while its latest
//! version has not been confirmed written to the container.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;

use crate::workspace::RelativePath;

/// Identifies one file of one project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub project_id: String,
    pub path: RelativePath,
}

impl CacheKey {
    pub fn new(project_id: impl Into<String>, path: RelativePath) -> Self {
        Self {
            project_id: project_id.into(),
            path,
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "project-{}-{}", self.project_id, self.path)
    }
}

/// A cached file body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedContent {
    pub content: String,
    pub version: u64,
    pub dirty: bool,
}

/// Storage for file content under edit.
#[async_trait]
pub trait ContentCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Option<CachedContent>;

    /// Store edited content; the entry becomes dirty. Returns the new version.
    async fn set(&self, key: &CacheKey, content: String) -> u64;

    /// Populate from a container read. Existing entries win; returns whether
    /// the content was inserted.
    async fn insert_clean(&self, key: &CacheKey, content: String) -> bool;

    async fn exists(&self, key: &CacheKey) -> bool;

    /// Record that `version` reached the container. Newer edits stay dirty.
    async fn mark_flushed(&self, key: &CacheKey, version: u64);

    async fn dirty_keys(&self) -> Vec<CacheKey>;

    /// Move every entry at or below `from` to the same place below `to`.
    async fn rekey_prefix(&self, project_id: &str, from: &RelativePath, to: &RelativePath)
    -> usize;

    /// Drop every entry at or below `prefix`.
    async fn remove_prefix(&self, project_id: &str, prefix: &RelativePath) -> usize;

    /// Drop every entry of a project.
    async fn purge_project(&self, project_id: &str) -> usize;
}

#[derive(Debug, Clone)]
struct Entry {
    content: String,
    version: u64,
    flushed_version: u64,
}

impl Entry {
    fn snapshot(&self) -> CachedContent {
        CachedContent {
            content: self.content.clone(),
            version: self.version,
            dirty: self.version > self.flushed_version,
        }
    }
}

/// In-process [`ContentCache`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<CacheKey, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn keys_under(&self, project_id: &str, prefix: &RelativePath) -> Vec<CacheKey> {
        self.entries
            .iter()
            .filter(|e| e.key().project_id == project_id && e.key().path.starts_with(prefix))
            .map(|e| e.key().clone())
            .collect()
    }
}

#[async_trait]
impl ContentCache for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Option<CachedContent> {
        self.entries.get(key).map(|e| e.snapshot())
    }

    async fn set(&self, key: &CacheKey, content: String) -> u64 {
        let mut entry = self.entries.entry(key.clone()).or_insert_with(|| Entry {
            content: String::new(),
            version: 0,
            flushed_version: 0,
        });
        entry.content = content;
        entry.version += 1;
        entry.version
    }

    async fn insert_clean(&self, key: &CacheKey, content: String) -> bool {
        match self.entries.entry(key.clone()) {
            MapEntry::Occupied(_) => false,
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry {
                    content,
                    version: 0,
                    flushed_version: 0,
                });
                true
            }
        }
    }

    async fn exists(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    async fn mark_flushed(&self, key: &CacheKey, version: u64) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if version > entry.flushed_version {
                entry.flushed_version = version.min(entry.version);
            }
        }
    }

    async fn dirty_keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|e| e.version > e.flushed_version)
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }

    async fn rekey_prefix(
        &self,
        project_id: &str,
        from: &RelativePath,
        to: &RelativePath,
    ) -> usize {
        let keys = self.keys_under(project_id, from);
        let mut moved = 0;
        for key in keys {
            let Some(new_path) = key.path.rebase(from, to) else {
                continue;
            };
            if let Some((_, entry)) = self.entries.remove(&key) {
                self.entries
                    .insert(CacheKey::new(project_id, new_path), entry);
                moved += 1;
            }
        }
        moved
    }

    async fn remove_prefix(&self, project_id: &str, prefix: &RelativePath) -> usize {
        self.keys_under(project_id, prefix)
            .into_iter()
            .filter(|key| self.entries.remove(key).is_some())
            .count()
    }

    async fn purge_project(&self, project_id: &str) -> usize {
        self.remove_prefix(project_id, &RelativePath::root()).await
    }
}
