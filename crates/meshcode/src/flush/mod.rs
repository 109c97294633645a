//! Debounced write-back of edited files.
//!
//! Each edited `(project, path)` has at most one pending timer. Re-arming
//! cancels the pending timer before the new one is installed, so a burst of
//! edits produces a single write once the file has been idle for the flush
//! window. The write always uses the cache content as of fire time.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use log::{debug, error, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::cache::{CacheKey, ContentCache};
use crate::workspace::RelativePath;

/// Destination of flushed content.
#[async_trait]
pub trait FlushSink: Send + Sync {
    async fn flush(&self, key: &CacheKey, content: &str) -> anyhow::Result<()>;
}

/// Timing of the scheduler.
#[derive(Debug, Clone)]
pub struct FlushConfig {
    /// Inactivity window after the last edit.
    pub window: Duration,
    /// Write attempts per fire before the entry is left dirty.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub retry_backoff: Duration,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_attempts: 3,
            retry_backoff: Duration::from_secs(2),
        }
    }
}

/// What a single flush attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Written,
    /// Nothing newer than the last successful write.
    Clean,
    /// The entry disappeared (file deleted or project purged).
    Missing,
}

struct PendingFlush {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Inner {
    cache: Arc<dyn ContentCache>,
    sink: Arc<dyn FlushSink>,
    config: FlushConfig,
    timers: DashMap<CacheKey, PendingFlush>,
    write_locks: DashMap<CacheKey, Arc<Mutex<()>>>,
    generation: AtomicU64,
}

#[derive(Clone)]
pub struct FlushScheduler {
    inner: Arc<Inner>,
}

impl FlushScheduler {
    pub fn new(
        cache: Arc<dyn ContentCache>,
        sink: Arc<dyn FlushSink>,
        config: FlushConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                sink,
                config,
                timers: DashMap::new(),
                write_locks: DashMap::new(),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &FlushConfig {
        &self.inner.config
    }

    /// Arm (or re-arm) the timer for `key`.
    pub fn arm(&self, key: CacheKey) {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;

        // The shard stays locked while the task is spawned, so the new timer
        // cannot observe the map before it has been recorded.
        match self.inner.timers.entry(key.clone()) {
            MapEntry::Occupied(mut occupied) => {
                occupied.get().handle.abort();
                let handle = self.spawn_timer(key, generation);
                occupied.insert(PendingFlush { generation, handle });
            }
            MapEntry::Vacant(vacant) => {
                let handle = self.spawn_timer(key, generation);
                vacant.insert(PendingFlush { generation, handle });
            }
        }
    }

    fn spawn_timer(&self, key: CacheKey, generation: u64) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.config.window).await;
            if inner
                .timers
                .remove_if(&key, |_, pending| pending.generation == generation)
                .is_none()
            {
                return;
            }
            inner.flush_with_retry(&key).await;
        })
    }

    /// Cancel the pending timer of `key`, if any.
    pub fn cancel(&self, key: &CacheKey) -> bool {
        match self.inner.timers.remove(key) {
            Some((_, pending)) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer at or below `prefix`, returning their keys.
    pub fn cancel_prefix(&self, project_id: &str, prefix: &RelativePath) -> Vec<CacheKey> {
        let keys: Vec<CacheKey> = self
            .inner
            .timers
            .iter()
            .filter(|e| e.key().project_id == project_id && e.key().path.starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();

        keys.into_iter().filter(|key| self.cancel(key)).collect()
    }

    pub fn cancel_project(&self, project_id: &str) -> usize {
        self.cancel_prefix(project_id, &RelativePath::root()).len()
    }

    pub fn is_pending(&self, key: &CacheKey) -> bool {
        self.inner.timers.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.timers.len()
    }

    /// Write every dirty cache entry immediately. Used at shutdown.
    ///
    /// Returns the number of entries that could not be written.
    pub async fn flush_all(&self) -> usize {
        let keys: Vec<CacheKey> = self.inner.timers.iter().map(|e| e.key().clone()).collect();
        for key in &keys {
            self.cancel(key);
        }

        let mut failures = 0;
        for key in self.inner.cache.dirty_keys().await {
            match self.inner.flush_once(&key).await {
                Ok(outcome) => debug!("Final flush of {}: {:?}", key, outcome),
                Err(e) => {
                    failures += 1;
                    error!("Final flush of {} failed: {:#}", key, e);
                }
            }
        }
        failures
    }
}

impl Inner {
    fn write_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Serializes writes of one key. The lock is dropped from the table once
    /// no flush holds or waits on it.
    async fn flush_once(&self, key: &CacheKey) -> anyhow::Result<FlushOutcome> {
        let lock = self.write_lock(key);
        let result = {
            let _guard = lock.lock().await;
            self.write_current(key).await
        };
        drop(lock);
        self.write_locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn write_current(&self, key: &CacheKey) -> anyhow::Result<FlushOutcome> {
        let Some(cached) = self.cache.get(key).await else {
            return Ok(FlushOutcome::Missing);
        };
        if !cached.dirty {
            return Ok(FlushOutcome::Clean);
        }

        self.sink.flush(key, &cached.content).await?;
        self.cache.mark_flushed(key, cached.version).await;
        info!("Flushed {} (version {})", key, cached.version);
        Ok(FlushOutcome::Written)
    }

    async fn flush_with_retry(&self, key: &CacheKey) {
        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff = self.config.retry_backoff;

        for attempt in 1..=max_attempts {
            match self.flush_once(key).await {
                Ok(_) => return,
                Err(e) if attempt == max_attempts => {
                    error!(
                        "Giving up on flushing {} after {} attempts, entry stays dirty: {:#}",
                        key, attempt, e
                    );
                    return;
                }
                Err(e) => {
                    warn!(
                        "Flush of {} failed (attempt {}/{}), retrying in {:?}: {:#}",
                        key, attempt, max_attempts, backoff, e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);

                    if self.timers.contains_key(key) {
                        debug!("Newer edit re-armed {}, dropping retry", key);
                        return;
                    }
                }
            }
        }
    }
}
