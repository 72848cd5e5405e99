use crate::error::CacheError;
use crate::traits::QueryCache;
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;
/// Pending writes held by a [`CacheWriter`] before new ones are dropped.
pub const DEFAULT_WRITE_QUEUE: usize = 256;
const KEY_PREFIX: &str = "recipe_search";
/// Stands in for "no appliance filter" in cache keys.
pub const NO_APPLIANCE: &str = "none";

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub capacity: usize,
    pub enabled: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CACHE_TTL,
            capacity: DEFAULT_CACHE_CAPACITY,
            enabled: true,
        }
    }
}

/// `recipe_search:{query}:{appliance|none}:{limit}` over an already normalized query.
pub fn cache_key(normalized_query: &str, appliance: Option<&str>, limit: usize) -> String {
    format!(
        "{KEY_PREFIX}:{normalized_query}:{}:{limit}",
        appliance.unwrap_or(NO_APPLIANCE)
    )
}

/// Process-local LRU with absolute per-entry expiry. Last write wins.
pub struct InMemoryQueryCache {
    entries: Mutex<LruCache<String, (String, Instant)>>,
}

impl InMemoryQueryCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> CacheError {
    CacheError::Unavailable("cache lock poisoned".to_string())
}

#[async_trait]
impl QueryCache for InMemoryQueryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        let expired = match entries.get(key) {
            Some((value, expires_at)) if Instant::now() < *expires_at => {
                return Ok(Some(value.clone()))
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        Ok(None)
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        entries.put(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }
}

enum CacheCommand {
    Write {
        key: String,
        value: String,
        ttl: Duration,
    },
    Flush(oneshot::Sender<()>),
}

/// Background worker applying cache writes off the request path.
///
/// Writes are best effort: submission never blocks or fails the caller. A
/// write arriving while the queue is full is dropped, and store errors are
/// only logged.
pub struct CacheWriter {
    sender: Mutex<Option<mpsc::Sender<CacheCommand>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CacheWriter {
    /// Starts the worker on the current tokio runtime.
    pub fn spawn(cache: Arc<dyn QueryCache>) -> Self {
        Self::with_queue(cache, DEFAULT_WRITE_QUEUE)
    }

    pub fn with_queue(cache: Arc<dyn QueryCache>, queue: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<CacheCommand>(queue.max(1));
        let worker = tokio::spawn(async move {
            while let Some(command) = receiver.recv().await {
                match command {
                    CacheCommand::Write { key, value, ttl } => {
                        match cache.set_with_expiry(&key, value, ttl).await {
                            Ok(()) => debug!(%key, "cached search result"),
                            Err(error) => warn!(%key, %error, "cache write failed"),
                        }
                    }
                    CacheCommand::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<CacheCommand>> {
        self.sender.lock().ok().and_then(|sender| sender.clone())
    }

    /// Queues a write and returns immediately.
    pub fn submit(&self, key: String, value: String, ttl: Duration) {
        let Some(sender) = self.sender() else {
            warn!(%key, "cache writer stopped; dropping write");
            return;
        };
        match sender.try_send(CacheCommand::Write { key, value, ttl }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("cache write queue full; dropping write"),
            Err(TrySendError::Closed(_)) => warn!("cache writer stopped; dropping write"),
        }
    }

    /// Waits until every write queued before this call has been applied.
    pub async fn flush(&self) {
        let Some(sender) = self.sender() else {
            return;
        };
        let (done, wait) = oneshot::channel();
        if sender.send(CacheCommand::Flush(done)).await.is_ok() {
            let _ = wait.await;
        }
    }

    /// Stops accepting writes and drains the queue.
    pub async fn shutdown(&self) {
        let sender = self.sender.lock().ok().and_then(|mut sender| sender.take());
        drop(sender);
        let worker = self.worker.lock().ok().and_then(|mut worker| worker.take());
        if let Some(worker) = worker {
            if let Err(error) = worker.await {
                warn!(%error, "cache writer ended abnormally");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Always unavailable; counts the attempts.
    #[derive(Default)]
    pub struct BrokenCache {
        pub gets: AtomicUsize,
        pub sets: AtomicUsize,
    }

    #[async_trait]
    impl QueryCache for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        async fn set_with_expiry(
            &self,
            _key: &str,
            _value: String,
            _ttl: Duration,
        ) -> Result<(), CacheError> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Unavailable("connection refused".to_string()))
        }
    }
}
