//! Read-through snapshot of the active keywords.
//!
//! Readers load the current snapshot without locking. When the snapshot is
//! empty or older than the TTL, one caller refreshes it from the
//! [`KeywordSource`] while the others wait on the refresh lock and then reuse
//! the fresh snapshot. A failed refresh yields an empty list and leaves the
//! previous snapshot in place.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::store::{ActiveKeyword, KeywordStore};

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Where the cache loads active keywords from.
#[async_trait]
pub trait KeywordSource: Send + Sync {
    async fn fetch_active_keywords(&self) -> anyhow::Result<Vec<ActiveKeyword>>;
}

#[async_trait]
impl KeywordSource for KeywordStore {
    async fn fetch_active_keywords(&self) -> anyhow::Result<Vec<ActiveKeyword>> {
        let store = self.clone();
        let keywords = tokio::task::spawn_blocking(move || store.list_active_keywords()).await??;
        Ok(keywords)
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    keywords: Arc<Vec<ActiveKeyword>>,
    refreshed_at: Option<Instant>,
}

impl Snapshot {
    fn is_fresh(&self, ttl: Duration) -> bool {
        match self.refreshed_at {
            Some(at) => !self.keywords.is_empty() && at.elapsed() < ttl,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub keyword_count: usize,
    pub age_seconds: Option<u64>,
    pub ttl_seconds: u64,
    pub is_stale: bool,
}

pub struct KeywordCache {
    source: Arc<dyn KeywordSource>,
    ttl: Duration,
    snapshot: ArcSwap<Snapshot>,
    refresh_lock: Mutex<()>,
}

impl KeywordCache {
    pub fn new(source: Arc<dyn KeywordSource>) -> Self {
        Self::with_ttl(source, DEFAULT_TTL)
    }

    pub fn with_ttl(source: Arc<dyn KeywordSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            refresh_lock: Mutex::new(()),
        }
    }

    pub async fn get_active_keywords(&self) -> Arc<Vec<ActiveKeyword>> {
        if let Some(keywords) = self.fresh_keywords() {
            return keywords;
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited.
        if let Some(keywords) = self.fresh_keywords() {
            return keywords;
        }

        match self.source.fetch_active_keywords().await {
            Ok(keywords) => {
                let keywords = Arc::new(keywords);
                debug!("Keyword cache refreshed with {} entries", keywords.len());
                self.snapshot.store(Arc::new(Snapshot {
                    keywords: Arc::clone(&keywords),
                    refreshed_at: Some(Instant::now()),
                }));
                metrics::inc_cache_lookup("refresh");
                keywords
            }
            Err(e) => {
                warn!("Failed to load active keywords, continuing without ads: {}", e);
                metrics::inc_cache_lookup("error");
                Arc::new(Vec::new())
            }
        }
    }

    fn fresh_keywords(&self) -> Option<Arc<Vec<ActiveKeyword>>> {
        let current = self.snapshot.load();
        if current.is_fresh(self.ttl) {
            metrics::inc_cache_lookup("hit");
            Some(Arc::clone(&current.keywords))
        } else {
            None
        }
    }

    /// Drop the snapshot so the next lookup goes to the source.
    pub fn clear(&self) {
        self.snapshot.store(Arc::new(Snapshot::default()));
        info!("Keyword cache cleared");
    }

    pub fn status(&self) -> CacheStatus {
        let current = self.snapshot.load();
        CacheStatus {
            keyword_count: current.keywords.len(),
            age_seconds: current.refreshed_at.map(|at| at.elapsed().as_secs()),
            ttl_seconds: self.ttl.as_secs(),
            is_stale: !current.is_fresh(self.ttl),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts fetches and returns a fixed list, or fails when `fail` is set.
    pub(crate) struct StaticSource {
        pub keywords: Vec<ActiveKeyword>,
        pub fail: bool,
        pub calls: AtomicUsize,
    }

    impl StaticSource {
        pub(crate) fn new(pairs: &[(&str, &str)]) -> Self {
            Self {
                keywords: pairs
                    .iter()
                    .enumerate()
                    .map(|(i, (k, u))| ActiveKeyword {
                        id: i as i64 + 1,
                        keyword: k.to_string(),
                        target_url: u.to_string(),
                    })
                    .collect(),
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn failing() -> Self {
            Self { fail: true, ..Self::new(&[]) }
        }
    }

    #[async_trait]
    impl KeywordSource for StaticSource {
        async fn fetch_active_keywords(&self) -> anyhow::Result<Vec<ActiveKeyword>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail {
                anyhow::bail!("database unreachable");
            }
            Ok(self.keywords.clone())
        }
    }

    #[tokio::test]
    async fn test_fresh_cache_is_served_without_refetch() {
        let source = Arc::new(StaticSource::new(&[("Nike", "https://nike.com")]));
        let cache = KeywordCache::new(source.clone());

        assert_eq!(cache.get_active_keywords().await.len(), 1);
        assert_eq!(cache.get_active_keywords().await.len(), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        let status = cache.status();
        assert_eq!(status.keyword_count, 1);
        assert!(!status.is_stale);
        assert_eq!(status.ttl_seconds, 300);
    }

    #[tokio::test]
    async fn test_expired_cache_refetches() {
        let source = Arc::new(StaticSource::new(&[("Nike", "https://nike.com")]));
        let cache = KeywordCache::with_ttl(source.clone(), Duration::ZERO);

        cache.get_active_keywords().await;
        cache.get_active_keywords().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(cache.status().is_stale);
    }

    #[tokio::test]
    async fn test_empty_result_is_refetched_every_time() {
        let source = Arc::new(StaticSource::new(&[]));
        let cache = KeywordCache::new(source.clone());

        assert!(cache.get_active_keywords().await.is_empty());
        assert!(cache.get_active_keywords().await.is_empty());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_fails_open() {
        let source = Arc::new(StaticSource::failing());
        let cache = KeywordCache::new(source);

        assert!(cache.get_active_keywords().await.is_empty());
        assert_eq!(cache.status().keyword_count, 0);
        assert_eq!(cache.status().age_seconds, None);
    }

    #[tokio::test]
    async fn test_clear_forces_refresh() {
        let source = Arc::new(StaticSource::new(&[("Nike", "https://nike.com")]));
        let cache = KeywordCache::new(source.clone());

        cache.get_active_keywords().await;
        cache.clear();
        assert_eq!(cache.status().keyword_count, 0);

        cache.get_active_keywords().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lookups_share_one_refresh() {
        let source = Arc::new(StaticSource::new(&[("Nike", "https://nike.com")]));
        let cache = Arc::new(KeywordCache::new(source.clone()));

        let lookups = (0..16).map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_active_keywords().await.len() })
        });
        for handle in futures::future::join_all(lookups).await {
            assert_eq!(handle.unwrap(), 1);
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reads_from_keyword_store() {
        let db = crate::store::Database::new_in_memory().unwrap();
        db.keywords.create_keyword("Nike", "https://nike.com", true).unwrap();
        db.keywords.create_keyword("Puma", "https://puma.com", false).unwrap();

        let cache = KeywordCache::new(Arc::new(db.keywords.clone()));
        let keywords = cache.get_active_keywords().await;
        assert_eq!(keywords.len(), 1);
        assert_eq!(keywords[0].keyword, "Nike");
    }
}
