//! Process-wide state handed to every request handler.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::warn;

use crate::ads::{AdProcessor, KeywordCache};
use crate::completion::CompletionClient;
use crate::config::Config;
use crate::store::Database;

/// Atomic counters for the status endpoint
#[derive(Debug, Default)]
pub struct AtomicCounters {
    pub total_requests: AtomicUsize,
    pub chat_turns: AtomicUsize,
    pub processed_messages: AtomicUsize,
    pub keywords_imported: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CounterSnapshot {
    pub total_requests: usize,
    pub chat_turns: usize,
    pub processed_messages: usize,
    pub keywords_imported: usize,
}

impl AtomicCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_total_requests(&self) -> usize {
        self.total_requests.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_chat_turns(&self) -> usize {
        self.chat_turns.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add_processed_messages(&self, count: usize) -> usize {
        self.processed_messages.fetch_add(count, Ordering::Relaxed) + count
    }

    pub fn add_keywords_imported(&self, count: usize) -> usize {
        self.keywords_imported.fetch_add(count, Ordering::Relaxed) + count
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            chat_turns: self.chat_turns.load(Ordering::Relaxed),
            processed_messages: self.processed_messages.load(Ordering::Relaxed),
            keywords_imported: self.keywords_imported.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub database: Arc<Database>,
    pub keyword_cache: Arc<KeywordCache>,
    pub ad_processor: Arc<AdProcessor>,
    pub completion: Arc<CompletionClient>,
    pub counters: Arc<AtomicCounters>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config, database: Arc<Database>) -> anyhow::Result<Self> {
        let keyword_cache = Arc::new(KeywordCache::with_ttl(
            Arc::new(database.keywords.clone()),
            config.keyword_cache_ttl(),
        ));
        let completion = Arc::new(CompletionClient::from_config(&config)?);
        Ok(Self {
            ad_processor: Arc::new(AdProcessor::new(keyword_cache.clone())),
            keyword_cache,
            completion,
            database,
            config: Arc::new(config),
            counters: Arc::new(AtomicCounters::new()),
            started_at: Instant::now(),
        })
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Run a best-effort analytics write on the blocking pool. Failures are
    /// logged and otherwise ignored.
    pub fn record_in_background<F>(&self, what: &'static str, write: F)
    where
        F: FnOnce(&Database) -> anyhow::Result<()> + Send + 'static,
    {
        let database = self.database.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = write(&database) {
                warn!("Failed to record {}: {}", what, e);
            }
        });
    }
}
