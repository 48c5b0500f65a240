//! Compiled-query cache.
//!
//! Cache key: a SHA-256 fingerprint of the query tree's structure plus
//! everything else translation depends on: dialect, translation options and
//! the facts about parameter values the normalizer looks at (nullness, type,
//! list length, and the values of lists long enough to be inlined).
//!
//! Translation is pure, so two threads compiling the same fingerprint produce
//! equal entries; whichever insert lands last wins.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sha2::{Digest, Sha256};

use crate::config::{TranslatorConfig, UnorderedPagingPolicy};
use crate::query::{QueryExpr, Value};
use crate::query_planner::{QueryParameters, TranslationOptions};
use crate::sql_generator::DialectKind;

use super::CompiledQuery;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryCacheKey(String);

impl QueryCacheKey {
    pub fn fingerprint(
        query: &QueryExpr,
        params: &QueryParameters,
        dialect: DialectKind,
        options: TranslationOptions,
        unordered_paging: UnorderedPagingPolicy,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("{:?}", query).as_bytes());
        hasher.update(dialect.as_str().as_bytes());
        hasher.update(
            format!(
                "limit={};tracking={};document={};paging={:?}",
                options.contains_parameter_limit,
                options.tracking,
                options.document_store,
                unordered_paging
            )
            .as_bytes(),
        );
        for (name, value) in params.iter() {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(parameter_fact(value, options.contains_parameter_limit).as_bytes());
            hasher.update(b";");
        }
        QueryCacheKey(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn parameter_fact(value: &Value, inline_above: usize) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::List(items) if items.iter().filter(|v| !v.is_null()).count() > inline_above => {
            format!("inlined:{}", value)
        }
        Value::List(items) => {
            let nulls: String = items
                .iter()
                .map(|v| if v.is_null() { 'n' } else { 'v' })
                .collect();
            format!(
                "list:{}:{}",
                value.element_type().map(|t| t.to_string()).unwrap_or_default(),
                nulls
            )
        }
        other => other.clr_type().map(|t| t.to_string()).unwrap_or_default(),
    }
}

#[derive(Debug)]
struct CacheEntry {
    compiled: Arc<CompiledQuery>,
    last_accessed: u64,
    access_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryCacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        QueryCacheConfig {
            enabled: true,
            max_entries: 1000,
        }
    }
}

impl From<&TranslatorConfig> for QueryCacheConfig {
    fn from(config: &TranslatorConfig) -> Self {
        QueryCacheConfig {
            enabled: config.cache_enabled,
            max_entries: config.cache_max_entries,
        }
    }
}

#[derive(Debug)]
pub struct QueryCache {
    cache: Mutex<HashMap<QueryCacheKey, CacheEntry>>,
    config: QueryCacheConfig,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl QueryCache {
    pub fn new(config: QueryCacheConfig) -> Self {
        QueryCache {
            cache: Mutex::new(HashMap::new()),
            config,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<QueryCacheKey, CacheEntry>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get(&self, key: &QueryCacheKey) -> Option<Arc<CompiledQuery>> {
        if !self.config.enabled {
            return None;
        }
        let now = self.tick();
        let mut cache = self.entries();
        if let Some(entry) = cache.get_mut(key) {
            entry.last_accessed = now;
            entry.access_count += 1;
            self.hits.fetch_add(1, Ordering::Relaxed);
            log::debug!("Query cache hit: {}", key.as_str());
            Some(entry.compiled.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            log::debug!("Query cache miss: {}", key.as_str());
            None
        }
    }

    pub fn insert(&self, key: QueryCacheKey, compiled: Arc<CompiledQuery>) {
        if !self.config.enabled {
            return;
        }
        let entry = CacheEntry {
            compiled,
            last_accessed: self.tick(),
            access_count: 0,
        };
        let mut cache = self.entries();
        if !cache.contains_key(&key) && cache.len() >= self.config.max_entries {
            self.evict_lru(&mut cache);
        }
        cache.insert(key, entry);
    }

    fn evict_lru(&self, cache: &mut HashMap<QueryCacheKey, CacheEntry>) {
        if let Some(key) = cache
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(key, _)| key.clone())
        {
            cache.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            log::debug!("Query cache evicted {}", key.as_str());
        }
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn metrics(&self) -> CacheMetrics {
        let cache = self.entries();
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: cache.len(),
            reuses: cache.values().map(|e| e.access_count).sum(),
            max_entries: self.config.max_entries,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    /// Hits on entries still in the cache.
    pub reuses: u64,
    pub max_entries: usize,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
