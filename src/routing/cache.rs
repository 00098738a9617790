//! Response cache for read-like methods
//!
//! Keys are a SHA-256 digest of the method and its canonical parameters.
//! Entries expire `ttl` after insertion; when the cache is full an insert
//! evicts exactly one entry according to the configured policy.

use crate::config::{CacheConfig, EvictionPolicy};
use crate::registry::method_segments;
use crate::utils::saturating_add;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Method segments that mark a method as read-like
const CACHEABLE_PATTERNS: &[&str] = &["ping", "list", "get", "search", "read", "query"];

/// Whether successful responses for `method` may be cached.
///
/// A segment is read-like when it is one of the read verbs or a camelCase
/// word led by one (`getProfile`). Compound verbs such as `getAndRemove`
/// are not.
pub fn is_cacheable(method: &str) -> bool {
    method_segments(method).any(is_read_segment)
}

fn is_read_segment(segment: &str) -> bool {
    let words = camel_case_words(segment);
    match words.first() {
        Some(verb) if CACHEABLE_PATTERNS.contains(&verb.as_str()) => {
            !words.iter().skip(1).any(|w| w == "and" || w == "or")
        }
        _ => false,
    }
}

/// `getAndRemove` → `["get", "and", "remove"]`; runs of capitals stay one word
fn camel_case_words(segment: &str) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    let mut previous_upper = false;
    for c in segment.chars() {
        let upper = c.is_uppercase();
        match words.last_mut() {
            Some(word) if !upper || previous_upper => word.extend(c.to_lowercase()),
            _ => words.push(c.to_lowercase().collect()),
        }
        previous_upper = upper;
    }
    words
}

/// Cache key for a method and its parameters
pub fn cache_key(method: &str, params: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update([0u8]);
    // serde_json maps are sorted, so equal params hash equally
    hasher.update(params.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Cache entry with metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: Value,
    pub method: String,
    pub inserted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hits: u64,
    pub last_access: DateTime<Utc>,
    /// Insertion order, used by FIFO
    sequence: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub enabled: bool,
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub hit_rate: f64,
    pub eviction_policy: Option<EvictionPolicy>,
}

/// Bounded TTL cache keyed by request digest
#[derive(Debug)]
pub struct ResponseCache {
    config: CacheConfig,
    entries: HashMap<String, CacheEntry>,
    next_sequence: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            next_sequence: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn ttl(&self) -> Duration {
        Duration::from_millis(self.config.ttl)
    }

    /// Look up a live entry, updating its access metadata
    pub fn get(&mut self, key: &str, now: DateTime<Utc>) -> Option<Value> {
        if !self.config.enabled {
            return None;
        }
        match self.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.hits += 1;
                entry.last_access = now;
                self.hits += 1;
                Some(entry.data.clone())
            }
            Some(_) => {
                self.entries.remove(key);
                self.expirations += 1;
                self.misses += 1;
                None
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store a response; returns the evicted key when the cache was full
    pub fn insert(&mut self, key: String, method: &str, data: Value, now: DateTime<Utc>) -> Option<String> {
        if !self.config.enabled || self.config.max_size == 0 {
            return None;
        }

        let mut evicted = None;
        if !self.entries.contains_key(&key) && self.entries.len() >= self.config.max_size {
            evicted = self.evict_one();
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.insert(
            key,
            CacheEntry {
                data,
                method: method.to_string(),
                inserted_at: now,
                expires_at: saturating_add(now, self.ttl()),
                hits: 0,
                last_access: now,
                sequence,
            },
        );
        evicted
    }

    fn victim(&self) -> Option<String> {
        let entries = self.entries.iter();
        let victim = match self.config.eviction_policy {
            EvictionPolicy::Lru => entries.min_by_key(|(_, e)| (e.last_access, e.sequence)),
            EvictionPolicy::Lfu => entries.min_by_key(|(_, e)| (e.hits, e.sequence)),
            EvictionPolicy::Fifo => entries.min_by_key(|(_, e)| e.sequence),
        };
        victim.map(|(key, _)| key.clone())
    }

    fn evict_one(&mut self) -> Option<String> {
        let key = self.victim()?;
        self.entries.remove(&key);
        self.evictions += 1;
        debug!("Evicted cache entry {} ({:?})", key, self.config.eviction_policy);
        Some(key)
    }

    /// Drop every expired entry
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before - self.entries.len();
        self.expirations += purged as u64;
        purged
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Apply new settings; shrinking `max_size` evicts down to the new bound
    pub fn update_config(&mut self, config: CacheConfig) -> Vec<String> {
        self.config = config;
        if !self.config.enabled {
            self.entries.clear();
            return Vec::new();
        }
        let mut evicted = Vec::new();
        while self.entries.len() > self.config.max_size {
            match self.evict_one() {
                Some(key) => evicted.push(key),
                None => break,
            }
        }
        evicted
    }

    pub fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        CacheStats {
            enabled: self.config.enabled,
            size: self.entries.len(),
            max_size: self.config.max_size,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            expirations: self.expirations,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.hits as f64 / lookups as f64
            },
            eviction_policy: Some(self.config.eviction_policy),
        }
    }
}
