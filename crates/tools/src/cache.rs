//! Response cache for tool results.
//!
//! Keyed by `sha256(tool_name | tool_version | canonical_json(args))`, so a
//! tool version bump invalidates everything cached under the old version.
//! Only successful results are stored; errors always re-execute.
//! Entries expire after a fixed TTL; when full, the least recently used
//! entry is evicted.

use std::collections::HashMap;
use std::time::Duration;

use orion_config::CacheConfig;
use orion_core::tool::{ToolArguments, ToolDescriptor};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

struct CacheEntry {
    value: Value,
    created_at: Instant,
    last_accessed: Instant,
}

pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl(), config.max_entries)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Deterministic fingerprint of one invocation.
    ///
    /// `ToolArguments` is a sorted map, so serialization is canonical:
    /// the same arguments in any insertion order produce the same key.
    pub fn fingerprint(tool: &ToolDescriptor, args: &ToolArguments) -> String {
        let mut hasher = Sha256::new();
        hasher.update(tool.name.as_bytes());
        hasher.update(b"|");
        hasher.update(tool.version.as_bytes());
        hasher.update(b"|");
        if let Ok(json) = serde_json::to_string(args) {
            hasher.update(json.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Cached result within TTL, or `None`. Non-cacheable tools always miss.
    pub async fn get(&self, tool: &ToolDescriptor, args: &ToolArguments) -> Option<Value> {
        if !tool.cacheable {
            return None;
        }
        let key = Self::fingerprint(tool, args);
        let now = Instant::now();

        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&key) {
            if now.duration_since(entry.created_at) < self.ttl {
                entry.last_accessed = now;
                debug!(tool = %tool.name, "Response cache hit");
                return Some(entry.value.clone());
            }
            entries.remove(&key);
        }

        trace!(tool = %tool.name, "Response cache miss");
        None
    }

    /// Store a successful result. Ignored for non-cacheable tools.
    pub async fn put(&self, tool: &ToolDescriptor, args: &ToolArguments, value: Value) {
        if !tool.cacheable {
            return;
        }
        let key = Self::fingerprint(tool, args);
        let now = Instant::now();

        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| now.duration_since(entry.created_at) < self.ttl);

        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            let lru = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(k, _)| k.clone());
            if let Some(k) = lru {
                entries.remove(&k);
            }
        }

        trace!(tool = %tool.name, "Response cache store");
        entries.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
                last_accessed: now,
            },
        );
    }

    /// Drop expired entries. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.created_at) < self.ttl);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orion_core::error::FailureClass;
    use serde_json::json;

    fn descriptor(version: &str, cacheable: bool) -> ToolDescriptor {
        ToolDescriptor {
            name: "calculator".into(),
            description: String::new(),
            parameters: json!({}),
            version: version.into(),
            cacheable,
            failure_class: FailureClass::Unrecoverable,
        }
    }

    fn args(pairs: &[(&str, Value)]) -> ToolArguments {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn hit_within_ttl_then_expires() {
        let cache = ResponseCache::new(Duration::from_secs(300), 16);
        let tool = descriptor("1", true);
        let a = args(&[("expression", json!("2+2"))]);

        assert!(cache.get(&tool, &a).await.is_none());
        cache.put(&tool, &a, json!(4)).await;
        assert_eq!(cache.get(&tool, &a).await, Some(json!(4)));

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(cache.get(&tool, &a).await.is_none());
        assert!(cache.is_empty().await);
    }

    #[test]
    fn fingerprint_ignores_argument_order() {
        let tool = descriptor("1", true);
        let ab = args(&[("a", json!(1)), ("b", json!(2))]);
        let ba = args(&[("b", json!(2)), ("a", json!(1))]);
        assert_eq!(
            ResponseCache::fingerprint(&tool, &ab),
            ResponseCache::fingerprint(&tool, &ba)
        );
    }

    #[tokio::test]
    async fn version_bump_misses() {
        let cache = ResponseCache::new(Duration::from_secs(300), 16);
        let a = args(&[("expression", json!("2+2"))]);
        cache.put(&descriptor("1", true), &a, json!(4)).await;
        assert!(cache.get(&descriptor("2", true), &a).await.is_none());
    }

    #[tokio::test]
    async fn non_cacheable_tools_bypass() {
        let cache = ResponseCache::new(Duration::from_secs(300), 16);
        let tool = descriptor("1", false);
        let a = ToolArguments::new();
        cache.put(&tool, &a, json!("now")).await;
        assert!(cache.get(&tool, &a).await.is_none());
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_least_recently_used() {
        let cache = ResponseCache::new(Duration::from_secs(300), 2);
        let tool = descriptor("1", true);
        let one = args(&[("n", json!(1))]);
        let two = args(&[("n", json!(2))]);
        let three = args(&[("n", json!(3))]);

        cache.put(&tool, &one, json!(1)).await;
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.put(&tool, &two, json!(2)).await;
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.get(&tool, &one).await;
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.put(&tool, &three, json!(3)).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get(&tool, &two).await.is_none());
        assert!(cache.get(&tool, &one).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_counts_removed() {
        let cache = ResponseCache::new(Duration::from_secs(1), 16);
        let tool = descriptor("1", true);
        cache.put(&tool, &args(&[("n", json!(1))]), json!(1)).await;
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.purge_expired().await, 1);
    }
}
