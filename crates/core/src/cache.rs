//! Response cache contract and an in-memory TTL implementation.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::process::{ProcessId, ProcessVersionId, TenantId};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(pub String);

impl CacheKey {
    /// SHA-256 over tenant, process, version id and the canonical input JSON.
    pub fn for_generation(
        tenant_id: &TenantId,
        process_id: &ProcessId,
        version_id: &ProcessVersionId,
        input: &Value,
    ) -> Self {
        let mut hasher = Sha256::new();
        for part in [tenant_id.0.as_str(), process_id.0.as_str(), version_id.0.as_str()] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        let mut canonical = String::new();
        write_canonical(input, &mut canonical);
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();
        let hex = digest.iter().map(|byte| format!("{byte:02x}")).collect::<String>();
        Self(format!("gen:{hex}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Object keys sorted at every level, independent of map ordering features.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys = map.keys().collect::<Vec<_>>();
            keys.sort();
            out.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(key.as_str()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Option<Value>;
    async fn set(&self, key: CacheKey, value: Value, ttl: Duration);
    async fn invalidate(&self, key: &CacheKey);
}

#[derive(Default)]
pub struct InMemoryResponseCache {
    entries: Mutex<HashMap<CacheKey, (Value, Instant)>>,
}

impl InMemoryResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResponseCache for InMemoryResponseCache {
    async fn get(&self, key: &CacheKey) -> Option<Value> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        entries.get(key).map(|(value, _)| value.clone())
    }

    async fn set(&self, key: CacheKey, value: Value, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let Some(expires_at) = Instant::now().checked_add(ttl) else {
            return;
        };
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key, (value, expires_at));
    }

    async fn invalidate(&self, key: &CacheKey) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::{CacheKey, InMemoryResponseCache, ResponseCache};
    use crate::domain::process::{ProcessId, ProcessVersionId, TenantId};

    fn key(input: serde_json::Value) -> CacheKey {
        CacheKey::for_generation(
            &TenantId("tenant-a".to_string()),
            &ProcessId("proc-1".to_string()),
            &ProcessVersionId("pv-1".to_string()),
            &input,
        )
    }

    #[test]
    fn keys_are_stable_and_input_sensitive() {
        let first = key(json!({"b": 1, "a": 2}));
        let same = key(json!({"a": 2, "b": 1}));
        let other = key(json!({"a": 3, "b": 1}));

        assert_eq!(first, same);
        assert_ne!(first, other);
        assert!(first.as_str().starts_with("gen:"));
        assert_eq!(first.as_str().len(), 4 + 64);
    }

    #[tokio::test]
    async fn set_get_invalidate_and_expiry() {
        let cache = InMemoryResponseCache::new();
        let live = key(json!({"ticket": "live"}));
        let short = key(json!({"ticket": "short"}));

        cache.set(live.clone(), json!({"ok": true}), Duration::from_secs(60)).await;
        cache.set(short.clone(), json!({"ok": false}), Duration::from_millis(1)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(cache.get(&live).await, Some(json!({"ok": true})));
        assert_eq!(cache.get(&short).await, None);

        cache.invalidate(&live).await;
        assert_eq!(cache.get(&live).await, None);
        assert!(cache.is_empty());
    }
}
