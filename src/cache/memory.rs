//! In-process cache store

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::CacheStore;
use crate::error::{Result, StoreError};
use crate::types::ContentRecord;

/// A cache that lives for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    records: RwLock<HashMap<String, ContentRecord>>,
    quota_bytes: Option<u64>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse writes that would push total payload bytes past `quota_bytes`.
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

fn payload_len(record: &ContentRecord) -> u64 {
    record.payload.as_ref().map(|p| p.len() as u64).unwrap_or(0)
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn try_put(&self, id: &str, record: ContentRecord) -> Result<()> {
        let mut records = self.records.write().await;

        if let Some(quota) = self.quota_bytes {
            let used: u64 = records
                .iter()
                .filter(|(key, _)| key.as_str() != id)
                .map(|(_, r)| payload_len(r))
                .sum();
            let needed = payload_len(&record);
            if used + needed > quota {
                return Err(StoreError::StorageQuotaExceeded(format!(
                    "{} bytes used, {} requested, quota {}",
                    used, needed, quota
                )));
            }
        }

        records.insert(id.to_string(), record);
        Ok(())
    }

    async fn try_get(&self, id: &str) -> Result<Option<ContentRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn try_list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.records.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Origin;
    use bytes::Bytes;
    use chrono::Utc;

    fn make_record(id: &str, payload: &'static [u8]) -> ContentRecord {
        ContentRecord {
            id: id.to_string(),
            name: "a.txt".to_string(),
            mime_type: "text/plain".to_string(),
            size_bytes: payload.len() as u64,
            payload: Some(Bytes::from_static(payload)),
            sha256: None,
            created_at: Utc::now(),
            origin: Origin::LocalFallback,
        }
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = MemoryCacheStore::new();
        assert!(store.get("x").await.is_none());

        store.put("x", make_record("x", b"hello")).await;
        let record = store.get("x").await.unwrap();
        assert_eq!(record.payload.unwrap().as_ref(), b"hello");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let store = MemoryCacheStore::new();
        store.put("x", make_record("x", b"one")).await;
        store.put("x", make_record("x", b"two")).await;
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get("x").await.unwrap().payload.unwrap().as_ref(), b"two");
    }

    #[tokio::test]
    async fn test_quota_refuses_without_failing_put() {
        let store = MemoryCacheStore::with_quota(8);
        store.put("a", make_record("a", b"12345")).await;

        let err = store.try_put("b", make_record("b", b"123456")).await.unwrap_err();
        assert!(matches!(err, StoreError::StorageQuotaExceeded(_)));

        // The swallowing variant completes and leaves the store unchanged.
        store.put("b", make_record("b", b"123456")).await;
        assert!(store.get("b").await.is_none());

        // Replacing an entry only counts the new payload.
        store.put("a", make_record("a", b"12345678")).await;
        assert_eq!(store.get("a").await.unwrap().size_bytes, 8);
    }

    #[tokio::test]
    async fn test_list_sorted() {
        let store = MemoryCacheStore::new();
        store.put("b", make_record("b", b"")).await;
        store.put("a", make_record("a", b"")).await;
        assert_eq!(store.try_list().await.unwrap(), vec!["a", "b"]);
    }
}
