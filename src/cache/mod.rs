//! Local cache of content records
//!
//! The cache lets the resolver answer without network access and lets the
//! uploader recognise payloads it has already pushed. Callers use the
//! infallible `put`/`get`; the `try_*` methods are what implementations
//! provide.

pub mod fs;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::ContentRecord;

pub use fs::FsCacheStore;
pub use memory::MemoryCacheStore;

/// Keyed record store for content identifiers
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Upsert the record under `id`.
    async fn try_put(&self, id: &str, record: ContentRecord) -> Result<()>;

    /// Look up the record under `id`. `Ok(None)` is a normal miss.
    async fn try_get(&self, id: &str) -> Result<Option<ContentRecord>>;

    /// List all cached identifiers.
    async fn try_list(&self) -> Result<Vec<String>>;

    /// Upsert, logging and discarding any failure.
    async fn put(&self, id: &str, record: ContentRecord) {
        if let Err(e) = self.try_put(id, record).await {
            log::warn!("Cache write for {} skipped: {}", id, e);
        }
    }

    /// Look up, treating any failure as a miss.
    async fn get(&self, id: &str) -> Option<ContentRecord> {
        match self.try_get(id).await {
            Ok(record) => record,
            Err(e) => {
                log::warn!("Cache read for {} failed: {}", id, e);
                None
            }
        }
    }
}
