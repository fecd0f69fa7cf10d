//! File-system backed cache store
//!
//! Layout under the root directory:
//!
//! ```text
//! records/<shard>/<id>.json   record metadata
//! blobs/<shard>/<id>          payload bytes, when cached
//! ```
//!
//! `<shard>` is the last two characters of the identifier. The directories
//! are created the first time the store is touched.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs as tokio_fs;
use tokio::sync::Mutex;

use super::CacheStore;
use crate::error::{Result, StoreError};
use crate::hash;
use crate::types::ContentRecord;

const RECORDS_DIR: &str = "records";
const BLOBS_DIR: &str = "blobs";

/// A cache store that keeps records on the local file system
#[derive(Debug)]
pub struct FsCacheStore {
    root: PathBuf,
    quota_bytes: Option<u64>,
    /// Payload bytes on disk; `None` until the store has been opened.
    used_bytes: Mutex<Option<u64>>,
}

impl FsCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            quota_bytes: None,
            used_bytes: Mutex::new(None),
        }
    }

    pub fn with_quota(mut self, quota_bytes: Option<u64>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    fn shard(id: &str) -> &str {
        if id.len() >= 2 {
            &id[id.len() - 2..]
        } else {
            "__"
        }
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.root
            .join(RECORDS_DIR)
            .join(Self::shard(id))
            .join(format!("{}.json", id))
    }

    fn blob_path(&self, id: &str) -> PathBuf {
        self.root.join(BLOBS_DIR).join(Self::shard(id)).join(id)
    }

    fn check_id(id: &str) -> Result<()> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(StoreError::InvalidIdentifier(id.to_string()));
        }
        Ok(())
    }

    /// Create the directory layout if needed and return the bytes in use.
    async fn open(&self, used: &mut Option<u64>) -> Result<u64> {
        if let Some(bytes) = *used {
            return Ok(bytes);
        }

        tokio_fs::create_dir_all(self.root.join(RECORDS_DIR)).await?;
        tokio_fs::create_dir_all(self.root.join(BLOBS_DIR)).await?;

        let mut total = 0u64;
        let mut shards = tokio_fs::read_dir(self.root.join(BLOBS_DIR)).await?;
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut blobs = tokio_fs::read_dir(shard.path()).await?;
            while let Some(blob) = blobs.next_entry().await? {
                total += blob.metadata().await?.len();
            }
        }

        log::debug!("Opened cache at {:?} ({} bytes)", self.root, total);
        *used = Some(total);
        Ok(total)
    }

    async fn existing_blob_len(path: &Path) -> u64 {
        match tokio_fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        }
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("Invalid path: {:?}", path),
                )
            })?;
        tokio_fs::create_dir_all(parent).await?;
        Ok(())
    }

    /// Write through a sibling temp file so readers never see a partial file.
    async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
        Self::ensure_parent(path).await?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio_fs::write(&tmp, contents).await?;
        tokio_fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FsCacheStore {
    async fn try_put(&self, id: &str, record: ContentRecord) -> Result<()> {
        Self::check_id(id)?;

        let mut used = self.used_bytes.lock().await;
        let in_use = self.open(&mut used).await?;

        let blob_path = self.blob_path(id);
        let old_len = Self::existing_blob_len(&blob_path).await;
        let new_len = record.payload.as_ref().map(|p| p.len() as u64).unwrap_or(0);
        let after = in_use - old_len.min(in_use) + new_len;

        if let Some(quota) = self.quota_bytes {
            if after > quota {
                return Err(StoreError::StorageQuotaExceeded(format!(
                    "{} bytes in use, {} requested, quota {}",
                    in_use, new_len, quota
                )));
            }
        }

        let json = serde_json::to_vec_pretty(&record)?;

        // Blob first, record last: the record's checksum always describes
        // a fully written blob.
        match &record.payload {
            Some(payload) => Self::write_atomic(&blob_path, payload).await?,
            None if old_len > 0 => {
                tokio_fs::remove_file(&blob_path).await.ok();
            }
            None => {}
        }
        *used = Some(after);

        Self::write_atomic(&self.record_path(id), &json).await
    }

    async fn try_get(&self, id: &str) -> Result<Option<ContentRecord>> {
        if Self::check_id(id).is_err() {
            return Ok(None);
        }

        // Held for the whole read so the record and blob come from the same put.
        let mut used = self.used_bytes.lock().await;
        self.open(&mut used).await?;

        let record_path = self.record_path(id);
        let data = match tokio_fs::read(&record_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut record: ContentRecord = serde_json::from_slice(&data)?;

        match tokio_fs::read(self.blob_path(id)).await {
            Ok(bytes) => {
                let intact = match &record.sha256 {
                    Some(expected) => hash::fingerprint(&bytes) == *expected,
                    None => true,
                };
                if intact {
                    record.payload = Some(Bytes::from(bytes));
                } else {
                    log::warn!("Cached payload for {} failed its checksum, ignoring it", id);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(Some(record))
    }

    async fn try_list(&self) -> Result<Vec<String>> {
        {
            let mut used = self.used_bytes.lock().await;
            self.open(&mut used).await?;
        }

        let mut ids = Vec::new();
        let mut shards = tokio_fs::read_dir(self.root.join(RECORDS_DIR)).await?;
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut files = tokio_fs::read_dir(shard.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
