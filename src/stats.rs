//! Usage counters shared by every upload and retrieval
//!
//! The tracker is constructed once per session and handed to the uploader
//! and resolver. Each mutation updates the counters and writes the snapshot
//! while the lock is held, so concurrent operations never lose increments
//! and the file always holds a complete counter set.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs as tokio_fs;
use tokio::sync::Mutex;

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub uploads_attempted: u64,
    pub downloads_attempted: u64,
    pub errors: u64,
    pub total_bytes_uploaded: u64,
}

impl UsageStats {
    /// Percentage of uploads that did not end in an error. 100 when nothing
    /// has been uploaded yet.
    pub fn success_rate(&self) -> f64 {
        if self.uploads_attempted == 0 {
            return 100.0;
        }
        let ok = self.uploads_attempted.saturating_sub(self.errors);
        ok as f64 / self.uploads_attempted as f64 * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Upload,
    Download,
    Error,
}

/// Counter set with optional durable backing.
#[derive(Debug)]
pub struct StatsTracker {
    path: Option<PathBuf>,
    stats: Mutex<UsageStats>,
}

impl StatsTracker {
    /// A tracker that is never written anywhere.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            stats: Mutex::new(UsageStats::default()),
        }
    }

    /// Load the last snapshot from `path`. Missing or unreadable data starts
    /// from zero.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let stats = match read_snapshot(&path).await {
            Ok(Some(stats)) => stats,
            Ok(None) => UsageStats::default(),
            Err(e) => {
                log::warn!("Resetting usage stats: {}", e);
                UsageStats::default()
            }
        };

        Self {
            path: Some(path),
            stats: Mutex::new(stats),
        }
    }

    /// Count one event. `bytes` is added to the upload byte total for
    /// [`StatKind::Upload`] and ignored otherwise.
    pub async fn record(&self, kind: StatKind, bytes: Option<u64>) {
        let mut stats = self.stats.lock().await;
        match kind {
            StatKind::Upload => {
                stats.uploads_attempted = stats.uploads_attempted.saturating_add(1);
                stats.total_bytes_uploaded = stats
                    .total_bytes_uploaded
                    .saturating_add(bytes.unwrap_or(0));
            }
            StatKind::Download => {
                stats.downloads_attempted = stats.downloads_attempted.saturating_add(1);
            }
            StatKind::Error => {
                stats.errors = stats.errors.saturating_add(1);
            }
        }

        if let Some(path) = &self.path {
            if let Err(e) = write_snapshot(path, &stats).await {
                log::warn!("Could not persist usage stats: {}", e);
            }
        }
    }

    pub async fn snapshot(&self) -> UsageStats {
        *self.stats.lock().await
    }

    /// Write the current counters. Called at teardown.
    pub async fn save(&self) -> Result<()> {
        let stats = self.stats.lock().await;
        match &self.path {
            Some(path) => write_snapshot(path, &stats).await,
            None => Ok(()),
        }
    }
}

async fn read_snapshot(path: &Path) -> Result<Option<UsageStats>> {
    let data = match tokio_fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::CorruptPersistedStats(e.to_string())),
    };
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| StoreError::CorruptPersistedStats(e.to_string()))
}

async fn write_snapshot(path: &Path, stats: &UsageStats) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio_fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(stats)?;
    let tmp = path.with_extension("json.tmp");
    tokio_fs::write(&tmp, json).await?;
    tokio_fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_success_rate() {
        assert_eq!(UsageStats::default().success_rate(), 100.0);

        let stats = UsageStats {
            uploads_attempted: 4,
            errors: 1,
            ..Default::default()
        };
        assert_eq!(stats.success_rate(), 75.0);

        let stats = UsageStats {
            uploads_attempted: 1,
            errors: 3,
            ..Default::default()
        };
        assert_eq!(stats.success_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_record_counts() {
        let tracker = StatsTracker::in_memory();
        tracker.record(StatKind::Upload, Some(10)).await;
        tracker.record(StatKind::Upload, Some(5)).await;
        tracker.record(StatKind::Download, Some(99)).await;
        tracker.record(StatKind::Error, None).await;

        let stats = tracker.snapshot().await;
        assert_eq!(stats.uploads_attempted, 2);
        assert_eq!(stats.total_bytes_uploaded, 15);
        assert_eq!(stats.downloads_attempted, 1);
        assert_eq!(stats.errors, 1);
    }

    #[tokio::test]
    async fn test_persists_every_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");

        let tracker = StatsTracker::load(&path).await;
        tracker.record(StatKind::Upload, Some(3)).await;
        tracker.record(StatKind::Error, None).await;
        drop(tracker);

        let reloaded = StatsTracker::load(&path).await;
        let stats = reloaded.snapshot().await;
        assert_eq!(stats.uploads_attempted, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.total_bytes_uploaded, 3);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_resets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        tokio_fs::write(&path, b"{\"uploadsAttempted\": \"many\"").await.unwrap();

        let tracker = StatsTracker::load(&path).await;
        assert_eq!(tracker.snapshot().await, UsageStats::default());

        tracker.record(StatKind::Download, None).await;
        let reloaded = StatsTracker::load(&path).await;
        assert_eq!(reloaded.snapshot().await.downloads_attempted, 1);
    }

    #[tokio::test]
    async fn test_missing_snapshot_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = StatsTracker::load(dir.path().join("nested/stats.json")).await;
        assert_eq!(tracker.snapshot().await, UsageStats::default());
        tracker.save().await.unwrap();
        assert!(dir.path().join("nested/stats.json").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_records_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(StatsTracker::load(dir.path().join("stats.json")).await);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    tracker.record(StatKind::Upload, Some(1)).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(tracker.snapshot().await.uploads_attempted, 160);
        let reloaded = StatsTracker::load(dir.path().join("stats.json")).await;
        assert_eq!(reloaded.snapshot().await.total_bytes_uploaded, 160);
    }
}
