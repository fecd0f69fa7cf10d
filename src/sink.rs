//! Destinations for resolved bytes
//!
//! `download` hands bytes to [`FileSink::save`], `view` to
//! [`FileSink::display`]. The client never interprets the bytes itself.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs as tokio_fs;

use crate::error::{Result, StoreError};

#[async_trait]
pub trait FileSink: Send + Sync {
    /// Persist `bytes` under `name`.
    async fn save(&self, bytes: &[u8], name: &str) -> Result<()>;

    /// Present `bytes` to the user.
    async fn display(&self, bytes: &[u8], name: &str, mime_type: &str) -> Result<()>;
}

/// Writes downloads into a directory and previews into `<dir>/.preview`.
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn preview_dir(&self) -> PathBuf {
        self.dir.join(".preview")
    }

    async fn write_into(dir: &Path, bytes: &[u8], name: &str) -> Result<PathBuf> {
        tokio_fs::create_dir_all(dir).await?;
        let path = dir.join(sanitize_name(name));
        tokio_fs::write(&path, bytes).await?;
        Ok(path)
    }
}

#[async_trait]
impl FileSink for DirectorySink {
    async fn save(&self, bytes: &[u8], name: &str) -> Result<()> {
        let path = Self::write_into(&self.dir, bytes, name).await?;
        log::info!("Saved {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    async fn display(&self, bytes: &[u8], name: &str, mime_type: &str) -> Result<()> {
        let path = Self::write_into(&self.preview_dir(), bytes, name).await?;
        log::info!("Preview of {} ({}) at {}", name, mime_type, path.display());
        Ok(())
    }
}

/// Keep a name to a single safe path component.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').trim();
    if cleaned.is_empty() {
        "download".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Records every call. Used by tests and embedders that want the bytes back.
#[derive(Default)]
pub struct MemorySink {
    saved: Mutex<Vec<(String, Bytes)>>,
    displayed: Mutex<Vec<(String, String, Bytes)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(name, bytes)` for each save.
    pub fn saved(&self) -> Vec<(String, Bytes)> {
        self.saved.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// `(name, mime_type, bytes)` for each display.
    pub fn displayed(&self) -> Vec<(String, String, Bytes)> {
        self.displayed.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

fn poisoned(reason: String) -> StoreError {
    StoreError::IoError(std::io::Error::new(std::io::ErrorKind::Other, reason))
}

#[async_trait]
impl FileSink for MemorySink {
    async fn save(&self, bytes: &[u8], name: &str) -> Result<()> {
        self.saved
            .lock()
            .map_err(|e| poisoned(e.to_string()))?
            .push((name.to_string(), Bytes::copy_from_slice(bytes)));
        Ok(())
    }

    async fn display(&self, bytes: &[u8], name: &str, mime_type: &str) -> Result<()> {
        self.displayed
            .lock()
            .map_err(|e| poisoned(e.to_string()))?
            .push((
                name.to_string(),
                mime_type.to_string(),
                Bytes::copy_from_slice(bytes),
            ));
        Ok(())
    }
}
