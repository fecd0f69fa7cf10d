//! Records and results exchanged with the storage client

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an identifier came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    /// Acknowledged by a real upload backend.
    RealBackend,
    /// Synthesized locally because no backend accepted the payload.
    LocalFallback,
}

/// The unit of storage held by the local cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Present only while cached locally. Persisted separately from the
    /// record metadata.
    #[serde(skip)]
    pub payload: Option<Bytes>,
    /// Hex SHA-256 of the payload, used to verify cached bytes on read.
    #[serde(default)]
    pub sha256: Option<String>,
    pub created_at: DateTime<Utc>,
    pub origin: Origin,
}

impl ContentRecord {
    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }
}

/// A file handed to the client for upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub bytes: Bytes,
    pub name: String,
    pub mime_type: String,
}

impl UploadFile {
    /// Create an upload, guessing the MIME type from the name's extension.
    pub fn new(bytes: impl Into<Bytes>, name: impl Into<String>) -> Self {
        let name = name.into();
        let mime_type = guess_mime_type(&name).to_string();
        Self {
            bytes: bytes.into(),
            name,
            mime_type,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// What `upload()` hands back. Always produced, even on total backend failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadResult {
    pub id: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub name: String,
    pub origin: Origin,
    pub timestamp: DateTime<Utc>,
    /// Name of the backend that accepted the payload, if any.
    pub backend: Option<String>,
}

/// How a resolution was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveMode {
    Cache,
    Network,
    Synthetic,
}

/// What `resolve()` hands back. There is no failure variant.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    /// The identifier the caller asked for.
    pub requested_id: String,
    /// The identifier actually resolved.
    pub id: String,
    /// True when `requested_id` failed validation and `id` is the default
    /// identifier instead.
    pub was_substituted: bool,
    /// Always true. Degraded outcomes are reported through `mode`.
    pub success: bool,
    pub mode: ResolveMode,
    pub name: String,
    pub mime_type: String,
    #[serde(skip)]
    pub bytes: Bytes,
    /// Gateway that served the bytes in network mode.
    pub source: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

/// MIME type from the extension of a display name.
pub fn guess_mime_type(name: &str) -> &'static str {
    let ext = match name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return "application/octet-stream",
    };
    match ext.as_str() {
        "txt" | "md" => "text/plain",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "csv" => "text/csv",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_mime_type() {
        assert_eq!(guess_mime_type("a.txt"), "text/plain");
        assert_eq!(guess_mime_type("Scan.PDF"), "application/pdf");
        assert_eq!(guess_mime_type("archive.tar.zip"), "application/zip");
        assert_eq!(guess_mime_type("no_extension"), "application/octet-stream");
        assert_eq!(guess_mime_type(""), "application/octet-stream");
    }

    #[test]
    fn test_upload_file_size_and_override() {
        let file = UploadFile::new(b"0123456789".to_vec(), "a.txt");
        assert_eq!(file.size(), 10);
        assert_eq!(file.mime_type, "text/plain");

        let file = file.with_mime_type("text/markdown");
        assert_eq!(file.mime_type, "text/markdown");
    }

    #[test]
    fn test_origin_wire_names() {
        assert_eq!(
            serde_json::to_string(&Origin::LocalFallback).unwrap(),
            "\"local-fallback\""
        );
        assert_eq!(
            serde_json::to_string(&Origin::RealBackend).unwrap(),
            "\"real-backend\""
        );
        assert_eq!(serde_json::to_string(&ResolveMode::Cache).unwrap(), "\"cache\"");
    }

    #[test]
    fn test_record_payload_not_serialized() {
        let record = ContentRecord {
            id: "id".into(),
            name: "a.txt".into(),
            mime_type: "text/plain".into(),
            size_bytes: 3,
            payload: Some(Bytes::from_static(b"abc")),
            sha256: None,
            created_at: Utc::now(),
            origin: Origin::LocalFallback,
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: ContentRecord = serde_json::from_str(&json).unwrap();
        assert!(!back.has_payload());
        assert_eq!(back.size_bytes, 3);
    }
}
