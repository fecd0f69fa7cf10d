//! Upload and retrieval adapters
//!
//! Each adapter is one link in a fallback chain. Adapters report failure
//! through `Result`; the uploader and resolver decide what happens next.

pub mod gateway;
pub mod node;
pub mod pinning;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;

use crate::error::{Result, StoreError};
use crate::types::UploadFile;

pub use gateway::HttpGateway;
pub use node::LocalNodeBackend;
pub use pinning::PinningBackend;

/// Acknowledgement from a backend that accepted a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendReceipt {
    pub id: String,
    pub size_bytes: Option<u64>,
}

/// Bytes fetched from a retrieval source.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Bytes,
    pub mime_type: Option<String>,
}

/// An endpoint that can store a payload and name it.
#[async_trait]
pub trait UploadBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap pre-check. Unavailable backends are skipped without counting
    /// as an attempt.
    async fn is_available(&self) -> bool {
        true
    }

    async fn upload(&self, file: &UploadFile) -> Result<BackendReceipt>;
}

/// An endpoint that can serve content by identifier.
#[async_trait]
pub trait RetrievalGateway: Send + Sync {
    fn name(&self) -> &str;

    /// Lightweight availability check for `id`.
    async fn probe(&self, id: &str) -> Result<()>;

    async fn fetch(&self, id: &str) -> Result<Fetched>;
}

/// Build the HTTP client shared by the network adapters.
pub fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("proofstore/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| StoreError::ConfigError(format!("Failed to build HTTP client: {}", e)))
}

pub(crate) fn trim_base(url: &str) -> &str {
    url.trim_end_matches('/')
}
