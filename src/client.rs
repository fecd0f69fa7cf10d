//! Storage client facade
//!
//! Owns one uploader, one resolver, one stats tracker and one sink, all
//! sharing a cache. [`StorageClient::from_config`] wires the network
//! backends; [`StorageClient::new`] starts from an empty chain so embedders
//! and tests can assemble their own.

use std::sync::Arc;

use crate::backends::{
    http_client, HttpGateway, LocalNodeBackend, PinningBackend, RetrievalGateway, UploadBackend,
};
use crate::cache::{CacheStore, FsCacheStore};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::hash::HashDeriver;
use crate::retrieve::RetrievalResolver;
use crate::sink::{DirectorySink, FileSink};
use crate::stats::{StatsTracker, UsageStats};
use crate::types::{Resolution, UploadFile, UploadResult};
use crate::upload::{ProgressFn, UploadOrchestrator};

pub struct StorageClient {
    uploader: UploadOrchestrator,
    resolver: RetrievalResolver,
    cache: Arc<dyn CacheStore>,
    stats: Arc<StatsTracker>,
    sink: Arc<dyn FileSink>,
}

impl StorageClient {
    /// Client with no backends or gateways. Every upload takes the local
    /// fallback and every uncached resolve yields a proof document.
    pub fn new(
        cache: Arc<dyn CacheStore>,
        stats: Arc<StatsTracker>,
        sink: Arc<dyn FileSink>,
    ) -> Self {
        Self {
            uploader: UploadOrchestrator::new(cache.clone(), stats.clone()),
            resolver: RetrievalResolver::new(cache.clone(), stats.clone()),
            cache,
            stats,
            sink,
        }
    }

    /// Build a client from configuration, loading persisted stats.
    pub async fn from_config(config: &ClientConfig) -> Result<Self> {
        let timeout = config.attempt_timeout();
        let client = http_client(timeout)?;

        let cache: Arc<dyn CacheStore> = Arc::new(
            FsCacheStore::new(config.cache_dir()).with_quota(config.cache_quota_bytes),
        );
        let stats = Arc::new(StatsTracker::load(config.stats_path()).await);
        let sink: Arc<dyn FileSink> = Arc::new(DirectorySink::new(&config.downloads_dir));

        let mut uploader = UploadOrchestrator::new(cache.clone(), stats.clone())
            .with_deriver(HashDeriver::new(config.derive_mode))
            .with_attempt_timeout(timeout)
            .with_progress_step(config.progress_step());
        let mut resolver =
            RetrievalResolver::new(cache.clone(), stats.clone()).with_attempt_timeout(timeout);

        if config.node.enabled {
            let node = Arc::new(LocalNodeBackend::new(&config.node.rpc_url, client.clone()));
            uploader = uploader.with_backend(node.clone());
            resolver = resolver.with_gateway(node);
        }
        for pinning in &config.pinning {
            if !pinning.has_credentials() {
                log::debug!("Pinning provider {} has no credentials", pinning.name);
            }
            uploader = uploader.with_backend(Arc::new(PinningBackend::new(
                pinning.clone(),
                client.clone(),
            )));
        }
        for url in &config.gateways {
            resolver = resolver.with_gateway(Arc::new(HttpGateway::new(url, client.clone())));
        }

        log::info!(
            "Upload chain: [{}], retrieval chain: [{}]",
            uploader.backend_names().join(", "),
            resolver.gateway_names().join(", ")
        );

        Ok(Self {
            uploader,
            resolver,
            cache,
            stats,
            sink,
        })
    }

    pub fn with_backend(mut self, backend: Arc<dyn UploadBackend>) -> Self {
        self.uploader = self.uploader.with_backend(backend);
        self
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn RetrievalGateway>) -> Self {
        self.resolver = self.resolver.with_gateway(gateway);
        self
    }

    pub async fn upload(&self, file: UploadFile, on_progress: Option<&ProgressFn>) -> UploadResult {
        self.uploader.upload(file, on_progress).await
    }

    pub async fn resolve(&self, id: &str, name: &str) -> Resolution {
        self.resolver.resolve(id, name).await
    }

    pub async fn view(&self, id: &str, name: &str) -> Resolution {
        self.resolver.view(id, name, self.sink.as_ref()).await
    }

    pub async fn download(&self, id: &str, name: &str) -> Resolution {
        self.resolver.download(id, name, self.sink.as_ref()).await
    }

    pub async fn get_stats(&self) -> UsageStats {
        self.stats.snapshot().await
    }

    /// Identifiers currently held by the cache.
    pub async fn cached_ids(&self) -> Result<Vec<String>> {
        self.cache.try_list().await
    }

    /// Flush stats. Failures are logged, never raised.
    pub async fn teardown(&self) {
        if let Err(e) = self.stats.save().await {
            log::warn!("Could not persist usage stats: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::sink::MemorySink;
    use crate::types::{Origin, ResolveMode};

    fn client() -> (StorageClient, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let client = StorageClient::new(
            Arc::new(MemoryCacheStore::new()),
            Arc::new(StatsTracker::in_memory()),
            sink.clone(),
        );
        (client, sink)
    }

    #[tokio::test]
    async fn test_offline_upload_then_download() {
        let (client, sink) = client();

        let result = client.upload(UploadFile::new(&b"0123456789"[..], "a.txt"), None).await;
        assert_eq!(result.origin, Origin::LocalFallback);

        let resolution = client.download(&result.id, "a.txt").await;
        assert_eq!(resolution.mode, ResolveMode::Cache);
        assert_eq!(sink.saved()[0].1.as_ref(), b"0123456789");

        let stats = client.get_stats().await;
        assert_eq!(stats.uploads_attempted, 1);
        assert_eq!(stats.downloads_attempted, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.total_bytes_uploaded, 10);
        assert_eq!(client.cached_ids().await.unwrap(), vec![result.id]);
    }

    #[tokio::test]
    async fn test_from_config_wires_chains() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ClientConfig::default();
        config.data_dir = dir.path().to_path_buf();
        config.node.enabled = true;

        let client = StorageClient::from_config(&config).await.unwrap();
        assert_eq!(
            client.uploader.backend_names(),
            vec!["local-node", "pinata", "infura"]
        );
        assert_eq!(
            client.resolver.gateway_names(),
            vec!["local-node", "ipfs.io", "gateway.pinata.cloud", "dweb.link"]
        );
    }

    #[tokio::test]
    async fn test_teardown_persists_stats() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ClientConfig::default();
        config.data_dir = dir.path().to_path_buf();
        config.gateways.clear();
        config.pinning.clear();

        let client = StorageClient::from_config(&config).await.unwrap();
        client.resolve("not-a-real-id", "x").await;
        client.teardown().await;

        let reloaded = StatsTracker::load(config.stats_path()).await;
        assert_eq!(reloaded.snapshot().await.downloads_attempted, 1);
    }
}
