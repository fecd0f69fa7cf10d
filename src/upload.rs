//! Upload fallback chain
//!
//! Backends are tried strictly in order, one at a time, each bounded by the
//! attempt timeout. The first acknowledgement wins. When every backend is
//! skipped or fails, the payload is named locally and kept in the cache, and
//! the caller still receives a normal result tagged `LocalFallback`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;

use crate::backends::{BackendReceipt, UploadBackend};
use crate::cache::CacheStore;
use crate::hash::{self, DeriveMode, HashDeriver};
use crate::stats::{StatKind, StatsTracker};
use crate::types::{ContentRecord, Origin, UploadFile, UploadResult};

/// Progress callback receiving fractions in `0.0..=1.0`.
pub type ProgressFn = dyn Fn(f64) + Send + Sync;

/// Share of the bar covered by backend attempts.
const CHAIN_START: f64 = 0.1;
const CHAIN_END: f64 = 0.6;
/// Ticks used to animate the local fallback path.
const FALLBACK_TICKS: u32 = 5;

/// Forwards progress to the caller, never letting it go backwards.
struct Progress<'a> {
    callback: Option<&'a ProgressFn>,
    last: f64,
}

impl<'a> Progress<'a> {
    fn new(callback: Option<&'a ProgressFn>) -> Self {
        Self {
            callback,
            last: 0.0,
        }
    }

    fn report(&mut self, fraction: f64) {
        let fraction = fraction.clamp(self.last, 1.0);
        self.last = fraction;
        if let Some(callback) = self.callback {
            callback(fraction);
        }
    }
}

pub struct UploadOrchestrator {
    backends: Vec<Arc<dyn UploadBackend>>,
    deriver: HashDeriver,
    cache: Arc<dyn CacheStore>,
    stats: Arc<StatsTracker>,
    attempt_timeout: Duration,
    progress_step: Duration,
}

impl UploadOrchestrator {
    pub fn new(cache: Arc<dyn CacheStore>, stats: Arc<StatsTracker>) -> Self {
        Self {
            backends: Vec::new(),
            deriver: HashDeriver::default(),
            cache,
            stats,
            attempt_timeout: Duration::from_secs(8),
            progress_step: Duration::from_millis(40),
        }
    }

    /// Append a backend to the end of the chain.
    pub fn with_backend(mut self, backend: Arc<dyn UploadBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn with_deriver(mut self, deriver: HashDeriver) -> Self {
        self.deriver = deriver;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_progress_step(mut self, step: Duration) -> Self {
        self.progress_step = step;
        self
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Store `file` and name it. Always returns a result.
    pub async fn upload(&self, file: UploadFile, on_progress: Option<&ProgressFn>) -> UploadResult {
        let mut progress = Progress::new(on_progress);
        progress.report(0.0);

        self.stats.record(StatKind::Upload, Some(file.size())).await;

        let local_id = self.deriver.derive(&file.bytes).await;
        let fingerprint = hash::fingerprint(&file.bytes);

        if let Some(result) = self.already_uploaded(&local_id, &file).await {
            log::info!("{} already stored as {}", file.name, result.id);
            progress.report(1.0);
            return result;
        }

        let total = self.backends.len().max(1) as f64;
        for (index, backend) in self.backends.iter().enumerate() {
            if !backend.is_available().await {
                log::debug!("Skipping unavailable backend {}", backend.name());
                continue;
            }

            progress.report(CHAIN_START + (CHAIN_END - CHAIN_START) * index as f64 / total);
            log::debug!("Uploading {} to {}", file.name, backend.name());

            match self.attempt(backend.as_ref(), &file).await {
                Ok(receipt) => {
                    progress.report(0.9);
                    let result = self
                        .finish_real(backend.name(), receipt, &local_id, &fingerprint, &file)
                        .await;
                    progress.report(1.0);
                    return result;
                }
                Err(reason) => {
                    log::warn!("Upload of {} to {} failed: {}", file.name, backend.name(), reason);
                }
            }
        }

        self.finish_fallback(local_id, fingerprint, file, &mut progress).await
    }

    async fn attempt(
        &self,
        backend: &dyn UploadBackend,
        file: &UploadFile,
    ) -> std::result::Result<BackendReceipt, String> {
        match tokio::time::timeout(self.attempt_timeout, backend.upload(file)).await {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", self.attempt_timeout)),
        }
    }

    /// A cached real-backend record reachable from the local identifier.
    /// Only trusted in digest mode, where the identifier is collision-free.
    async fn already_uploaded(&self, local_id: &str, file: &UploadFile) -> Option<UploadResult> {
        if self.deriver.mode() != DeriveMode::Digest {
            return None;
        }

        let record = self.cache.get(local_id).await?;
        if record.origin != Origin::RealBackend {
            return None;
        }

        Some(UploadResult {
            id: record.id,
            size_bytes: file.size(),
            mime_type: file.mime_type.clone(),
            name: file.name.clone(),
            origin: Origin::RealBackend,
            timestamp: record.created_at,
            backend: None,
        })
    }

    async fn finish_real(
        &self,
        backend: &str,
        receipt: BackendReceipt,
        local_id: &str,
        fingerprint: &str,
        file: &UploadFile,
    ) -> UploadResult {
        let now = Utc::now();
        let record = ContentRecord {
            id: receipt.id.clone(),
            name: file.name.clone(),
            mime_type: file.mime_type.clone(),
            size_bytes: file.size(),
            payload: Some(file.bytes.clone()),
            sha256: Some(fingerprint.to_string()),
            created_at: now,
            origin: Origin::RealBackend,
        };

        // The alias lets a later upload of the same bytes find the backend id.
        // Pool identifiers are shared between payloads, so they get no alias.
        if receipt.id != local_id && self.deriver.mode() == DeriveMode::Digest {
            // Bytes already cached under the local id stay there; it may
            // have been handed out by an earlier offline upload.
            let keep_payload = self
                .cache
                .get(local_id)
                .await
                .map_or(false, |existing| existing.has_payload());
            let alias = ContentRecord {
                payload: if keep_payload { record.payload.clone() } else { None },
                ..record.clone()
            };
            self.cache.put(local_id, alias).await;
        }
        self.cache.put(&receipt.id, record).await;

        log::info!("Stored {} on {} as {}", file.name, backend, receipt.id);
        UploadResult {
            id: receipt.id,
            size_bytes: file.size(),
            mime_type: file.mime_type.clone(),
            name: file.name.clone(),
            origin: Origin::RealBackend,
            timestamp: now,
            backend: Some(backend.to_string()),
        }
    }

    async fn finish_fallback(
        &self,
        local_id: String,
        fingerprint: String,
        file: UploadFile,
        progress: &mut Progress<'_>,
    ) -> UploadResult {
        self.stats.record(StatKind::Error, None).await;
        log::warn!(
            "No backend accepted {}, keeping it locally as {}",
            file.name,
            local_id
        );

        let start = progress.last.max(CHAIN_END);
        for tick in 1..=FALLBACK_TICKS {
            tokio::time::sleep(self.progress_step).await;
            progress.report(start + (0.9 - start) * tick as f64 / FALLBACK_TICKS as f64);
        }

        let now = Utc::now();
        let size_bytes = file.size();
        let record = ContentRecord {
            id: local_id.clone(),
            name: file.name.clone(),
            mime_type: file.mime_type.clone(),
            size_bytes,
            payload: Some(Bytes::clone(&file.bytes)),
            sha256: Some(fingerprint),
            created_at: now,
            origin: Origin::LocalFallback,
        };
        self.cache.put(&local_id, record).await;
        progress.report(1.0);

        UploadResult {
            id: local_id,
            size_bytes,
            mime_type: file.mime_type,
            name: file.name,
            origin: Origin::LocalFallback,
            timestamp: now,
            backend: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::error::{Result, StoreError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    const REMOTE_ID: &str = "QmPZ9gcCEpqKTo6aq61g2nXGUhM4iCL3ewB6LDXZCtioEB";

    #[derive(Clone, Copy)]
    enum Behaviour {
        Accept(&'static str),
        Fail,
        Hang,
        Offline,
    }

    struct FakeBackend {
        name: &'static str,
        behaviour: Behaviour,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl UploadBackend for FakeBackend {
        fn name(&self) -> &str {
            self.name
        }

        async fn is_available(&self) -> bool {
            !matches!(self.behaviour, Behaviour::Offline)
        }

        async fn upload(&self, _file: &UploadFile) -> Result<BackendReceipt> {
            self.calls.lock().unwrap().push(self.name);
            match self.behaviour {
                Behaviour::Accept(id) => Ok(BackendReceipt {
                    id: id.to_string(),
                    size_bytes: None,
                }),
                Behaviour::Fail | Behaviour::Offline => {
                    Err(StoreError::unavailable(self.name, "refused"))
                }
                Behaviour::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    struct Harness {
        cache: Arc<MemoryCacheStore>,
        stats: Arc<StatsTracker>,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                cache: Arc::new(MemoryCacheStore::new()),
                stats: Arc::new(StatsTracker::in_memory()),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn orchestrator(&self, chain: &[(&'static str, Behaviour)]) -> UploadOrchestrator {
            let mut orchestrator = UploadOrchestrator::new(self.cache.clone(), self.stats.clone())
                .with_progress_step(Duration::ZERO)
                .with_attempt_timeout(Duration::from_secs(5));
            for &(name, behaviour) in chain {
                orchestrator = orchestrator.with_backend(Arc::new(FakeBackend {
                    name,
                    behaviour,
                    calls: self.calls.clone(),
                }));
            }
            orchestrator
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn text_file() -> UploadFile {
        UploadFile::new(b"0123456789".to_vec(), "a.txt")
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let h = Harness::new();
        let orchestrator = h.orchestrator(&[
            ("node", Behaviour::Accept(REMOTE_ID)),
            ("pinata", Behaviour::Accept(hash::DEFAULT_IDENTIFIER)),
        ]);

        let result = orchestrator.upload(text_file(), None).await;
        assert_eq!(result.origin, Origin::RealBackend);
        assert_eq!(result.id, REMOTE_ID);
        assert_eq!(result.backend.as_deref(), Some("node"));
        assert_eq!(h.calls(), vec!["node"]);

        let stats = h.stats.snapshot().await;
        assert_eq!(stats.uploads_attempted, 1);
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.total_bytes_uploaded, 10);
    }

    #[tokio::test]
    async fn test_failures_advance_in_order_once_each() {
        let h = Harness::new();
        let orchestrator = h.orchestrator(&[
            ("node", Behaviour::Fail),
            ("pinata", Behaviour::Fail),
            ("infura", Behaviour::Accept(REMOTE_ID)),
        ]);

        let result = orchestrator.upload(text_file(), None).await;
        assert_eq!(result.backend.as_deref(), Some("infura"));
        assert_eq!(h.calls(), vec!["node", "pinata", "infura"]);
        assert_eq!(h.stats.snapshot().await.uploads_attempted, 1);
    }

    #[tokio::test]
    async fn test_unavailable_backends_are_skipped() {
        let h = Harness::new();
        let orchestrator = h.orchestrator(&[
            ("node", Behaviour::Offline),
            ("pinata", Behaviour::Accept(REMOTE_ID)),
        ]);

        let result = orchestrator.upload(text_file(), None).await;
        assert_eq!(result.backend.as_deref(), Some("pinata"));
        assert_eq!(h.calls(), vec!["pinata"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_backend_times_out() {
        let h = Harness::new();
        let orchestrator = h.orchestrator(&[
            ("node", Behaviour::Hang),
            ("pinata", Behaviour::Accept(REMOTE_ID)),
        ]);

        let result = orchestrator.upload(text_file(), None).await;
        assert_eq!(result.id, REMOTE_ID);
        assert_eq!(h.calls(), vec!["node", "pinata"]);
    }

    #[tokio::test]
    async fn test_total_failure_falls_back_locally() {
        let h = Harness::new();
        let orchestrator = h.orchestrator(&[("node", Behaviour::Fail), ("pinata", Behaviour::Fail)]);

        let file = text_file();
        let expected_id = HashDeriver::default().derive_sync(&file.bytes);
        let result = orchestrator.upload(file, None).await;

        assert_eq!(result.origin, Origin::LocalFallback);
        assert_eq!(result.id, expected_id);
        assert_eq!(result.size_bytes, 10);
        assert_eq!(result.mime_type, "text/plain");
        assert!(hash::validate(&result.id).valid);

        let cached = h.cache.get(&result.id).await.unwrap();
        assert_eq!(cached.payload.unwrap().as_ref(), b"0123456789");
        assert_eq!(cached.origin, Origin::LocalFallback);

        let stats = h.stats.snapshot().await;
        assert_eq!(stats.uploads_attempted, 1);
        assert_eq!(stats.errors, 1);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_ends_at_one() {
        for chain in [
            vec![("node", Behaviour::Accept(REMOTE_ID))],
            vec![("node", Behaviour::Fail), ("pinata", Behaviour::Accept(REMOTE_ID))],
            vec![("node", Behaviour::Fail)],
            vec![],
        ] {
            let h = Harness::new();
            let orchestrator = h.orchestrator(&chain);
            let seen = Arc::new(Mutex::new(Vec::new()));
            let sink = seen.clone();
            let callback = move |f: f64| sink.lock().unwrap().push(f);

            orchestrator.upload(text_file(), Some(&callback)).await;

            let seen = seen.lock().unwrap();
            assert!(seen.len() >= 2, "too few progress events: {:?}", seen);
            assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);
            assert_eq!(*seen.last().unwrap(), 1.0);
        }
    }

    #[tokio::test]
    async fn test_fallback_progress_is_animated() {
        let h = Harness::new();
        let orchestrator = h.orchestrator(&[]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback = move |f: f64| sink.lock().unwrap().push(f);

        orchestrator.upload(text_file(), Some(&callback)).await;

        let seen = seen.lock().unwrap();
        let distinct: Vec<_> = seen.windows(2).filter(|w| w[0] < w[1]).collect();
        assert!(distinct.len() >= FALLBACK_TICKS as usize);
    }

    #[tokio::test]
    async fn test_reupload_of_real_backend_payload_skips_network() {
        let h = Harness::new();
        let orchestrator = h.orchestrator(&[("pinata", Behaviour::Accept(REMOTE_ID))]);

        let first = orchestrator.upload(text_file(), None).await;
        let second = orchestrator.upload(text_file(), None).await;

        assert_eq!(first.id, REMOTE_ID);
        assert_eq!(second.id, REMOTE_ID);
        assert_eq!(second.origin, Origin::RealBackend);
        assert_eq!(h.calls(), vec!["pinata"]);
        assert_eq!(h.stats.snapshot().await.uploads_attempted, 2);

        // The payload itself lives under the backend identifier.
        assert!(h.cache.get(REMOTE_ID).await.unwrap().has_payload());
    }

    #[tokio::test]
    async fn test_local_fallback_records_do_not_short_circuit() {
        let h = Harness::new();
        let offline = h.orchestrator(&[("pinata", Behaviour::Fail)]);
        let first = offline.upload(text_file(), None).await;
        assert_eq!(first.origin, Origin::LocalFallback);

        let online = h.orchestrator(&[("infura", Behaviour::Accept(REMOTE_ID))]);
        let second = online.upload(text_file(), None).await;
        assert_eq!(second.origin, Origin::RealBackend);
        assert_eq!(h.calls(), vec!["pinata", "infura"]);

        // The identifier handed out offline still holds its bytes.
        let kept = h.cache.get(&first.id).await.unwrap();
        assert_eq!(kept.id, REMOTE_ID);
        assert_eq!(kept.payload.as_deref(), Some(&b"0123456789"[..]));
    }

    #[tokio::test]
    async fn test_pool_mode_never_short_circuits() {
        let h = Harness::new();
        let orchestrator = h
            .orchestrator(&[("pinata", Behaviour::Accept(REMOTE_ID))])
            .with_deriver(HashDeriver::new(DeriveMode::Pool));

        orchestrator.upload(text_file(), None).await;
        orchestrator.upload(text_file(), None).await;
        assert_eq!(h.calls(), vec!["pinata", "pinata"]);
        assert_eq!(h.cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_empty_payload_and_name() {
        let h = Harness::new();
        let orchestrator = h.orchestrator(&[]);
        let result = orchestrator.upload(UploadFile::new(Vec::new(), ""), None).await;
        assert_eq!(result.origin, Origin::LocalFallback);
        assert_eq!(result.size_bytes, 0);
        assert!(hash::validate(&result.id).valid);
    }
}
