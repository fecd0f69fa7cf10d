//! Retrieval fallback chain
//!
//! Resolution order: local cache, then each retrieval source in turn (probe
//! first, fetch on a successful probe), then a generated proof-of-existence
//! document. Every path produces a [`Resolution`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::backends::{Fetched, RetrievalGateway};
use crate::cache::CacheStore;
use crate::error::StoreError;
use crate::hash::{self, DEFAULT_IDENTIFIER};
use crate::sink::FileSink;
use crate::stats::{StatKind, StatsTracker};
use crate::types::{ContentRecord, Origin, ResolveMode, Resolution};

const PROOF_MIME_TYPE: &str = "text/plain; charset=utf-8";
const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

pub struct RetrievalResolver {
    gateways: Vec<Arc<dyn RetrievalGateway>>,
    cache: Arc<dyn CacheStore>,
    stats: Arc<StatsTracker>,
    attempt_timeout: Duration,
}

impl RetrievalResolver {
    pub fn new(cache: Arc<dyn CacheStore>, stats: Arc<StatsTracker>) -> Self {
        Self {
            gateways: Vec::new(),
            cache,
            stats,
            attempt_timeout: Duration::from_secs(8),
        }
    }

    /// Append a retrieval source to the end of the chain.
    pub fn with_gateway(mut self, gateway: Arc<dyn RetrievalGateway>) -> Self {
        self.gateways.push(gateway);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn gateway_names(&self) -> Vec<&str> {
        self.gateways.iter().map(|g| g.name()).collect()
    }

    /// Resolve `id` to bytes. Always returns a resolution.
    pub async fn resolve(&self, id: &str, display_name: &str) -> Resolution {
        let requested_id = id.to_string();
        let validation = hash::validate(id);
        let (id, was_substituted) = if validation.valid {
            (requested_id.clone(), false)
        } else {
            log::warn!(
                "Substituting {} for invalid identifier {:?}: {}",
                DEFAULT_IDENTIFIER,
                requested_id,
                validation.reason.unwrap_or_default()
            );
            (DEFAULT_IDENTIFIER.to_string(), true)
        };

        self.stats.record(StatKind::Download, None).await;

        let cached = self.cache.get(&id).await;
        let name = pick_name(display_name, cached.as_ref(), &id);
        let cached = match cached {
            Some(alias) if !alias.has_payload() && alias.id != id => {
                match self.cache.get(&alias.id).await {
                    Some(target) if target.has_payload() => {
                        log::debug!("Following alias {} -> {}", id, alias.id);
                        Some(target)
                    }
                    _ => Some(alias),
                }
            }
            other => other,
        };

        let known_mime = match cached {
            Some(ContentRecord {
                payload: Some(bytes),
                mime_type,
                ..
            }) => {
                log::debug!("Resolved {} from cache", id);
                return Resolution {
                    requested_id,
                    id,
                    was_substituted,
                    success: true,
                    mode: ResolveMode::Cache,
                    name,
                    mime_type,
                    bytes,
                    source: None,
                    resolved_at: Utc::now(),
                };
            }
            Some(record) => Some(record.mime_type),
            None => None,
        };

        for gateway in &self.gateways {
            match self.try_gateway(gateway.as_ref(), &id).await {
                Ok(fetched) => {
                    log::info!("Resolved {} from {}", id, gateway.name());
                    let mime_type = fetched
                        .mime_type
                        .or(known_mime)
                        .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string());
                    self.remember(&id, &name, &mime_type, &fetched.bytes).await;
                    return Resolution {
                        requested_id,
                        id,
                        was_substituted,
                        success: true,
                        mode: ResolveMode::Network,
                        name,
                        mime_type,
                        bytes: fetched.bytes,
                        source: Some(gateway.name().to_string()),
                        resolved_at: Utc::now(),
                    };
                }
                Err(e) => log::warn!("Retrieval of {} failed: {}", id, e),
            }
        }

        log::warn!("No source could serve {}, generating proof document", id);
        let resolved_at = Utc::now();
        Resolution {
            bytes: Bytes::from(proof_document(&name, &id, resolved_at)),
            requested_id,
            id,
            was_substituted,
            success: true,
            mode: ResolveMode::Synthetic,
            name: format!("{}.proof.txt", name),
            mime_type: PROOF_MIME_TYPE.to_string(),
            source: None,
            resolved_at,
        }
    }

    /// Resolve and hand the bytes to the sink for display.
    pub async fn view(&self, id: &str, name: &str, sink: &dyn FileSink) -> Resolution {
        let resolution = self.resolve(id, name).await;
        if let Err(e) = sink
            .display(&resolution.bytes, &resolution.name, &resolution.mime_type)
            .await
        {
            log::warn!("Could not display {}: {}", resolution.name, e);
        }
        resolution
    }

    /// Resolve and hand the bytes to the sink for saving.
    pub async fn download(&self, id: &str, name: &str, sink: &dyn FileSink) -> Resolution {
        let resolution = self.resolve(id, name).await;
        if let Err(e) = sink.save(&resolution.bytes, &resolution.name).await {
            log::warn!("Could not save {}: {}", resolution.name, e);
        }
        resolution
    }

    async fn try_gateway(
        &self,
        gateway: &dyn RetrievalGateway,
        id: &str,
    ) -> Result<Fetched, StoreError> {
        let timed_out = || {
            StoreError::unavailable(
                gateway.name(),
                format!("timed out after {:?}", self.attempt_timeout),
            )
        };

        tokio::time::timeout(self.attempt_timeout, gateway.probe(id))
            .await
            .map_err(|_| timed_out())??;
        tokio::time::timeout(self.attempt_timeout, gateway.fetch(id))
            .await
            .map_err(|_| timed_out())?
    }

    async fn remember(&self, id: &str, name: &str, mime_type: &str, bytes: &Bytes) {
        let record = ContentRecord {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            size_bytes: bytes.len() as u64,
            payload: Some(bytes.clone()),
            sha256: Some(hash::fingerprint(bytes)),
            created_at: Utc::now(),
            origin: Origin::RealBackend,
        };
        self.cache.put(id, record).await;
    }
}

fn pick_name(display_name: &str, cached: Option<&ContentRecord>, id: &str) -> String {
    if !display_name.trim().is_empty() {
        return display_name.to_string();
    }
    match cached {
        Some(record) if !record.name.is_empty() => record.name.clone(),
        _ => id.to_string(),
    }
}

/// Human-readable stand-in for content that could not be retrieved.
pub fn proof_document(name: &str, id: &str, at: DateTime<Utc>) -> String {
    format!(
        "PROOF OF EXISTENCE\n\
         ==================\n\
         \n\
         Document:           {name}\n\
         Content identifier: {id}\n\
         Generated:          {when}\n\
         \n\
         The content identifier above was registered for this document. An\n\
         identifier is derived from the document's bytes, so any copy of the\n\
         original file will reproduce it exactly, while any change to the\n\
         file produces a different one.\n\
         \n\
         The original bytes could not be retrieved from the local cache or\n\
         from any configured gateway when this notice was generated. Present\n\
         the original file and compare identifiers to verify it.\n",
        name = name,
        id = id,
        when = at.format("%B %-d, %Y at %H:%M:%S UTC"),
    )
}
