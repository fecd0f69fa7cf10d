//! Client configuration
//!
//! Loaded from a JSON file, with every field optional. Credentials can be
//! supplied through environment variables instead of the file:
//!
//! - `PROOFSTORE_DATA_DIR`
//! - `PROOFSTORE_TIMEOUT_SECS`
//! - `PROOFSTORE_PINATA_JWT` (applied to every `pinata` provider)
//! - `PROOFSTORE_IPFS_API_KEY` / `PROOFSTORE_IPFS_API_SECRET` (applied to
//!   every `ipfs-api` provider)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::hash::DeriveMode;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Cache and stats live under this directory.
    pub data_dir: PathBuf,

    /// Where `download` saves files and `view` writes previews.
    pub downloads_dir: PathBuf,

    pub derive_mode: DeriveMode,

    /// Upper bound for each individual backend or gateway attempt.
    pub attempt_timeout_secs: u64,

    /// Delay between progress ticks on the local fallback path.
    pub progress_step_ms: u64,

    pub cache_quota_bytes: Option<u64>,

    pub node: NodeConfig,

    /// Remote pinning providers, tried in order.
    pub pinning: Vec<PinningConfig>,

    /// Public retrieval gateways, tried in order.
    pub gateways: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./proofstore_data"),
            downloads_dir: PathBuf::from("./downloads"),
            derive_mode: DeriveMode::Digest,
            attempt_timeout_secs: 8,
            progress_step_ms: 40,
            cache_quota_bytes: None,
            node: NodeConfig::default(),
            pinning: vec![
                PinningConfig {
                    name: "pinata".to_string(),
                    kind: PinningKind::Pinata,
                    endpoint: "https://api.pinata.cloud".to_string(),
                    token: None,
                    key: None,
                    secret: None,
                },
                PinningConfig {
                    name: "infura".to_string(),
                    kind: PinningKind::IpfsApi,
                    endpoint: "https://ipfs.infura.io:5001".to_string(),
                    token: None,
                    key: None,
                    secret: None,
                },
            ],
            gateways: vec![
                "https://ipfs.io".to_string(),
                "https://gateway.pinata.cloud".to_string(),
                "https://dweb.link".to_string(),
            ],
        }
    }
}

impl ClientConfig {
    /// Read a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .map_err(|e| StoreError::ConfigError(format!("{:?}: {}", path, e)))?;
        serde_json::from_slice(&data)
            .map_err(|e| StoreError::ConfigError(format!("{:?}: {}", path, e)))
    }

    /// Override fields from `PROOFSTORE_*` environment variables.
    pub fn apply_env(mut self) -> Result<Self> {
        self.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(self)
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = var("PROOFSTORE_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = var("PROOFSTORE_TIMEOUT_SECS") {
            self.attempt_timeout_secs = secs.parse().map_err(|_| {
                StoreError::ConfigError(format!("PROOFSTORE_TIMEOUT_SECS is not a number: {}", secs))
            })?;
        }

        let jwt = var("PROOFSTORE_PINATA_JWT");
        let key = var("PROOFSTORE_IPFS_API_KEY");
        let secret = var("PROOFSTORE_IPFS_API_SECRET");
        for provider in &mut self.pinning {
            match provider.kind {
                PinningKind::Pinata => {
                    if jwt.is_some() {
                        provider.token = jwt.clone();
                    }
                }
                PinningKind::IpfsApi => {
                    if key.is_some() {
                        provider.key = key.clone();
                    }
                    if secret.is_some() {
                        provider.secret = secret.clone();
                    }
                }
            }
        }
        Ok(())
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn progress_step(&self) -> Duration {
        Duration::from_millis(self.progress_step_ms)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    pub fn stats_path(&self) -> PathBuf {
        self.data_dir.join("stats.json")
    }
}

/// Local node reachable over its RPC API.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub enabled: bool,
    pub rpc_url: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rpc_url: "http://127.0.0.1:5001".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PinningKind {
    /// `POST /pinning/pinFileToIPFS` with a bearer JWT.
    Pinata,
    /// `POST /api/v0/add` with optional basic auth.
    IpfsApi,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct PinningConfig {
    pub name: String,
    pub kind: PinningKind,
    pub endpoint: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
}

impl PinningConfig {
    /// Whether the provider has the credentials its API requires.
    pub fn has_credentials(&self) -> bool {
        match self.kind {
            PinningKind::Pinata => self.token.as_deref().map_or(false, |t| !t.is_empty()),
            PinningKind::IpfsApi => self.key.is_some() && self.secret.is_some(),
        }
    }
}

impl std::fmt::Debug for PinningConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("PinningConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("token", &redact(&self.token))
            .field("key", &redact(&self.key))
            .field("secret", &redact(&self.secret))
            .finish()
    }
}
