//! Content identifier derivation and validation
//!
//! Identifiers come in two textual forms:
//!
//! - legacy: exactly 46 characters, `Qm` prefix, base58btc alphabet
//! - modern: at least 59 characters, `baf` prefix, lowercase base32 alphabet
//!
//! `derive` never fails. In [`DeriveMode::Digest`] the identifier is the
//! CIDv1 (raw codec, sha2-256) of the payload. In [`DeriveMode::Pool`] the
//! digest only selects an entry from [`IDENTIFIER_POOL`], so different
//! payloads may share an identifier. Identical payloads always derive the
//! same identifier in both modes.

use bytes::Bytes;
use cid::multihash::Multihash;
use cid::Cid;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const LEGACY_PREFIX: &str = "Qm";
pub const LEGACY_LEN: usize = 46;
pub const MODERN_PREFIX: &str = "baf";
pub const MODERN_MIN_LEN: usize = 59;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const BASE32_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz234567";

/// Multihash code for sha2-256.
const SHA2_256: u64 = 0x12;
/// Multicodec for raw bytes.
const RAW_CODEC: u64 = 0x55;

/// Payloads above this size are digested on the blocking pool.
const INLINE_DIGEST_LIMIT: usize = 1024 * 1024;

/// Known-valid identifiers used by the pool selector and as the default.
pub const IDENTIFIER_POOL: [&str; 7] = [
    "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG",
    "QmT78zSuBmuS4z925WZfrqQ1qHaJ56DQaTfyMUF7F8ff5o",
    "QmUNLLsPACCz1vLxQVkXqqLX5R1X345qqfHbsf67hvA3Nn",
    "QmbFMke1KXqnYyBBWxB74N4c5SBnJMVAiMNRcGu6x1AwQH",
    "QmPZ9gcCEpqKTo6aq61g2nXGUhM4iCL3ewB6LDXZCtioEB",
    "QmdfTbBqBPQ7VNxZEYEj14VmRuZBkqFbiwReogJgS1zR1n",
    "QmQPeNsJPyVWPFDVHb9Yg8vgWpaz8zRRuK9NsCkthaMVC1",
];

/// Returned whenever no digest can be obtained, and substituted for
/// malformed identifiers during retrieval.
pub const DEFAULT_IDENTIFIER: &str = IDENTIFIER_POOL[0];

/// How a digest is turned into an identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeriveMode {
    /// Encode the digest itself as a CIDv1.
    #[default]
    Digest,
    /// Use the digest to pick an entry from the fixed pool.
    Pool,
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub valid: bool,
    pub reason: Option<String>,
}

impl Validation {
    fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Turns payloads into content identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashDeriver {
    mode: DeriveMode,
}

impl HashDeriver {
    pub fn new(mode: DeriveMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> DeriveMode {
        self.mode
    }

    /// Derive the identifier for `payload`. Large payloads are hashed on the
    /// blocking pool; if that task dies the default identifier is returned.
    pub async fn derive(&self, payload: &Bytes) -> String {
        if payload.len() <= INLINE_DIGEST_LIMIT {
            return self.derive_sync(payload);
        }

        let owned = payload.clone();
        match tokio::task::spawn_blocking(move || sha256(&owned)).await {
            Ok(digest) => self.from_digest(&digest, payload.len()),
            Err(e) => {
                log::warn!("Digest task failed, using default identifier: {}", e);
                DEFAULT_IDENTIFIER.to_string()
            }
        }
    }

    pub fn derive_sync(&self, payload: &[u8]) -> String {
        self.from_digest(&sha256(payload), payload.len())
    }

    fn from_digest(&self, digest: &[u8; 32], size: usize) -> String {
        log::debug!("sha256 {} ({} bytes)", hex::encode(digest), size);
        match self.mode {
            DeriveMode::Digest => encode_digest(digest).unwrap_or_else(|| {
                log::warn!("Could not encode digest, using default identifier");
                DEFAULT_IDENTIFIER.to_string()
            }),
            DeriveMode::Pool => pool_select(digest, size).to_string(),
        }
    }
}

pub fn sha256(payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    let result = hasher.finalize();
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&result);
    digest
}

/// Hex SHA-256 of a payload, as stored alongside cached records.
pub fn fingerprint(payload: &[u8]) -> String {
    hex::encode(sha256(payload))
}

/// CIDv1 text (raw codec) for a sha2-256 digest.
pub fn encode_digest(digest: &[u8; 32]) -> Option<String> {
    let hash = Multihash::<64>::wrap(SHA2_256, digest).ok()?;
    Some(Cid::new_v1(RAW_CODEC, hash).to_string())
}

/// Pick a pool entry from the first digest byte mixed with the payload size.
pub fn pool_select(digest: &[u8; 32], size: usize) -> &'static str {
    let index = (digest[0] as usize + size) % IDENTIFIER_POOL.len();
    IDENTIFIER_POOL[index]
}

/// Check an identifier against the legacy and modern syntax rules.
pub fn validate(id: &str) -> Validation {
    if id.is_empty() {
        return Validation::invalid("identifier is empty");
    }

    if id.starts_with(LEGACY_PREFIX) {
        if id.len() != LEGACY_LEN {
            return Validation::invalid(format!(
                "legacy identifier must be {} characters, got {}",
                LEGACY_LEN,
                id.len()
            ));
        }
        if let Some(c) = id.chars().find(|c| !BASE58_ALPHABET.contains(*c)) {
            return Validation::invalid(format!("invalid base58 character '{}'", c));
        }
        return Validation::ok();
    }

    if id.starts_with(MODERN_PREFIX) {
        if id.len() < MODERN_MIN_LEN {
            return Validation::invalid(format!(
                "modern identifier must be at least {} characters, got {}",
                MODERN_MIN_LEN,
                id.len()
            ));
        }
        if let Some(c) = id.chars().find(|c| !BASE32_ALPHABET.contains(*c)) {
            return Validation::invalid(format!("invalid base32 character '{}'", c));
        }
        return Validation::ok();
    }

    Validation::invalid(format!(
        "identifier must start with '{}' or '{}'",
        LEGACY_PREFIX, MODERN_PREFIX
    ))
}
