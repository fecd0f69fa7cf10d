// Proofstore - content-addressed storage client with local fallback

//! Uploads and retrieves files by content identifier.
//!
//! Uploads walk a chain of backends and fall back to a locally derived
//! identifier when none accept. Retrieval walks cache, then gateways, then
//! produces a proof-of-existence document. Neither path surfaces an error to
//! the caller; [`types::Origin`] and [`types::ResolveMode`] say which branch
//! served the request.

pub mod backends;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod hash;
pub mod retrieve;
pub mod sink;
pub mod stats;
pub mod types;
pub mod upload;

pub use client::StorageClient;
pub use config::ClientConfig;
pub use error::{Result, StoreError};
pub use hash::{validate, DeriveMode, HashDeriver, Validation};
pub use stats::{StatKind, StatsTracker, UsageStats};
pub use types::{ContentRecord, Origin, Resolution, ResolveMode, UploadFile, UploadResult};
