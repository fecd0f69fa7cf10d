//! Remote pinning services
//!
//! Two wire flavours are supported: Pinata's `pinFileToIPFS` and the plain
//! IPFS HTTP `add` endpoint offered by hosted nodes. Both take a multipart
//! upload with a single `file` field.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::Deserialize;

use super::{trim_base, BackendReceipt, UploadBackend};
use crate::config::{PinningConfig, PinningKind};
use crate::error::{Result, StoreError};
use crate::hash;
use crate::types::UploadFile;

#[derive(Deserialize)]
struct PinataResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
    #[serde(rename = "PinSize")]
    pin_size: Option<u64>,
}

#[derive(Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
    #[serde(rename = "Size")]
    size: Option<String>,
}

/// Upload backend for a remote pinning provider
pub struct PinningBackend {
    config: PinningConfig,
    client: Client,
}

impl PinningBackend {
    pub fn new(config: PinningConfig, client: Client) -> Self {
        Self { config, client }
    }

    async fn upload_pinata(&self, file: &UploadFile) -> Result<BackendReceipt> {
        let url = format!("{}/pinning/pinFileToIPFS", trim_base(&self.config.endpoint));
        let metadata = serde_json::json!({ "name": file.name }).to_string();
        let form = Form::new()
            .part("file", file_part(file))
            .text("pinataMetadata", metadata);

        let token = self.config.token.as_deref().unwrap_or_default();
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| StoreError::unavailable(&self.config.name, e))?;

        let body = check_status(&self.config.name, response).await?;
        let parsed: PinataResponse = serde_json::from_str(&body).map_err(|e| {
            StoreError::unavailable(&self.config.name, format!("unexpected response: {}", e))
        })?;

        receipt(&self.config.name, parsed.ipfs_hash, parsed.pin_size)
    }

    async fn upload_ipfs_api(&self, file: &UploadFile) -> Result<BackendReceipt> {
        let url = format!("{}/api/v0/add?pin=true", trim_base(&self.config.endpoint));
        let form = Form::new().part("file", file_part(file));

        let mut request = self.client.post(&url).multipart(form);
        if let (Some(key), Some(secret)) = (&self.config.key, &self.config.secret) {
            request = request.basic_auth(key, Some(secret));
        }

        let response = request
            .send()
            .await
            .map_err(|e| StoreError::unavailable(&self.config.name, e))?;
        let body = check_status(&self.config.name, response).await?;
        parse_add_response(&self.config.name, &body)
    }
}

#[async_trait]
impl UploadBackend for PinningBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn is_available(&self) -> bool {
        self.config.has_credentials()
    }

    async fn upload(&self, file: &UploadFile) -> Result<BackendReceipt> {
        match self.config.kind {
            PinningKind::Pinata => self.upload_pinata(file).await,
            PinningKind::IpfsApi => self.upload_ipfs_api(file).await,
        }
    }
}

/// Multipart `file` field for an upload.
pub(crate) fn file_part(file: &UploadFile) -> Part {
    let file_name = if file.name.is_empty() {
        "upload".to_string()
    } else {
        file.name.clone()
    };
    let bytes = file.bytes.to_vec();

    match Part::bytes(bytes.clone())
        .file_name(file_name.clone())
        .mime_str(&file.mime_type)
    {
        Ok(part) => part,
        Err(_) => Part::bytes(bytes).file_name(file_name),
    }
}

/// Return the body of a successful response, or a backend error.
pub(crate) async fn check_status(backend: &str, response: Response) -> Result<String> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| StoreError::unavailable(backend, e))?;

    if !status.is_success() {
        let excerpt: String = body.chars().take(200).collect();
        return Err(StoreError::unavailable(
            backend,
            format!("HTTP {}: {}", status.as_u16(), excerpt),
        ));
    }
    Ok(body)
}

/// Parse the output of `/api/v0/add`. The endpoint streams one JSON object
/// per line; the last one names the uploaded root.
pub(crate) fn parse_add_response(backend: &str, body: &str) -> Result<BackendReceipt> {
    let line = body
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| StoreError::unavailable(backend, "empty response"))?;

    let parsed: AddResponse = serde_json::from_str(line).map_err(|e| {
        StoreError::unavailable(backend, format!("unexpected response: {}", e))
    })?;
    let size = parsed.size.and_then(|s| s.parse().ok());
    receipt(backend, parsed.hash, size)
}

fn receipt(backend: &str, id: String, size_bytes: Option<u64>) -> Result<BackendReceipt> {
    let validation = hash::validate(&id);
    if !validation.valid {
        return Err(StoreError::unavailable(
            backend,
            format!(
                "returned malformed identifier {:?}: {}",
                id,
                validation.reason.unwrap_or_default()
            ),
        ));
    }
    Ok(BackendReceipt { id, size_bytes })
}
