//! Local node reached through its RPC API
//!
//! The node is the first link in the upload chain when enabled, and the
//! first retrieval source. Its RPC endpoints only accept POST.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::Form;
use reqwest::Client;

use super::pinning::{check_status, file_part, parse_add_response};
use super::{trim_base, BackendReceipt, Fetched, RetrievalGateway, UploadBackend};
use crate::error::{Result, StoreError};
use crate::types::UploadFile;

const NAME: &str = "local-node";

pub struct LocalNodeBackend {
    rpc_url: String,
    client: Client,
    probe_timeout: Duration,
}

impl LocalNodeBackend {
    pub fn new(rpc_url: impl Into<String>, client: Client) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            client,
            probe_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v0/{}", trim_base(&self.rpc_url), path)
    }
}

#[async_trait]
impl UploadBackend for LocalNodeBackend {
    fn name(&self) -> &str {
        NAME
    }

    async fn is_available(&self) -> bool {
        let request = self
            .client
            .post(self.endpoint("version"))
            .timeout(self.probe_timeout)
            .send();
        match request.await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                log::debug!("Local node answered version probe with {}", response.status());
                false
            }
            Err(e) => {
                log::debug!("Local node not reachable: {}", e);
                false
            }
        }
    }

    async fn upload(&self, file: &UploadFile) -> Result<BackendReceipt> {
        let form = Form::new().part("file", file_part(file));
        let response = self
            .client
            .post(self.endpoint("add?pin=true"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| StoreError::unavailable(NAME, e))?;

        let body = check_status(NAME, response).await?;
        parse_add_response(NAME, &body)
    }
}

#[async_trait]
impl RetrievalGateway for LocalNodeBackend {
    fn name(&self) -> &str {
        NAME
    }

    async fn probe(&self, id: &str) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint("block/stat"))
            .query(&[("arg", id), ("offline", "true")])
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| StoreError::unavailable(NAME, e))?;
        check_status(NAME, response).await.map(|_| ())
    }

    async fn fetch(&self, id: &str) -> Result<Fetched> {
        let response = self
            .client
            .post(self.endpoint("cat"))
            .query(&[("arg", id)])
            .send()
            .await
            .map_err(|e| StoreError::unavailable(NAME, e))?;

        if !response.status().is_success() {
            return Err(StoreError::unavailable(
                NAME,
                format!("HTTP {}", response.status().as_u16()),
            ));
        }
        let bytes: Bytes = response
            .bytes()
            .await
            .map_err(|e| StoreError::unavailable(NAME, e))?;

        Ok(Fetched {
            bytes,
            mime_type: None,
        })
    }
}
