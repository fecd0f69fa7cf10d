//! Public HTTP gateways serving `/ipfs/<id>`

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, RANGE};
use reqwest::{Client, StatusCode};

use super::{trim_base, Fetched, RetrievalGateway};
use crate::error::{Result, StoreError};

pub struct HttpGateway {
    name: String,
    base_url: String,
    client: Client,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        let name = base_url
            .split("://")
            .nth(1)
            .unwrap_or(&base_url)
            .trim_end_matches('/')
            .to_string();
        Self {
            name,
            base_url,
            client,
        }
    }

    pub fn content_url(&self, id: &str) -> String {
        format!("{}/ipfs/{}", trim_base(&self.base_url), id)
    }
}

#[async_trait]
impl RetrievalGateway for HttpGateway {
    fn name(&self) -> &str {
        &self.name
    }

    /// Ask for the first byte only.
    async fn probe(&self, id: &str) -> Result<()> {
        let response = self
            .client
            .get(self.content_url(id))
            .header(RANGE, "bytes=0-0")
            .send()
            .await
            .map_err(|e| StoreError::unavailable(&self.name, e))?;

        match response.status() {
            StatusCode::OK | StatusCode::PARTIAL_CONTENT => Ok(()),
            status => Err(StoreError::unavailable(
                &self.name,
                format!("probe returned HTTP {}", status.as_u16()),
            )),
        }
    }

    async fn fetch(&self, id: &str) -> Result<Fetched> {
        let response = self
            .client
            .get(self.content_url(id))
            .send()
            .await
            .map_err(|e| StoreError::unavailable(&self.name, e))?;

        if !response.status().is_success() {
            return Err(StoreError::unavailable(
                &self.name,
                format!("HTTP {}", response.status().as_u16()),
            ));
        }

        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| StoreError::unavailable(&self.name, e))?;

        Ok(Fetched { bytes, mime_type })
    }
}
