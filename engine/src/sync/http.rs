//! HTTP transport speaking the sync wire protocol:
//!
//! - `POST {base}/sync/upload` with one [`SyncRecord`] as the JSON body
//! - `GET {base}/sync/download?since=<ISO-8601>` returning a JSON array, where
//!   `since` is the peer receipt stamp of the last record downloaded
//!
//! Every request carries `X-Device-Id`, `X-User-Id` and, when configured,
//! `Authorization: Bearer <token>`.

use super::{SyncRecord, SyncTransport};
use crate::clock::to_iso8601;
use crate::{error::Result, Error, SyncConfig, Timestamp};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};

pub const DEVICE_ID_HEADER: &str = "x-device-id";
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    device_id: String,
    user_id: String,
    auth_token: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, device_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            device_id: device_id.into(),
            user_id: user_id.into(),
            auth_token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Build from a sync config; `base_url` is required.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| Error::InvalidConfig("sync base URL is not configured".into()))?;
        let transport = Self::new(base_url, config.device_id.as_str(), config.user_id.as_str());
        Ok(match &config.auth_token {
            Some(token) => transport.with_token(token.as_str()),
            None => transport,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header(DEVICE_ID_HEADER, &self.device_id)
            .header(USER_ID_HEADER, &self.user_id);
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn upload(&self, record: &SyncRecord) -> Result<()> {
        self.request(Method::POST, "/sync/upload")
            .json(record)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn download(&self, since: Timestamp) -> Result<Vec<SyncRecord>> {
        let records = self
            .request(Method::GET, "/sync/download")
            .query(&[("since", to_iso8601(since))])
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<SyncRecord>>()
            .await?;
        tracing::debug!(count = records.len(), since, "downloaded changes");
        Ok(records)
    }
}
