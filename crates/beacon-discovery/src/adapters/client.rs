//! JSON-over-HTTP client shared by the catalog adapters.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{DiscoveryError, DiscoveryResult};

/// HTTP client bound to one catalog's base URL.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    client: Client,
    base_url: String,
    adapter: String,
}

impl CatalogClient {
    pub fn new(
        adapter: &str,
        base_url: &str,
        timeout: Duration,
        mut headers: HeaderMap,
        verify_ssl: bool,
    ) -> DiscoveryResult<Self> {
        headers
            .entry(ACCEPT)
            .or_insert(HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .danger_accept_invalid_certs(!verify_ssl)
            .build()
            .map_err(|e| DiscoveryError::Configuration(format!("{}: {}", adapter, e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            adapter: adapter.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> DiscoveryResult<T> {
        let response = self.send(self.client.get(self.url(path)), "GET", path).await?;
        response
            .json()
            .await
            .map_err(|e| DiscoveryError::Parse(format!("{} GET {}: {}", self.adapter, path, e)))
    }

    pub async fn put<B: Serialize>(&self, path: &str, body: Option<&B>) -> DiscoveryResult<()> {
        let mut request = self.client.put(self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(request, "PUT", path).await.map(|_| ())
    }

    pub async fn post<B: Serialize>(&self, path: &str, body: &B) -> DiscoveryResult<()> {
        let request = self.client.post(self.url(path)).json(body);
        self.send(request, "POST", path).await.map(|_| ())
    }

    pub async fn delete(&self, path: &str) -> DiscoveryResult<()> {
        self.send(self.client.delete(self.url(path)), "DELETE", path)
            .await
            .map(|_| ())
    }

    /// Succeeds when `path` answers with a success status.
    pub async fn probe(&self, path: &str) -> DiscoveryResult<()> {
        self.send(self.client.get(self.url(path)), "GET", path)
            .await
            .map(|_| ())
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        method: &str,
        path: &str,
    ) -> DiscoveryResult<Response> {
        debug!(adapter = %self.adapter, method, path, "Catalog request");
        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                DiscoveryError::unavailable(&self.adapter, e)
            } else {
                DiscoveryError::Http(format!("{} {} {}: {}", self.adapter, method, path, e))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(DiscoveryError::Http(format!(
                "{} {} {} returned {}: {}",
                self.adapter,
                method,
                path,
                status.as_u16(),
                body.trim()
            )))
        }
    }
}
