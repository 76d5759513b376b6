//! HTTP data link.
//!
//! Async client using `reqwest` with the API key sent as a default header.

use std::sync::Arc;

use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use glasslink_protocol::constants::{API_KEY_HEADER, paths};
use glasslink_protocol::{ProbeResponse, decode_json};

use crate::error::DataLinkError;
use crate::link::{DataEndpoint, DataFuture, DataLink, DataLinkConnector};

/// REST client for one endpoint.
pub struct HttpDataLink {
    http: reqwest::Client,
    base_url: String,
    endpoint: DataEndpoint,
}

impl HttpDataLink {
    pub fn new(endpoint: DataEndpoint) -> Result<Self, DataLinkError> {
        let name = HeaderName::from_bytes(API_KEY_HEADER.as_bytes())
            .map_err(|e| DataLinkError::Client(e.to_string()))?;
        let value = HeaderValue::from_str(&endpoint.api_key).map_err(|_| DataLinkError::InvalidKey)?;
        let mut headers = HeaderMap::new();
        headers.insert(name, value);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(endpoint.timeout)
            .timeout(endpoint.timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: endpoint.base_url(),
            endpoint,
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Vec<u8>, DataLinkError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "data link request");
        let mut req = self.http.request(method.clone(), &url);
        if let Some(body) = &body {
            req = req.json(body);
        }
        let resp = req.send().await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(%method, %url, status = status.as_u16(), "data link request rejected");
            return Err(DataLinkError::Remote {
                status: status.as_u16(),
                body,
            });
        }

        Ok(resp.bytes().await?.to_vec())
    }
}

impl DataLink for HttpDataLink {
    fn endpoint(&self) -> &DataEndpoint {
        &self.endpoint
    }

    fn get<'a>(&'a self, path: &'a str) -> DataFuture<'a, Vec<u8>> {
        Box::pin(self.send(Method::GET, path, None))
    }

    fn post<'a>(
        &'a self,
        path: &'a str,
        body: Option<serde_json::Value>,
    ) -> DataFuture<'a, Vec<u8>> {
        Box::pin(self.send(Method::POST, path, body))
    }

    fn put<'a>(&'a self, path: &'a str, body: serde_json::Value) -> DataFuture<'a, Vec<u8>> {
        Box::pin(self.send(Method::PUT, path, Some(body)))
    }

    fn delete<'a>(&'a self, path: &'a str) -> DataFuture<'a, Vec<u8>> {
        Box::pin(self.send(Method::DELETE, path, None))
    }

    fn probe(&self) -> DataFuture<'_, ()> {
        Box::pin(async move {
            let body = self.send(Method::GET, paths::CONNECTION_TEST, None).await?;
            let resp: ProbeResponse = decode_json(&body)?;
            debug!(address = %self.endpoint.address, message = %resp.message, "probe ok");
            Ok(())
        })
    }
}

/// Connector producing [`HttpDataLink`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpConnector;

impl DataLinkConnector for HttpConnector {
    fn connect(&self, endpoint: DataEndpoint) -> Result<Arc<dyn DataLink>, DataLinkError> {
        Ok(Arc::new(HttpDataLink::new(endpoint)?))
    }
}
