//! Data link abstraction.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use glasslink_protocol::constants::{API_PREFIX, DEFAULT_API_PORT, DEFAULT_REQUEST_TIMEOUT};

use crate::error::DataLinkError;

/// Boxed future returned by data link calls.
pub type DataFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, DataLinkError>> + Send + 'a>>;

/// Where and how to reach the glasses over the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEndpoint {
    pub address: String,
    pub port: u16,
    pub api_key: String,
    pub timeout: Duration,
}

impl DataEndpoint {
    pub fn new(address: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: DEFAULT_API_PORT,
            api_key: api_key.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Base URL every path is appended to.
    pub fn base_url(&self) -> String {
        if self.address.contains(':') {
            format!("http://[{}]:{}{API_PREFIX}", self.address, self.port)
        } else {
            format!("http://{}:{}{API_PREFIX}", self.address, self.port)
        }
    }
}

/// Authenticated request/response channel.
///
/// Calls are independent; any number may be outstanding at once.
pub trait DataLink: Send + Sync {
    fn endpoint(&self) -> &DataEndpoint;

    fn get<'a>(&'a self, path: &'a str) -> DataFuture<'a, Vec<u8>>;

    fn post<'a>(
        &'a self,
        path: &'a str,
        body: Option<serde_json::Value>,
    ) -> DataFuture<'a, Vec<u8>>;

    fn put<'a>(&'a self, path: &'a str, body: serde_json::Value) -> DataFuture<'a, Vec<u8>>;

    fn delete<'a>(&'a self, path: &'a str) -> DataFuture<'a, Vec<u8>>;

    /// Cheapest side-effect-free call, used only to test reachability.
    fn probe(&self) -> DataFuture<'_, ()>;
}

/// Builds data links for an endpoint.
pub trait DataLinkConnector: Send + Sync {
    fn connect(&self, endpoint: DataEndpoint) -> Result<Arc<dyn DataLink>, DataLinkError>;
}
