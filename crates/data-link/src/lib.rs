//! Authenticated REST data link to the glasses.
//!
//! Available once the glasses have joined a local network. Every request
//! carries the API key; calls are independent and may run concurrently.

mod api;
pub mod error;
mod http;
mod link;

pub use api::{DeviceApi, MediaKind};
pub use error::DataLinkError;
pub use http::{HttpConnector, HttpDataLink};
pub use link::{DataEndpoint, DataFuture, DataLink, DataLinkConnector};
