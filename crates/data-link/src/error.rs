//! Error types for the data link.

use glasslink_protocol::DecodeError;

/// Errors produced by data link calls.
#[derive(Debug, thiserror::Error)]
pub enum DataLinkError {
    /// Timeout, refused connection, DNS failure or a dropped socket.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("remote error {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("protocol error: {0}")]
    Protocol(#[from] DecodeError),

    #[error("invalid API key")]
    InvalidKey,

    #[error("{0} is not available over the data link")]
    Unsupported(&'static str),

    #[error("HTTP client error: {0}")]
    Client(String),
}

impl From<reqwest::Error> for DataLinkError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            Self::Client(e.to_string())
        } else {
            Self::TransportUnavailable(e.to_string())
        }
    }
}
