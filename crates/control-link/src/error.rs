//! Error types for the control link.

use glasslink_protocol::DecodeError;
use uuid::Uuid;

/// Errors reported by a [`GattBackend`](crate::backend::GattBackend).
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("peer not found")]
    PeerNotFound,

    #[error("peer disconnected")]
    Disconnected,

    #[error("characteristic {0} not found on peer")]
    MissingCharacteristic(Uuid),

    #[error("radio error: {0}")]
    Radio(String),
}

/// Errors produced by [`ControlLink`](crate::ControlLink) operations.
#[derive(Debug, thiserror::Error)]
pub enum ControlLinkError {
    #[error("control link unavailable")]
    LinkUnavailable,

    #[error("control link operation timed out")]
    LinkTimeout,

    #[error("protocol error: {0}")]
    Protocol(#[from] DecodeError),

    #[error("not paired")]
    NotPaired,

    #[error("backend error: {0}")]
    Backend(BackendError),
}

impl From<BackendError> for ControlLinkError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::PeerNotFound | BackendError::Disconnected => Self::LinkUnavailable,
            other => Self::Backend(other),
        }
    }
}
