//! Errors returned to callers of the orchestrator.

use glasslink_control_link::ControlLinkError;
use glasslink_data_link::DataLinkError;
use glasslink_protocol::DecodeError;

/// Why a pairing attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingFailure {
    /// The peer rejected the code. Attempts remain.
    InvalidCode { attempts_remaining: u32 },
    /// The peer did not answer in time. No attempt was consumed.
    Timeout,
    /// The last attempt was rejected; the session is gone.
    AttemptsExhausted,
}

impl std::fmt::Display for PairingFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCode { attempts_remaining } => {
                write!(f, "invalid code ({attempts_remaining} attempts remaining)")
            }
            Self::Timeout => f.write_str("peer did not answer"),
            Self::AttemptsExhausted => f.write_str("attempts exhausted"),
        }
    }
}

/// Errors produced by [`Orchestrator`](crate::Orchestrator) operations.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("pairing failed: {0}")]
    PairingFailed(PairingFailure),

    #[error("control link unavailable")]
    LinkUnavailable,

    #[error("control link timed out")]
    LinkTimeout,

    #[error("protocol error: {0}")]
    Protocol(#[from] DecodeError),

    #[error("data link unavailable")]
    TransportUnavailable,

    #[error("remote error {status}")]
    Remote { status: u16 },

    #[error("not paired")]
    NotPaired,

    #[error("credential persistence failed: {0}")]
    CredentialPersistenceFailed(String),

    #[error("already paired")]
    AlreadyPaired,

    #[error("cancelled")]
    Cancelled,

    #[error("{0} is not supported over the available link")]
    Unsupported(&'static str),
}

impl From<ControlLinkError> for ConnectionError {
    fn from(e: ControlLinkError) -> Self {
        match e {
            ControlLinkError::LinkUnavailable => Self::LinkUnavailable,
            ControlLinkError::LinkTimeout => Self::LinkTimeout,
            ControlLinkError::Protocol(e) => Self::Protocol(e),
            ControlLinkError::NotPaired => Self::NotPaired,
            // Radio faults leave the peer unusable just like a drop.
            ControlLinkError::Backend(_) => Self::LinkUnavailable,
        }
    }
}

impl From<DataLinkError> for ConnectionError {
    fn from(e: DataLinkError) -> Self {
        match e {
            DataLinkError::TransportUnavailable(_) | DataLinkError::Client(_) => {
                Self::TransportUnavailable
            }
            DataLinkError::Remote { status: 401, .. } => Self::NotPaired,
            DataLinkError::Remote { status, .. } => Self::Remote { status },
            DataLinkError::Protocol(e) => Self::Protocol(e),
            DataLinkError::InvalidKey => Self::NotPaired,
            DataLinkError::Unsupported(what) => Self::Unsupported(what),
        }
    }
}
