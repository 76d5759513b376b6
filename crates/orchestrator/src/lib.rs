//! Connection orchestration for GlassLink glasses.
//!
//! Combines the short-range control link and the network data link into
//! one logical connection: pairing over the control link, credential
//! persistence, promotion to the data link when it is reachable, and
//! per-operation link selection.

pub mod config;
pub mod error;
mod manager;
mod operation;
mod pairing;
pub mod store;
mod types;

pub use config::OrchestratorConfig;
pub use error::{ConnectionError, PairingFailure};
pub use manager::Orchestrator;
pub use operation::{Operation, OperationClass, OperationOutput};
pub use pairing::PairingSession;
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore, StoreError};
pub use types::{
    ConnectionEvent, ConnectionState, Credential, Device, PeerNotification, PreferredTransport,
    ReconnectConfig, ReconnectOutcome, StateEvent,
};
