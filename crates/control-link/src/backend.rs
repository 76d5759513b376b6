//! Radio seam.
//!
//! [`ControlLink`](crate::ControlLink) talks to the peer only through these
//! traits, so the radio stack can be swapped (btleplug, a platform bridge,
//! or an in-memory fake in tests).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::Stream;
use uuid::Uuid;

use crate::error::BackendError;
use crate::types::{GattNotification, PeerDescriptor};

/// Boxed future returned by backend operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'a>>;

/// Advertisements seen while scanning. May repeat peers.
pub type PeerStream = Pin<Box<dyn Stream<Item = PeerDescriptor> + Send>>;

/// Values pushed by a connected peer. Ends when the peer disconnects.
pub type NotificationStream = Pin<Box<dyn Stream<Item = GattNotification> + Send>>;

/// A central-role radio able to scan for and connect to peers.
pub trait GattBackend: Send + Sync {
    /// Starts scanning. Scanning stops when the returned stream is dropped.
    fn scan(&self) -> BackendFuture<'_, PeerStream>;

    /// Connects to a peer and resolves its characteristics.
    fn connect<'a>(&'a self, peer: &'a PeerDescriptor)
    -> BackendFuture<'a, Arc<dyn GattConnection>>;
}

/// An established GATT connection.
pub trait GattConnection: Send + Sync {
    fn read(&self, uuid: Uuid) -> BackendFuture<'_, Vec<u8>>;

    fn write<'a>(&'a self, uuid: Uuid, value: &'a [u8]) -> BackendFuture<'a, ()>;

    /// Subscribes to every notifying characteristic.
    fn notifications(&self) -> BackendFuture<'_, NotificationStream>;

    fn disconnect(&self) -> BackendFuture<'_, ()>;
}
