//! Short-range control link to the glasses.
//!
//! Discrete, small-payload request/response operations addressed by named
//! characteristic. The radio itself sits behind [`GattBackend`]; enable
//! the `btleplug` feature for a host Bluetooth implementation.

pub mod backend;
#[cfg(feature = "btleplug")]
pub mod bluetooth;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;
mod link;
pub mod types;

pub use backend::{GattBackend, GattConnection, NotificationStream, PeerStream};
#[cfg(feature = "btleplug")]
pub use bluetooth::BtleplugBackend;
pub use error::{BackendError, ControlLinkError};
pub use link::ControlLink;
pub use types::{ControlEvent, GattNotification, PeerDescriptor};
