//! Wire vocabulary shared by the GlassLink control and data links.
//!
//! Names every GATT characteristic exposed by the glasses, every REST path
//! served over the local network, and the JSON entities exchanged on both.
//! All decoding goes through [`decode_json`] so malformed payloads are
//! rejected at the boundary.

pub mod characteristic;
pub mod commands;
pub mod constants;
pub mod error;
pub mod types;

pub use characteristic::{Characteristic, Service};
pub use commands::{CameraCommand, Setting, SettingValue, SystemCommand};
pub use error::DecodeError;
pub use types::*;

/// Decodes a JSON payload and validates it.
pub fn decode_json<T>(bytes: &[u8]) -> Result<T, DecodeError>
where
    T: serde::de::DeserializeOwned + Validate,
{
    let value: T = serde_json::from_slice(bytes)?;
    value.validate()?;
    Ok(value)
}

/// Boundary validation for decoded entities.
pub trait Validate {
    fn validate(&self) -> Result<(), DecodeError>;
}

impl<T: Validate> Validate for Vec<T> {
    fn validate(&self) -> Result<(), DecodeError> {
        self.iter().try_for_each(Validate::validate)
    }
}

/// Returns `true` if `code` is a well-formed pairing code.
pub fn is_valid_pairing_code(code: &str) -> bool {
    code.len() == constants::PAIRING_CODE_LEN && code.bytes().all(|b| b.is_ascii_digit())
}
