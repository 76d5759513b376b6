//! JSON entities exchanged with the glasses.
//!
//! Every entity derives serde with the field names used on the wire and
//! implements [`Validate`] so out-of-range values are rejected on decode.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::constants::UNASSIGNED_ADDRESS;
use crate::error::DecodeError;
use crate::Validate;

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Assistant personality preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Personality {
    Friendly,
    Professional,
    Witty,
    Jarvis,
    Casual,
}

impl Personality {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Friendly => "friendly",
            Self::Professional => "professional",
            Self::Witty => "witty",
            Self::Jarvis => "jarvis",
            Self::Casual => "casual",
        }
    }
}

impl FromStr for Personality {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "friendly" => Ok(Self::Friendly),
            "professional" => Ok(Self::Professional),
            "witty" => Ok(Self::Witty),
            "jarvis" => Ok(Self::Jarvis),
            "casual" => Ok(Self::Casual),
            other => Err(DecodeError::invalid("personality", format!("unknown preset {other:?}"))),
        }
    }
}

impl fmt::Display for Personality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Power mode reported by the glasses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusMode {
    Sleep,
    Active,
}

impl FromStr for StatusMode {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "sleep" => Ok(Self::Sleep),
            "active" => Ok(Self::Active),
            other => Err(DecodeError::invalid("mode", format!("unknown mode {other:?}"))),
        }
    }
}

/// Network association state pushed over the control link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl NetworkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
    }

    pub fn from_bytes(value: &[u8]) -> Result<Self, DecodeError> {
        String::from_utf8(value.to_vec())?.parse()
    }
}

impl FromStr for NetworkStatus {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "disconnected" => Ok(Self::Disconnected),
            "connecting" => Ok(Self::Connecting),
            "connected" => Ok(Self::Connected),
            "failed" => Ok(Self::Failed),
            other => Err(DecodeError::invalid("wifi status", format!("unknown status {other:?}"))),
        }
    }
}

/// Pairing state byte exposed by the authentication service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PairingStatus {
    Unpaired = 0,
    Pairing = 1,
    Paired = 2,
}

impl PairingStatus {
    pub fn from_bytes(value: &[u8]) -> Result<Self, DecodeError> {
        match value {
            [0] => Ok(Self::Unpaired),
            [1] => Ok(Self::Pairing),
            [2] => Ok(Self::Paired),
            [b] => Err(DecodeError::invalid("pairing status", format!("unknown byte {b}"))),
            _ => Err(DecodeError::invalid(
                "pairing status",
                format!("expected 1 byte, got {}", value.len()),
            )),
        }
    }
}

/// Todo priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TodoPriority {
    High,
    #[default]
    Medium,
    Low,
}

// ---------------------------------------------------------------------------
// Status and settings
// ---------------------------------------------------------------------------

/// Response of `GET /status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub mode: StatusMode,
    pub personality: Personality,
    pub name: String,
    pub battery: u8,
    pub connected: bool,
    pub timestamp: NaiveDateTime,
}

impl Validate for Status {
    fn validate(&self) -> Result<(), DecodeError> {
        if self.battery > 100 {
            return Err(DecodeError::invalid(
                "battery",
                format!("{} is above 100", self.battery),
            ));
        }
        Ok(())
    }
}

/// Wake phrase configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WakeWordConfig {
    pub keyword: String,
    pub sensitivity: f64,
}

impl Validate for WakeWordConfig {
    fn validate(&self) -> Result<(), DecodeError> {
        if self.keyword.trim().is_empty() {
            return Err(DecodeError::invalid("keyword", "empty"));
        }
        check_unit("sensitivity", self.sensitivity)
    }
}

/// Text-to-speech configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub engine: String,
    pub rate: u32,
    pub volume: f64,
}

impl Validate for VoiceSettings {
    fn validate(&self) -> Result<(), DecodeError> {
        if self.engine.is_empty() {
            return Err(DecodeError::invalid("engine", "empty"));
        }
        check_unit("volume", self.volume)
    }
}

/// Camera resolution; either dimension may be unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Camera configuration, reported only over the data link.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraSettings {
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default)]
    pub rotation: i32,
    #[serde(default)]
    pub flip_horizontal: bool,
    #[serde(default)]
    pub flip_vertical: bool,
}

/// Response of `GET /settings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub personality: Personality,
    pub name: String,
    pub wake_word: WakeWordConfig,
    pub voice: VoiceSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera: Option<CameraSettings>,
}

impl Validate for Settings {
    fn validate(&self) -> Result<(), DecodeError> {
        self.wake_word.validate()?;
        self.voice.validate()
    }
}

fn check_unit(field: &'static str, v: f64) -> Result<(), DecodeError> {
    if (0.0..=1.0).contains(&v) {
        Ok(())
    } else {
        Err(DecodeError::invalid(field, format!("{v} is outside 0..=1")))
    }
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

/// Response of `POST /camera/capture` and `POST /camera/record`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl Validate for CaptureResult {
    fn validate(&self) -> Result<(), DecodeError> {
        if self.success && self.path.is_none() {
            return Err(DecodeError::invalid("path", "missing on successful capture"));
        }
        Ok(())
    }
}

/// Entry of `GET /photos` or `GET /videos`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,
    pub filename: String,
    pub size: u64,
    pub timestamp: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl Validate for MediaItem {
    fn validate(&self) -> Result<(), DecodeError> {
        if self.id.is_empty() || self.id.contains('/') {
            return Err(DecodeError::invalid("id", format!("{:?} is not a media id", self.id)));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Productivity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: u32,
    pub text: String,
    pub timestamp: NaiveDateTime,
    pub date: String,
}

impl Validate for Note {
    fn validate(&self) -> Result<(), DecodeError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    pub id: u32,
    pub task: String,
    #[serde(default)]
    pub priority: TodoPriority,
    pub created: NaiveDateTime,
    #[serde(default)]
    pub completed: bool,
}

impl Validate for Todo {
    fn validate(&self) -> Result<(), DecodeError> {
        if self.task.is_empty() {
            return Err(DecodeError::invalid("task", "empty"));
        }
        Ok(())
    }
}

/// One turn of the assistant conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Validate for ConversationMessage {
    fn validate(&self) -> Result<(), DecodeError> {
        if self.role.is_empty() {
            return Err(DecodeError::invalid("role", "empty"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Generic responses
// ---------------------------------------------------------------------------

/// Acknowledgement returned by mutating endpoints.
///
/// Endpoints echo extra fields (e.g. the new personality); they are kept
/// verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Validate for Ack {
    fn validate(&self) -> Result<(), DecodeError> {
        Ok(())
    }
}

/// Response of `GET /connection/test`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub status: String,
    #[serde(default)]
    pub message: String,
}

impl Validate for ProbeResponse {
    fn validate(&self) -> Result<(), DecodeError> {
        if self.status != "ok" {
            return Err(DecodeError::invalid("status", format!("probe reported {:?}", self.status)));
        }
        Ok(())
    }
}

/// Network addressing read from the network-config service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub ip: String,
    #[serde(default)]
    pub subnet: String,
    #[serde(default)]
    pub gateway: String,
}

impl NetworkInfo {
    /// Returns the routable address, or `None` when the glasses are offline.
    pub fn address(&self) -> Option<IpAddr> {
        if self.ip.is_empty() || self.ip == UNASSIGNED_ADDRESS {
            return None;
        }
        self.ip.parse().ok()
    }
}

impl Validate for NetworkInfo {
    fn validate(&self) -> Result<(), DecodeError> {
        if !self.ip.is_empty() && self.ip.parse::<IpAddr>().is_err() {
            return Err(DecodeError::invalid("ip", format!("{:?} is not an address", self.ip)));
        }
        Ok(())
    }
}

/// Result of a quick action, read from the action-response characteristic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Validate for ActionResponse {
    fn validate(&self) -> Result<(), DecodeError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordRequest {
    pub duration: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNote {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTodo {
    pub task: String,
    #[serde(default)]
    pub priority: TodoPriority,
}
