//! Quick-action commands and setting values.
//!
//! Commands are short UTF-8 strings written to the quick-action
//! characteristics. Settings are plain text (personality, name) or small
//! JSON objects (wake word, voice) on the control link, and JSON bodies on
//! the data link.

use std::fmt;
use std::str::FromStr;

use crate::characteristic::Characteristic;
use crate::constants::paths;
use crate::error::DecodeError;
use crate::types::{Personality, VoiceSettings, WakeWordConfig};
use crate::{Validate, decode_json};

/// Camera command written to the camera-control characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraCommand {
    Photo,
    Video { seconds: u32 },
}

impl fmt::Display for CameraCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Photo => f.write_str("photo"),
            Self::Video { seconds } => write!(f, "video:{seconds}"),
        }
    }
}

impl FromStr for CameraCommand {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "photo" {
            return Ok(Self::Photo);
        }
        let seconds = s
            .strip_prefix("video:")
            .and_then(|n| n.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .ok_or_else(|| DecodeError::invalid("camera command", format!("{s:?}")))?;
        Ok(Self::Video { seconds })
    }
}

/// System command written to the system-control characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemCommand {
    Sleep,
    Wake,
    Restart,
}

impl SystemCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sleep => "sleep",
            Self::Wake => "wake",
            Self::Restart => "restart",
        }
    }

    /// REST endpoint for this command, if the data link exposes one.
    pub fn rest_path(self) -> Option<&'static str> {
        match self {
            Self::Sleep => Some(paths::CONTROL_SLEEP),
            Self::Wake => Some(paths::CONTROL_WAKE),
            Self::Restart => None,
        }
    }
}

impl fmt::Display for SystemCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SystemCommand {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sleep" => Ok(Self::Sleep),
            "wake" => Ok(Self::Wake),
            "restart" => Ok(Self::Restart),
            other => Err(DecodeError::invalid("system command", format!("{other:?}"))),
        }
    }
}

/// A setting mirrored on the glasses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Setting {
    Personality,
    AssistantName,
    WakeWord,
    Voice,
}

impl Setting {
    pub const fn characteristic(self) -> Characteristic {
        match self {
            Self::Personality => Characteristic::Personality,
            Self::AssistantName => Characteristic::AssistantName,
            Self::WakeWord => Characteristic::WakeWord,
            Self::Voice => Characteristic::Voice,
        }
    }

    /// `PUT` endpoint updating this setting.
    pub const fn rest_path(self) -> &'static str {
        match self {
            Self::Personality => paths::SETTINGS_PERSONALITY,
            Self::AssistantName => paths::SETTINGS_NAME,
            Self::WakeWord => paths::SETTINGS_WAKE_WORD,
            Self::Voice => paths::SETTINGS_VOICE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Personality => "personality",
            Self::AssistantName => "name",
            Self::WakeWord => "wake_word",
            Self::Voice => "voice",
        }
    }
}

impl FromStr for Setting {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "personality" => Ok(Self::Personality),
            "name" => Ok(Self::AssistantName),
            "wake_word" | "wake-word" => Ok(Self::WakeWord),
            "voice" => Ok(Self::Voice),
            other => Err(DecodeError::invalid("setting", format!("{other:?}"))),
        }
    }
}

/// A typed setting value.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Personality(Personality),
    AssistantName(String),
    WakeWord(WakeWordConfig),
    Voice(VoiceSettings),
}

impl SettingValue {
    pub fn setting(&self) -> Setting {
        match self {
            Self::Personality(_) => Setting::Personality,
            Self::AssistantName(_) => Setting::AssistantName,
            Self::WakeWord(_) => Setting::WakeWord,
            Self::Voice(_) => Setting::Voice,
        }
    }

    /// Encodes the value as written to its characteristic.
    pub fn to_control_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        Ok(match self {
            Self::Personality(p) => p.as_str().as_bytes().to_vec(),
            Self::AssistantName(name) => name.as_bytes().to_vec(),
            Self::WakeWord(cfg) => serde_json::to_vec(cfg)?,
            Self::Voice(voice) => serde_json::to_vec(voice)?,
        })
    }

    /// Decodes a characteristic value read for `setting`.
    pub fn from_control_bytes(setting: Setting, value: &[u8]) -> Result<Self, DecodeError> {
        match setting {
            Setting::Personality => {
                let text = String::from_utf8(value.to_vec())?;
                Ok(Self::Personality(text.trim().parse()?))
            }
            Setting::AssistantName => {
                let name = String::from_utf8(value.to_vec())?;
                if name.trim().is_empty() {
                    return Err(DecodeError::invalid("name", "empty"));
                }
                Ok(Self::AssistantName(name))
            }
            Setting::WakeWord => Ok(Self::WakeWord(decode_json(value)?)),
            Setting::Voice => Ok(Self::Voice(decode_json(value)?)),
        }
    }

    /// JSON body for the setting's `PUT` endpoint.
    pub fn to_rest_body(&self) -> serde_json::Value {
        match self {
            Self::Personality(p) => serde_json::json!({ "personality": p }),
            Self::AssistantName(name) => serde_json::json!({ "name": name }),
            Self::WakeWord(cfg) => serde_json::json!({
                "keyword": cfg.keyword,
                "sensitivity": cfg.sensitivity,
            }),
            Self::Voice(voice) => serde_json::json!({
                "engine": voice.engine,
                "rate": voice.rate,
                "volume": voice.volume,
            }),
        }
    }
}

impl Validate for SettingValue {
    fn validate(&self) -> Result<(), DecodeError> {
        match self {
            Self::Personality(_) => Ok(()),
            Self::AssistantName(name) if name.trim().is_empty() => {
                Err(DecodeError::invalid("name", "empty"))
            }
            Self::AssistantName(_) => Ok(()),
            Self::WakeWord(cfg) => cfg.validate(),
            Self::Voice(voice) => voice.validate(),
        }
    }
}
