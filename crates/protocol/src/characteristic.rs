//! Named GATT characteristics.

use uuid::Uuid;

use crate::constants::{self, glasslink_uuid, sig_uuid};

/// Logical service groups exposed by the glasses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Authentication,
    Settings,
    QuickActions,
    DataSync,
    NetworkConfig,
    Battery,
}

impl Service {
    pub const fn uuid(self) -> Uuid {
        match self {
            Self::Authentication => constants::AUTHENTICATION_SERVICE,
            Self::Settings => constants::SETTINGS_SERVICE,
            Self::QuickActions => constants::QUICK_ACTIONS_SERVICE,
            Self::DataSync => constants::DATA_SYNC_SERVICE,
            Self::NetworkConfig => constants::NETWORK_CONFIG_SERVICE,
            Self::Battery => constants::BATTERY_SERVICE,
        }
    }
}

/// A characteristic addressed by name rather than by raw UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    // Authentication
    ApiKey,
    PairingCode,
    PairingStatus,
    // Settings
    Personality,
    AssistantName,
    WakeWord,
    Voice,
    StatusMode,
    // Quick actions
    CameraControl,
    SystemControl,
    ActionResponse,
    // Data sync
    Notes,
    Todos,
    StatusMessage,
    // Network config
    WifiSsid,
    WifiPassword,
    WifiStatus,
    NetworkInfo,
    // Battery
    BatteryLevel,
}

impl Characteristic {
    pub const ALL: [Characteristic; 19] = [
        Self::ApiKey,
        Self::PairingCode,
        Self::PairingStatus,
        Self::Personality,
        Self::AssistantName,
        Self::WakeWord,
        Self::Voice,
        Self::StatusMode,
        Self::CameraControl,
        Self::SystemControl,
        Self::ActionResponse,
        Self::Notes,
        Self::Todos,
        Self::StatusMessage,
        Self::WifiSsid,
        Self::WifiPassword,
        Self::WifiStatus,
        Self::NetworkInfo,
        Self::BatteryLevel,
    ];

    pub const fn uuid(self) -> Uuid {
        match self {
            Self::ApiKey => glasslink_uuid(0x6E40_0101),
            Self::PairingCode => glasslink_uuid(0x6E40_0102),
            Self::PairingStatus => glasslink_uuid(0x6E40_0103),
            Self::Personality => glasslink_uuid(0x6E40_0201),
            Self::AssistantName => glasslink_uuid(0x6E40_0202),
            Self::WakeWord => glasslink_uuid(0x6E40_0203),
            Self::Voice => glasslink_uuid(0x6E40_0204),
            Self::StatusMode => glasslink_uuid(0x6E40_0205),
            Self::CameraControl => glasslink_uuid(0x6E40_0301),
            Self::SystemControl => glasslink_uuid(0x6E40_0302),
            Self::ActionResponse => glasslink_uuid(0x6E40_0303),
            Self::Notes => glasslink_uuid(0x6E40_0401),
            Self::Todos => glasslink_uuid(0x6E40_0402),
            Self::StatusMessage => glasslink_uuid(0x6E40_0403),
            Self::WifiSsid => glasslink_uuid(0x6E40_0501),
            Self::WifiPassword => glasslink_uuid(0x6E40_0502),
            Self::WifiStatus => glasslink_uuid(0x6E40_0503),
            Self::NetworkInfo => glasslink_uuid(0x6E40_0504),
            Self::BatteryLevel => sig_uuid(0x2A19),
        }
    }

    pub const fn service(self) -> Service {
        match self {
            Self::ApiKey | Self::PairingCode | Self::PairingStatus => Service::Authentication,
            Self::Personality
            | Self::AssistantName
            | Self::WakeWord
            | Self::Voice
            | Self::StatusMode => Service::Settings,
            Self::CameraControl | Self::SystemControl | Self::ActionResponse => {
                Service::QuickActions
            }
            Self::Notes | Self::Todos | Self::StatusMessage => Service::DataSync,
            Self::WifiSsid | Self::WifiPassword | Self::WifiStatus | Self::NetworkInfo => {
                Service::NetworkConfig
            }
            Self::BatteryLevel => Service::Battery,
        }
    }

    /// Whether the glasses push value changes for this characteristic.
    pub const fn notifies(self) -> bool {
        matches!(
            self,
            Self::PairingCode
                | Self::StatusMode
                | Self::ActionResponse
                | Self::Notes
                | Self::Todos
                | Self::StatusMessage
                | Self::WifiStatus
                | Self::BatteryLevel
        )
    }

    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.uuid() == uuid)
    }
}
