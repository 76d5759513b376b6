//! Protocol constants shared by both links.

use std::time::Duration;

use uuid::Uuid;

/// Builds a GlassLink 128-bit UUID from its 32-bit short id.
///
/// All custom services and characteristics share the
/// `xxxxxxxx-B5A3-F393-E0A9-E50E24DCCA9E` base.
pub const fn glasslink_uuid(short: u32) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_B5A3_F393_E0A9_E50E24DCCA9E)
}

/// Builds a Bluetooth SIG UUID from its 16-bit assigned number.
pub const fn sig_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_00805F9B34FB)
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

pub const AUTHENTICATION_SERVICE: Uuid = glasslink_uuid(0x6E40_0001);
pub const SETTINGS_SERVICE: Uuid = glasslink_uuid(0x6E40_0002);
pub const QUICK_ACTIONS_SERVICE: Uuid = glasslink_uuid(0x6E40_0003);
pub const DATA_SYNC_SERVICE: Uuid = glasslink_uuid(0x6E40_0004);
pub const NETWORK_CONFIG_SERVICE: Uuid = glasslink_uuid(0x6E40_0005);
pub const BATTERY_SERVICE: Uuid = sig_uuid(0x180F);

// ---------------------------------------------------------------------------
// Pairing
// ---------------------------------------------------------------------------

/// Number of digits in a pairing code.
pub const PAIRING_CODE_LEN: usize = 6;

/// Invalid codes tolerated before a pairing session is abandoned.
pub const DEFAULT_PAIRING_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// Data sync
// ---------------------------------------------------------------------------

/// Largest JSON payload carried by a data-sync characteristic.
pub const MAX_SYNC_PAYLOAD: usize = 512;

/// Number of most recent notes/todos mirrored on the control link.
pub const SYNC_RECENT_ITEMS: usize = 5;

/// `strftime` layout of [`Note::date`](crate::Note::date), e.g. `2025-01-15 09:12 AM`.
pub const NOTE_DATE_FORMAT: &str = "%Y-%m-%d %I:%M %p";

// ---------------------------------------------------------------------------
// Data link
// ---------------------------------------------------------------------------

/// Port the glasses serve the REST API on.
pub const DEFAULT_API_PORT: u16 = 5000;

/// Path prefix of every REST endpoint.
pub const API_PREFIX: &str = "/api";

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Address reported by the glasses when they have no network.
pub const UNASSIGNED_ADDRESS: &str = "0.0.0.0";

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

/// Window during which a control-link scan yields peers.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout of a single control-link operation.
pub const DEFAULT_CONTROL_OP_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout of a single data-link request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// REST paths, relative to [`API_PREFIX`].
pub mod paths {
    pub const CONNECTION_TEST: &str = "/connection/test";
    pub const STATUS: &str = "/status";
    pub const SETTINGS: &str = "/settings";
    pub const SETTINGS_PERSONALITY: &str = "/settings/personality";
    pub const SETTINGS_NAME: &str = "/settings/name";
    pub const SETTINGS_WAKE_WORD: &str = "/settings/wake-word";
    pub const SETTINGS_VOICE: &str = "/settings/voice";
    pub const CAMERA_SNAPSHOT: &str = "/camera/snapshot";
    pub const CAMERA_CAPTURE: &str = "/camera/capture";
    pub const CAMERA_RECORD: &str = "/camera/record";
    pub const PHOTOS: &str = "/photos";
    pub const VIDEOS: &str = "/videos";
    pub const NOTES: &str = "/notes";
    pub const TODOS: &str = "/todos";
    pub const CONVERSATION: &str = "/conversation";
    pub const CONTROL_SLEEP: &str = "/control/sleep";
    pub const CONTROL_WAKE: &str = "/control/wake";

    /// Path of a single photo.
    pub fn photo(id: &str) -> String {
        format!("{PHOTOS}/{id}")
    }

    /// Path of a single video.
    pub fn video(id: &str) -> String {
        format!("{VIDEOS}/{id}")
    }
}
