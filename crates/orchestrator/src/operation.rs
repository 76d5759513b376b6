//! Caller-facing operations and their results.

use glasslink_protocol::{
    Ack, ActionResponse, CaptureResult, ConversationMessage, MediaItem, Note, Setting,
    SettingValue, Settings, Status, SystemCommand, Todo, TodoPriority,
};

/// Bandwidth needs of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationClass {
    /// Small request/response; either link will do.
    Control,
    /// Bulk or list transfer; data link only.
    Data,
}

/// Something a caller wants done on the glasses.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    ReadSetting(Setting),
    WriteSetting(SettingValue),
    CapturePhoto,
    RecordVideo { seconds: u32 },
    System(SystemCommand),
    RecentNotes,
    RecentTodos,
    AddNote { text: String },
    AddTodo { task: String, priority: TodoPriority },

    GetStatus,
    GetSettings,
    /// JPEG taken on demand.
    Snapshot,
    ListPhotos,
    ListVideos,
    DownloadPhoto { id: String },
    DownloadVideo { id: String },
    DeletePhoto { id: String },
    DeleteVideo { id: String },
    GetConversation,
    ClearConversation,
}

impl Operation {
    pub const fn class(&self) -> OperationClass {
        match self {
            Self::ReadSetting(_)
            | Self::WriteSetting(_)
            | Self::CapturePhoto
            | Self::RecordVideo { .. }
            | Self::System(_)
            | Self::RecentNotes
            | Self::RecentTodos
            | Self::AddNote { .. }
            | Self::AddTodo { .. } => OperationClass::Control,

            Self::GetStatus
            | Self::GetSettings
            | Self::Snapshot
            | Self::ListPhotos
            | Self::ListVideos
            | Self::DownloadPhoto { .. }
            | Self::DownloadVideo { .. }
            | Self::DeletePhoto { .. }
            | Self::DeleteVideo { .. }
            | Self::GetConversation
            | Self::ClearConversation => OperationClass::Data,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadSetting(_) => "read_setting",
            Self::WriteSetting(_) => "write_setting",
            Self::CapturePhoto => "capture_photo",
            Self::RecordVideo { .. } => "record_video",
            Self::System(_) => "system",
            Self::RecentNotes => "recent_notes",
            Self::RecentTodos => "recent_todos",
            Self::AddNote { .. } => "add_note",
            Self::AddTodo { .. } => "add_todo",
            Self::GetStatus => "get_status",
            Self::GetSettings => "get_settings",
            Self::Snapshot => "snapshot",
            Self::ListPhotos => "list_photos",
            Self::ListVideos => "list_videos",
            Self::DownloadPhoto { .. } => "download_photo",
            Self::DownloadVideo { .. } => "download_video",
            Self::DeletePhoto { .. } => "delete_photo",
            Self::DeleteVideo { .. } => "delete_video",
            Self::GetConversation => "get_conversation",
            Self::ClearConversation => "clear_conversation",
        }
    }
}

/// Result of an executed operation.
///
/// The shape depends on the link that carried it: quick actions answer
/// with an [`ActionResponse`] over the control link and a
/// [`CaptureResult`] or [`Ack`] over the data link.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutput {
    Done,
    Ack(Ack),
    Action(ActionResponse),
    Capture(CaptureResult),
    Setting(SettingValue),
    Settings(Settings),
    Status(Status),
    Notes(Vec<Note>),
    Todos(Vec<Todo>),
    Media(Vec<MediaItem>),
    Bytes(Vec<u8>),
    Conversation(Vec<ConversationMessage>),
}
