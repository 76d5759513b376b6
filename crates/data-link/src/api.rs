//! Typed calls for every REST endpoint of the glasses.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use glasslink_protocol::constants::paths;
use glasslink_protocol::{
    Ack, CaptureResult, ConversationMessage, DecodeError, MediaItem, NewNote, NewTodo, Note,
    RecordRequest, SettingValue, Settings, Status, SystemCommand, Todo, TodoPriority, Validate,
    decode_json,
};

use crate::error::DataLinkError;
use crate::link::DataLink;

/// Photo or video collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    fn collection(self) -> &'static str {
        match self {
            Self::Photo => paths::PHOTOS,
            Self::Video => paths::VIDEOS,
        }
    }

    fn item(self, id: &str) -> Result<String, DataLinkError> {
        if id.is_empty() || id.contains(['/', '?', '#']) {
            return Err(DecodeError::invalid("media id", format!("{id:?}")).into());
        }
        Ok(match self {
            Self::Photo => paths::photo(id),
            Self::Video => paths::video(id),
        })
    }
}

/// Typed wrapper over a [`DataLink`].
#[derive(Clone)]
pub struct DeviceApi {
    link: Arc<dyn DataLink>,
}

impl DeviceApi {
    pub fn new(link: Arc<dyn DataLink>) -> Self {
        Self { link }
    }

    async fn get_json<T: DeserializeOwned + Validate>(&self, path: &str) -> Result<T, DataLinkError> {
        let body = self.link.get(path).await?;
        Ok(decode_json(&body)?)
    }

    pub async fn status(&self) -> Result<Status, DataLinkError> {
        self.get_json(paths::STATUS).await
    }

    pub async fn settings(&self) -> Result<Settings, DataLinkError> {
        self.get_json(paths::SETTINGS).await
    }

    pub async fn update_setting(&self, value: &SettingValue) -> Result<Ack, DataLinkError> {
        value.validate()?;
        let path = value.setting().rest_path();
        let body = self.link.put(path, value.to_rest_body()).await?;
        Ok(decode_json(&body)?)
    }

    /// Takes a photo and returns the JPEG bytes.
    pub async fn snapshot(&self) -> Result<Vec<u8>, DataLinkError> {
        self.link.get(paths::CAMERA_SNAPSHOT).await
    }

    pub async fn capture_photo(&self) -> Result<CaptureResult, DataLinkError> {
        let body = self.link.post(paths::CAMERA_CAPTURE, None).await?;
        Ok(decode_json(&body)?)
    }

    pub async fn record_video(&self, seconds: u32) -> Result<CaptureResult, DataLinkError> {
        let request = serde_json::to_value(RecordRequest { duration: seconds }).map_err(DecodeError::from)?;
        let body = self.link.post(paths::CAMERA_RECORD, Some(request)).await?;
        Ok(decode_json(&body)?)
    }

    pub async fn list_media(&self, kind: MediaKind) -> Result<Vec<MediaItem>, DataLinkError> {
        self.get_json(kind.collection()).await
    }

    /// Downloads the raw bytes of a photo or video.
    pub async fn download_media(&self, kind: MediaKind, id: &str) -> Result<Vec<u8>, DataLinkError> {
        let path = kind.item(id)?;
        self.link.get(&path).await
    }

    pub async fn delete_media(&self, kind: MediaKind, id: &str) -> Result<Ack, DataLinkError> {
        let path = kind.item(id)?;
        let body = self.link.delete(&path).await?;
        Ok(decode_json(&body)?)
    }

    pub async fn notes(&self) -> Result<Vec<Note>, DataLinkError> {
        self.get_json(paths::NOTES).await
    }

    pub async fn add_note(&self, text: &str) -> Result<Ack, DataLinkError> {
        let request = serde_json::to_value(NewNote {
            content: text.to_string(),
        })
        .map_err(DecodeError::from)?;
        let body = self.link.post(paths::NOTES, Some(request)).await?;
        Ok(decode_json(&body)?)
    }

    pub async fn todos(&self) -> Result<Vec<Todo>, DataLinkError> {
        self.get_json(paths::TODOS).await
    }

    pub async fn add_todo(&self, task: &str, priority: TodoPriority) -> Result<Ack, DataLinkError> {
        let request = serde_json::to_value(NewTodo {
            task: task.to_string(),
            priority,
        })
        .map_err(DecodeError::from)?;
        let body = self.link.post(paths::TODOS, Some(request)).await?;
        Ok(decode_json(&body)?)
    }

    pub async fn conversation(&self) -> Result<Vec<ConversationMessage>, DataLinkError> {
        self.get_json(paths::CONVERSATION).await
    }

    pub async fn clear_conversation(&self) -> Result<Ack, DataLinkError> {
        let body = self.link.delete(paths::CONVERSATION).await?;
        Ok(decode_json(&body)?)
    }

    /// Sends a system command. Restart has no REST endpoint.
    pub async fn system(&self, command: SystemCommand) -> Result<Ack, DataLinkError> {
        let path = command
            .rest_path()
            .ok_or(DataLinkError::Unsupported(command.as_str()))?;
        let body = self.link.post(path, None).await?;
        Ok(decode_json(&body)?)
    }
}
