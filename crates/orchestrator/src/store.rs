//! Credential persistence.
//!
//! The store is a plain key-value contract; [`Credential`] maps itself to
//! and from entries.
//!
//! [`Credential`]: crate::types::Credential

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

/// Persisted entries, keyed by name.
pub type Entries = BTreeMap<String, String>;

/// Errors from credential stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Key-value storage for the credential.
pub trait CredentialStore: Send + Sync {
    fn read_all(&self) -> Result<Entries, StoreError>;

    /// Replaces every entry at once.
    fn write_all(&self, entries: &Entries) -> Result<(), StoreError>;

    fn clear(&self) -> Result<(), StoreError>;
}

/// JSON file store, replaced atomically on every write.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store at [`default_credential_path`].
    pub fn at_default_path() -> Option<Self> {
        default_credential_path().map(Self::new)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn read_all(&self) -> Result<Entries, StoreError> {
        if !self.path.exists() {
            return Ok(Entries::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        let entries: Entries = serde_json::from_str(&data)?;
        debug!(path = %self.path.display(), "loaded {} credential entries", entries.len());
        Ok(entries)
    }

    fn write_all(&self, entries: &Entries) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(entries)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }
        std::fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), "persisted {} credential entries", entries.len());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<Entries>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `entries`.
    pub fn with_entries(entries: Entries) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn read_all(&self) -> Result<Entries, StoreError> {
        Ok(self.lock().clone())
    }

    fn write_all(&self, entries: &Entries) -> Result<(), StoreError> {
        *self.lock() = entries.clone();
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.lock().clear();
        Ok(())
    }
}

/// Returns the default credential file path.
pub fn default_credential_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("glasslink").join("credential.json"))
}

/// Returns the platform-specific config directory.
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}
