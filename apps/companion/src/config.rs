//! Companion configuration.
//!
//! Stored as TOML under the user configuration directory:
//! - Linux: `~/.config/glasslink/companion.toml`
//! - Windows: `%APPDATA%/glasslink/companion.toml`

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use glasslink_orchestrator::OrchestratorConfig;

/// Companion configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Credential file (default: next to this file).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_path: Option<PathBuf>,

    /// Reconnect attempts before giving up (0 = keep trying).
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

fn default_reconnect_attempts() -> u32 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credential_path: None,
            reconnect_attempts: default_reconnect_attempts(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl Config {
    /// Loads the configuration at `path`, creating it with defaults if missing.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Default configuration file path.
pub fn default_path() -> anyhow::Result<PathBuf> {
    glasslink_orchestrator::store::config_dir()
        .map(|dir| dir.join("glasslink").join("companion.toml"))
        .context("cannot determine the user configuration directory")
}
