//! Console settings

use std::path::{Path, PathBuf};
use std::time::Duration;

use hub_session::SessionConfig;
use serde::{Deserialize, Serialize};

/// Console settings, persisted as JSON
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Upper bound on a single write in milliseconds
    pub write_timeout_ms: u64,
    /// Poll for plugged and unplugged devices
    pub hotplug: bool,
    /// Hotplug poll interval in milliseconds
    pub hotplug_poll_ms: u64,
    /// Appended to every line sent to the device
    pub line_ending: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            write_timeout_ms: 1000,
            hotplug: true,
            hotplug_poll_ms: 500,
            line_ending: "\r\n".to_string(),
        }
    }
}

impl Settings {
    /// Get the XDG config directory for hublink
    /// Uses $XDG_CONFIG_HOME/hublink, falls back to ~/.config/hublink
    fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("hublink"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("hublink"))
    }

    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load settings from disk, falling back to defaults
    pub fn load() -> Self {
        Self::settings_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<(), String> {
        let path =
            Self::settings_path().ok_or_else(|| "Could not determine settings path".to_string())?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create settings directory: {}", e))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        std::fs::write(path, json).map_err(|e| format!("Failed to write settings: {}", e))?;

        Ok(())
    }

    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            write_timeout_ms: self.write_timeout_ms,
            hotplug_poll_ms: self.hotplug_poll_ms,
            ..Default::default()
        }
    }

    pub fn hotplug_interval(&self) -> Duration {
        self.to_session_config().hotplug_interval()
    }
}
