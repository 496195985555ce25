//! Persisted user defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::target::TargetKind;

/// Defaults remembered between runs.
///
/// The password is never stored; it comes from the command line or the
/// environment on every run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// RomM server base URL
    pub server_url: Option<String>,
    pub username: Option<String>,
    pub target: TargetKind,
    /// Platform slugs to sync; empty means all
    pub platforms: Vec<String>,
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("romm-sync").join("config.json"))
    }

    /// Load config from disk, falling back to defaults if missing or unreadable
    pub fn load() -> Self {
        Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    /// Load config from a specific file
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save config to disk
    pub fn save(&self) -> Result<Option<PathBuf>> {
        match Self::config_path() {
            Some(path) => {
                self.save_to(&path)?;
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }

    /// Save config to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
