use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// What to play on the next start. Saved between runs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub project: PathBuf,
    #[serde(default)]
    pub playlist: Option<String>,
    #[serde(default)]
    pub fps: Option<u32>,
}

impl RuntimeConfig {
    /// Missing or unreadable files count as "nothing saved".
    pub fn load(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        match Self::read(path) {
            Ok(config) => {
                info!("[CONFIG] Loaded runtime config from {:?}", path);
                Some(config)
            }
            Err(e) => {
                warn!("[CONFIG] Ignoring runtime config {:?}: {:#}", path, e);
                None
            }
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        serde_json::from_str(&json).context("Failed to parse runtime config")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        ensure_parent_dir(path)?;
        let json = serde_json::to_string_pretty(self).context("Failed to serialize runtime config")?;
        fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }
}

fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub fn user_config_path() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Some(home) = home::home_dir() {
            return home
                .join("Library")
                .join("Application Support")
                .join("Lightstring")
                .join("runtime.json");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(base) = std::env::var_os("APPDATA") {
            return PathBuf::from(base).join("Lightstring").join("runtime.json");
        }
    }

    if let Ok(base) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(base).join("lightstring").join("runtime.json")
    } else if let Some(home) = home::home_dir() {
        home.join(".config").join("lightstring").join("runtime.json")
    } else {
        PathBuf::from("runtime.json")
    }
}
