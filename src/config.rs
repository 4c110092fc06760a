//! Configuration for the application host
//!
//! Loads configuration from TOML file at `~/.config/apphost/config.toml`
//! Auto-generates default config file on first run if missing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub capture: CaptureConfig,
    pub context: ContextConfig,
}

impl HostConfig {
    /// Load configuration from file, or use defaults if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            info!("Config file not found at {:?}, using defaults", config_path);
            // Auto-generate default config file
            if let Err(e) = Self::save_default(&config_path) {
                warn!("Failed to create default config file: {}", e);
            }
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        let config: HostConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;

        info!("Configuration loaded from {:?}", path);
        debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("apphost");

        Ok(config_dir.join("config.toml"))
    }

    /// Save default configuration to file
    pub fn save_default(path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let toml_string = toml::to_string_pretty(&Self::default())
            .context("Failed to serialize default config")?;

        fs::write(path, toml_string)
            .context("Failed to write default config file")?;

        info!("Created default config file at {:?}", path);
        Ok(())
    }
}

/// Which built-in filters join the chain. Read once when the run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Capture main windows in the host
    pub main_windows: bool,
    /// Capture popup windows such as splash screens
    pub popup_windows: bool,
    /// Capture dialogs
    pub dialogs: bool,
    /// Maximize captured main windows to the host and remove their chrome
    pub maximize_main_windows: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            main_windows: true,
            popup_windows: true,
            dialogs: false,
            maximize_main_windows: true,
        }
    }
}

/// Execution context setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub application_name: String,
    /// Base directory of the hosted program; defaults to the entry file's directory
    pub application_base: Option<PathBuf>,
    /// Name given to the dedicated hosted thread
    pub hosted_thread_name: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            application_name: "AppHost Application Domain".to_string(),
            application_base: None,
            hosted_thread_name: "apphost-hosted".to_string(),
        }
    }
}
