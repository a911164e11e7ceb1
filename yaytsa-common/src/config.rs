//! Configuration loading and data folder resolution
//!
//! Bootstrap settings come from an optional TOML file. A missing or malformed
//! file is never fatal: a warning is logged and compiled defaults are used.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable overriding the data folder
pub const DATA_DIR_ENV: &str = "YAYTSA_DATA_DIR";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    /// Folder holding the settings database
    pub data_folder: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Output device name; default device when unset or not found
    pub audio_device: Option<String>,

    /// Requested device buffer size in frames
    pub buffer_size: Option<u32>,

    /// Mixer sample rate
    pub sample_rate: u32,

    /// Seamless-switch crossfade length
    pub crossfade_ms: u64,

    /// Interval of time-update events, in played milliseconds
    pub time_update_interval_ms: u64,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            data_folder: None,
            log_level: "info".to_string(),
            audio_device: None,
            buffer_size: None,
            sample_rate: 44_100,
            crossfade_ms: 150,
            time_update_interval_ms: 250,
        }
    }
}

impl TomlConfig {
    /// Parse configuration text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Load from an explicit file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load from the platform config location, falling back to defaults
    ///
    /// `explicit` takes precedence over the platform search path.
    pub fn load_or_default(explicit: Option<&Path>) -> Self {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path(),
        };

        let Some(path) = path else {
            debug!("No config file found, using defaults");
            return Self::default();
        };

        match Self::from_file(&path) {
            Ok(config) => {
                debug!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Ignoring config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

/// Data folder resolution, in priority order:
/// 1. Command-line argument
/// 2. `YAYTSA_DATA_DIR` environment variable
/// 3. `data_folder` from the TOML config
/// 4. OS-dependent default
pub fn resolve_data_folder(cli_arg: Option<&Path>, toml: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(DATA_DIR_ENV) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml.data_folder {
        return path.clone();
    }

    default_data_folder()
}

/// Create the data folder if needed
pub fn ensure_data_folder(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
        debug!("Created data folder {}", path.display());
    }
    Ok(())
}

/// First existing config file on the platform search path
fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("yaytsa").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/yaytsa/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// OS-dependent default data folder
pub fn default_data_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("yaytsa"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/yaytsa"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("yaytsa"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/yaytsa"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("yaytsa"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\yaytsa"))
    } else {
        PathBuf::from("./yaytsa_data")
    }
}
