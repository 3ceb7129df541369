//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MMSFIT_CONFIG` (environment variable)
//! 2. `~/.config/mmsfit/config.toml` (Linux/macOS)
//!    `%APPDATA%\mmsfit\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{MmsError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Attachment resize policy.
    pub resize: ResizeConfig,
    /// Message handling defaults.
    pub message: MessageConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Attachment resize policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeConfig {
    /// Highest step number a resize may use.
    pub max_steps: u32,
    /// Smallest acceptable target width in pixels.
    pub min_width: u32,
    /// Smallest acceptable target height in pixels.
    pub min_height: u32,
    /// Optional cap on `width * height` of a resized image.
    pub max_pixels: Option<u64>,
    /// Backends to try, in order of preference.
    pub backends: Vec<String>,
    /// Program used by the "magick" backend.
    pub magick_program: String,
}

/// Message handling defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageConfig {
    /// Keep part files and directories when a message is destroyed.
    pub keep_files: bool,
    /// Transport size budget in bytes.
    pub size_limit: u64,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self {
            max_steps: 8,
            min_width: 16,
            min_height: 16,
            max_pixels: None,
            backends: vec!["image".to_string(), "image-fast".to_string()],
            magick_program: "convert".to_string(),
        }
    }
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            keep_files: false,
            size_limit: 300 * 1024, // 300 KB
        }
    }
}

impl ResizeConfig {
    /// Reject settings under which no resize could ever succeed.
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(MmsError::InvalidConfig(
                "resize.max_steps must be at least 1".to_string(),
            ));
        }
        if self.min_width == 0 || self.min_height == 0 {
            return Err(MmsError::InvalidConfig(
                "resize.min_width and resize.min_height must be at least 1".to_string(),
            ));
        }
        if self.backends.is_empty() {
            return Err(MmsError::InvalidConfig(
                "resize.backends must name at least one backend".to_string(),
            ));
        }
        Ok(())
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Save configuration to the standard location.
pub fn save_config(config: &Config) -> anyhow::Result<()> {
    let path = config_file_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config file path"))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(&path, contents)?;
    tracing::info!(path = %path.display(), "Saved config");
    Ok(())
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MMSFIT_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mmsfit").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mmsfit")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("mmsfit.log")
}
