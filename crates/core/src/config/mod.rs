//! Configuration for overcursor
//!
//! Two files live in `configs/` next to the overcursor library:
//!
//! - `overcursor.toml` - general [`OverlayConfig`] (log level, cursor sprite,
//!   key bindings). Created with defaults when missing.
//! - `games.json` - the [`ProfileTable`], one entry per supported game.
//!
//! # Example
//!
//! ```ignore
//! use overcursor_core::config::{OverlayConfig, ProfileTable};
//!
//! let config = OverlayConfig::load()?;
//! let profiles = ProfileTable::load()?;
//! if let Some(profile) = profiles.find("th07") {
//!     println!("{:?}", profile.strategy);
//! }
//! ```

mod loader;
mod profile;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use loader::{base_dir, configs_dir, overlay_config_path, profiles_path, script_path};
pub use profile::{
    ChainBase, GameProfile, ProfileError, ProfileTable, ResolutionStrategy, MAX_PROCESS_NAME,
};

/// Configuration system errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read or write config file
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML content
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config to TOML
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Profile table is not a JSON array
    #[error("Failed to parse profile table: {0}")]
    JsonError(#[from] serde_json::Error),

    /// A profile entry is invalid
    #[error(transparent)]
    Profile(#[from] ProfileError),

    /// Could not determine config directory from the library location
    #[error("Config directory not available - process globals not initialized")]
    NoConfigDirectory,
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// General overlay configuration
///
/// Loaded from `configs/overcursor.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Config version for future migration support
    pub version: u32,

    /// Enable debug logging
    pub debug: bool,

    /// `tracing` filter directive used when `OVERCURSOR_LOG` is unset
    pub log_level: String,

    pub cursor: CursorConfig,

    pub keys: KeyConfig,

    pub input: InputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CursorConfig {
    /// Sprite path relative to the overcursor directory
    pub texture: String,

    /// Back buffer height at which the sprite is drawn unscaled
    pub base_height: f32,
}

/// Virtual-key codes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    pub bomb: u8,
    pub extra: u8,
    pub toggle_overlay: u8,
    pub toggle_os_cursor: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Distance in pixels within which the player counts as on the cursor
    pub dead_zone: f32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            version: 1,
            debug: false,
            log_level: "info".to_string(),
            cursor: CursorConfig::default(),
            keys: KeyConfig::default(),
            input: InputConfig::default(),
        }
    }
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            texture: "cursors/default.png".to_string(),
            base_height: 480.0,
        }
    }
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            bomb: b'X',
            extra: b'C',
            toggle_overlay: b'M',
            toggle_os_cursor: b'N',
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self { dead_zone: 3.0 }
    }
}

impl OverlayConfig {
    /// Effective `tracing` filter
    pub fn log_filter(&self) -> &str {
        if self.debug {
            "debug"
        } else {
            &self.log_level
        }
    }

    /// Load the config from its default location, creating it if missing.
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&overlay_config_path()?)
    }

    /// Load config from `path`, writing a default file if missing.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            tracing::debug!("Loaded overlay config from {:?}", path);
            Ok(config)
        } else {
            let default = Self::default();
            default.save_to(path)?;
            tracing::info!("Created default overlay config at {:?}", path);
            Ok(default)
        }
    }

    /// Save config to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!("Saved overlay config to {:?}", path);
        Ok(())
    }

    /// Reload config from `path`.
    pub fn reload_from(&mut self, path: &Path) -> ConfigResult<()> {
        let content = std::fs::read_to_string(path)?;
        *self = toml::from_str(&content)?;
        tracing::debug!("Reloaded overlay config from {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::PathBuf;

    /// Fresh scratch directory under the system temp dir
    pub fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("overcursor-{}-{}", std::process::id(), name));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
