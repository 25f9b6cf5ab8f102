//! Config path resolution
//!
//! Everything is resolved relative to the directory holding the overcursor
//! library:
//!
//! ```text
//! <module dir>/configs/overcursor.toml
//! <module dir>/configs/games.json
//! <module dir>/scripts/<process>.lua
//! ```

use std::path::{Path, PathBuf};

use super::{ConfigError, ConfigResult};

/// Directory containing the overcursor library
pub fn base_dir() -> ConfigResult<PathBuf> {
    overcursor_engine::process()
        .map(|globals| globals.module_dir.clone())
        .ok_or(ConfigError::NoConfigDirectory)
}

/// Returns the configs directory.
pub fn configs_dir() -> ConfigResult<PathBuf> {
    Ok(base_dir()?.join("configs"))
}

/// Path: `<module dir>/configs/overcursor.toml`
pub fn overlay_config_path() -> ConfigResult<PathBuf> {
    Ok(configs_dir()?.join("overcursor.toml"))
}

/// Path: `<module dir>/configs/games.json`
pub fn profiles_path() -> ConfigResult<PathBuf> {
    Ok(configs_dir()?.join("games.json"))
}

/// Operator script for a process: `<base>/scripts/<process>.lua`
pub fn script_path(base: &Path, process_name: &str) -> PathBuf {
    base.join("scripts").join(format!("{}.lua", process_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_path_format() {
        let base = PathBuf::from("/games/overcursor");
        let path = script_path(&base, "th07");
        assert!(path.ends_with("scripts/th07.lua"));
    }
}
