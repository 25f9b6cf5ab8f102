//! Game profiles loaded from JSON
//!
//! `games.json` is an array with one entry per supported game. Entries are
//! validated once at start into immutable [`GameProfile`]s; the first entry
//! whose `process` matches the host (case-insensitive) wins.
//!
//! ```json
//! [
//!   {
//!     "process": "th07",
//!     "position": "[62F85C][3C][0]",
//!     "data_type": "float",
//!     "offset": [32, 16],
//!     "base_height": 480,
//!     "aspect_ratio": "4:3",
//!     "input": "HookAll"
//!   },
//!   { "process": "th135", "position": "Lua", "data_type": "float",
//!     "base_height": 480, "aspect_ratio": "4:3", "input": "SendKey" }
//! ]
//! ```

use std::path::Path;

use serde::Deserialize;

use super::{loader::profiles_path, ConfigResult};
use crate::geometry::{Calibration, FloatPoint};
use crate::input::InputMethod;
use crate::memory::{parse_chain_notation, ValueType};

/// Longest accepted process name
pub const MAX_PROCESS_NAME: usize = 63;

/// An invalid profile entry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Profile #{entry}, field '{field}': {reason}")]
pub struct ProfileError {
    /// Zero-based position in the table
    pub entry: usize,
    pub field: &'static str,
    pub reason: String,
}

/// Where the pointer chain starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainBase {
    /// Load address of the host executable
    MainModule,
    /// Load address of an already-loaded module
    Module(String),
    /// First offset is an absolute address
    Absolute,
}

/// How the player position is located
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionStrategy {
    PointerChain { base: ChainBase, offsets: Vec<u32> },
    /// Script run in an interpreter owned by overcursor
    OwnedScript,
    /// Script injected into the game's own Lua interpreter
    HostHijackedScript,
}

/// Validated per-game configuration
#[derive(Debug, Clone, PartialEq)]
pub struct GameProfile {
    pub process_name: String,
    pub strategy: ResolutionStrategy,
    pub value_type: ValueType,
    pub offset: FloatPoint,
    pub base_height: f32,
    pub aspect_ratio: FloatPoint,
    pub input_methods: InputMethod,
}

impl GameProfile {
    pub fn calibration(&self) -> Calibration {
        Calibration {
            base_height: self.base_height,
            base_offset: self.offset,
            aspect_ratio: self.aspect_ratio,
        }
    }

    pub fn matches(&self, process_name: &str) -> bool {
        self.process_name.eq_ignore_ascii_case(process_name)
    }
}

/// Entry as written in `games.json`
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProfile {
    process: String,
    position: String,
    #[serde(default)]
    base: Option<String>,
    #[serde(default = "default_data_type")]
    data_type: String,
    #[serde(default)]
    offset: [f32; 2],
    base_height: f32,
    aspect_ratio: String,
    #[serde(default = "default_input")]
    input: String,
}

fn default_data_type() -> String {
    "int".to_string()
}

fn default_input() -> String {
    "HookAll".to_string()
}

impl RawProfile {
    fn validate(self, entry: usize) -> Result<GameProfile, ProfileError> {
        let fail = |field, reason: String| ProfileError {
            entry,
            field,
            reason,
        };

        let process_name = self.process.trim().to_string();
        if process_name.is_empty() {
            return Err(fail("process", "must not be empty".to_string()));
        }
        if process_name.len() > MAX_PROCESS_NAME {
            return Err(fail(
                "process",
                format!("longer than {} characters", MAX_PROCESS_NAME),
            ));
        }

        let strategy = parse_strategy(&self.position, self.base.as_deref())
            .map_err(|reason| fail("position", reason))?;

        let value_type = self
            .data_type
            .parse::<ValueType>()
            .map_err(|reason| fail("data_type", reason))?;

        if !(self.base_height > 0.0) {
            return Err(fail("base_height", "must be greater than 0".to_string()));
        }

        let aspect_ratio =
            parse_aspect_ratio(&self.aspect_ratio).map_err(|reason| fail("aspect_ratio", reason))?;

        let input_methods = self
            .input
            .parse::<InputMethod>()
            .map_err(|reason| fail("input", reason))?;

        Ok(GameProfile {
            process_name,
            strategy,
            value_type,
            offset: FloatPoint::new(self.offset[0], self.offset[1]),
            base_height: self.base_height,
            aspect_ratio,
            input_methods,
        })
    }
}

fn parse_strategy(position: &str, base: Option<&str>) -> Result<ResolutionStrategy, String> {
    let position = position.trim();
    if position.starts_with('[') {
        let offsets = parse_chain_notation(position)?;
        let base = match base.map(str::trim) {
            None | Some("") => ChainBase::MainModule,
            Some(b) if b.eq_ignore_ascii_case("main") => ChainBase::MainModule,
            Some(b) if b.eq_ignore_ascii_case("absolute") => ChainBase::Absolute,
            Some(module) => ChainBase::Module(module.to_string()),
        };
        return Ok(ResolutionStrategy::PointerChain { base, offsets });
    }

    match position.to_ascii_lowercase().as_str() {
        "luajit" | "ownedscript" => Ok(ResolutionStrategy::OwnedScript),
        "lua" | "hostscript" => Ok(ResolutionStrategy::HostHijackedScript),
        other => Err(format!(
            "expected a pointer chain, 'LuaJIT' or 'Lua', got '{}'",
            other
        )),
    }
}

fn parse_aspect_ratio(text: &str) -> Result<FloatPoint, String> {
    let (w, h) = text
        .split_once(':')
        .ok_or_else(|| format!("expected 'W:H', got '{}'", text))?;
    let parse = |part: &str| {
        part.trim()
            .parse::<f32>()
            .ok()
            .filter(|v| *v > 0.0 && v.is_finite())
            .ok_or_else(|| format!("'{}' is not a positive number", part.trim()))
    };
    Ok(FloatPoint::new(parse(w)?, parse(h)?))
}

/// All configured games
#[derive(Debug, Default, Clone)]
pub struct ProfileTable {
    profiles: Vec<GameProfile>,
}

impl ProfileTable {
    /// Load the table from its default location
    pub fn load() -> ConfigResult<Self> {
        Self::load_from_file(profiles_path()?)
    }

    /// Load the table from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content)
    }

    /// Parse and validate a JSON array of profiles
    pub fn load_from_str(json: &str) -> ConfigResult<Self> {
        let raw: Vec<serde_json::Value> = serde_json::from_str(json)?;

        let mut profiles = Vec::with_capacity(raw.len());
        for (entry, value) in raw.into_iter().enumerate() {
            let parsed: RawProfile = serde_json::from_value(value).map_err(|e| ProfileError {
                entry,
                field: "entry",
                reason: e.to_string(),
            })?;
            let profile = parsed.validate(entry)?;

            if profiles.iter().any(|p: &GameProfile| p.matches(&profile.process_name)) {
                tracing::warn!(
                    "Profile #{} for '{}' is shadowed by an earlier entry",
                    entry,
                    profile.process_name
                );
            }
            profiles.push(profile);
        }

        tracing::info!("Loaded {} game profiles", profiles.len());
        Ok(Self { profiles })
    }

    /// First profile matching the process name (case-insensitive)
    pub fn find(&self, process_name: &str) -> Option<&GameProfile> {
        self.profiles.iter().find(|p| p.matches(process_name))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GameProfile> {
        self.profiles.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;

    const TABLE: &str = r#"[
        {
            "process": "th07",
            "position": "[62F85C][3C][0]",
            "data_type": "float",
            "offset": [32, 16],
            "base_height": 480,
            "aspect_ratio": "4:3",
            "input": "HookAll/SendKey"
        },
        {
            "process": "th135",
            "position": "Lua",
            "base_height": 480,
            "aspect_ratio": "4:3",
            "input": "SendKey"
        },
        {
            "process": "th123",
            "position": "LuaJIT",
            "data_type": "short",
            "base_height": 480,
            "aspect_ratio": "4:3"
        },
        {
            "process": "TH07",
            "position": "[10]",
            "base": "absolute",
            "base_height": 240,
            "aspect_ratio": "16:9"
        }
    ]"#;

    fn error_of(json: &str) -> ProfileError {
        match ProfileTable::load_from_str(json) {
            Err(ConfigError::Profile(e)) => e,
            other => panic!("expected profile error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_table() {
        let table = ProfileTable::load_from_str(TABLE).unwrap();
        assert_eq!(table.len(), 4);

        let th07 = table.find("Th07").unwrap();
        assert_eq!(
            th07.strategy,
            ResolutionStrategy::PointerChain {
                base: ChainBase::MainModule,
                offsets: vec![0x62_F85C, 0x3C, 0],
            }
        );
        assert_eq!(th07.value_type, ValueType::Float);
        assert_eq!(th07.offset, FloatPoint::new(32.0, 16.0));
        assert_eq!(th07.aspect_ratio, FloatPoint::new(4.0, 3.0));
        assert_eq!(th07.input_methods, InputMethod::HOOK_ALL | InputMethod::SEND_KEY);
        assert_eq!(th07.calibration().base_height, 480.0);

        let th135 = table.find("th135").unwrap();
        assert_eq!(th135.strategy, ResolutionStrategy::HostHijackedScript);
        assert_eq!(th135.value_type, ValueType::Int);

        let th123 = table.find("TH123").unwrap();
        assert_eq!(th123.strategy, ResolutionStrategy::OwnedScript);
        assert_eq!(th123.input_methods, InputMethod::HOOK_ALL);

        assert!(table.find("th08").is_none());
    }

    #[test]
    fn test_first_match_wins() {
        let table = ProfileTable::load_from_str(TABLE).unwrap();
        let th07 = table.find("TH07").unwrap();
        assert_eq!(th07.base_height, 480.0);
        assert_eq!(table.iter().filter(|p| p.matches("th07")).count(), 2);
    }

    #[test]
    fn test_module_chain_base() {
        let table = ProfileTable::load_from_str(
            r#"[{"process": "g", "position": "[100][4]", "base": "game.dll",
                 "base_height": 480, "aspect_ratio": "4:3"}]"#,
        )
        .unwrap();
        assert_eq!(
            table.find("g").unwrap().strategy,
            ResolutionStrategy::PointerChain {
                base: ChainBase::Module("game.dll".to_string()),
                offsets: vec![0x100, 4],
            }
        );
    }

    #[test]
    fn test_errors_name_entry_and_field() {
        let err = error_of(
            r#"[{"process": "a", "position": "LuaJIT", "base_height": 480, "aspect_ratio": "4:3"},
                {"process": "b", "position": "LuaJIT", "base_height": 0, "aspect_ratio": "4:3"}]"#,
        );
        assert_eq!(err.entry, 1);
        assert_eq!(err.field, "base_height");

        let err = error_of(
            r#"[{"process": "a", "position": "LuaJIT", "base_height": 480, "aspect_ratio": "4x3"}]"#,
        );
        assert_eq!(err.field, "aspect_ratio");

        let err = error_of(
            r#"[{"process": "a", "position": "[zz]", "base_height": 480, "aspect_ratio": "4:3"}]"#,
        );
        assert_eq!(err.field, "position");

        let err = error_of(
            r#"[{"process": "a", "position": "NeoLua", "base_height": 480, "aspect_ratio": "4:3"}]"#,
        );
        assert_eq!(err.field, "position");

        let err = error_of(
            r#"[{"process": "a", "position": "Lua", "data_type": "double", "base_height": 480, "aspect_ratio": "4:3"}]"#,
        );
        assert_eq!(err.field, "data_type");

        let err = error_of(
            r#"[{"process": "a", "position": "Lua", "base_height": 480, "aspect_ratio": "4:3", "input": ""}]"#,
        );
        assert_eq!(err.field, "input");

        let err = error_of(r#"[{"process": "a", "base_height": 480}]"#);
        assert_eq!(err.field, "entry");
    }

    #[test]
    fn test_process_name_limits() {
        let long = "x".repeat(MAX_PROCESS_NAME + 1);
        let json = format!(
            r#"[{{"process": "{}", "position": "Lua", "base_height": 480, "aspect_ratio": "4:3"}}]"#,
            long
        );
        assert_eq!(error_of(&json).field, "process");

        let err = error_of(r#"[{"process": " ", "position": "Lua", "base_height": 480, "aspect_ratio": "4:3"}]"#);
        assert_eq!(err.field, "process");
    }

    #[test]
    fn test_not_an_array() {
        assert!(matches!(
            ProfileTable::load_from_str("{}"),
            Err(ConfigError::JsonError(_))
        ));
    }
}
