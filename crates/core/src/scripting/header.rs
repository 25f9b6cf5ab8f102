//! Operator script header for the hijacked engine
//!
//! The first line names the game's interpreter module:
//!
//! ```lua
//! -- LuaDllName = lua5.1.dll
//! ```

/// Error type for a missing or malformed header
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("Script is empty")]
    Empty,

    #[error("First line is not a Lua comment")]
    NotComment,

    #[error("First comment does not have the key LuaDllName")]
    MissingKey,

    #[error("Expected '=' after LuaDllName")]
    MissingEquals,

    #[error("LuaDllName value must be specified")]
    MissingValue,
}

/// Extract the interpreter module name from the script's first line
pub fn parse_header(script: &str) -> Result<String, HeaderError> {
    let first_line = script.lines().next().ok_or(HeaderError::Empty)?;
    let first_line = first_line.strip_prefix('\u{feff}').unwrap_or(first_line);
    let mut tokens = first_line.split_whitespace();

    if tokens.next() != Some("--") {
        return Err(HeaderError::NotComment);
    }
    if tokens.next() != Some("LuaDllName") {
        return Err(HeaderError::MissingKey);
    }
    if tokens.next() != Some("=") {
        return Err(HeaderError::MissingEquals);
    }
    tokens
        .next()
        .map(str::to_string)
        .ok_or(HeaderError::MissingValue)
}
