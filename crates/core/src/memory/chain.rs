//! Pointer-chain resolution
//!
//! A chain `[A][B][C]` means: start at `base + A`, load the 32-bit word there
//! and add `B`, load again and add `C`. The address produced by the last
//! addition is the result and is *not* loaded; the caller decides how to
//! interpret it (see [`super::value`]).

use super::{MemoryError, MemorySource};

/// Maximum number of offsets in one chain
pub const MAX_CHAIN_LEN: usize = 8;

/// Walk a pointer chain starting at `base`.
///
/// For `N` offsets this performs `N` additions and `N - 1` reads. A null link
/// or an unreadable word fails the whole walk.
pub fn resolve_chain(
    memory: &dyn MemorySource,
    base: usize,
    offsets: &[u32],
) -> Result<usize, MemoryError> {
    let (first, rest) = offsets.split_first().ok_or(MemoryError::EmptyChain)?;

    let mut address = base
        .checked_add(*first as usize)
        .ok_or(MemoryError::Overflow { level: 0 })?;

    for (index, offset) in rest.iter().enumerate() {
        let level = index + 1;
        let link = memory.read_u32(address)?;
        if link == 0 {
            return Err(MemoryError::NullPointer { level });
        }
        address = (link as usize)
            .checked_add(*offset as usize)
            .ok_or(MemoryError::Overflow { level })?;
    }

    Ok(address)
}

/// A pointer chain bound to a resolved base address
///
/// The base (a module's load address) is fixed for the process lifetime; the
/// chain itself is re-walked on every query because the game reallocates the
/// objects it points through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainResolver {
    base: usize,
    offsets: Vec<u32>,
}

impl ChainResolver {
    pub fn new(base: usize, offsets: Vec<u32>) -> Self {
        Self { base, offsets }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    /// Walk the chain against `memory`
    pub fn resolve(&self, memory: &dyn MemorySource) -> Result<usize, MemoryError> {
        resolve_chain(memory, self.base, &self.offsets)
    }
}

/// Parse the bracketed hex notation used by profiles, e.g. `[4B3F10][18][0]`.
///
/// Text outside brackets is ignored. At most [`MAX_CHAIN_LEN`] offsets are
/// accepted and at least one is required.
pub fn parse_chain_notation(text: &str) -> Result<Vec<u32>, String> {
    let mut offsets = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find('[') {
        let after_open = &rest[open + 1..];
        let close = after_open
            .find(']')
            .ok_or_else(|| format!("unclosed '[' in '{}'", text))?;
        let digits = after_open[..close].trim();
        let digits = digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
            .unwrap_or(digits);

        let offset = u32::from_str_radix(digits, 16)
            .map_err(|e| format!("invalid hex offset '{}': {}", digits, e))?;

        if offsets.len() == MAX_CHAIN_LEN {
            return Err(format!("more than {} offsets", MAX_CHAIN_LEN));
        }
        offsets.push(offset);
        rest = &after_open[close + 1..];
    }

    if offsets.is_empty() {
        return Err("no offset found".to_string());
    }
    Ok(offsets)
}
