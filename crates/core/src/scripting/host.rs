//! Host calls available to operator scripts
//!
//! | Lua                          | meaning                                  |
//! |------------------------------|------------------------------------------|
//! | `ReadUInt32(address)`        | 32-bit word at `address`, 0 if unmapped  |
//! | `ResolveAddress(t[, n])`     | walk the first `n` offsets of `t` from 0 |
//! | `OpenConsole()`              | open the diagnostic console              |
//!
//! Unreadable memory never raises a script error; the call returns 0 and the
//! script decides what that means.

use std::sync::Arc;

use crate::memory::{resolve_chain, MemorySource};

/// What host calls act on
#[derive(Clone)]
pub struct HostCallbacks {
    pub memory: Arc<dyn MemorySource>,
    pub open_console: Arc<dyn Fn() + Send + Sync>,
}

impl HostCallbacks {
    pub fn new(memory: Arc<dyn MemorySource>) -> Self {
        Self {
            memory,
            open_console: Arc::new(|| {
                overcursor_engine::open_console();
            }),
        }
    }

    pub fn read_u32(&self, address: usize) -> u32 {
        read_u32(self.memory.as_ref(), address)
    }

    pub fn resolve_address(&self, offsets: &[u32]) -> usize {
        resolve_address(self.memory.as_ref(), offsets)
    }
}

/// `ReadUInt32`
pub fn read_u32(memory: &dyn MemorySource, address: usize) -> u32 {
    memory.read_u32(address).unwrap_or_else(|e| {
        tracing::trace!("ReadUInt32({:x}): {}", address, e);
        0
    })
}

/// `ResolveAddress`: the first offset is an absolute address
pub fn resolve_address(memory: &dyn MemorySource, offsets: &[u32]) -> usize {
    resolve_chain(memory, 0, offsets).unwrap_or_else(|e| {
        tracing::trace!("ResolveAddress({:x?}): {}", offsets, e);
        0
    })
}
