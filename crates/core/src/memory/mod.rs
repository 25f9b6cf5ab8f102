//! Host memory access
//!
//! Every read goes through [`MemorySource`] so an unmapped page turns into a
//! [`MemoryError`] instead of an access violation inside the game.
//!
//! - [`chain`] - Pointer-chain walking
//! - [`value`] - Typed reads of resolved addresses

pub mod chain;
pub mod value;

pub use chain::{parse_chain_notation, resolve_chain, ChainResolver, MAX_CHAIN_LEN};
pub use value::{read_position, read_value, ResolvedValue, ValueType};

/// Error type for memory reads
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    #[error("Unreadable memory at {address:x} ({len} bytes)")]
    Unreadable { address: usize, len: usize },

    #[error("Null pointer at chain level {level}")]
    NullPointer { level: usize },

    #[error("Address overflow at chain level {level}")]
    Overflow { level: usize },

    #[error("Pointer chain has no offsets")]
    EmptyChain,
}

/// Readable view of an address space
pub trait MemorySource: Send + Sync {
    /// Fill `buf` with the bytes at `address`
    fn read_bytes(&self, address: usize, buf: &mut [u8]) -> Result<(), MemoryError>;

    fn read_u32(&self, address: usize) -> Result<u32, MemoryError> {
        let mut bytes = [0u8; 4];
        self.read_bytes(address, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_i32(&self, address: usize) -> Result<i32, MemoryError> {
        let mut bytes = [0u8; 4];
        self.read_bytes(address, &mut bytes)?;
        Ok(i32::from_le_bytes(bytes))
    }

    fn read_f32(&self, address: usize) -> Result<f32, MemoryError> {
        let mut bytes = [0u8; 4];
        self.read_bytes(address, &mut bytes)?;
        Ok(f32::from_le_bytes(bytes))
    }

    fn read_i16(&self, address: usize) -> Result<i16, MemoryError> {
        let mut bytes = [0u8; 2];
        self.read_bytes(address, &mut bytes)?;
        Ok(i16::from_le_bytes(bytes))
    }
}

/// The current process's own address space
///
/// Page protection is queried before every read, so a dangling link in a
/// pointer chain fails the read rather than faulting.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalMemory;

impl LocalMemory {
    fn is_readable(address: usize) -> bool {
        region::query(address as *const u8)
            .map(|region| region.is_readable() && !region.is_guarded())
            .unwrap_or(false)
    }
}

impl MemorySource for LocalMemory {
    fn read_bytes(&self, address: usize, buf: &mut [u8]) -> Result<(), MemoryError> {
        if buf.is_empty() {
            return Ok(());
        }

        let unreadable = MemoryError::Unreadable {
            address,
            len: buf.len(),
        };

        // A read may straddle a page boundary, so check both ends
        let last = address
            .checked_add(buf.len() - 1)
            .ok_or_else(|| unreadable.clone())?;
        if address == 0 || !Self::is_readable(address) || !Self::is_readable(last) {
            return Err(unreadable);
        }

        unsafe {
            std::ptr::copy_nonoverlapping(address as *const u8, buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Sparse fake address space for resolver and script tests

    use std::collections::BTreeMap;

    use parking_lot::Mutex;

    use super::{MemoryError, MemorySource};

    #[derive(Default)]
    pub struct MockMemory {
        bytes: BTreeMap<usize, u8>,
        reads: Mutex<Vec<usize>>,
    }

    impl MockMemory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn write(&mut self, address: usize, data: &[u8]) {
            for (i, byte) in data.iter().enumerate() {
                self.bytes.insert(address + i, *byte);
            }
        }

        pub fn write_u32(&mut self, address: usize, value: u32) {
            self.write(address, &value.to_le_bytes());
        }

        pub fn write_i32(&mut self, address: usize, value: i32) {
            self.write(address, &value.to_le_bytes());
        }

        pub fn write_f32(&mut self, address: usize, value: f32) {
            self.write(address, &value.to_le_bytes());
        }

        pub fn write_i16(&mut self, address: usize, value: i16) {
            self.write(address, &value.to_le_bytes());
        }

        /// Start addresses of every read performed so far
        pub fn reads(&self) -> Vec<usize> {
            self.reads.lock().clone()
        }
    }

    impl MemorySource for MockMemory {
        fn read_bytes(&self, address: usize, buf: &mut [u8]) -> Result<(), MemoryError> {
            self.reads.lock().push(address);
            let len = buf.len();
            for (i, slot) in buf.iter_mut().enumerate() {
                *slot = *self
                    .bytes
                    .get(&(address + i))
                    .ok_or(MemoryError::Unreadable { address, len })?;
            }
            Ok(())
        }
    }
}
