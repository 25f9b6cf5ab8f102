//! Inline function detours
//!
//! The first instructions of the target are decoded with iced-x86 and
//! relocated into a trampoline that jumps back behind them. The target is
//! then patched with a `jmp rel32` to a relay which jumps to the detour.
//!
//! ```text
//! target:      jmp relay ; nop ...
//! relay:       jmp [detour]
//! trampoline:  <relocated prologue> ; jmp target+len
//! ```

use iced_x86::{
    BlockEncoder, BlockEncoderOptions, Code, Decoder, DecoderOptions, FlowControl, Instruction,
    InstructionBlock,
};
use overcursor_engine::ResolveError;

use super::manager::{Detour, Interceptor};
use super::trampoline::{self, TRAMPOLINE_SIZE};

/// Size of the `jmp rel32` written over the target
pub const PATCH_LEN: usize = 5;

/// Bytes read from the target when planning the patch
const MAX_PROLOGUE: usize = 32;

/// Bytes reserved for the relay at the start of each trampoline block
const RELAY_SLOT: usize = 16;

#[cfg(target_pointer_width = "64")]
const BITNESS: u32 = 64;
#[cfg(target_pointer_width = "32")]
const BITNESS: u32 = 32;

/// Error type for hook operations
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("Failed to decode instruction at {address:x}")]
    Decode { address: usize },

    #[error("Unsupported prologue at {address:x}: {reason}")]
    UnsupportedPrologue { address: usize, reason: String },

    #[error("Instruction relocation failed: {0}")]
    RelocationFailed(String),

    #[error("No trampoline memory near {0:x}")]
    Allocation(usize),

    #[error("Memory protection failed: {0}")]
    MemoryProtection(String),

    #[error("Invalid address: {0:x}")]
    InvalidAddress(usize),

    #[error("Hook not found")]
    NotFound,
}

/// Instructions displaced by the patch
#[derive(Debug, Clone)]
pub struct ProloguePlan {
    pub instructions: Vec<Instruction>,
    /// Total byte length of `instructions`, at least [`PATCH_LEN`]
    pub len: usize,
}

/// Decode whole instructions from `code` until [`PATCH_LEN`] bytes are covered.
///
/// Fails when the function ends (return, unconditional jump, trap) before
/// enough bytes are available to patch it.
pub fn plan_prologue(code: &[u8], ip: u64, bitness: u32) -> Result<ProloguePlan, HookError> {
    let mut decoder = Decoder::with_ip(bitness, code, ip, DecoderOptions::NONE);
    let mut plan = ProloguePlan {
        instructions: Vec::new(),
        len: 0,
    };

    while plan.len < PATCH_LEN {
        if !decoder.can_decode() {
            return Err(HookError::UnsupportedPrologue {
                address: ip as usize,
                reason: format!("only {} bytes readable", plan.len),
            });
        }

        let instruction = decoder.decode();
        if instruction.is_invalid() {
            return Err(HookError::Decode {
                address: instruction.ip() as usize,
            });
        }

        plan.len += instruction.len();
        let flow = instruction.flow_control();
        plan.instructions.push(instruction);

        let terminal = matches!(
            flow,
            FlowControl::Return
                | FlowControl::UnconditionalBranch
                | FlowControl::IndirectBranch
                | FlowControl::Interrupt
                | FlowControl::Exception
        );
        if terminal && plan.len < PATCH_LEN {
            return Err(HookError::UnsupportedPrologue {
                address: ip as usize,
                reason: format!("{:?} after {} bytes", flow, plan.len),
            });
        }
    }

    Ok(plan)
}

/// Encode the relocated prologue at `trampoline_ip` followed by a jump back
/// to the first untouched instruction of the target.
pub fn build_trampoline(
    plan: &ProloguePlan,
    target: u64,
    trampoline_ip: u64,
    bitness: u32,
) -> Result<Vec<u8>, HookError> {
    let jmp = if bitness == 64 {
        Code::Jmp_rel32_64
    } else {
        Code::Jmp_rel32_32
    };
    let back = Instruction::with_branch(jmp, target + plan.len as u64)
        .map_err(|e| HookError::RelocationFailed(e.to_string()))?;

    let mut instructions = plan.instructions.clone();
    instructions.push(back);

    let block = InstructionBlock::new(&instructions, trampoline_ip);
    let encoded = BlockEncoder::encode(bitness, block, BlockEncoderOptions::NONE)
        .map_err(|e| HookError::RelocationFailed(e.to_string()))?;
    Ok(encoded.code_buffer)
}

/// Absolute jump from `relay` to `detour`
pub fn relay_bytes(relay: usize, detour: usize, bitness: u32) -> Vec<u8> {
    if bitness == 64 {
        // jmp [rip+0] ; dq detour
        let mut bytes = vec![0xFF, 0x25, 0x00, 0x00, 0x00, 0x00];
        bytes.extend_from_slice(&(detour as u64).to_le_bytes());
        bytes
    } else {
        let rel = (detour as u32).wrapping_sub((relay as u32).wrapping_add(PATCH_LEN as u32));
        let mut bytes = vec![0xE9];
        bytes.extend_from_slice(&rel.to_le_bytes());
        bytes
    }
}

/// `jmp rel32` from `target` to `relay`, padded with `nop` to `len` bytes
pub fn patch_bytes(
    target: usize,
    relay: usize,
    len: usize,
    bitness: u32,
) -> Result<Vec<u8>, HookError> {
    let rel = if bitness == 64 {
        let rel = relay as i64 - (target as i64 + PATCH_LEN as i64);
        i32::try_from(rel).map_err(|_| HookError::Allocation(target))? as u32
    } else {
        (relay as u32).wrapping_sub((target as u32).wrapping_add(PATCH_LEN as u32))
    };

    let mut bytes = Vec::with_capacity(len.max(PATCH_LEN));
    bytes.push(0xE9);
    bytes.extend_from_slice(&rel.to_le_bytes());
    bytes.resize(len.max(PATCH_LEN), 0x90);
    Ok(bytes)
}

unsafe fn write_code(address: usize, bytes: &[u8]) -> Result<(), HookError> {
    let _guard = region::protect_with_handle(
        address as *const u8,
        bytes.len(),
        region::Protection::READ_WRITE_EXECUTE,
    )
    .map_err(|e| HookError::MemoryProtection(e.to_string()))?;

    std::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len());
    Ok(())
}

fn read_code(address: usize) -> Result<Vec<u8>, HookError> {
    let region = region::query(address as *const u8)
        .map_err(|e| HookError::MemoryProtection(e.to_string()))?;
    if !region.is_readable() {
        return Err(HookError::MemoryProtection(format!(
            "{:x} is not readable",
            address
        )));
    }

    let available = (region.as_range().end - address).min(MAX_PROLOGUE);
    let bytes = unsafe { std::slice::from_raw_parts(address as *const u8, available) };
    Ok(bytes.to_vec())
}

/// Interceptor that patches machine code in place
#[derive(Debug, Default)]
pub struct InlineInterceptor;

impl Interceptor for InlineInterceptor {
    unsafe fn create(
        &mut self,
        name: &str,
        target: usize,
        detour: usize,
    ) -> Result<Box<dyn Detour>, HookError> {
        if target == 0 {
            return Err(HookError::InvalidAddress(target));
        }
        if detour == 0 {
            return Err(HookError::InvalidAddress(detour));
        }

        let code = read_code(target)?;
        let plan = plan_prologue(&code, target as u64, BITNESS)?;

        let block = trampoline::alloc_trampoline(target, TRAMPOLINE_SIZE)
            .ok_or(HookError::Allocation(target))?;
        let relay = block.as_ptr() as usize;
        let entry = relay + RELAY_SLOT;

        let relocated = build_trampoline(&plan, target as u64, entry as u64, BITNESS)?;
        if RELAY_SLOT + relocated.len() > TRAMPOLINE_SIZE {
            return Err(HookError::RelocationFailed(format!(
                "relocated prologue of '{}' needs {} bytes",
                name,
                relocated.len()
            )));
        }
        let patch = patch_bytes(target, relay, plan.len, BITNESS)?;

        let relay_code = relay_bytes(relay, detour, BITNESS);
        std::ptr::copy_nonoverlapping(relay_code.as_ptr(), relay as *mut u8, relay_code.len());
        std::ptr::copy_nonoverlapping(relocated.as_ptr(), entry as *mut u8, relocated.len());

        tracing::debug!(
            "Planned detour '{}': {:x} -> {:x} ({} bytes displaced, trampoline {:x})",
            name,
            target,
            detour,
            plan.len,
            entry
        );

        Ok(Box::new(InlineDetour {
            target,
            original: code[..plan.len].to_vec(),
            patch,
            trampoline: entry,
            enabled: false,
        }))
    }
}

/// A planned patch over one function prologue
pub struct InlineDetour {
    target: usize,
    original: Vec<u8>,
    patch: Vec<u8>,
    trampoline: usize,
    enabled: bool,
}

impl Detour for InlineDetour {
    fn target(&self) -> usize {
        self.target
    }

    fn trampoline(&self) -> usize {
        self.trampoline
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    unsafe fn enable(&mut self) -> Result<(), HookError> {
        if !self.enabled {
            write_code(self.target, &self.patch)?;
            self.enabled = true;
        }
        Ok(())
    }

    unsafe fn disable(&mut self) -> Result<(), HookError> {
        if self.enabled {
            write_code(self.target, &self.original)?;
            self.enabled = false;
        }
        Ok(())
    }
}

impl Drop for InlineDetour {
    fn drop(&mut self) {
        if self.enabled {
            if let Err(e) = unsafe { self.disable() } {
                tracing::error!("Failed to restore {:x}: {}", self.target, e);
            }
        }
    }
}
