//! Executable memory for relays and relocated prologues
//!
//! Blocks are carved from RWX pages placed within ±2GB of the hooked function
//! so the 5-byte `jmp rel32` patch can reach them. Blocks are never returned:
//! a removed detour may still have a thread executing its trampoline.

use parking_lot::Mutex;
use std::ptr::NonNull;

/// Size of one mapped page
const PAGE_SIZE: usize = 4096;

/// Placement granularity for hinted mappings (Windows reserves in 64K units)
const GRANULARITY: usize = 0x1_0000;

/// Default block size handed out per detour
pub const TRAMPOLINE_SIZE: usize = 64;

/// Farthest distance reachable by a rel32 branch, with some slack
pub const MAX_RANGE: usize = 0x7FFF_0000;

static ALLOCATOR: Mutex<TrampolineAllocator> = Mutex::new(TrampolineAllocator::new());

struct Page {
    base: usize,
    used: usize,
}

struct TrampolineAllocator {
    pages: Vec<Page>,
}

pub(crate) fn distance(a: usize, b: usize) -> usize {
    a.abs_diff(b)
}

impl TrampolineAllocator {
    const fn new() -> Self {
        Self { pages: Vec::new() }
    }

    fn alloc_near(&mut self, target: usize, size: usize) -> Option<NonNull<u8>> {
        if size == 0 || size > PAGE_SIZE {
            return None;
        }

        // Keep blocks 16-byte aligned
        let size = (size + 15) & !15;

        if let Some(page) = self
            .pages
            .iter_mut()
            .find(|p| distance(p.base, target) < MAX_RANGE && p.used + size <= PAGE_SIZE)
        {
            let block = page.base + page.used;
            page.used += size;
            return NonNull::new(block as *mut u8);
        }

        let base = Self::map_near(target)?;
        self.pages.push(Page { base, used: size });
        NonNull::new(base as *mut u8)
    }

    /// Walk outwards from the target until a page lands in range
    fn map_near(target: usize) -> Option<usize> {
        let origin = target & !(GRANULARITY - 1);
        let steps = MAX_RANGE / GRANULARITY;

        for step in 1..steps {
            let delta = step * GRANULARITY;
            for hint in [origin.checked_add(delta), origin.checked_sub(delta)]
                .into_iter()
                .flatten()
            {
                if hint == 0 {
                    continue;
                }
                let Some(base) = os::map_page(Some(hint)) else {
                    continue;
                };
                if distance(base, target) < MAX_RANGE {
                    return Some(base);
                }
                os::unmap_page(base);
            }
        }

        // Hints are advisory; on 32-bit every address is reachable anyway
        let base = os::map_page(None)?;
        if cfg!(target_pointer_width = "64") && distance(base, target) >= MAX_RANGE {
            tracing::warn!(
                "Trampoline page {:x} is out of rel32 range of {:x}",
                base,
                target
            );
        }
        Some(base)
    }
}

#[cfg(unix)]
mod os {
    use super::PAGE_SIZE;
    use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};
    use std::num::NonZeroUsize;
    use std::ptr::NonNull;

    pub fn map_page(hint: Option<usize>) -> Option<usize> {
        let length = NonZeroUsize::new(PAGE_SIZE)?;
        let result = unsafe {
            mmap_anonymous(
                hint.and_then(NonZeroUsize::new),
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE | ProtFlags::PROT_EXEC,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS,
            )
        };
        match result {
            Ok(ptr) => Some(ptr.as_ptr() as usize),
            Err(e) => {
                tracing::trace!("mmap near {:x?} failed: {}", hint, e);
                None
            }
        }
    }

    pub fn unmap_page(base: usize) {
        if let Some(ptr) = NonNull::new(base as *mut std::ffi::c_void) {
            unsafe {
                let _ = munmap(ptr, PAGE_SIZE);
            }
        }
    }
}

#[cfg(windows)]
mod os {
    use super::PAGE_SIZE;
    use std::ffi::c_void;
    use windows::Win32::System::Memory::{
        VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READWRITE,
    };

    pub fn map_page(hint: Option<usize>) -> Option<usize> {
        let result = unsafe {
            VirtualAlloc(
                hint.map(|h| h as *const c_void),
                PAGE_SIZE,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_EXECUTE_READWRITE,
            )
        };
        (!result.is_null()).then_some(result as usize)
    }

    pub fn unmap_page(base: usize) {
        unsafe {
            let _ = VirtualFree(base as *mut c_void, 0, MEM_RELEASE);
        }
    }
}

/// Allocate a block of `size` executable bytes near `target`
pub fn alloc_trampoline(target: usize, size: usize) -> Option<NonNull<u8>> {
    let block = ALLOCATOR.lock().alloc_near(target, size);
    if block.is_none() {
        tracing::error!("Failed to allocate trampoline near {:x}", target);
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor() -> usize {
        let f: fn() -> usize = anchor;
        f as usize
    }

    #[test]
    fn test_trampoline_near_code() {
        let target = anchor();
        let block = alloc_trampoline(target, TRAMPOLINE_SIZE).unwrap();
        let address = block.as_ptr() as usize;
        assert_ne!(address, 0);
        assert_eq!(address % 16, 0);
        if cfg!(target_pointer_width = "64") {
            assert!(distance(address, target) < MAX_RANGE);
        }
    }

    #[test]
    fn test_blocks_do_not_overlap() {
        let target = anchor();
        let mut blocks: Vec<usize> = (0..8)
            .map(|_| alloc_trampoline(target, 40).unwrap().as_ptr() as usize)
            .collect();
        blocks.sort_unstable();
        for pair in blocks.windows(2) {
            assert!(pair[1] - pair[0] >= 48);
        }
    }

    #[test]
    fn test_block_is_writable() {
        let block = alloc_trampoline(anchor(), 16).unwrap();
        unsafe {
            block.as_ptr().write(0xC3);
            assert_eq!(block.as_ptr().read(), 0xC3);
        }
    }

    #[test]
    fn test_oversized_request_rejected() {
        assert!(alloc_trampoline(anchor(), PAGE_SIZE + 1).is_none());
    }
}
