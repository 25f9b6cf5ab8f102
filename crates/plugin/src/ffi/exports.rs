//! C-compatible exports called by render backends and injected scripts

use std::ffi::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::instrument;

use overcursor_core::input::PointerButtons;
use overcursor_core::scripting::host;
use overcursor_core::{with_runtime, FloatPoint, FrameInput, LocalMemory, SurfaceSize};

// Library metadata - static strings with null terminators for C compatibility
static NAME: &[u8] = b"overcursor\0";
static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();

/// Frame facts reported by the backend
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct OcFrameInput {
    pub client_width: u32,
    pub client_height: u32,
    pub backbuffer_width: u32,
    pub backbuffer_height: u32,
    /// Pointer in client coordinates
    pub pointer_x: f32,
    pub pointer_y: f32,
    /// Bit 0 left, bit 1 middle, bit 2 right
    pub buttons: u8,
    pub input_enabled: bool,
}

/// What to draw this frame
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct OcFrameOutput {
    pub has_position: bool,
    pub position_x: f32,
    pub position_y: f32,
    pub has_cursor: bool,
    pub cursor_x: f32,
    pub cursor_y: f32,
    pub sprite_scale: f32,
}

impl From<&OcFrameInput> for FrameInput {
    fn from(input: &OcFrameInput) -> Self {
        FrameInput {
            client: SurfaceSize::new(input.client_width, input.client_height),
            backbuffer: SurfaceSize::new(input.backbuffer_width, input.backbuffer_height),
            pointer: FloatPoint::new(input.pointer_x, input.pointer_y),
            buttons: PointerButtons::from_bits_truncate(input.buttons),
            input_enabled: input.input_enabled,
        }
    }
}

/// Attach without a loader callback (non-Windows hosts, manual injection)
#[no_mangle]
#[instrument(skip_all)]
pub extern "C" fn overcursor_attach() -> bool {
    catch_unwind(crate::attach).unwrap_or(false)
}

/// Detach; pass `true` when the process is exiting
#[no_mangle]
#[instrument(skip_all)]
pub extern "C" fn overcursor_detach(is_process_terminating: bool) {
    if catch_unwind(|| crate::detach(is_process_terminating)).is_err() {
        tracing::error!("Panic during detach");
    }
}

/// Called by the render backend once per presented frame.
///
/// Returns `false` when no runtime is active; `output` is untouched then.
///
/// # Safety
/// - `input` must point to a valid `OcFrameInput`
/// - `output` must point to writable memory for an `OcFrameOutput`
#[no_mangle]
pub unsafe extern "C" fn overcursor_on_present(
    input: *const OcFrameInput,
    output: *mut OcFrameOutput,
) -> bool {
    if input.is_null() || output.is_null() {
        return false;
    }
    let frame = FrameInput::from(&*input);

    let result = catch_unwind(AssertUnwindSafe(|| with_runtime(|runtime| runtime.on_present(&frame))));
    let Ok(Some(frame_output)) = result else {
        return false;
    };

    let mut out = OcFrameOutput {
        sprite_scale: frame_output.sprite_scale,
        ..Default::default()
    };
    if let Some(position) = frame_output.position {
        out.has_position = true;
        out.position_x = position.x;
        out.position_y = position.y;
    }
    if let Some(cursor) = frame_output.cursor {
        out.has_cursor = true;
        out.cursor_x = cursor.x;
        out.cursor_y = cursor.y;
    }
    *output = out;
    true
}

/// Called by the render backend after a resize or device loss
#[no_mangle]
#[instrument(skip_all)]
pub extern "C" fn overcursor_invalidate_geometry() {
    let _ = catch_unwind(|| with_runtime(|runtime| runtime.invalidate_geometry()));
}

// === Script host calls (bound by the preparation snippet through LuaJIT ffi) ===

/// `ReadUInt32`
#[no_mangle]
pub extern "C" fn overcursor_read_u32(address: usize) -> u32 {
    host::read_u32(&LocalMemory, address)
}

/// `ResolveAddress`
///
/// # Safety
/// `offsets` must point to `length` readable `u32`s, or be null with `length` 0
#[no_mangle]
pub unsafe extern "C" fn overcursor_resolve_address(offsets: *const u32, length: usize) -> usize {
    if offsets.is_null() || length == 0 {
        return 0;
    }
    let offsets = std::slice::from_raw_parts(offsets, length);
    host::resolve_address(&LocalMemory, offsets)
}

/// `OpenConsole`
#[no_mangle]
pub extern "C" fn overcursor_open_console() {
    overcursor_engine::open_console();
}

#[no_mangle]
pub extern "C" fn overcursor_get_name() -> *const c_char {
    NAME.as_ptr() as *const c_char
}

#[no_mangle]
pub extern "C" fn overcursor_get_version() -> *const c_char {
    VERSION.as_ptr() as *const c_char
}
