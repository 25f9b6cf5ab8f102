//! Pointer-to-keyboard remapping
//!
//! When a profile enables [`InputMethod::SEND_KEY`], the cursor position
//! relative to the player is turned into arrow keys and pointer buttons into
//! the bomb / extra keys. Key events go to a [`KeySink`] provided by the host
//! integration.

use std::str::FromStr;

use bitflags::bitflags;

use crate::geometry::FloatPoint;

bitflags! {
    /// Ways the overlay may feed input to the game
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InputMethod: u32 {
        const DIRECT_INPUT = 0x01;
        const GET_KEYBOARD_STATE = 0x02;
        const SEND_KEY = 0x04;
        const HOOK_ALL = Self::DIRECT_INPUT.bits() | Self::GET_KEYBOARD_STATE.bits();
    }
}

impl FromStr for InputMethod {
    type Err = String;

    /// Parse a `/`-separated list such as `HookAll/SendKey`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut methods = InputMethod::empty();
        for token in s.split('/').map(str::trim).filter(|t| !t.is_empty()) {
            methods |= match token.to_ascii_lowercase().as_str() {
                "hookall" => InputMethod::HOOK_ALL,
                "directinput" => InputMethod::DIRECT_INPUT,
                "getkeyboardstate" => InputMethod::GET_KEYBOARD_STATE,
                "sendkey" => InputMethod::SEND_KEY,
                other => return Err(format!("unknown input method '{}'", other)),
            };
        }
        if methods.is_empty() {
            return Err("no input method given".to_string());
        }
        Ok(methods)
    }
}

bitflags! {
    /// Pointer buttons held this frame
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PointerButtons: u8 {
        const LEFT = 0x01;
        const MIDDLE = 0x02;
        const RIGHT = 0x04;
    }
}

bitflags! {
    /// Game actions derived from the pointer for one frame
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct GameInput: u32 {
        const USE_BOMB = 0x01;
        const USE_SPECIAL = 0x02;
        const MOVE_LEFT = 0x04;
        const MOVE_RIGHT = 0x08;
        const MOVE_UP = 0x10;
        const MOVE_DOWN = 0x20;
    }
}

impl GameInput {
    /// Steer the player towards the cursor, ignoring distances within
    /// `dead_zone` pixels on each axis
    pub fn from_positions(
        player: FloatPoint,
        cursor: FloatPoint,
        dead_zone: f32,
        buttons: PointerButtons,
    ) -> Self {
        let mut input = GameInput::empty();

        let dx = cursor.x - player.x;
        let dy = cursor.y - player.y;
        if dx < -dead_zone {
            input |= GameInput::MOVE_LEFT;
        } else if dx > dead_zone {
            input |= GameInput::MOVE_RIGHT;
        }
        if dy < -dead_zone {
            input |= GameInput::MOVE_UP;
        } else if dy > dead_zone {
            input |= GameInput::MOVE_DOWN;
        }

        if buttons.contains(PointerButtons::LEFT) {
            input |= GameInput::USE_BOMB;
        }
        if buttons.contains(PointerButtons::MIDDLE) {
            input |= GameInput::USE_SPECIAL;
        }
        input
    }
}

/// Windows virtual-key codes for the arrow keys
pub mod vk {
    pub const LEFT: u8 = 0x25;
    pub const UP: u8 = 0x26;
    pub const RIGHT: u8 = 0x27;
    pub const DOWN: u8 = 0x28;
}

/// Receiver of synthesized key events
pub trait KeySink: Send {
    fn key_down(&mut self, vk_code: u8);
    fn key_up(&mut self, vk_code: u8);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    /// Down once when the action starts, up once when it stops
    Hold,
    /// Down every active frame, up once when it stops
    Trigger,
}

#[derive(Debug, Clone, Copy)]
struct KeyBinding {
    action: GameInput,
    vk_code: u8,
    kind: KeyKind,
    down: bool,
}

/// Turns per-frame [`GameInput`] into key transitions
pub struct KeyRemapper {
    bindings: Vec<KeyBinding>,
    sink: Box<dyn KeySink>,
}

impl KeyRemapper {
    pub fn new(bomb: u8, extra: u8, sink: Box<dyn KeySink>) -> Self {
        let binding = |action, vk_code, kind| KeyBinding {
            action,
            vk_code,
            kind,
            down: false,
        };
        Self {
            bindings: vec![
                binding(GameInput::USE_BOMB, bomb, KeyKind::Trigger),
                binding(GameInput::USE_SPECIAL, extra, KeyKind::Trigger),
                binding(GameInput::MOVE_LEFT, vk::LEFT, KeyKind::Hold),
                binding(GameInput::MOVE_RIGHT, vk::RIGHT, KeyKind::Hold),
                binding(GameInput::MOVE_UP, vk::UP, KeyKind::Hold),
                binding(GameInput::MOVE_DOWN, vk::DOWN, KeyKind::Hold),
            ],
            sink,
        }
    }

    /// Emit the key transitions for this frame
    pub fn apply(&mut self, input: GameInput) {
        for binding in &mut self.bindings {
            let active = input.contains(binding.action);
            match (active, binding.kind, binding.down) {
                (true, KeyKind::Trigger, _) | (true, KeyKind::Hold, false) => {
                    self.sink.key_down(binding.vk_code);
                    binding.down = true;
                }
                (false, _, true) => {
                    self.sink.key_up(binding.vk_code);
                    binding.down = false;
                }
                _ => {}
            }
        }
    }

    /// Release every key this remapper may have pressed
    pub fn release_all(&mut self) {
        for binding in &mut self.bindings {
            self.sink.key_up(binding.vk_code);
            binding.down = false;
        }
    }
}

/// Key events delivered with `SendInput`
#[cfg(windows)]
#[derive(Debug, Default)]
pub struct SendInputSink;

#[cfg(windows)]
impl SendInputSink {
    fn send(vk_code: u8, flags: windows::Win32::UI::Input::KeyboardAndMouse::KEYBD_EVENT_FLAGS) {
        use windows::Win32::UI::Input::KeyboardAndMouse::{
            SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, KEYBDINPUT, VIRTUAL_KEY,
        };

        let input = INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: VIRTUAL_KEY(vk_code as u16),
                    wScan: 0,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        };
        let sent = unsafe { SendInput(&[input], std::mem::size_of::<INPUT>() as i32) };
        if sent != 1 {
            tracing::debug!("SendInput dropped key {:#x}", vk_code);
        }
    }
}

#[cfg(windows)]
impl KeySink for SendInputSink {
    fn key_down(&mut self, vk_code: u8) {
        Self::send(vk_code, Default::default());
    }

    fn key_up(&mut self, vk_code: u8) {
        Self::send(vk_code, windows::Win32::UI::Input::KeyboardAndMouse::KEYEVENTF_KEYUP);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::KeySink;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum KeyEvent {
        Down(u8),
        Up(u8),
    }

    #[derive(Clone, Default)]
    pub struct RecordingSink {
        pub events: Arc<Mutex<Vec<KeyEvent>>>,
    }

    impl RecordingSink {
        pub fn take(&self) -> Vec<KeyEvent> {
            std::mem::take(&mut *self.events.lock())
        }
    }

    impl KeySink for RecordingSink {
        fn key_down(&mut self, vk_code: u8) {
            self.events.lock().push(KeyEvent::Down(vk_code));
        }

        fn key_up(&mut self, vk_code: u8) {
            self.events.lock().push(KeyEvent::Up(vk_code));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{KeyEvent, RecordingSink};
    use super::*;

    const BOMB: u8 = 0x58;
    const EXTRA: u8 = 0x43;

    #[test]
    fn test_parse_input_methods() {
        assert_eq!(
            "HookAll".parse::<InputMethod>().unwrap(),
            InputMethod::DIRECT_INPUT | InputMethod::GET_KEYBOARD_STATE
        );
        assert_eq!(
            "HookAll/SendKey".parse::<InputMethod>().unwrap(),
            InputMethod::HOOK_ALL | InputMethod::SEND_KEY
        );
        assert_eq!("sendkey".parse::<InputMethod>().unwrap(), InputMethod::SEND_KEY);
        assert!("".parse::<InputMethod>().is_err());
        assert!("Mouse".parse::<InputMethod>().is_err());
    }

    #[test]
    fn test_direction_with_dead_zone() {
        let player = FloatPoint::new(100.0, 100.0);
        let none = PointerButtons::empty();

        assert_eq!(
            GameInput::from_positions(player, FloatPoint::new(103.0, 97.0), 5.0, none),
            GameInput::empty()
        );
        assert_eq!(
            GameInput::from_positions(player, FloatPoint::new(50.0, 150.0), 5.0, none),
            GameInput::MOVE_LEFT | GameInput::MOVE_DOWN
        );
        assert_eq!(
            GameInput::from_positions(player, FloatPoint::new(150.0, 20.0), 5.0, PointerButtons::LEFT),
            GameInput::MOVE_RIGHT | GameInput::MOVE_UP | GameInput::USE_BOMB
        );
        assert_eq!(
            GameInput::from_positions(player, player, 0.0, PointerButtons::MIDDLE),
            GameInput::USE_SPECIAL
        );
    }

    #[test]
    fn test_hold_keys_press_once() {
        let sink = RecordingSink::default();
        let mut remapper = KeyRemapper::new(BOMB, EXTRA, Box::new(sink.clone()));

        remapper.apply(GameInput::MOVE_LEFT);
        remapper.apply(GameInput::MOVE_LEFT);
        assert_eq!(sink.take(), vec![KeyEvent::Down(vk::LEFT)]);

        remapper.apply(GameInput::empty());
        remapper.apply(GameInput::empty());
        assert_eq!(sink.take(), vec![KeyEvent::Up(vk::LEFT)]);
    }

    #[test]
    fn test_trigger_keys_repeat_while_active() {
        let sink = RecordingSink::default();
        let mut remapper = KeyRemapper::new(BOMB, EXTRA, Box::new(sink.clone()));

        remapper.apply(GameInput::USE_BOMB);
        remapper.apply(GameInput::USE_BOMB);
        remapper.apply(GameInput::empty());
        remapper.apply(GameInput::empty());
        assert_eq!(
            sink.take(),
            vec![KeyEvent::Down(BOMB), KeyEvent::Down(BOMB), KeyEvent::Up(BOMB)]
        );
    }

    #[test]
    fn test_release_all() {
        let sink = RecordingSink::default();
        let mut remapper = KeyRemapper::new(BOMB, EXTRA, Box::new(sink.clone()));
        remapper.release_all();
        let events = sink.take();
        assert_eq!(events.len(), 6);
        assert!(events.contains(&KeyEvent::Up(EXTRA)));
        assert!(events.iter().all(|e| matches!(e, KeyEvent::Up(_))));
    }
}
