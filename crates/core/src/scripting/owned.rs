//! Interpreter owned by overcursor
//!
//! The operator script defines `getPositionAddress()`, which is called once
//! per frame. Any failure (interpreter, preparation, script, entry point)
//! disables the engine for the rest of the process lifetime.

use mlua::{Function, Lua, LuaOptions, StdLib, Table, Value};

use super::host::HostCallbacks;
use super::ScriptError;

/// Global function the operator script must define
pub const ENTRY_POINT: &str = "getPositionAddress";

/// Binds the host natives to the script-facing globals
const PRELUDE: &str = r#"
local host = ...

function ReadUInt32(address)
    return host.read_u32(address)
end

function ResolveAddress(offsets, length)
    return host.resolve_address(offsets, length)
end

function OpenConsole()
    host.open_console()
end
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Ready,
    Disabled,
}

enum State {
    Uninitialized,
    Ready { _lua: Lua, entry: Function },
    Disabled,
}

pub struct OwnedEngine {
    state: State,
    invocations: u64,
}

impl Default for OwnedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl OwnedEngine {
    pub fn new() -> Self {
        Self {
            state: State::Uninitialized,
            invocations: 0,
        }
    }

    pub fn state(&self) -> EngineState {
        match self.state {
            State::Uninitialized => EngineState::Uninitialized,
            State::Ready { .. } => EngineState::Ready,
            State::Disabled => EngineState::Disabled,
        }
    }

    /// Number of times the entry point has been called
    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    /// Create the interpreter, run the prelude and the operator script, and
    /// look up the entry point. On error the engine is disabled for good.
    pub fn start(
        &mut self,
        script: &str,
        chunk_name: &str,
        host: HostCallbacks,
    ) -> Result<(), ScriptError> {
        if !matches!(self.state, State::Uninitialized) {
            return Ok(());
        }

        match Self::build(script, chunk_name, host) {
            Ok((lua, entry)) => {
                self.state = State::Ready { _lua: lua, entry };
                tracing::info!("Owned script engine ready ({})", chunk_name);
                Ok(())
            }
            Err(e) => {
                self.disable(&e);
                Err(e)
            }
        }
    }

    fn build(
        script: &str,
        chunk_name: &str,
        host: HostCallbacks,
    ) -> Result<(Lua, Function), ScriptError> {
        let lua = Lua::new_with(StdLib::ALL_SAFE, LuaOptions::new())
            .map_err(|e| ScriptError::Interpreter(e.to_string()))?;

        let natives = register_host(&lua, host).map_err(|e| ScriptError::Preparation(e.to_string()))?;
        lua.load(PRELUDE)
            .set_name("=overcursor-prelude")
            .call::<()>(natives)
            .map_err(|e| ScriptError::Preparation(e.to_string()))?;

        lua.load(script)
            .set_name(format!("@{}", chunk_name))
            .exec()
            .map_err(|e| ScriptError::Operator(e.to_string()))?;

        let entry = match lua.globals().get::<Value>(ENTRY_POINT) {
            Ok(Value::Function(entry)) => entry,
            _ => return Err(ScriptError::MissingEntryPoint(ENTRY_POINT)),
        };

        Ok((lua, entry))
    }

    /// Call the entry point. `None` means no position this frame.
    pub fn query(&mut self) -> Option<usize> {
        let State::Ready { entry, .. } = &self.state else {
            return None;
        };

        self.invocations += 1;
        let result = match entry.call::<Value>(()) {
            Ok(value) => address_of(value),
            Err(e) => Err(ScriptError::EntryPoint(e.to_string())),
        };

        match result {
            Ok(address) => address,
            Err(e) => {
                self.disable(&e);
                None
            }
        }
    }

    fn disable(&mut self, reason: &ScriptError) {
        tracing::error!("Owned script engine disabled: {}", reason);
        self.state = State::Disabled;
    }
}

/// Numbers are addresses (0 = none this frame); anything else is an error
fn address_of(value: Value) -> Result<Option<usize>, ScriptError> {
    let address = match value {
        Value::Integer(i) => usize::try_from(i).ok(),
        Value::Number(n) if n.is_finite() && n >= 0.0 => Some(n as usize),
        Value::Number(_) => None,
        other => return Err(ScriptError::NonNumeric(other.type_name().to_string())),
    };
    Ok(address.filter(|a| *a != 0))
}

fn register_host(lua: &Lua, host: HostCallbacks) -> mlua::Result<Table> {
    let natives = lua.create_table()?;

    let h = host.clone();
    natives.set(
        "read_u32",
        lua.create_function(move |_, address: f64| Ok(h.read_u32(address as usize)))?,
    )?;

    let h = host.clone();
    natives.set(
        "resolve_address",
        lua.create_function(move |_, (offsets, length): (Table, Option<usize>)| {
            let mut chain = Vec::new();
            for offset in offsets.sequence_values::<f64>() {
                chain.push(offset? as u32);
            }
            let length = length.unwrap_or(chain.len()).min(chain.len());
            Ok(h.resolve_address(&chain[..length]))
        })?,
    )?;

    let h = host;
    natives.set(
        "open_console",
        lua.create_function(move |_, ()| {
            (h.open_console)();
            Ok(())
        })?,
    )?;

    Ok(natives)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::memory::testing::MockMemory;

    fn host_with(memory: MockMemory) -> (HostCallbacks, Arc<MockMemory>) {
        let memory = Arc::new(memory);
        (HostCallbacks::new(memory.clone()), memory)
    }

    fn started(script: &str) -> (OwnedEngine, Result<(), ScriptError>, Arc<MockMemory>) {
        let mut memory = MockMemory::new();
        memory.write_u32(0x500, 0x1000);
        let (host, memory) = host_with(memory);
        let mut engine = OwnedEngine::new();
        let result = engine.start(script, "test.lua", host);
        (engine, result, memory)
    }

    #[test]
    fn test_entry_point_returns_address() {
        let (mut engine, result, memory) = started(
            r#"
            function getPositionAddress()
                return ReadUInt32(0x500) + 0x20
            end
            "#,
        );
        result.unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.query(), Some(0x1020));
        assert_eq!(engine.query(), Some(0x1020));
        assert_eq!(engine.invocations(), 2);
        assert_eq!(memory.reads().len(), 2);
    }

    #[test]
    fn test_resolve_address_host_call() {
        let (mut engine, result, _memory) = started(
            r#"
            function getPositionAddress()
                return ResolveAddress({0x500, 0x8, 0xFF}, 2)
            end
            "#,
        );
        result.unwrap();
        assert_eq!(engine.query(), Some(0x1008));
    }

    #[test]
    fn test_zero_is_unavailable_not_disabled() {
        let (mut engine, result, _memory) = started(
            r#"
            function getPositionAddress()
                return ReadUInt32(0x9999)
            end
            "#,
        );
        result.unwrap();
        assert_eq!(engine.query(), None);
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.query(), None);
        assert_eq!(engine.invocations(), 2);
    }

    #[test]
    fn test_non_numeric_result_disables_for_good() {
        let (mut engine, result, memory) = started(
            r#"
            function getPositionAddress()
                ReadUInt32(0x500)
                return "nope"
            end
            "#,
        );
        result.unwrap();
        assert_eq!(engine.query(), None);
        assert_eq!(engine.state(), EngineState::Disabled);
        assert_eq!(memory.reads().len(), 1);

        assert_eq!(engine.query(), None);
        assert_eq!(engine.query(), None);
        assert_eq!(engine.invocations(), 1);
        assert_eq!(memory.reads().len(), 1);
    }

    #[test]
    fn test_entry_point_error_disables() {
        let (mut engine, result, _memory) = started(
            r#"
            function getPositionAddress()
                error("boom")
            end
            "#,
        );
        result.unwrap();
        assert_eq!(engine.query(), None);
        assert_eq!(engine.state(), EngineState::Disabled);
    }

    #[test]
    fn test_startup_failures_disable() {
        let (engine, result, _) = started("this is not lua");
        assert!(matches!(result, Err(ScriptError::Operator(_))));
        assert_eq!(engine.state(), EngineState::Disabled);

        let (engine, result, _) = started("x = 1");
        assert!(matches!(result, Err(ScriptError::MissingEntryPoint(ENTRY_POINT))));
        assert_eq!(engine.state(), EngineState::Disabled);

        let (mut engine, result, _) = started("error('at load')");
        assert!(matches!(result, Err(ScriptError::Operator(ref m)) if m.contains("at load")));
        assert_eq!(engine.query(), None);
        assert_eq!(engine.invocations(), 0);
    }

    #[test]
    fn test_open_console_callback() {
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = opened.clone();
        let (mut host, _memory) = host_with(MockMemory::new());
        host.open_console = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut engine = OwnedEngine::new();
        engine
            .start(
                "OpenConsole()\nfunction getPositionAddress() return 1 end",
                "console.lua",
                host,
            )
            .unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(engine.query(), Some(1));
    }
}
