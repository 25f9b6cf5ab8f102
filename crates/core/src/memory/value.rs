//! Typed reads of resolved position addresses

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{MemoryError, MemorySource};
use crate::geometry::FloatPoint;

/// Encoding of the two coordinates stored at a resolved address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[serde(alias = "int32")]
    Int,
    #[serde(alias = "float32")]
    Float,
    #[serde(alias = "int16")]
    Short,
}

impl ValueType {
    /// Width of one coordinate in bytes
    pub const fn size(self) -> usize {
        match self {
            ValueType::Int | ValueType::Float => 4,
            ValueType::Short => 2,
        }
    }
}

impl FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "int" | "int32" => Ok(ValueType::Int),
            "float" | "float32" => Ok(ValueType::Float),
            "short" | "int16" => Ok(ValueType::Short),
            other => Err(format!("unknown value type '{}'", other)),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Short => "short",
        };
        f.write_str(name)
    }
}

/// One coordinate as stored by the game
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolvedValue {
    Int(i32),
    Float(f32),
    Short(i16),
}

impl ResolvedValue {
    pub fn as_f32(self) -> f32 {
        match self {
            ResolvedValue::Int(v) => v as f32,
            ResolvedValue::Float(v) => v,
            ResolvedValue::Short(v) => v as f32,
        }
    }
}

/// Read a single coordinate of `value_type` at `address`
pub fn read_value(
    memory: &dyn MemorySource,
    address: usize,
    value_type: ValueType,
) -> Result<ResolvedValue, MemoryError> {
    Ok(match value_type {
        ValueType::Int => ResolvedValue::Int(memory.read_i32(address)?),
        ValueType::Float => ResolvedValue::Float(memory.read_f32(address)?),
        ValueType::Short => ResolvedValue::Short(memory.read_i16(address)?),
    })
}

/// Read the player position: x at `address`, y directly after it
pub fn read_position(
    memory: &dyn MemorySource,
    address: usize,
    value_type: ValueType,
) -> Result<FloatPoint, MemoryError> {
    let x = read_value(memory, address, value_type)?;
    let y_address = address
        .checked_add(value_type.size())
        .ok_or(MemoryError::Overflow { level: 0 })?;
    let y = read_value(memory, y_address, value_type)?;
    Ok(FloatPoint::new(x.as_f32(), y.as_f32()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::resolve_chain;
    use crate::memory::testing::MockMemory;

    #[test]
    fn test_chain_then_int_read() {
        let mut memory = MockMemory::new();
        memory.write_u32(0x40_0010, 0x1000);
        memory.write_i32(0x1020, 5);

        let address = resolve_chain(&memory, 0x40_0000, &[0x10, 0x20]).unwrap();
        assert_eq!(
            read_value(&memory, address, ValueType::Int).unwrap(),
            ResolvedValue::Int(5)
        );
    }

    #[test]
    fn test_read_position_per_type() {
        let mut memory = MockMemory::new();
        memory.write_i32(0x100, 192);
        memory.write_i32(0x104, 400);
        memory.write_f32(0x200, 12.5);
        memory.write_f32(0x204, -3.0);
        memory.write_i16(0x300, 32);
        memory.write_i16(0x302, -8);

        assert_eq!(
            read_position(&memory, 0x100, ValueType::Int).unwrap(),
            FloatPoint::new(192.0, 400.0)
        );
        assert_eq!(
            read_position(&memory, 0x200, ValueType::Float).unwrap(),
            FloatPoint::new(12.5, -3.0)
        );
        assert_eq!(
            read_position(&memory, 0x300, ValueType::Short).unwrap(),
            FloatPoint::new(32.0, -8.0)
        );
    }

    #[test]
    fn test_partial_position_fails() {
        let mut memory = MockMemory::new();
        memory.write_i32(0x100, 1);
        assert!(read_position(&memory, 0x100, ValueType::Int).is_err());
    }

    #[test]
    fn test_value_type_parsing() {
        assert_eq!("Int".parse::<ValueType>().unwrap(), ValueType::Int);
        assert_eq!("FLOAT".parse::<ValueType>().unwrap(), ValueType::Float);
        assert_eq!("short".parse::<ValueType>().unwrap(), ValueType::Short);
        assert!("double".parse::<ValueType>().is_err());
        assert_eq!(ValueType::Short.size(), 2);
    }
}
