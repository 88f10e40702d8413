//! # Register Access
//!
//! Typed, index- and name-addressable access to the target's registers.
//!
//! The engine describes every register value with a tagged union
//! ([`DebugValue`]): 24 bytes of storage plus a discriminant saying which
//! member is live. Only the integer members are decoded; everything else is
//! reported as [`KdError::UnsupportedRegisterType`] instead of being guessed
//! at, and the invalid discriminant is always an error.
//!
//! Register indices are assigned by the engine and stay stable for the whole
//! session. Names are not cached: every lookup re-reads them by index.
//!
//! ## Example
//!
//! ```rust,no_run
//! # fn demo(session: &kdctl_core::Session) -> kdctl_core::KdResult<()> {
//! let registers = session.registers()?;
//! let rip = registers.value_by_name("RIP")?;
//! registers.set_value_by_name("rax", 0x1234)?;
//! println!("rip = {rip}");
//! # Ok(())
//! # }
//! ```

use std::fmt;

use tracing::trace;

use crate::buffer::{sized_query, trim_padding};
use crate::engine::DebugEngine;
use crate::error::{KdError, KdResult};

/// Size of the union storage inside [`DebugValue`].
pub const RAW_VALUE_SIZE: usize = 24;

/// The engine's register value record.
///
/// Layout matches the engine's `DEBUG_VALUE`: the union is kept as raw bytes
/// and decoded explicitly, little-endian, according to `value_type`.
#[repr(C, align(8))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugValue
{
    /// Union storage. Integer members start at offset 0.
    pub raw_bytes: [u8; RAW_VALUE_SIZE],
    /// Extra storage used by 128-bit members.
    pub tail_of_raw_bytes: u32,
    /// Discriminant, see [`RegisterKind`].
    pub value_type: u32,
}

impl Default for DebugValue
{
    fn default() -> Self
    {
        Self {
            raw_bytes: [0; RAW_VALUE_SIZE],
            tail_of_raw_bytes: 0,
            value_type: RegisterKind::Invalid.raw(),
        }
    }
}

/// Discriminant of a [`DebugValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterKind
{
    /// No value.
    Invalid,
    /// 8-bit integer.
    Int8,
    /// 16-bit integer.
    Int16,
    /// 32-bit integer.
    Int32,
    /// 64-bit integer.
    Int64,
    /// IEEE single.
    Float32,
    /// IEEE double.
    Float64,
    /// x87 extended precision.
    Float80,
    /// Itanium 82-bit float.
    Float82,
    /// 128-bit float.
    Float128,
    /// 64-bit vector.
    Vector64,
    /// 128-bit vector.
    Vector128,
}

impl RegisterKind
{
    /// Engine discriminant value.
    #[must_use]
    pub const fn raw(self) -> u32
    {
        match self {
            Self::Invalid => 0,
            Self::Int8 => 1,
            Self::Int16 => 2,
            Self::Int32 => 3,
            Self::Int64 => 4,
            Self::Float32 => 5,
            Self::Float64 => 6,
            Self::Float80 => 7,
            Self::Float82 => 8,
            Self::Float128 => 9,
            Self::Vector64 => 10,
            Self::Vector128 => 11,
        }
    }

    /// Decode an engine discriminant.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self>
    {
        Some(match raw {
            0 => Self::Invalid,
            1 => Self::Int8,
            2 => Self::Int16,
            3 => Self::Int32,
            4 => Self::Int64,
            5 => Self::Float32,
            6 => Self::Float64,
            7 => Self::Float80,
            8 => Self::Float82,
            9 => Self::Float128,
            10 => Self::Vector64,
            11 => Self::Vector128,
            _ => return None,
        })
    }
}

/// A decoded register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterValue
{
    /// 8-bit register (`al`, `ah`, ...).
    Int8(u8),
    /// 16-bit register (`ax`, `cs`, ...).
    Int16(u16),
    /// 32-bit register (`eax`, `efl`, ...).
    Int32(u32),
    /// 64-bit register (`rax`, `rip`, ...).
    Int64(u64),
}

impl RegisterValue
{
    /// The value zero-extended to 64 bits.
    #[must_use]
    pub const fn as_u64(self) -> u64
    {
        match self {
            Self::Int8(v) => v as u64,
            Self::Int16(v) => v as u64,
            Self::Int32(v) => v as u64,
            Self::Int64(v) => v,
        }
    }

    /// The discriminant this value is encoded with.
    #[must_use]
    pub const fn kind(self) -> RegisterKind
    {
        match self {
            Self::Int8(_) => RegisterKind::Int8,
            Self::Int16(_) => RegisterKind::Int16,
            Self::Int32(_) => RegisterKind::Int32,
            Self::Int64(_) => RegisterKind::Int64,
        }
    }
}

impl fmt::Display for RegisterValue
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::Int8(v) => write!(f, "0x{v:02x}"),
            Self::Int16(v) => write!(f, "0x{v:04x}"),
            Self::Int32(v) => write!(f, "0x{v:08x}"),
            Self::Int64(v) => write!(f, "0x{v:016x}"),
        }
    }
}

impl From<RegisterValue> for DebugValue
{
    fn from(value: RegisterValue) -> Self
    {
        let mut raw = DebugValue {
            value_type: value.kind().raw(),
            ..DebugValue::default()
        };
        let bytes = value.as_u64().to_le_bytes();
        let width = member_width(value.kind());
        raw.raw_bytes[..width].copy_from_slice(&bytes[..width]);
        raw
    }
}

/// Byte width of an integer member.
const fn member_width(kind: RegisterKind) -> usize
{
    match kind {
        RegisterKind::Int8 => 1,
        RegisterKind::Int16 => 2,
        RegisterKind::Int32 => 4,
        _ => 8,
    }
}

impl DebugValue
{
    /// The discriminant, if it is one of the decoded integer kinds.
    ///
    /// `index` is only used to label the error.
    fn integer_kind(&self, index: u32) -> KdResult<RegisterKind>
    {
        match RegisterKind::from_raw(self.value_type) {
            Some(RegisterKind::Invalid) => Err(KdError::InvalidRegisterValue { index }),
            Some(kind @ (RegisterKind::Int8 | RegisterKind::Int16 | RegisterKind::Int32 | RegisterKind::Int64)) => {
                Ok(kind)
            }
            Some(
                RegisterKind::Float32
                | RegisterKind::Float64
                | RegisterKind::Float80
                | RegisterKind::Float82
                | RegisterKind::Float128
                | RegisterKind::Vector64
                | RegisterKind::Vector128,
            )
            | None => Err(KdError::UnsupportedRegisterType {
                index,
                kind: self.value_type,
            }),
        }
    }

    /// Decode the live member.
    ///
    /// ## Errors
    ///
    /// - `InvalidRegisterValue`: discriminant is the invalid marker
    /// - `UnsupportedRegisterType`: discriminant is not an integer kind
    pub fn decode(&self, index: u32) -> KdResult<RegisterValue>
    {
        let b = &self.raw_bytes;
        Ok(match self.integer_kind(index)? {
            RegisterKind::Int8 => RegisterValue::Int8(b[0]),
            RegisterKind::Int16 => RegisterValue::Int16(u16::from_le_bytes([b[0], b[1]])),
            RegisterKind::Int32 => RegisterValue::Int32(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            _ => RegisterValue::Int64(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])),
        })
    }

    /// Overwrite the live member with `new_value`, leaving every other byte
    /// (and the discriminant) untouched.
    ///
    /// ## Errors
    ///
    /// - `InvalidRegisterValue` / `UnsupportedRegisterType`: as for [`decode`](Self::decode)
    /// - `InvalidArgument`: `new_value` does not fit the live member
    pub fn encode(&mut self, index: u32, new_value: u64) -> KdResult<()>
    {
        let kind = self.integer_kind(index)?;
        let width = member_width(kind);
        if width < 8 && new_value >> (width * 8) != 0 {
            return Err(KdError::InvalidArgument(format!(
                "0x{new_value:x} does not fit {width}-byte register {index}"
            )));
        }
        self.raw_bytes[..width].copy_from_slice(&new_value.to_le_bytes()[..width]);
        Ok(())
    }
}

/// Index and lower-cased name of one register.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegisterDescriptor
{
    /// Engine-assigned index.
    pub index: u32,
    /// Lower-cased name.
    pub name: String,
}

/// Register access for one session.
///
/// Borrowed from the session; every call is a round-trip to the engine.
#[derive(Clone, Copy)]
pub struct RegisterBank<'a>
{
    engine: &'a dyn DebugEngine,
}

impl fmt::Debug for RegisterBank<'_>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("RegisterBank").finish_non_exhaustive()
    }
}

impl<'a> RegisterBank<'a>
{
    pub(crate) fn new(engine: &'a dyn DebugEngine) -> Self
    {
        Self { engine }
    }

    /// Number of registers on the target.
    pub fn count(&self) -> KdResult<u32>
    {
        Ok(self.engine.register_count()?)
    }

    /// Lower-cased name of register `index`.
    ///
    /// ## Errors
    ///
    /// - `EngineCallFailure`: unknown index or engine failure
    /// - `BufferSizeMismatch`: the engine changed its answer between the
    ///   sizing call and the filling call
    pub fn name(&self, index: u32) -> KdResult<String>
    {
        let buffer = sized_query("register name", |buffer| self.engine.register_description(index, buffer))?;
        Ok(trim_padding(&buffer).to_ascii_lowercase())
    }

    /// Names of all registers, in index order.
    pub fn list(&self) -> KdResult<Vec<String>>
    {
        (0..self.count()?).map(|index| self.name(index)).collect()
    }

    /// All registers with their indices.
    pub fn descriptors(&self) -> KdResult<Vec<RegisterDescriptor>>
    {
        (0..self.count()?)
            .map(|index| Ok(RegisterDescriptor { index, name: self.name(index)? }))
            .collect()
    }

    /// Ask the engine for the index of a register by name.
    pub fn index_of(&self, name: &str) -> KdResult<u32>
    {
        Ok(self.engine.register_index_by_name(&name.to_ascii_lowercase())?)
    }

    /// Find `name` (case-insensitive) in [`list`](Self::list).
    fn lookup(&self, name: &str) -> KdResult<u32>
    {
        let wanted = name.to_ascii_lowercase();
        let position = self
            .list()?
            .iter()
            .position(|candidate| *candidate == wanted)
            .ok_or_else(|| KdError::UnknownRegister(name.to_string()))?;
        u32::try_from(position).map_err(|_| KdError::UnknownRegister(name.to_string()))
    }

    /// Current value of register `index`.
    pub fn value(&self, index: u32) -> KdResult<RegisterValue>
    {
        let raw = self.engine.register_value(index)?;
        let value = raw.decode(index)?;
        trace!(index, %value, "read register");
        Ok(value)
    }

    /// Current value of the register called `name` (any case).
    ///
    /// ## Errors
    ///
    /// - `UnknownRegister`: no register has that name
    /// - plus everything [`value`](Self::value) can return
    pub fn value_by_name(&self, name: &str) -> KdResult<RegisterValue>
    {
        self.value(self.lookup(name)?)
    }

    /// Overwrite register `index`.
    ///
    /// The engine only accepts a value together with its kind, so the current
    /// value is read first and only its live member is replaced.
    pub fn set_value(&self, index: u32, new_value: u64) -> KdResult<()>
    {
        let mut raw = self.engine.register_value(index)?;
        raw.encode(index, new_value)?;
        trace!(index, new_value, "write register");
        Ok(self.engine.set_register_value(index, &raw)?)
    }

    /// Overwrite the register called `name` (any case).
    pub fn set_value_by_name(&self, name: &str, new_value: u64) -> KdResult<()>
    {
        self.set_value(self.lookup(name)?, new_value)
    }

    /// Have the engine print every register to its output.
    pub fn output(&self) -> KdResult<()>
    {
        Ok(self.engine.output_registers()?)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn raw(kind: RegisterKind, bytes: &[u8]) -> DebugValue
    {
        let mut value = DebugValue {
            value_type: kind.raw(),
            ..DebugValue::default()
        };
        value.raw_bytes[..bytes.len()].copy_from_slice(bytes);
        value
    }

    #[test]
    fn debug_value_layout_matches_engine()
    {
        assert_eq!(std::mem::size_of::<DebugValue>(), 32);
        assert_eq!(std::mem::align_of::<DebugValue>(), 8);
    }

    #[test]
    fn decode_reads_only_the_live_member()
    {
        let value = raw(RegisterKind::Int16, &[0x34, 0x12, 0xff, 0xff]);
        assert_eq!(value.decode(0).unwrap(), RegisterValue::Int16(0x1234));
    }

    #[test]
    fn invalid_and_unsupported_are_distinct()
    {
        let invalid = DebugValue::default();
        assert!(matches!(invalid.decode(3), Err(KdError::InvalidRegisterValue { index: 3 })));

        let float = raw(RegisterKind::Float64, &[0; 8]);
        assert!(matches!(
            float.decode(4),
            Err(KdError::UnsupportedRegisterType { index: 4, kind: 6 })
        ));

        let unknown = DebugValue {
            value_type: 42,
            ..DebugValue::default()
        };
        assert!(matches!(
            unknown.decode(5),
            Err(KdError::UnsupportedRegisterType { index: 5, kind: 42 })
        ));
    }

    #[test]
    fn encode_preserves_surrounding_bytes()
    {
        let mut value = raw(RegisterKind::Int8, &[0x11, 0x22, 0x33]);
        value.encode(0, 0xaa).unwrap();
        assert_eq!(&value.raw_bytes[..3], &[0xaa, 0x22, 0x33]);
        assert_eq!(value.value_type, RegisterKind::Int8.raw());
    }

    #[test]
    fn encode_rejects_values_wider_than_member()
    {
        let mut value = raw(RegisterKind::Int32, &[0; 4]);
        assert!(matches!(value.encode(0, 0x1_0000_0000), Err(KdError::InvalidArgument(_))));
        assert!(matches!(
            DebugValue::default().encode(0, 1),
            Err(KdError::InvalidRegisterValue { .. })
        ));
    }

    #[test]
    fn register_value_converts_to_debug_value()
    {
        let raw: DebugValue = RegisterValue::Int32(0xdead_beef).into();
        assert_eq!(raw.value_type, 3);
        assert_eq!(raw.decode(0).unwrap(), RegisterValue::Int32(0xdead_beef));
    }

    #[test]
    fn display_pads_to_member_width()
    {
        assert_eq!(RegisterValue::Int8(0xa).to_string(), "0x0a");
        assert_eq!(RegisterValue::Int64(0x10).to_string(), "0x0000000000000010");
    }
}
