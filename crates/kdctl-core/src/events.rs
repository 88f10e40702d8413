//! # Debug Events
//!
//! Event categories, the interest mask, and decoding of the engine's
//! "last event" record.
//!
//! The engine reports its most recent event as a type bit, process and thread
//! ids, a blob of type-dependent extra information, and a description string.
//! [`decode`] turns that into a [`LastEvent`] using a fixed table: every type
//! bit the engine can report appears in it exactly once, together with the
//! binary layout of its extra information (if it has any). A type bit outside
//! the table is an error, and so is extra information of the wrong size.

use std::fmt;
use std::ops::BitOr;

use crate::buffer::trim_padding;
use crate::error::{KdError, KdResult};

/// Event category. Each value is a single bit of an [`EventMask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType
{
    /// A breakpoint fired.
    Breakpoint,
    /// The target raised an exception.
    Exception,
    /// A thread was created.
    CreateThread,
    /// A thread exited.
    ExitThread,
    /// A process was created.
    CreateProcess,
    /// A process exited.
    ExitProcess,
    /// A module was loaded.
    LoadModule,
    /// A module was unloaded.
    UnloadModule,
    /// A system error occurred.
    SystemError,
    /// The session status changed.
    SessionStatus,
    /// Target state changed (memory, registers).
    ChangeDebuggeeState,
    /// Engine state changed.
    ChangeEngineState,
    /// Symbol state changed.
    ChangeSymbolState,
}

impl EventType
{
    /// Every event type, in bit order.
    pub const ALL: [EventType; 13] = [
        Self::Breakpoint,
        Self::Exception,
        Self::CreateThread,
        Self::ExitThread,
        Self::CreateProcess,
        Self::ExitProcess,
        Self::LoadModule,
        Self::UnloadModule,
        Self::SystemError,
        Self::SessionStatus,
        Self::ChangeDebuggeeState,
        Self::ChangeEngineState,
        Self::ChangeSymbolState,
    ];

    /// The event's bit value.
    #[must_use]
    pub const fn bit(self) -> u32
    {
        match self {
            Self::Breakpoint => 0x0000_0001,
            Self::Exception => 0x0000_0002,
            Self::CreateThread => 0x0000_0004,
            Self::ExitThread => 0x0000_0008,
            Self::CreateProcess => 0x0000_0010,
            Self::ExitProcess => 0x0000_0020,
            Self::LoadModule => 0x0000_0040,
            Self::UnloadModule => 0x0000_0080,
            Self::SystemError => 0x0000_0100,
            Self::SessionStatus => 0x0000_0200,
            Self::ChangeDebuggeeState => 0x0000_0400,
            Self::ChangeEngineState => 0x0000_0800,
            Self::ChangeSymbolState => 0x0000_1000,
        }
    }

    /// Decode a single event bit.
    #[must_use]
    pub fn from_bit(bit: u32) -> Option<Self>
    {
        LAST_EVENT_TABLE.iter().map(|row| row.event).find(|event| event.bit() == bit)
    }

    /// Engine name of the event.
    #[must_use]
    pub fn name(self) -> &'static str
    {
        entry(self).name
    }

    /// Layout of the event's extra information, if any.
    #[must_use]
    pub fn extra_shape(self) -> Option<ExtraShape>
    {
        entry(self).shape
    }
}

/// Set of event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventMask(u32);

impl EventMask
{
    /// No categories.
    pub const EMPTY: Self = Self(0);

    /// Build a mask from raw bits.
    #[must_use]
    pub const fn from_raw(bits: u32) -> Self
    {
        Self(bits)
    }

    /// Raw bits.
    #[must_use]
    pub const fn raw(self) -> u32
    {
        self.0
    }

    /// Whether `event` is part of the mask.
    #[must_use]
    pub const fn contains(self, event: EventType) -> bool
    {
        self.0 & event.bit() != 0
    }
}

impl From<EventType> for EventMask
{
    fn from(event: EventType) -> Self
    {
        Self(event.bit())
    }
}

impl BitOr for EventMask
{
    type Output = EventMask;

    fn bitor(self, rhs: Self) -> Self::Output
    {
        Self(self.0 | rhs.0)
    }
}

impl BitOr<EventType> for EventType
{
    type Output = EventMask;

    fn bitor(self, rhs: EventType) -> Self::Output
    {
        EventMask(self.bit() | rhs.bit())
    }
}

/// Binary layout of an event's extra information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraShape
{
    /// `{ id: u32 }`
    Breakpoint,
    /// `{ record: EXCEPTION_RECORD64, first_chance: u32 }`
    Exception,
    /// `{ exit_code: u32 }`
    ExitThread,
    /// `{ exit_code: u32 }`
    ExitProcess,
    /// `{ base: u64 }`
    LoadModule,
    /// `{ base: u64 }`
    UnloadModule,
    /// `{ error: u32, level: u32 }`
    SystemError,
}

impl ExtraShape
{
    /// Exact size in bytes the engine delivers for this layout.
    #[must_use]
    pub const fn size(self) -> usize
    {
        match self {
            Self::Breakpoint | Self::ExitThread | Self::ExitProcess => 4,
            Self::LoadModule | Self::UnloadModule | Self::SystemError => 8,
            Self::Exception => EXCEPTION_INFO_SIZE,
        }
    }
}

struct TableEntry
{
    event: EventType,
    name: &'static str,
    shape: Option<ExtraShape>,
}

static LAST_EVENT_TABLE: [TableEntry; 13] = [
    TableEntry { event: EventType::Breakpoint, name: "DEBUG_EVENT_BREAKPOINT", shape: Some(ExtraShape::Breakpoint) },
    TableEntry { event: EventType::Exception, name: "DEBUG_EVENT_EXCEPTION", shape: Some(ExtraShape::Exception) },
    TableEntry { event: EventType::CreateThread, name: "DEBUG_EVENT_CREATE_THREAD", shape: None },
    TableEntry { event: EventType::ExitThread, name: "DEBUG_EVENT_EXIT_THREAD", shape: Some(ExtraShape::ExitThread) },
    TableEntry { event: EventType::CreateProcess, name: "DEBUG_EVENT_CREATE_PROCESS", shape: None },
    TableEntry { event: EventType::ExitProcess, name: "DEBUG_EVENT_EXIT_PROCESS", shape: Some(ExtraShape::ExitProcess) },
    TableEntry { event: EventType::LoadModule, name: "DEBUG_EVENT_LOAD_MODULE", shape: Some(ExtraShape::LoadModule) },
    TableEntry { event: EventType::UnloadModule, name: "DEBUG_EVENT_UNLOAD_MODULE", shape: Some(ExtraShape::UnloadModule) },
    TableEntry { event: EventType::SystemError, name: "DEBUG_EVENT_SYSTEM_ERROR", shape: Some(ExtraShape::SystemError) },
    TableEntry { event: EventType::SessionStatus, name: "DEBUG_EVENT_SESSION_STATUS", shape: None },
    TableEntry { event: EventType::ChangeDebuggeeState, name: "DEBUG_EVENT_CHANGE_DEBUGGEE_STATE", shape: None },
    TableEntry { event: EventType::ChangeEngineState, name: "DEBUG_EVENT_CHANGE_ENGINE_STATE", shape: None },
    TableEntry { event: EventType::ChangeSymbolState, name: "DEBUG_EVENT_CHANGE_SYMBOL_STATE", shape: None },
];

fn entry(event: EventType) -> &'static TableEntry
{
    // Table rows are in bit order, so the row index is the bit position.
    &LAST_EVENT_TABLE[event.bit().trailing_zeros() as usize]
}

/// Number of information slots in an exception record.
pub const EXCEPTION_MAXIMUM_PARAMETERS: usize = 15;

/// Size of `EXCEPTION_RECORD64`.
pub const EXCEPTION_RECORD_SIZE: usize = 152;

/// Size of the exception event's extra information (record + first-chance
/// flag, padded to 8 bytes).
pub const EXCEPTION_INFO_SIZE: usize = 160;

/// An exception raised by the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRecord
{
    /// Exception code (`0x80000003` for a breakpoint instruction, ...).
    pub code: u32,
    /// Exception flags.
    pub flags: u32,
    /// Address of a nested exception record, or zero.
    pub nested_record: u64,
    /// Faulting address.
    pub address: u64,
    /// Exception-specific parameters (at most 15 are kept).
    pub information: Vec<u64>,
    /// Whether this is the first time the engine sees this exception.
    pub first_chance: bool,
}

impl ExceptionRecord
{
    /// Decode the 152-byte `EXCEPTION_RECORD64` layout.
    ///
    /// `bytes` must be at least [`EXCEPTION_RECORD_SIZE`] long.
    #[must_use]
    pub fn from_record_bytes(bytes: &[u8], first_chance: bool) -> Self
    {
        let count = (read_u32(bytes, 24) as usize).min(EXCEPTION_MAXIMUM_PARAMETERS);
        Self {
            code: read_u32(bytes, 0),
            flags: read_u32(bytes, 4),
            nested_record: read_u64(bytes, 8),
            address: read_u64(bytes, 16),
            information: (0..count).map(|slot| read_u64(bytes, 32 + slot * 8)).collect(),
            first_chance,
        }
    }

    /// Encode into the exception event's extra-information layout.
    #[must_use]
    pub fn to_info_bytes(&self) -> Vec<u8>
    {
        let mut bytes = vec![0u8; EXCEPTION_INFO_SIZE];
        let count = self.information.len().min(EXCEPTION_MAXIMUM_PARAMETERS);
        bytes[0..4].copy_from_slice(&self.code.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.flags.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.nested_record.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.address.to_le_bytes());
        bytes[24..28].copy_from_slice(&(count as u32).to_le_bytes());
        for (slot, value) in self.information.iter().take(count).enumerate() {
            let at = 32 + slot * 8;
            bytes[at..at + 8].copy_from_slice(&value.to_le_bytes());
        }
        bytes[EXCEPTION_RECORD_SIZE..EXCEPTION_RECORD_SIZE + 4].copy_from_slice(&u32::from(self.first_chance).to_le_bytes());
        bytes
    }
}

impl fmt::Display for ExceptionRecord
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(
            f,
            "{:#010x} at 0x{:x} ({} chance)",
            self.code,
            self.address,
            if self.first_chance { "first" } else { "second" }
        )
    }
}

/// Decoded type-dependent information of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraInformation
{
    /// Breakpoint that fired.
    Breakpoint
    {
        /// Engine breakpoint id.
        id: u32,
    },
    /// Exception raised by the target.
    Exception(ExceptionRecord),
    /// Thread exit.
    ExitThread
    {
        /// Thread exit code.
        exit_code: u32,
    },
    /// Process exit.
    ExitProcess
    {
        /// Process exit code.
        exit_code: u32,
    },
    /// Module load.
    LoadModule
    {
        /// Module base address.
        base: u64,
    },
    /// Module unload.
    UnloadModule
    {
        /// Module base address.
        base: u64,
    },
    /// System error.
    SystemError
    {
        /// Error code.
        error: u32,
        /// Severity level.
        level: u32,
    },
}

impl ExtraInformation
{
    fn decode(shape: ExtraShape, bytes: &[u8]) -> Self
    {
        match shape {
            ExtraShape::Breakpoint => Self::Breakpoint { id: read_u32(bytes, 0) },
            ExtraShape::Exception => Self::Exception(ExceptionRecord::from_record_bytes(
                bytes,
                read_u32(bytes, EXCEPTION_RECORD_SIZE) != 0,
            )),
            ExtraShape::ExitThread => Self::ExitThread { exit_code: read_u32(bytes, 0) },
            ExtraShape::ExitProcess => Self::ExitProcess { exit_code: read_u32(bytes, 0) },
            ExtraShape::LoadModule => Self::LoadModule { base: read_u64(bytes, 0) },
            ExtraShape::UnloadModule => Self::UnloadModule { base: read_u64(bytes, 0) },
            ExtraShape::SystemError => Self::SystemError {
                error: read_u32(bytes, 0),
                level: read_u32(bytes, 4),
            },
        }
    }
}

/// The engine's most recent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastEvent
{
    /// Event category.
    pub event_type: EventType,
    /// Engine process id.
    pub process_id: u32,
    /// Engine thread id.
    pub thread_id: u32,
    /// Decoded extra information, for categories that carry any.
    pub extra: Option<ExtraInformation>,
    /// Engine description with padding removed.
    pub description: String,
}

impl LastEvent
{
    /// Engine name of the event category.
    #[must_use]
    pub fn name(&self) -> &'static str
    {
        self.event_type.name()
    }
}

impl fmt::Display for LastEvent
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "<LastEvent {} ({})>", self.name(), self.description)
    }
}

/// Decode a last-event record.
///
/// ## Errors
///
/// - `UnknownEventType`: `event_type` is not a single bit from the table
/// - `ExtraInfoSizeMismatch`: `extra` is not exactly the size of the
///   event's declared layout
pub fn decode(event_type: u32, process_id: u32, thread_id: u32, extra: &[u8], description: &[u8]) -> KdResult<LastEvent>
{
    let event = EventType::from_bit(event_type).ok_or(KdError::UnknownEventType(event_type))?;
    let extra = match event.extra_shape() {
        Some(shape) => {
            if extra.len() != shape.size() {
                return Err(KdError::ExtraInfoSizeMismatch {
                    event: event.name(),
                    expected: shape.size(),
                    actual: extra.len(),
                });
            }
            Some(ExtraInformation::decode(shape, extra))
        }
        None => None,
    };
    Ok(LastEvent {
        event_type: event,
        process_id,
        thread_id,
        extra,
        description: trim_padding(description),
    })
}

fn read_u32(bytes: &[u8], at: usize) -> u32
{
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(word)
}

fn read_u64(bytes: &[u8], at: usize) -> u64
{
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(word)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn table_rows_are_in_bit_order()
    {
        for (position, row) in LAST_EVENT_TABLE.iter().enumerate() {
            assert_eq!(row.event.bit(), 1 << position);
            assert_eq!(entry(row.event).name, row.name);
        }
    }

    #[test]
    fn from_bit_rejects_combined_and_unknown_bits()
    {
        assert_eq!(EventType::from_bit(0x40), Some(EventType::LoadModule));
        assert_eq!(EventType::from_bit(0x3), None);
        assert_eq!(EventType::from_bit(0x2000), None);
        assert_eq!(EventType::from_bit(0), None);
    }

    #[test]
    fn mask_combines_bits()
    {
        let mask = EventType::Breakpoint | EventType::Exception;
        assert_eq!(mask.raw(), 0x3);
        assert!(mask.contains(EventType::Exception));
        assert!(!mask.contains(EventType::LoadModule));
    }

    #[test]
    fn exception_record_round_trips_through_info_layout()
    {
        let record = ExceptionRecord {
            code: 0xc000_0005,
            flags: 0,
            nested_record: 0,
            address: 0xffff_f800_1234_5678,
            information: vec![1, 0xdead],
            first_chance: true,
        };
        let bytes = record.to_info_bytes();
        assert_eq!(bytes.len(), EXCEPTION_INFO_SIZE);
        let event = decode(0x2, 4, 8, &bytes, b"Access violation\0").unwrap();
        assert_eq!(event.extra, Some(ExtraInformation::Exception(record)));
    }

    #[test]
    fn system_error_reads_both_fields()
    {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&5u32.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes());
        let event = decode(0x100, 0, 0, &bytes, b"").unwrap();
        assert_eq!(event.extra, Some(ExtraInformation::SystemError { error: 5, level: 2 }));
    }

    #[test]
    fn shapeless_events_carry_no_extra()
    {
        let event = decode(0x400, 1, 2, &[], b"state\0").unwrap();
        assert_eq!(event.extra, None);
        assert_eq!(event.to_string(), "<LastEvent DEBUG_EVENT_CHANGE_DEBUGGEE_STATE (state)>");
    }
}
