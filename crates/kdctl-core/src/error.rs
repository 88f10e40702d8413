//! # Error Types
//!
//! General error handling for kernel debugging sessions.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.

use std::fmt;

use thiserror::Error;

use crate::events::ExceptionRecord;

/// Raw status code returned by a debugging engine call.
///
/// The engine reports every call result as a 32-bit status (an `HRESULT` on
/// Windows). Zero means success; anything else is an engine error that is
/// surfaced unchanged so it can be looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineStatus(pub i32);

impl EngineStatus
{
    /// Successful call.
    pub const OK: Self = Self(0);
    /// `S_FALSE`: success with a negative answer (e.g. "not a 64-bit target").
    pub const FALSE: Self = Self(1);
    /// `E_FAIL`: unspecified failure.
    pub const FAIL: Self = Self(0x8000_4005_u32 as i32);
    /// `E_INVALIDARG`: one of the arguments was rejected.
    pub const INVALID_ARG: Self = Self(0x8007_0057_u32 as i32);
    /// `E_NOINTERFACE`: the requested auxiliary interface is not available.
    pub const NO_INTERFACE: Self = Self(0x8000_4002_u32 as i32);
    /// `E_NOTIMPL`: the engine does not implement this method.
    pub const NOT_IMPLEMENTED: Self = Self(0x8000_4001_u32 as i32);

    /// Get the raw status value.
    #[must_use]
    pub const fn raw(self) -> i32
    {
        self.0
    }

    /// Convert a raw status into a `Result`, treating every non-zero value as failure.
    ///
    /// `S_FALSE` counts as a failure here. Callers that expect it (such as the
    /// pointer-width query) match on it first.
    pub const fn check(raw: i32) -> std::result::Result<(), Self>
    {
        if raw == 0 {
            Ok(())
        } else {
            Err(Self(raw))
        }
    }
}

impl fmt::Display for EngineStatus
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:08x}", self.0 as u32)
    }
}

/// Result of a single engine call.
pub type EngineResult<T> = std::result::Result<T, EngineStatus>;

/// Main error type for session operations
///
/// ## Error Categories
///
/// 1. **Engine errors**: EngineCallFailure, UnsupportedPlatform
/// 2. **Register errors**: UnknownRegister, InvalidRegisterValue, UnsupportedRegisterType
/// 3. **Protocol errors**: BufferSizeMismatch, ExtraInfoSizeMismatch, UnknownEventType
/// 4. **Breakpoint errors**: DoubleBindBreakpoint, BreakpointIdNotFound, BreakpointRegistryDesync
/// 5. **Execution errors**: UnhandledException, StackCaptureTruncated
/// 6. **Memory errors**: IncompleteMemoryAccess
/// 7. **State errors**: SessionDetached, InvalidArgument
#[derive(Error, Debug)]
pub enum KdError
{
    /// A debugging engine call returned a non-zero status.
    ///
    /// Engine calls are never retried: they are not assumed to be idempotent.
    #[error("Engine call failed with status {0}")]
    EngineCallFailure(EngineStatus),

    /// No register with this name exists on the target.
    #[error("Unknown register <{0}>")]
    UnknownRegister(String),

    /// The engine reported the register value with the invalid discriminant.
    #[error("Register {index} holds an invalid value")]
    InvalidRegisterValue
    {
        /// Engine register index
        index: u32,
    },

    /// The register's value kind is outside the decoded integer subset.
    ///
    /// Floating point and vector registers are reported here rather than
    /// being silently reinterpreted as integers.
    #[error("Register {index} has unsupported value type {kind}")]
    UnsupportedRegisterType
    {
        /// Engine register index
        index: u32,
        /// Raw discriminant reported by the engine
        kind: u32,
    },

    /// The engine reported an event type that is not in the decode table.
    #[error("Unknown event type 0x{0:08x}")]
    UnknownEventType(u32),

    /// The breakpoint is already bound to a session.
    #[error("Breakpoint {0} is already bound to a session")]
    DoubleBindBreakpoint(u32),

    /// No breakpoint with this id is registered.
    #[error("No breakpoint with id {0}")]
    BreakpointIdNotFound(u32),

    /// The engine referenced a breakpoint id the client does not know about.
    ///
    /// Client and engine bookkeeping have diverged; this is not recoverable
    /// within the session.
    #[error("Breakpoint registry out of sync with engine: id {0}")]
    BreakpointRegistryDesync(u32),

    /// The two calls of a sized query reported different buffer sizes.
    #[error("{query}: engine reported {first} bytes, then {second} bytes")]
    BufferSizeMismatch
    {
        /// Which query violated the protocol
        query: &'static str,
        /// Size reported by the sizing call
        first: usize,
        /// Size reported by the filling call
        second: usize,
    },

    /// An event's extra information does not match its declared layout.
    #[error("{event}: extra information is {actual} bytes, expected {expected}")]
    ExtraInfoSizeMismatch
    {
        /// Event name from the decode table
        event: &'static str,
        /// Size of the declared layout
        expected: usize,
        /// Size delivered by the engine
        actual: usize,
    },

    /// A memory transfer moved fewer bytes than requested.
    #[error("Memory access at 0x{address:x}: {actual} of {expected} bytes transferred")]
    IncompleteMemoryAccess
    {
        /// Start of the access
        address: u64,
        /// Bytes requested
        expected: usize,
        /// Bytes the engine transferred
        actual: usize,
    },

    /// Every stack capture attempt filled the requested capacity.
    #[error("Stack trace still truncated at {capacity} frames")]
    StackCaptureTruncated
    {
        /// Capacity of the last attempt
        capacity: usize,
    },

    /// The target raised an exception while the session was waiting.
    #[error("Unhandled exception {0}")]
    UnhandledException(ExceptionRecord),

    /// The session has been detached.
    #[error("Session is detached")]
    SessionDetached,

    /// Invalid argument passed to a session operation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No debugging engine is available on this platform.
    #[error("Debugging engine not available on platform: {0}")]
    UnsupportedPlatform(&'static str),
}

impl From<EngineStatus> for KdError
{
    fn from(status: EngineStatus) -> Self
    {
        KdError::EngineCallFailure(status)
    }
}

/// Convenience type alias for `Result<T, KdError>`
///
/// ```rust
/// use kdctl_core::error::KdResult;
/// fn foo() -> KdResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type KdResult<T> = std::result::Result<T, KdError>;

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn check_maps_zero_to_ok()
    {
        assert_eq!(EngineStatus::check(0), Ok(()));
        assert_eq!(EngineStatus::check(1), Err(EngineStatus::FALSE));
    }

    #[test]
    fn status_displays_as_hex()
    {
        assert_eq!(EngineStatus::FAIL.to_string(), "0x80004005");
    }
}
