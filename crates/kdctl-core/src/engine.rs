//! # Debugging Engine Boundary
//!
//! The interface between the session layer and the native debugging engine.
//!
//! Every method of [`DebugEngine`] corresponds to exactly one engine interface
//! method and returns the engine's status unchanged on failure. Nothing in
//! this layer retries, caches or interprets: that is the session's job.
//!
//! ## Implementations
//!
//! - **Windows**: [`DbgEngClient`](crate::platform::windows::DbgEngClient)
//!   drives `dbgeng.dll` through its COM interfaces.
//! - **Everywhere**: [`SimulatedEngine`](crate::sim::SimulatedEngine) keeps a
//!   scripted target in memory (used by the test suite).
//!
//! ## Sized queries
//!
//! Methods that return variable-length data take an `Option<&mut [u8]>`
//! buffer and return the size the engine needs. Passing `None` asks only for
//! the size; the caller then allocates exactly that much and calls again.
//!
//! ## Re-entrancy
//!
//! [`DebugEngine::wait_for_event`] blocks the calling thread until the engine
//! decides to stop, and may call back into the supplied [`EventCallbacks`]
//! any number of times *before* it returns. Implementations must deliver
//! callbacks on the calling thread and only for the categories passed to
//! [`DebugEngine::install_event_callbacks`].

use crate::error::{EngineResult, KdResult};
use crate::events::{EventMask, EventType, ExceptionRecord};
use crate::registers::DebugValue;
use crate::stack::RawStackFrame;

/// Timeout value meaning "wait forever".
pub const INFINITE: u32 = u32::MAX;

/// Breakpoint id value asking the engine to choose the id.
pub const ANY_ID: u32 = u32::MAX;

/// Breakpoint flag: the breakpoint is armed.
pub const BREAKPOINT_ENABLED: u32 = 0x0000_0004;

/// Opaque engine reference to a breakpoint object.
///
/// Only meaningful to the engine that issued it. The session never
/// dereferences it; it maps handles to ids through
/// [`DebugEngine::breakpoint_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BreakpointHandle(pub u64);

/// How to reach the kernel being debugged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttachMode
{
    /// Remote kernel over a transport described by the connection string
    /// (`net:port=...,key=...`, `com:port=...`, ...).
    #[default]
    KernelConnection,
    /// The kernel of the machine the client runs on.
    LocalKernel,
}

impl AttachMode
{
    /// Engine flag value for `AttachKernel`.
    #[must_use]
    pub const fn raw(self) -> u32
    {
        match self {
            Self::KernelConnection => 0,
            Self::LocalKernel => 1,
        }
    }
}

/// Interrupt request kinds understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind
{
    /// Break into the target as soon as possible.
    Active,
    /// Break into the engine without forcing the target to stop.
    Passive,
    /// Abort the current wait.
    Exit,
}

impl InterruptKind
{
    /// Engine flag value for `SetInterrupt`.
    #[must_use]
    pub const fn raw(self) -> u32
    {
        match self {
            Self::Active => 0,
            Self::Passive => 1,
            Self::Exit => 2,
        }
    }
}

/// How `EndSession` should leave the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndSessionMode
{
    /// Only release the engine's resources.
    Passive,
    /// Terminate the target.
    ActiveTerminate,
    /// Detach and let the target keep running.
    ActiveDetach,
}

impl EndSessionMode
{
    /// Engine flag value for `EndSession`.
    #[must_use]
    pub const fn raw(self) -> u32
    {
        match self {
            Self::Passive => 0,
            Self::ActiveTerminate => 1,
            Self::ActiveDetach => 2,
        }
    }
}

/// Kind of breakpoint requested from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BreakpointKind
{
    /// Instruction breakpoint.
    #[default]
    Code,
    /// Processor data breakpoint.
    Data,
}

impl BreakpointKind
{
    /// Engine value for `AddBreakpoint`.
    #[must_use]
    pub const fn raw(self) -> u32
    {
        match self {
            Self::Code => 0,
            Self::Data => 1,
        }
    }
}

/// Execution status, both as reported by the engine and as returned by event
/// handlers to tell the engine what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionStatus
{
    /// Handler has no opinion.
    NoChange,
    /// Run.
    Go,
    /// Run, marking the exception handled.
    GoHandled,
    /// Run, passing the exception to the target.
    GoNotHandled,
    /// Step over calls.
    StepOver,
    /// Step into calls.
    StepInto,
    /// Stop.
    Break,
    /// No target.
    NoDebuggee,
    /// Step to the next branch.
    StepBranch,
    /// Ignore the event.
    IgnoreEvent,
    /// Session restart requested.
    RestartRequested,
}

impl ExecutionStatus
{
    /// Engine status value.
    #[must_use]
    pub const fn raw(self) -> u32
    {
        match self {
            Self::NoChange => 0,
            Self::Go => 1,
            Self::GoHandled => 2,
            Self::GoNotHandled => 3,
            Self::StepOver => 4,
            Self::StepInto => 5,
            Self::Break => 6,
            Self::NoDebuggee => 7,
            Self::StepBranch => 8,
            Self::IgnoreEvent => 9,
            Self::RestartRequested => 10,
        }
    }

    /// Decode an engine status value.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self>
    {
        Some(match raw {
            0 => Self::NoChange,
            1 => Self::Go,
            2 => Self::GoHandled,
            3 => Self::GoNotHandled,
            4 => Self::StepOver,
            5 => Self::StepInto,
            6 => Self::Break,
            7 => Self::NoDebuggee,
            8 => Self::StepBranch,
            9 => Self::IgnoreEvent,
            10 => Self::RestartRequested,
            _ => return None,
        })
    }
}

/// Fixed part of the engine's last-event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LastEventHeader
{
    /// Event type bit.
    pub event_type: u32,
    /// Engine process id.
    pub process_id: u32,
    /// Engine thread id.
    pub thread_id: u32,
    /// Bytes of type-dependent extra information available.
    pub extra_size: usize,
    /// Bytes of description text available, including the terminator.
    pub description_size: usize,
}

/// Receiver for text the engine prints (register dumps, stack dumps, ...).
///
/// Called with the engine's output mask and one chunk of text.
pub type OutputSink = Box<dyn FnMut(u32, &str)>;

/// Handlers the engine invokes from inside [`DebugEngine::wait_for_event`].
pub trait EventCallbacks
{
    /// A breakpoint fired.
    fn breakpoint(&mut self, handle: BreakpointHandle) -> ExecutionStatus;

    /// The target raised an exception.
    fn exception(&mut self, record: &ExceptionRecord) -> ExecutionStatus;

    /// Any other event category. Acknowledged without action by default.
    fn other(&mut self, _event: EventType) -> ExecutionStatus
    {
        ExecutionStatus::NoChange
    }
}

/// The debugging engine's interfaces, one method per engine call.
pub trait DebugEngine
{
    // --- client ---

    /// Attach to a kernel.
    fn attach_kernel(&self, mode: AttachMode, connection: &str) -> EngineResult<()>;

    /// Obtain the auxiliary interfaces (control, registers, symbols, data
    /// spaces, system objects) from the attached client.
    fn acquire_interfaces(&self) -> EngineResult<()>;

    /// Install or remove the receiver for engine output.
    fn set_output_callbacks(&self, sink: Option<OutputSink>) -> EngineResult<()>;

    /// Register for event delivery. The engine reads `interest` once.
    fn install_event_callbacks(&self, interest: EventMask) -> EngineResult<()>;

    /// End the debugging session.
    fn end_session(&self, mode: EndSessionMode) -> EngineResult<()>;

    // --- control ---

    /// Request an interrupt.
    fn set_interrupt(&self, kind: InterruptKind) -> EngineResult<()>;

    /// Whether the target uses 64-bit pointers.
    fn is_pointer_64bit(&self) -> EngineResult<bool>;

    /// Current raw execution status.
    fn execution_status(&self) -> EngineResult<u32>;

    /// Change the execution status.
    fn set_execution_status(&self, status: ExecutionStatus) -> EngineResult<()>;

    /// Block until the engine produces a stopping event or the timeout elapses.
    ///
    /// `callbacks` may be invoked re-entrantly before this returns.
    fn wait_for_event(&self, timeout_ms: u32, callbacks: Option<&mut dyn EventCallbacks>) -> EngineResult<()>;

    /// Sized query of the last event. Pass `None` buffers to learn the sizes.
    fn last_event_information(
        &self,
        extra: Option<&mut [u8]>,
        description: Option<&mut [u8]>,
    ) -> EngineResult<LastEventHeader>;

    /// Fill `frames` with the current stack, returning how many were written.
    fn stack_trace(&self, frames: &mut [RawStackFrame]) -> EngineResult<usize>;

    /// Have the engine print the current stack to its output.
    fn output_stack_trace(&self, frame_count: u32, flags: u32) -> EngineResult<()>;

    /// Create a breakpoint. `desired_id` is [`ANY_ID`] to let the engine pick.
    fn add_breakpoint(&self, kind: BreakpointKind, desired_id: u32) -> EngineResult<BreakpointHandle>;

    /// Delete a breakpoint.
    fn remove_breakpoint(&self, handle: BreakpointHandle) -> EngineResult<()>;

    /// Engine id of a breakpoint.
    fn breakpoint_id(&self, handle: BreakpointHandle) -> EngineResult<u32>;

    /// Set the address a breakpoint triggers at.
    fn set_breakpoint_offset(&self, handle: BreakpointHandle, offset: u64) -> EngineResult<()>;

    /// Add flags (such as [`BREAKPOINT_ENABLED`]) to a breakpoint.
    fn add_breakpoint_flags(&self, handle: BreakpointHandle, flags: u32) -> EngineResult<()>;

    // --- registers ---

    /// Number of registers.
    fn register_count(&self) -> EngineResult<u32>;

    /// Sized query of a register name. Returns the size including terminator.
    fn register_description(&self, index: u32, name: Option<&mut [u8]>) -> EngineResult<usize>;

    /// Engine-side lookup of a register index.
    fn register_index_by_name(&self, name: &str) -> EngineResult<u32>;

    /// Raw register value.
    fn register_value(&self, index: u32) -> EngineResult<DebugValue>;

    /// Overwrite a register value.
    fn set_register_value(&self, index: u32, value: &DebugValue) -> EngineResult<()>;

    /// Have the engine print all registers to its output.
    fn output_registers(&self) -> EngineResult<()>;

    // --- symbols ---

    /// Replace the engine's symbol options.
    fn set_symbol_options(&self, options: u32) -> EngineResult<()>;

    /// Replace the engine's symbol search path.
    fn set_symbol_path(&self, path: &str) -> EngineResult<()>;

    /// Sized query of the symbol containing `offset`.
    ///
    /// Returns `None` when no symbol covers the offset, otherwise the name
    /// size (including terminator) and the displacement from the symbol.
    fn symbol_name_by_offset(&self, offset: u64, name: Option<&mut [u8]>) -> EngineResult<Option<(usize, u64)>>;

    // --- data spaces ---

    /// Read target virtual memory, returning the byte count read.
    fn read_virtual(&self, offset: u64, buffer: &mut [u8]) -> EngineResult<usize>;

    /// Write target virtual memory, returning the byte count written.
    fn write_virtual(&self, offset: u64, data: &[u8]) -> EngineResult<usize>;

    // --- system objects ---

    /// Kernel address of the current thread object.
    fn current_thread_data_offset(&self) -> EngineResult<u64>;

    /// Kernel address of the current process object.
    fn current_process_data_offset(&self) -> EngineResult<u64>;

    /// Address of the current process environment block.
    fn current_process_peb(&self) -> EngineResult<u64>;
}

/// Create the native debugging engine for this platform.
///
/// ## Errors
///
/// - `EngineCallFailure`: the engine library refused to create a client
/// - `UnsupportedPlatform`: no native engine exists on this platform
pub fn create_engine() -> KdResult<Box<dyn DebugEngine>>
{
    #[cfg(windows)]
    {
        Ok(Box::new(crate::platform::windows::DbgEngClient::new()?))
    }

    #[cfg(not(windows))]
    {
        Err(crate::error::KdError::UnsupportedPlatform(std::env::consts::OS))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn execution_status_round_trips_known_values()
    {
        for raw in 0..=10 {
            let status = ExecutionStatus::from_raw(raw).unwrap();
            assert_eq!(status.raw(), raw);
        }
        assert_eq!(ExecutionStatus::from_raw(11), None);
    }

    #[test]
    fn attach_mode_flags()
    {
        assert_eq!(AttachMode::KernelConnection.raw(), 0);
        assert_eq!(AttachMode::LocalKernel.raw(), 1);
        assert_eq!(AttachMode::default(), AttachMode::KernelConnection);
    }
}
