//! # kdctl-core
//!
//! Session control for remote kernel debugging.
//!
//! This crate sits between a native debugging engine and its user, and
//! provides:
//! - Attaching to a kernel over a connection string and detaching again
//! - Register inspection and modification by name
//! - Breakpoints with Rust triggers and engine-assigned ids
//! - Event dispatch while the target runs
//! - Stack walks with symbolized frames
//! - Virtual memory access sized to the target's pointer width
//!
//! ## Platform Support
//!
//! - **Windows**: Uses the Debugger Engine (`dbgeng.dll`) over COM
//! - **Everywhere else**: [`create_engine`] reports the platform as unsupported;
//!   the [`sim::SimulatedEngine`] still runs anywhere
//!
//! ## Why unsafe code is needed
//!
//! The engine is only reachable through COM vtables and hands us raw
//! pointers to breakpoints and exception records. Those calls are confined
//! to [`platform`]; everything above [`engine::DebugEngine`] is safe code.

#![allow(unsafe_code)] // Required for the DbgEng COM interfaces

pub mod breakpoints;
mod buffer;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod memory;
pub mod platform;
pub mod prelude;
pub mod registers;
pub mod session;
pub mod sim;
pub mod stack;
pub mod symbols;
pub mod types;

pub use breakpoints::builder::BreakpointBuilder;
pub use breakpoints::{Breakpoint, BreakpointId, BreakpointRegistry};
pub use dispatch::{EventDispatcher, ExceptionPolicy, HitContext};
pub use engine::{create_engine, DebugEngine, ExecutionStatus};
// Re-export commonly used types
pub use error::{KdError, KdResult};
pub use events::{EventType, ExceptionRecord, LastEvent};
#[cfg(windows)]
pub use platform::windows::DbgEngClient;
pub use registers::{RegisterBank, RegisterValue};
pub use session::{Session, SessionOptions, SessionState};
pub use stack::{StackFrame, StackWalker};
pub use types::Address;
