//! Common module for library exports

pub use crate::breakpoints::builder::BreakpointBuilder;
pub use crate::breakpoints::{Breakpoint, BreakpointId};
pub use crate::dispatch::{ExceptionPolicy, HitContext};
pub use crate::engine::{create_engine, AttachMode, BreakpointKind, DebugEngine, ExecutionStatus};
pub use crate::error::{KdError, KdResult};
pub use crate::events::{EventType, ExceptionRecord, ExtraInformation, LastEvent};
pub use crate::registers::RegisterValue;
pub use crate::session::{Session, SessionOptions, SessionState};
pub use crate::stack::StackFrame;
pub use crate::symbols::Symbol;
pub use crate::types::{Address, AddressWidth};
