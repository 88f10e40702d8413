//! # Stack Walking
//!
//! Captures the current kernel stack from the engine.
//!
//! The engine fills a caller-provided frame array and reports how many frames
//! it wrote, but cannot say how deep the stack really is. A full array may
//! therefore be a truncated stack, so capture starts with room for 100 frames
//! and retries from scratch with 100 more each time the array comes back
//! full, up to 900.
//!
//! Frames keep the raw engine record and trim addresses on access, using the
//! width of the session they were captured from.

use std::fmt;

use tracing::{debug, trace};

use crate::engine::DebugEngine;
use crate::error::{KdError, KdResult};
use crate::symbols::{self, Symbol};
use crate::types::{Address, AddressWidth};

/// Frame slots added per capture attempt.
pub const CAPACITY_STEP: usize = 100;

/// Number of capture attempts before giving up.
pub const MAX_ATTEMPTS: usize = 9;

/// The engine's stack frame record (`DEBUG_STACK_FRAME`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawStackFrame
{
    /// Current instruction.
    pub instruction_offset: u64,
    /// Where this frame returns to.
    pub return_offset: u64,
    /// Frame base.
    pub frame_offset: u64,
    /// Stack pointer.
    pub stack_offset: u64,
    /// Function table entry, or zero.
    pub func_table_entry: u64,
    /// First four stack parameters.
    pub params: [u64; 4],
    /// Unused.
    pub reserved: [u64; 6],
    /// Non-zero for frames synthesized by the engine.
    pub virtual_frame: i32,
    /// Position in the stack, 0 being the innermost.
    pub frame_number: u32,
}

/// One frame of a captured stack.
#[derive(Clone, Copy)]
pub struct StackFrame<'s>
{
    raw: RawStackFrame,
    engine: &'s dyn DebugEngine,
    width: &'static dyn AddressWidth,
}

impl<'s> StackFrame<'s>
{
    pub(crate) fn new(raw: RawStackFrame, engine: &'s dyn DebugEngine, width: &'static dyn AddressWidth) -> Self
    {
        Self { raw, engine, width }
    }

    /// The untrimmed engine record.
    #[must_use]
    pub fn raw(&self) -> &RawStackFrame
    {
        &self.raw
    }

    /// Current instruction.
    #[must_use]
    pub fn instruction_offset(&self) -> Address
    {
        self.width.trim(self.raw.instruction_offset)
    }

    /// Return address.
    #[must_use]
    pub fn return_offset(&self) -> Address
    {
        self.width.trim(self.raw.return_offset)
    }

    /// Frame base.
    #[must_use]
    pub fn frame_offset(&self) -> Address
    {
        self.width.trim(self.raw.frame_offset)
    }

    /// Stack pointer.
    #[must_use]
    pub fn stack_offset(&self) -> Address
    {
        self.width.trim(self.raw.stack_offset)
    }

    /// The four parameter slots.
    #[must_use]
    pub fn params(&self) -> [Address; 4]
    {
        self.raw.params.map(|param| self.width.trim(param))
    }

    /// Position in the stack.
    #[must_use]
    pub fn frame_number(&self) -> u32
    {
        self.raw.frame_number
    }

    /// Whether the engine synthesized this frame.
    #[must_use]
    pub fn is_virtual(&self) -> bool
    {
        self.raw.virtual_frame != 0
    }

    /// Symbol containing the current instruction.
    pub fn symbol(&self) -> KdResult<Option<Symbol>>
    {
        symbols::lookup(self.engine, self.instruction_offset())
    }
}

impl fmt::Debug for StackFrame<'_>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("StackFrame")
            .field("frame_number", &self.raw.frame_number)
            .field("instruction_offset", &self.instruction_offset())
            .field("return_offset", &self.return_offset())
            .field("stack_offset", &self.stack_offset())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for StackFrame<'_>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self.symbol() {
            Ok(Some(symbol)) => write!(f, "<StackFrame {} {symbol}>", self.instruction_offset()),
            _ => write!(f, "<StackFrame {}>", self.instruction_offset()),
        }
    }
}

/// Stack capture against one session's engine.
#[derive(Clone, Copy)]
pub struct StackWalker<'s>
{
    engine: &'s dyn DebugEngine,
    width: &'static dyn AddressWidth,
}

impl fmt::Debug for StackWalker<'_>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("StackWalker").field("width", &self.width).finish_non_exhaustive()
    }
}

impl<'s> StackWalker<'s>
{
    pub(crate) fn new(engine: &'s dyn DebugEngine, width: &'static dyn AddressWidth) -> Self
    {
        Self { engine, width }
    }

    /// Capture the current stack, innermost frame first.
    ///
    /// ## Errors
    ///
    /// - `EngineCallFailure`: the engine failed a capture attempt
    /// - `StackCaptureTruncated`: even the last attempt filled its array
    pub fn capture(&self) -> KdResult<Vec<StackFrame<'s>>>
    {
        let mut capacity = 0;
        for attempt in 1..=MAX_ATTEMPTS {
            capacity = attempt * CAPACITY_STEP;
            let mut frames = vec![RawStackFrame::default(); capacity];
            let count = self.engine.stack_trace(&mut frames)?;
            trace!(attempt, capacity, count, "stack capture attempt");
            if count < capacity {
                frames.truncate(count);
                debug!(frames = count, "captured stack");
                return Ok(frames
                    .into_iter()
                    .map(|raw| StackFrame::new(raw, self.engine, self.width))
                    .collect());
            }
        }
        Err(KdError::StackCaptureTruncated { capacity })
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn raw_frame_layout_matches_engine()
    {
        assert_eq!(std::mem::size_of::<RawStackFrame>(), 128);
        assert_eq!(std::mem::align_of::<RawStackFrame>(), 8);
    }
}
