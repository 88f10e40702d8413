//! Target pointer width.
//!
//! A session resolves its target's bitness exactly once, right after attach,
//! and picks one of the two implementations below. Nothing can swap it
//! afterwards: the session only ever holds a `&'static dyn AddressWidth`.

use std::fmt;

use super::Address;
use crate::engine::DebugEngine;
use crate::error::{KdError, KdResult};
use crate::memory;

/// Pointer-sized operations for a target of fixed bitness.
pub trait AddressWidth: fmt::Debug
{
    /// Pointer width in bits (32 or 64).
    fn bits(&self) -> u32;

    /// Pointer width in bytes.
    fn pointer_size(&self) -> usize
    {
        (self.bits() / 8) as usize
    }

    /// Truncate a raw 64-bit engine value to a target address.
    fn trim(&self, raw: u64) -> Address;

    /// Read one pointer-sized value from target virtual memory.
    fn read_ptr(&self, engine: &dyn DebugEngine, address: Address) -> KdResult<u64>;

    /// Write one pointer-sized value to target virtual memory.
    fn write_ptr(&self, engine: &dyn DebugEngine, address: Address, value: u64) -> KdResult<()>;
}

/// 32-bit targets: pointers are dwords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Width32;

/// 64-bit targets: pointers are qwords.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Width64;

static WIDTH_32: Width32 = Width32;
static WIDTH_64: Width64 = Width64;

/// Pick the width implementation for a target.
#[must_use]
pub fn for_target(is_64bit: bool) -> &'static dyn AddressWidth
{
    if is_64bit {
        &WIDTH_64
    } else {
        &WIDTH_32
    }
}

impl AddressWidth for Width32
{
    fn bits(&self) -> u32
    {
        32
    }

    fn trim(&self, raw: u64) -> Address
    {
        Address::new(raw & 0xffff_ffff)
    }

    fn read_ptr(&self, engine: &dyn DebugEngine, address: Address) -> KdResult<u64>
    {
        memory::read_dword(engine, address).map(u64::from)
    }

    fn write_ptr(&self, engine: &dyn DebugEngine, address: Address, value: u64) -> KdResult<()>
    {
        let value = u32::try_from(value)
            .map_err(|_| KdError::InvalidArgument(format!("0x{value:x} does not fit a 32-bit pointer")))?;
        memory::write_dword(engine, address, value)
    }
}

impl AddressWidth for Width64
{
    fn bits(&self) -> u32
    {
        64
    }

    fn trim(&self, raw: u64) -> Address
    {
        Address::new(raw)
    }

    fn read_ptr(&self, engine: &dyn DebugEngine, address: Address) -> KdResult<u64>
    {
        memory::read_qword(engine, address)
    }

    fn write_ptr(&self, engine: &dyn DebugEngine, address: Address, value: u64) -> KdResult<()>
    {
        memory::write_qword(engine, address, value)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn trim_32_drops_sign_extension()
    {
        // 32-bit kernels report sign-extended offsets
        let width = for_target(false);
        assert_eq!(width.bits(), 32);
        assert_eq!(width.trim(0xffff_ffff_8000_1000), Address::new(0x8000_1000));
    }

    #[test]
    fn trim_64_is_identity()
    {
        let width = for_target(true);
        assert_eq!(width.bits(), 64);
        assert_eq!(width.pointer_size(), 8);
        assert_eq!(width.trim(0xffff_f800_0000_1000), Address::new(0xffff_f800_0000_1000));
    }
}
