//! Fixed-width access to target virtual memory.
//!
//! The engine's data-space calls may transfer fewer bytes than asked for
//! (for example when a read crosses into an unmapped page). Every helper here
//! requires the full transfer and reports a short one as an error.

use crate::engine::DebugEngine;
use crate::error::{KdError, KdResult};
use crate::types::Address;

/// Read exactly `buffer.len()` bytes at `address`.
///
/// ## Errors
///
/// - `EngineCallFailure`: the engine rejected the read
/// - `IncompleteMemoryAccess`: fewer bytes were readable
pub fn read_exact(engine: &dyn DebugEngine, address: Address, buffer: &mut [u8]) -> KdResult<()>
{
    let read = engine.read_virtual(address.value(), buffer)?;
    if read != buffer.len() {
        return Err(KdError::IncompleteMemoryAccess {
            address: address.value(),
            expected: buffer.len(),
            actual: read,
        });
    }
    Ok(())
}

/// Write all of `data` at `address`.
pub fn write_all(engine: &dyn DebugEngine, address: Address, data: &[u8]) -> KdResult<()>
{
    let written = engine.write_virtual(address.value(), data)?;
    if written != data.len() {
        return Err(KdError::IncompleteMemoryAccess {
            address: address.value(),
            expected: data.len(),
            actual: written,
        });
    }
    Ok(())
}

/// Read a little-endian `u32`.
pub fn read_dword(engine: &dyn DebugEngine, address: Address) -> KdResult<u32>
{
    let mut bytes = [0u8; 4];
    read_exact(engine, address, &mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

/// Read a little-endian `u64`.
pub fn read_qword(engine: &dyn DebugEngine, address: Address) -> KdResult<u64>
{
    let mut bytes = [0u8; 8];
    read_exact(engine, address, &mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

/// Write a little-endian `u32`.
pub fn write_dword(engine: &dyn DebugEngine, address: Address, value: u32) -> KdResult<()>
{
    write_all(engine, address, &value.to_le_bytes())
}

/// Write a little-endian `u64`.
pub fn write_qword(engine: &dyn DebugEngine, address: Address, value: u64) -> KdResult<()>
{
    write_all(engine, address, &value.to_le_bytes())
}
