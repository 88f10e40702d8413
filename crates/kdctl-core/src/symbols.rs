//! Symbol lookup by address.
//!
//! Only name resolution is exposed. The engine loads and searches symbol
//! files itself; nothing here parses them.

use std::fmt;

use tracing::trace;

use crate::buffer::trim_padding;
use crate::engine::DebugEngine;
use crate::error::{KdError, KdResult};
use crate::types::Address;

/// Engine symbol options applied at attach unless overridden.
pub const DEFAULT_SYMBOL_OPTIONS: u32 = SYMOPT_CASE_INSENSITIVE | SYMOPT_UNDNAME | SYMOPT_DEFERRED_LOADS | SYMOPT_LOAD_LINES;

/// Case-insensitive symbol search.
pub const SYMOPT_CASE_INSENSITIVE: u32 = 0x0000_0001;
/// Present undecorated names.
pub const SYMOPT_UNDNAME: u32 = 0x0000_0002;
/// Load symbols on first use.
pub const SYMOPT_DEFERRED_LOADS: u32 = 0x0000_0004;
/// Load line information.
pub const SYMOPT_LOAD_LINES: u32 = 0x0000_0010;

/// A symbol covering some address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol
{
    /// `module!name` as reported by the engine.
    pub name: String,
    /// Distance from the symbol start to the looked-up address.
    pub displacement: u64,
}

impl fmt::Display for Symbol
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}+0x{:x}", self.name, self.displacement)
    }
}

/// Find the symbol containing `address`.
///
/// Returns `Ok(None)` when no symbol covers it.
///
/// ## Errors
///
/// - `EngineCallFailure`: the engine failed the lookup
/// - `BufferSizeMismatch`: the name size changed between the two calls
pub fn lookup(engine: &dyn DebugEngine, address: Address) -> KdResult<Option<Symbol>>
{
    let Some((first, _)) = engine.symbol_name_by_offset(address.value(), None)? else {
        trace!(%address, "no symbol");
        return Ok(None);
    };
    let mut buffer = vec![0u8; first];
    let Some((second, displacement)) = engine.symbol_name_by_offset(address.value(), Some(&mut buffer))? else {
        return Ok(None);
    };
    if second != first {
        return Err(KdError::BufferSizeMismatch {
            query: "symbol name",
            first,
            second,
        });
    }
    Ok(Some(Symbol {
        name: trim_padding(&buffer),
        displacement,
    }))
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn symbol_renders_with_hex_displacement()
    {
        let symbol = Symbol {
            name: "nt!KiSystemCall64".to_string(),
            displacement: 0x1c,
        };
        assert_eq!(symbol.to_string(), "nt!KiSystemCall64+0x1c");
    }
}
