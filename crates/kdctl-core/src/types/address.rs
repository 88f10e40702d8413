//! Target address type.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed target address
///
/// This wrapper around `u64` keeps target addresses apart from sizes, counts
/// and raw engine values. The engine always reports offsets as 64-bit values,
/// even for 32-bit targets; an `Address` handed out by a session has already
/// been trimmed to the session's [`AddressWidth`](super::AddressWidth).
///
/// ## Example
///
/// ```rust
/// use kdctl_core::types::Address;
///
/// let addr = Address::from(0x1000);
/// let next_addr = addr + 0x100; // Add offset
/// assert_eq!(next_addr.value(), 0x1100);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value
    ///
    /// This is equivalent to `Address::from(value)` but can be used in const contexts.
    ///
    /// ## Example
    ///
    /// ```rust
    /// use kdctl_core::types::Address;
    ///
    /// const KERNEL_BASE: Address = Address::new(0xfffff800_00000000);
    /// ```
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Add an offset to this address, checking for overflow
    ///
    /// ## Example
    ///
    /// ```rust
    /// use kdctl_core::types::Address;
    ///
    /// let addr = Address::from(0x1000);
    /// assert_eq!(addr.checked_add(0x100), Some(Address::from(0x1100)));
    /// assert_eq!(addr.checked_add(u64::MAX), None); // Overflow
    /// ```
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Subtract an offset from this address, checking for underflow
    pub fn checked_sub(self, offset: u64) -> Option<Self>
    {
        self.0.checked_sub(offset).map(Address)
    }

    /// Parse an address written in hex (`0x` prefix optional) or, with a `0n`
    /// prefix, in decimal.
    ///
    /// Backtick separators as printed by kernel debuggers (`fffff800`0000000`)
    /// are accepted.
    ///
    /// ## Example
    ///
    /// ```rust
    /// use kdctl_core::types::Address;
    ///
    /// assert_eq!(Address::parse("0x1000"), Some(Address::new(0x1000)));
    /// assert_eq!(Address::parse("fffff800`00001000"), Some(Address::new(0xfffff800_00001000)));
    /// assert_eq!(Address::parse("0n4096"), Some(Address::new(4096)));
    /// ```
    pub fn parse(text: &str) -> Option<Self>
    {
        let cleaned: String = text.trim().chars().filter(|c| *c != '`').collect();
        if let Some(decimal) = cleaned.strip_prefix("0n") {
            return decimal.parse::<u64>().ok().map(Address);
        }
        let hex = cleaned
            .strip_prefix("0x")
            .or_else(|| cleaned.strip_prefix("0X"))
            .unwrap_or(&cleaned);
        u64::from_str_radix(hex, 16).ok().map(Address)
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}
