//! # Types
//!
//! Target-independent value types used throughout the session layer.
//!
//! Addresses are always carried as 64-bit values; the session's
//! [`AddressWidth`] decides how many of those bits are meaningful.

pub mod address;
pub mod width;

// Re-export all public types
pub use address::Address;
pub use width::{AddressWidth, Width32, Width64};
